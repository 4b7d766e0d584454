// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Plumbing a tap device into IPv4 and IPv6, and unplumbing it.
//!
//! The links made here are persistent: they outlive the descriptors
//! and even the process that made them. Nothing is undone implicitly
//! once [`TapHdl::bind`] returns, so a handle must be given to
//! [`TapHdl::unbind`] for the kernel to forget the interface.

use crate::Error;
use crate::TapHdl;
use crate::hwaddr::HwAddrCtx;
use crate::hwaddr::HwAddrProvider;
use crate::mux::FdGuard;
use crate::mux::Multiplexor;
use crate::ppa::Allocator;
use crate::provider::LogLevel;
use crate::state::lifreq_for;
use crate::sys::Family;
use crate::sys::Module;
use crate::sys::MuxId;
use crate::sys::Streams;
use illumos_sys_hdrs::ARP_MUXID;
use illumos_sys_hdrs::IP_MUXID;
use illumos_sys_hdrs::SIOCGLIFMUXID;
use illumos_sys_hdrs::SIOCSLIFMUXID;
use illumos_sys_hdrs::c_int;
use std::path::Path;
use tapcfg_api::IfName;
use tapcfg_api::MacAddr;
use tapcfg_api::Ppa;

/// One tap device plumbed into both IP stacks.
///
/// Only [`TapHdl::bind`] makes these, and only once every step has
/// succeeded.
#[derive(Debug)]
pub struct DeviceHandle<F> {
    tap: F,
    ifname: IfName,
    ppa: Ppa,
    hwaddr: MacAddr,
    ip4_ctl: Option<F>,
    ip6_ctl: Option<F>,
}

impl<F> DeviceHandle<F> {
    /// The stream frames are read from and written to.
    pub fn tap_fd(&self) -> &F {
        &self.tap
    }

    pub fn ifname(&self) -> &IfName {
        &self.ifname
    }

    pub fn ppa(&self) -> Ppa {
        self.ppa
    }

    /// The address learned at bind time, or zero if it couldn't be.
    pub fn hwaddr(&self) -> MacAddr {
        self.hwaddr
    }

    /// The IPv4 multiplexor, for [`TapHdl::set_ipv4_address`] and
    /// friends. Gone once the handle is unbound.
    pub fn ip4_ctl(&self) -> Option<&F> {
        self.ip4_ctl.as_ref()
    }

    pub fn ip6_ctl(&self) -> Option<&F> {
        self.ip6_ctl.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.ip4_ctl.is_some() && self.ip6_ctl.is_some()
    }
}

impl<S: Streams, H: HwAddrProvider> TapHdl<S, H> {
    fn multiplexor(&self) -> Multiplexor<'_, S> {
        Multiplexor::new(
            &self.sys,
            &*self.log,
            &self.cfg.tap_node,
            &self.cfg.arp_node,
        )
    }

    fn open_node(
        &self,
        what: &'static str,
        node: &Path,
    ) -> Result<FdGuard<'_, S>, Error> {
        FdGuard::open(&self.sys, &*self.log, what, node).inspect_err(|e| {
            self.log(
                LogLevel::Note,
                &format!(
                    "{e}: check that the tap driver is installed and that \
                    you have network configuration privileges"
                ),
            );
        })
    }

    /// Plumb a tap device named like `requested`, e.g. `tap3`.
    ///
    /// With `fallback`, a name that doesn't parse or whose PPA is
    /// taken leads to the first free PPA in the probe range instead.
    ///
    /// On error nothing acquired by this call is left behind: links
    /// are undone, IPv4 ARP then IPv4 IP then IPv6, and descriptors
    /// closed newest first. Failing to learn the hardware address is
    /// not an error; the handle then carries [`MacAddr::ZERO`].
    pub fn bind(
        &self,
        requested: &str,
        fallback: bool,
    ) -> Result<DeviceHandle<S::Fd>, Error> {
        let ip4 = self.open_node("IPv4 multiplexor", &self.cfg.ip_node)?;
        let ip6 = self.open_node("IPv6 multiplexor", &self.cfg.ip6_node)?;
        let tap = self.open_node("tap device", &self.cfg.tap_node)?;

        let ppa = Allocator::new(
            &self.sys,
            &*self.log,
            &self.cfg.name_prefix,
            self.cfg.probe_count,
        )
        .allocate(tap.fd(), requested, fallback)?;
        let ifname = IfName::with_ppa(&self.cfg.name_prefix, ppa)
            .map_err(Error::InvalidName)?;
        self.log(LogLevel::Debug, &format!("binding {ifname} (PPA {ppa})"));

        let mux = self.multiplexor();

        // IPv4: the IP stream also carries ARP, and a separate ARP
        // stream is linked beside it.
        let ip_stream = mux.prepare(Family::V4, &ifname, ppa)?;
        mux.push(ip_stream.stream.fd(), Module::Arp)?;

        // Whatever sits on the multiplexor is in the way of ARP.
        let _ = self.sys.pop(ip4.fd());
        mux.push(ip4.fd(), Module::Arp)?;

        let arp_stream = mux.prepare_arp(&ip_stream.lifr, &ifname)?;
        let ip_link = mux.link(ip4.fd(), ip_stream.stream, &ifname, "IPv4")?;
        let arp_link = mux.link(ip4.fd(), arp_stream, &ifname, "ARP")?;
        let (ip_muxid, arp_muxid) = (ip_link.muxid(), arp_link.muxid());
        self.set_muxids(ip4.fd(), &ifname, ip_muxid, arp_muxid)?;

        // IPv6: IP only.
        let ip6_link = mux.attach(ip6.fd(), Family::V6, &ifname, ppa)?;
        if let Err(e) =
            self.set_muxids(ip6.fd(), &ifname, ip6_link.muxid(), MuxId(0))
        {
            // The IPv4 links go first, ARP before IP.
            drop(arp_link);
            drop(ip_link);
            drop(ip6_link);
            return Err(e);
        }

        let hwaddr = self.learn_hwaddr(tap.fd(), ip4.fd(), &ifname, ppa);

        ip6_link.keep();
        arp_link.keep();
        ip_link.keep();

        Ok(DeviceHandle {
            tap: tap.keep(),
            ifname,
            ppa,
            hwaddr,
            ip4_ctl: Some(ip4.keep()),
            ip6_ctl: Some(ip6.keep()),
        })
    }

    fn set_muxids(
        &self,
        mux: &S::Fd,
        ifname: &IfName,
        ip: MuxId,
        arp: MuxId,
    ) -> Result<(), Error> {
        let mut muxids: [c_int; 2] = [0; 2];
        muxids[IP_MUXID] = ip.0;
        muxids[ARP_MUXID] = arp.0;

        let mut lifr = lifreq_for(ifname);
        lifr.set_muxids(muxids);
        self.sys
            .lif_ioctl(mux, SIOCSLIFMUXID, &mut lifr)
            .map_err(Error::ioctl("SIOCSLIFMUXID"))
    }

    /// Best effort: a device without a known address still passes
    /// frames.
    fn learn_hwaddr(
        &self,
        tap: &S::Fd,
        ctl: &S::Fd,
        ifname: &IfName,
        ppa: Ppa,
    ) -> MacAddr {
        let ctx = HwAddrCtx { tap, ctl, ifname, ppa };
        let res = self
            .hwaddr
            .prepare(&self.sys, &ctx)
            .and_then(|_| self.hwaddr.query(&self.sys, &ctx));

        match res {
            Ok(mac) => mac,
            Err(e) => {
                self.log(
                    LogLevel::Warn,
                    &format!(
                        "could not learn hardware address of {ifname}: {e}"
                    ),
                );
                MacAddr::ZERO
            }
        }
    }

    /// Read the hardware address from the device, bypassing the value
    /// cached at bind time.
    pub fn query_hwaddr(
        &self,
        dev: &DeviceHandle<S::Fd>,
    ) -> Result<MacAddr, Error> {
        let ctl = dev.ip4_ctl.as_ref().ok_or(Error::NotBound)?;
        let ctx = HwAddrCtx {
            tap: &dev.tap,
            ctl,
            ifname: &dev.ifname,
            ppa: dev.ppa,
        };
        self.hwaddr.query(&self.sys, &ctx).map_err(|source| {
            Error::HardwareAddressQueryFailed {
                ifname: dev.ifname.clone(),
                source,
            }
        })
    }

    /// The hardware address cached in `dev`.
    pub fn hwaddr(&self, dev: &DeviceHandle<S::Fd>) -> MacAddr {
        dev.hwaddr
    }

    /// Change the hardware address. The cached value only changes if
    /// the device accepted the new one.
    pub fn set_hwaddr(
        &self,
        dev: &mut DeviceHandle<S::Fd>,
        mac: MacAddr,
    ) -> Result<(), Error> {
        let ctl = dev.ip4_ctl.as_ref().ok_or(Error::NotBound)?;
        let ctx = HwAddrCtx {
            tap: &dev.tap,
            ctl,
            ifname: &dev.ifname,
            ppa: dev.ppa,
        };
        self.hwaddr.set(&self.sys, &ctx, mac)?;
        dev.hwaddr = mac;
        Ok(())
    }

    /// Unplumb `dev` from both IP stacks.
    ///
    /// The muxids are read back from the kernel rather than
    /// remembered. The first failure stops the teardown and is
    /// returned; whatever was not yet undone stays in place and `dev`
    /// stays bound. On success the
    /// multiplexor descriptors are closed; the tap descriptor is left
    /// to [`TapHdl::release`].
    pub fn unbind(&self, dev: &mut DeviceHandle<S::Fd>) -> Result<(), Error> {
        let (Some(ip4), Some(ip6)) =
            (dev.ip4_ctl.as_ref(), dev.ip6_ctl.as_ref())
        else {
            return Err(Error::NotBound);
        };

        self.unplumb(ip4, ip6, &dev.ifname)?;

        if let Some(fd) = dev.ip4_ctl.take() {
            self.sys.close(fd);
        }
        if let Some(fd) = dev.ip6_ctl.take() {
            self.sys.close(fd);
        }
        self.log(LogLevel::Debug, &format!("unbound {}", dev.ifname));
        Ok(())
    }

    /// Unplumb an interface this process holds no handle for, e.g.
    /// one left behind by a process that exited without unbinding.
    pub fn unbind_by_name(&self, ifname: &IfName) -> Result<(), Error> {
        let ip4 = self.open_node("IPv4 multiplexor", &self.cfg.ip_node)?;
        let ip6 = self.open_node("IPv6 multiplexor", &self.cfg.ip6_node)?;
        self.unplumb(ip4.fd(), ip6.fd(), ifname)
    }

    /// Close whatever descriptors `dev` still holds. Call
    /// [`TapHdl::unbind`] first; links left in place are not undone
    /// here.
    pub fn release(&self, dev: DeviceHandle<S::Fd>) {
        if dev.is_bound() {
            self.log(
                LogLevel::Warn,
                &format!("releasing {} while still plumbed", dev.ifname),
            );
        }

        let DeviceHandle { tap, ip4_ctl, ip6_ctl, .. } = dev;
        for fd in [ip6_ctl, ip4_ctl].into_iter().flatten() {
            self.sys.close(fd);
        }
        self.sys.close(tap);
    }

    fn unplumb(
        &self,
        ip4: &S::Fd,
        ip6: &S::Fd,
        ifname: &IfName,
    ) -> Result<(), Error> {
        let mux = self.multiplexor();

        let muxids = self.get_muxids(ip4, ifname)?;
        mux.detach(ip4, MuxId(muxids[ARP_MUXID]))?;
        mux.detach(ip4, MuxId(muxids[IP_MUXID]))?;

        let muxids = self.get_muxids(ip6, ifname)?;
        mux.detach(ip6, MuxId(muxids[IP_MUXID]))
    }

    fn get_muxids(
        &self,
        mux: &S::Fd,
        ifname: &IfName,
    ) -> Result<[c_int; 2], Error> {
        // The flags query fails cleanly for an interface that isn't
        // plumbed on this stack.
        self.get_lif_flags(mux, ifname)?;

        let mut lifr = lifreq_for(ifname);
        self.sys
            .lif_ioctl(mux, SIOCGLIFMUXID, &mut lifr)
            .map_err(Error::ioctl("SIOCGLIFMUXID"))?;
        Ok(lifr.muxids())
    }
}
