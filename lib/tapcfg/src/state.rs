// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Configuring an interface once it is plumbed: administrative state,
//! IPv4 address, MTU.

use crate::Error;
use crate::TapHdl;
use crate::hwaddr::HwAddrProvider;
use crate::mux::FdGuard;
use crate::sys::Family;
use crate::sys::Streams;
use illumos_sys_hdrs::LifFlags;
use illumos_sys_hdrs::SIOCGLIFFLAGS;
use illumos_sys_hdrs::SIOCGLIFMTU;
use illumos_sys_hdrs::SIOCSIFADDR;
use illumos_sys_hdrs::SIOCSIFNETMASK;
use illumos_sys_hdrs::SIOCSLIFFLAGS;
use illumos_sys_hdrs::SIOCSLIFMTU;
use illumos_sys_hdrs::ifreq;
use illumos_sys_hdrs::lifreq;
use illumos_sys_hdrs::sockaddr_in;
use std::net::Ipv4Addr;
use tapcfg_api::IfName;
use tapcfg_api::Ipv4Cidr;

/// A `lifreq` addressed to `ifname` and otherwise empty.
pub(crate) fn lifreq_for(ifname: &IfName) -> lifreq {
    let mut lifr = lifreq::default();
    lifr.set_name(ifname.as_bytes());
    lifr
}

/// An `ifreq` addressed to `ifname` carrying `addr`.
fn ifreq_for(ifname: &IfName, addr: Ipv4Addr) -> ifreq {
    let mut ifr = ifreq::default();
    ifr.set_name(ifname.as_bytes());
    ifr.set_addr_in(sockaddr_in::from_octets(addr.octets()));
    ifr
}

/// The administrative state is toggled through the IPv6 instance of
/// the interface, which every plumbed tap device has.
const ADMIN_FAMILY: Family = Family::V6;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IfStatus {
    pub ifname: IfName,
    pub up: bool,
    pub mtu: u32,
}

impl<S: Streams, H: HwAddrProvider> TapHdl<S, H> {
    pub(crate) fn get_lif_flags(
        &self,
        fd: &S::Fd,
        ifname: &IfName,
    ) -> Result<LifFlags, Error> {
        let mut lifr = lifreq_for(ifname);
        self.sys
            .lif_ioctl(fd, SIOCGLIFFLAGS, &mut lifr)
            .map_err(Error::ioctl("SIOCGLIFFLAGS"))?;
        Ok(lifr.flags())
    }

    fn control_socket(
        &self,
        family: Family,
    ) -> Result<FdGuard<'_, S>, Error> {
        let fd = self
            .sys
            .control_socket(family)
            .map_err(Error::ioctl("socket"))?;
        Ok(FdGuard::new(&self.sys, &*self.log, "control socket", fd))
    }

    /// Run `f` with a fresh control socket of `family`, for
    /// configuring an interface this process holds no
    /// [`crate::DeviceHandle`] for. The socket is closed afterwards.
    pub fn with_control_socket<T>(
        &self,
        family: Family,
        f: impl FnOnce(&S::Fd) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let sock = self.control_socket(family)?;
        f(sock.fd())
    }

    /// Administrative state and IPv4 MTU of `ifname`.
    pub fn status(&self, ifname: &IfName) -> Result<IfStatus, Error> {
        let up = self.admin_state(ifname)?;
        let mtu = self.with_control_socket(Family::V4, |ctl| {
            self.mtu(ctl, ifname)
        })?;
        Ok(IfStatus { ifname: ifname.clone(), up, mtu })
    }

    /// Bring the interface up or down.
    ///
    /// This is a read-modify-write of the interface flags; setting the
    /// state it already has writes the same flags back.
    pub fn set_admin_state(
        &self,
        ifname: &IfName,
        up: bool,
    ) -> Result<(), Error> {
        let sock = self.control_socket(ADMIN_FAMILY)?;
        let flags = self.get_lif_flags(sock.fd(), ifname)?;
        let flags = if up {
            flags | LifFlags::IFF_UP
        } else {
            flags.difference(LifFlags::IFF_UP)
        };

        let mut lifr = lifreq_for(ifname);
        lifr.set_flags(flags);
        self.sys
            .lif_ioctl(sock.fd(), SIOCSLIFFLAGS, &mut lifr)
            .map_err(Error::ioctl("SIOCSLIFFLAGS"))
    }

    /// Whether the interface is administratively up.
    pub fn admin_state(&self, ifname: &IfName) -> Result<bool, Error> {
        let sock = self.control_socket(ADMIN_FAMILY)?;
        let flags = self.get_lif_flags(sock.fd(), ifname)?;
        Ok(flags.contains(LifFlags::IFF_UP))
    }

    /// Set the IPv4 address, then the netmask, of `ifname` through
    /// `ctl`, usually the IPv4 multiplexor of a [`crate::DeviceHandle`].
    ///
    /// The two writes are separate requests. When the netmask write
    /// fails with [`Error::NetmaskSetFailed`] the address stays set.
    pub fn set_ipv4_address(
        &self,
        ctl: &S::Fd,
        ifname: &IfName,
        addr: Ipv4Addr,
        mask: Ipv4Addr,
    ) -> Result<(), Error> {
        // These requests use the older ifreq with its shorter name.
        if !ifname.fits_ifreq() {
            return Err(Error::InvalidName(format!(
                "{ifname} is too long for IPv4 address configuration"
            )));
        }

        let mut ifr = ifreq_for(ifname, addr);
        self.sys.if_ioctl(ctl, SIOCSIFADDR, &mut ifr).map_err(|source| {
            Error::AddressSetFailed { ifname: ifname.clone(), source }
        })?;

        let mut ifr = ifreq_for(ifname, mask);
        self.sys.if_ioctl(ctl, SIOCSIFNETMASK, &mut ifr).map_err(
            |source| Error::NetmaskSetFailed { ifname: ifname.clone(), source },
        )
    }

    pub fn set_ipv4_cidr(
        &self,
        ctl: &S::Fd,
        ifname: &IfName,
        cidr: Ipv4Cidr,
    ) -> Result<(), Error> {
        self.set_ipv4_address(ctl, ifname, cidr.ip(), cidr.netmask())
    }

    pub fn mtu(&self, ctl: &S::Fd, ifname: &IfName) -> Result<u32, Error> {
        let mut lifr = lifreq_for(ifname);
        self.sys
            .lif_ioctl(ctl, SIOCGLIFMTU, &mut lifr)
            .map_err(Error::ioctl("SIOCGLIFMTU"))?;
        Ok(lifr.mtu())
    }

    pub fn set_mtu(
        &self,
        ctl: &S::Fd,
        ifname: &IfName,
        mtu: u32,
    ) -> Result<(), Error> {
        let mut lifr = lifreq_for(ifname);
        lifr.set_mtu(mtu);
        self.sys
            .lif_ioctl(ctl, SIOCSLIFMTU, &mut lifr)
            .map_err(Error::ioctl("SIOCSLIFMTU"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn requests_carry_name() {
        let ifname = IfName::new("tap3").unwrap();
        assert_eq!(lifreq_for(&ifname).name(), b"tap3");

        let ifr = ifreq_for(&ifname, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ifr.name(), b"tap3");
        assert_eq!(ifr.addr_in().octets(), [10, 0, 0, 1]);
    }
}
