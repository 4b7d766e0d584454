// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Building interface streams and linking them under the IP
//! multiplexors.
//!
//! Everything acquired here is held by a guard. A guard that goes out
//! of scope undoes its acquisition, so an early return through `?`
//! releases what was acquired so far, newest first. Once a bind has
//! fully succeeded the guards are disarmed with `keep()`.

use crate::Error;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::sys::Family;
use crate::sys::Module;
use crate::sys::MuxId;
use crate::sys::Streams;
use crate::sys::payload_bytes;
use core::mem::ManuallyDrop;
use illumos_sys_hdrs::LifFlags;
use illumos_sys_hdrs::SIOCGLIFFLAGS;
use illumos_sys_hdrs::SIOCSLIFNAME;
use illumos_sys_hdrs::lifreq;
use std::io;
use std::path::Path;
use tapcfg_api::IfName;
use tapcfg_api::Ppa;

/// A descriptor that is closed when the guard is dropped.
pub(crate) struct FdGuard<'a, S: Streams> {
    sys: &'a S,
    log: &'a dyn LogProvider,
    what: &'static str,
    fd: ManuallyDrop<S::Fd>,
}

impl<'a, S: Streams> FdGuard<'a, S> {
    pub(crate) fn open(
        sys: &'a S,
        log: &'a dyn LogProvider,
        what: &'static str,
        node: &Path,
    ) -> Result<Self, Error> {
        let fd = sys.open(node).map_err(|source| Error::DeviceUnavailable {
            node: node.to_path_buf(),
            source,
        })?;
        Ok(Self::new(sys, log, what, fd))
    }

    pub(crate) fn new(
        sys: &'a S,
        log: &'a dyn LogProvider,
        what: &'static str,
        fd: S::Fd,
    ) -> Self {
        Self { sys, log, what, fd: ManuallyDrop::new(fd) }
    }

    pub(crate) fn fd(&self) -> &S::Fd {
        &self.fd
    }

    /// Hand the descriptor to the caller; nothing is closed.
    pub(crate) fn keep(self) -> S::Fd {
        let mut this = ManuallyDrop::new(self);
        // Safety: `this` is never dropped, so the descriptor is taken
        // exactly once.
        unsafe { ManuallyDrop::take(&mut this.fd) }
    }
}

impl<S: Streams> Drop for FdGuard<'_, S> {
    fn drop(&mut self) {
        self.log.log(LogLevel::Debug, &format!("closing {}", self.what));
        // Safety: drop runs at most once and `keep()` skips it.
        let fd = unsafe { ManuallyDrop::take(&mut self.fd) };
        self.sys.close(fd);
    }
}

/// A persistent link that is unlinked when the guard is dropped.
pub(crate) struct LinkGuard<'a, S: Streams> {
    sys: &'a S,
    log: &'a dyn LogProvider,
    mux: &'a S::Fd,
    muxid: MuxId,
    what: &'static str,
    armed: bool,
}

impl<S: Streams> LinkGuard<'_, S> {
    pub(crate) fn muxid(&self) -> MuxId {
        self.muxid
    }

    pub(crate) fn keep(mut self) -> MuxId {
        self.armed = false;
        self.muxid
    }
}

impl<S: Streams> Drop for LinkGuard<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        self.log.log(
            LogLevel::Debug,
            &format!("unlinking {} stream (muxid {})", self.what, self.muxid),
        );

        // A failed unwind step never replaces the error that caused
        // the unwind.
        if let Err(e) = self.sys.punlink(self.mux, self.muxid) {
            self.log.log(
                LogLevel::Error,
                &format!(
                    "failed to unlink {} stream (muxid {}): {e}",
                    self.what, self.muxid
                ),
            );
        }
    }
}

impl Family {
    /// The flags a fresh interface stream of this family is named
    /// with, given the flags the stream reported.
    pub fn plumb_flags(self, flags: LifFlags) -> LifFlags {
        match self {
            Self::V4 => flags,
            Self::V6 => {
                (flags | LifFlags::IFF_IPV6)
                    .difference(LifFlags::IFF_BROADCAST | LifFlags::IFF_IPV4)
            }
        }
    }

    pub(crate) fn ip_stream(self) -> &'static str {
        match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        }
    }
}

/// Build the `SIOCSLIFNAME` request for a stream from the flags it
/// currently reports.
pub fn name_request(
    current: lifreq,
    family: Family,
    ifname: &IfName,
    ppa: Ppa,
) -> lifreq {
    let mut req = current;
    req.set_name(ifname.as_bytes());
    req.set_ppa(ppa.val());
    req.set_flags(family.plumb_flags(current.flags()));
    req
}

/// An interface stream that has been named but not yet linked.
pub(crate) struct Prepared<'a, S: Streams> {
    pub(crate) stream: FdGuard<'a, S>,
    pub(crate) lifr: lifreq,
}

/// Pushes protocol modules onto fresh clones of the tap device and
/// links them under a multiplexor.
pub struct Multiplexor<'a, S: Streams> {
    sys: &'a S,
    log: &'a dyn LogProvider,
    stream_node: &'a Path,
    arp_node: &'a Path,
}

impl<'a, S: Streams> Multiplexor<'a, S> {
    pub fn new(
        sys: &'a S,
        log: &'a dyn LogProvider,
        stream_node: &'a Path,
        arp_node: &'a Path,
    ) -> Self {
        Self { sys, log, stream_node, arp_node }
    }

    pub(crate) fn push(
        &self,
        fd: &S::Fd,
        module: Module,
    ) -> Result<(), Error> {
        self.sys
            .push(fd, module)
            .map_err(|source| Error::ModulePushFailed { module, source })
    }

    /// Open a fresh clone, push `ip`, and name it `ifname` on `ppa`.
    pub(crate) fn prepare(
        &self,
        family: Family,
        ifname: &IfName,
        ppa: Ppa,
    ) -> Result<Prepared<'a, S>, Error> {
        let stream = FdGuard::open(
            self.sys,
            self.log,
            "interface stream",
            self.stream_node,
        )?;
        self.push(stream.fd(), Module::Ip)?;

        let name_err = |source: io::Error| Error::NameAssignFailed {
            ifname: ifname.clone(),
            family,
            source,
        };

        let mut current = lifreq::default();
        self.sys
            .lif_ioctl(stream.fd(), SIOCGLIFFLAGS, &mut current)
            .map_err(name_err)?;

        let mut lifr = name_request(current, family, ifname, ppa);
        self.sys
            .lif_ioctl(stream.fd(), SIOCSLIFNAME, &mut lifr)
            .map_err(name_err)?;

        Ok(Prepared { stream, lifr })
    }

    /// Open a fresh clone, push `arp`, and tell it the name the IP
    /// stream was given in `lifr`.
    pub(crate) fn prepare_arp(
        &self,
        lifr: &lifreq,
        ifname: &IfName,
    ) -> Result<FdGuard<'a, S>, Error> {
        let stream =
            FdGuard::open(self.sys, self.log, "ARP stream", self.arp_node)?;
        self.push(stream.fd(), Module::Arp)?;

        // ARP doesn't answer SIOCSLIFNAME as a regular ioctl, it has
        // to travel downstream as an I_STR.
        let mut req = *lifr;
        self.sys
            .str_ioctl(stream.fd(), SIOCSLIFNAME, payload_bytes(&mut req))
            .map_err(|source| Error::NameAssignFailed {
                ifname: ifname.clone(),
                family: Family::V4,
                source,
            })?;

        Ok(stream)
    }

    /// Link `stream` under `mux`, then close it. The link holds the
    /// stream from here on.
    pub(crate) fn link<'m>(
        &self,
        mux: &'m S::Fd,
        stream: FdGuard<'_, S>,
        ifname: &IfName,
        what: &'static str,
    ) -> Result<LinkGuard<'m, S>, Error>
    where
        'a: 'm,
    {
        let muxid =
            self.sys.plink(mux, stream.fd()).map_err(|source| {
                Error::LinkFailed { ifname: ifname.clone(), what, source }
            })?;
        drop(stream);

        Ok(LinkGuard {
            sys: self.sys,
            log: self.log,
            mux,
            muxid,
            what,
            armed: true,
        })
    }

    /// Prepare an `ip` stream for `family` and link it under `mux`.
    pub(crate) fn attach<'m>(
        &self,
        mux: &'m S::Fd,
        family: Family,
        ifname: &IfName,
        ppa: Ppa,
    ) -> Result<LinkGuard<'m, S>, Error>
    where
        'a: 'm,
    {
        let prepared = self.prepare(family, ifname, ppa)?;
        self.link(mux, prepared.stream, ifname, family.ip_stream())
    }

    /// Undo a link made by [`Multiplexor::attach`]. There is no retry.
    pub fn detach(&self, mux: &S::Fd, muxid: MuxId) -> Result<(), Error> {
        self.sys
            .punlink(mux, muxid)
            .map_err(|source| Error::UnlinkFailed { muxid, source })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn v6_flags_drop_broadcast() {
        let flags = LifFlags::IFF_BROADCAST
            | LifFlags::IFF_MULTICAST
            | LifFlags::IFF_IPV4;
        let v6 = Family::V6.plumb_flags(flags);
        assert_eq!(v6, LifFlags::IFF_MULTICAST | LifFlags::IFF_IPV6);
        assert_eq!(Family::V4.plumb_flags(flags), flags);
    }

    #[test]
    fn name_request_leaves_input_alone() {
        let mut current = lifreq::default();
        current.set_flags(LifFlags::IFF_BROADCAST | LifFlags::IFF_IPV4);
        let ifname = IfName::new("tap7").unwrap();

        let req = name_request(current, Family::V6, &ifname, Ppa::new(7));
        assert_eq!(req.name(), b"tap7");
        assert_eq!(req.ppa(), 7);
        assert_eq!(req.flags(), LifFlags::IFF_IPV6);

        assert_eq!(current.name(), b"");
        assert_eq!(
            current.flags(),
            LifFlags::IFF_BROADCAST | LifFlags::IFF_IPV4
        );
    }
}
