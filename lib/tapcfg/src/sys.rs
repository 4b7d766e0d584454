// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The kernel seam.
//!
//! Every open(2), ioctl(2), and putmsg(2)/getmsg(2) this crate issues
//! goes through [`Streams`]. [`IllumosStreams`] is the real thing;
//! tests substitute a scripted kernel.

use core::fmt;
use core::mem::size_of;
use illumos_sys_hdrs::I_PLINK;
use illumos_sys_hdrs::I_POP;
use illumos_sys_hdrs::I_PUNLINK;
use illumos_sys_hdrs::I_PUSH;
use illumos_sys_hdrs::I_STR;
use illumos_sys_hdrs::c_char;
use illumos_sys_hdrs::c_int;
use illumos_sys_hdrs::ifreq;
use illumos_sys_hdrs::ioc_t;
use illumos_sys_hdrs::lifreq;
use illumos_sys_hdrs::strioctl;
use std::ffi::CStr;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::path::Path;

/// A STREAMS module that gets pushed onto an interface stream.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Module {
    Ip,
    Arp,
}

impl Module {
    pub fn name(&self) -> &'static CStr {
        match self {
            Self::Ip => c"ip",
            Self::Arp => c"arp",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Ip => "ip",
            Self::Arp => "arp",
        };
        write!(f, "{s}")
    }
}

/// Which IP protocol stack a multiplexor or control socket belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Family {
    V4,
    V6,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "IPv4"),
            Self::V6 => write!(f, "IPv6"),
        }
    }
}

/// The id the kernel hands back from `I_PLINK`; needed to undo the
/// link with `I_PUNLINK`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MuxId(pub c_int);

impl fmt::Display for MuxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kernel operations needed to plumb and unplumb a device.
///
/// Descriptors are owned values. Every descriptor handed out by
/// [`Streams::open`] or [`Streams::control_socket`] must eventually
/// be given back to [`Streams::close`].
pub trait Streams {
    type Fd: fmt::Debug;

    /// Open a device node read-write.
    fn open(&self, node: &Path) -> io::Result<Self::Fd>;

    /// Open a datagram socket of the given family, used only as a
    /// target for interface ioctls.
    fn control_socket(&self, family: Family) -> io::Result<Self::Fd>;

    fn close(&self, fd: Self::Fd);

    /// `I_PUSH`
    fn push(&self, fd: &Self::Fd, module: Module) -> io::Result<()>;

    /// `I_POP`
    fn pop(&self, fd: &Self::Fd) -> io::Result<()>;

    /// `I_STR`: send `cmd` downstream with `data` as its payload and
    /// return the ioctl's result.
    fn str_ioctl(
        &self,
        fd: &Self::Fd,
        cmd: ioc_t,
        data: &mut [u8],
    ) -> io::Result<c_int>;

    /// An ioctl carrying a `struct lifreq`.
    fn lif_ioctl(
        &self,
        fd: &Self::Fd,
        req: ioc_t,
        lifr: &mut lifreq,
    ) -> io::Result<()>;

    /// An ioctl carrying a `struct ifreq`.
    fn if_ioctl(
        &self,
        fd: &Self::Fd,
        req: ioc_t,
        ifr: &mut ifreq,
    ) -> io::Result<()>;

    /// `I_PLINK`: persistently link `lower` under the multiplexor
    /// `mux`.
    fn plink(&self, mux: &Self::Fd, lower: &Self::Fd) -> io::Result<MuxId>;

    /// `I_PUNLINK`
    fn punlink(&self, mux: &Self::Fd, muxid: MuxId) -> io::Result<()>;

    /// putmsg(2) with a control part only.
    fn putmsg(&self, fd: &Self::Fd, ctl: &[u8], flags: c_int)
    -> io::Result<()>;

    /// getmsg(2) of a control part into `ctl`, returning its length.
    fn getmsg(&self, fd: &Self::Fd, ctl: &mut [u8]) -> io::Result<usize>;
}

/// Plain C structures that may travel as an `I_STR` payload.
///
/// # Safety
///
/// Every bit pattern must be a valid value of the type and every byte
/// of a value must be initialized.
pub unsafe trait StrPayload: Copy {}

// Safety: a plain integer.
unsafe impl StrPayload for c_int {}
// Safety: `lifreq::default()` zeroes the full union, and it is only
// ever built from a default value.
unsafe impl StrPayload for lifreq {}

/// View a payload as the bytes handed to `I_STR`.
pub fn payload_bytes<T: StrPayload>(val: &mut T) -> &mut [u8] {
    // Safety: guaranteed by the `StrPayload` contract.
    unsafe {
        core::slice::from_raw_parts_mut(
            val as *mut T as *mut u8,
            size_of::<T>(),
        )
    }
}

/// Read a payload back out of `I_STR` bytes.
pub fn read_payload<T: StrPayload>(bytes: &[u8]) -> Option<T> {
    if bytes.len() < size_of::<T>() {
        return None;
    }

    // Safety: length checked above; any bit pattern is a valid `T`.
    Some(unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

/// The real kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct IllumosStreams;

impl Streams for IllumosStreams {
    type Fd = OwnedFd;

    fn open(&self, node: &Path) -> io::Result<OwnedFd> {
        let file = OpenOptions::new().read(true).write(true).open(node)?;
        Ok(file.into())
    }

    fn control_socket(&self, family: Family) -> io::Result<OwnedFd> {
        let domain = match family {
            Family::V4 => libc::AF_INET,
            Family::V6 => libc::AF_INET6,
        };
        let fd = unsafe { libc::socket(domain, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        // Safety: socket(3SOCKET) just handed us this descriptor.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn close(&self, fd: OwnedFd) {
        drop(fd);
    }

    fn push(&self, fd: &OwnedFd, module: Module) -> io::Result<()> {
        let name = module.name().as_ptr() as *mut c_char;
        check(unsafe { ioctl(fd.as_raw_fd(), I_PUSH, name) }).map(|_| ())
    }

    fn pop(&self, fd: &OwnedFd) -> io::Result<()> {
        let null = core::ptr::null_mut::<c_char>();
        check(unsafe { ioctl(fd.as_raw_fd(), I_POP, null) }).map(|_| ())
    }

    fn str_ioctl(
        &self,
        fd: &OwnedFd,
        cmd: ioc_t,
        data: &mut [u8],
    ) -> io::Result<c_int> {
        let mut strioc =
            strioctl::new(cmd, data.as_mut_ptr() as *mut c_char, data.len());
        check(unsafe { ioctl(fd.as_raw_fd(), I_STR, &mut strioc) })
    }

    fn lif_ioctl(
        &self,
        fd: &OwnedFd,
        req: ioc_t,
        lifr: &mut lifreq,
    ) -> io::Result<()> {
        check(unsafe { ioctl(fd.as_raw_fd(), req, lifr) }).map(|_| ())
    }

    fn if_ioctl(
        &self,
        fd: &OwnedFd,
        req: ioc_t,
        ifr: &mut ifreq,
    ) -> io::Result<()> {
        check(unsafe { ioctl(fd.as_raw_fd(), req, ifr) }).map(|_| ())
    }

    fn plink(&self, mux: &OwnedFd, lower: &OwnedFd) -> io::Result<MuxId> {
        let ret =
            unsafe { ioctl_int(mux.as_raw_fd(), I_PLINK, lower.as_raw_fd()) };
        check(ret).map(MuxId)
    }

    fn punlink(&self, mux: &OwnedFd, muxid: MuxId) -> io::Result<()> {
        check(unsafe { ioctl_int(mux.as_raw_fd(), I_PUNLINK, muxid.0) })
            .map(|_| ())
    }

    fn putmsg(
        &self,
        fd: &OwnedFd,
        ctl: &[u8],
        flags: c_int,
    ) -> io::Result<()> {
        msg::send(fd.as_raw_fd(), ctl, flags)
    }

    fn getmsg(&self, fd: &OwnedFd, ctl: &mut [u8]) -> io::Result<usize> {
        msg::recv(fd.as_raw_fd(), ctl)
    }
}

fn check(ret: c_int) -> io::Result<c_int> {
    if ret == -1 { Err(io::Error::last_os_error()) } else { Ok(ret) }
}

unsafe fn ioctl<T>(fd: c_int, req: ioc_t, arg: *mut T) -> c_int {
    // Most other OSes define the request argument to be ulong_t rather
    // than int. Let the cast pick whatever this libc wants so the crate
    // builds everywhere, even though it only plumbs on illumos.
    unsafe { libc::ioctl(fd, req as _, arg) }
}

unsafe fn ioctl_int(fd: c_int, req: ioc_t, arg: c_int) -> c_int {
    unsafe { libc::ioctl(fd, req as _, arg) }
}

#[cfg(any(target_os = "illumos", target_os = "solaris"))]
mod msg {
    use illumos_sys_hdrs::c_int;
    use illumos_sys_hdrs::strbuf;
    use std::io;

    unsafe extern "C" {
        fn putmsg(
            fd: c_int,
            ctlptr: *const strbuf,
            dataptr: *const strbuf,
            flags: c_int,
        ) -> c_int;

        fn getmsg(
            fd: c_int,
            ctlptr: *mut strbuf,
            dataptr: *mut strbuf,
            flagsp: *mut c_int,
        ) -> c_int;
    }

    pub(super) fn send(fd: c_int, ctl: &[u8], flags: c_int) -> io::Result<()> {
        let ctlbuf = strbuf {
            maxlen: 0,
            len: ctl.len() as c_int,
            buf: ctl.as_ptr() as *mut _,
        };
        let ret = unsafe { putmsg(fd, &ctlbuf, core::ptr::null(), flags) };
        super::check(ret).map(|_| ())
    }

    pub(super) fn recv(fd: c_int, ctl: &mut [u8]) -> io::Result<usize> {
        let mut ctlbuf = strbuf {
            maxlen: ctl.len() as c_int,
            len: 0,
            buf: ctl.as_mut_ptr() as *mut _,
        };
        let mut flags: c_int = 0;
        let ret = unsafe {
            getmsg(fd, &mut ctlbuf, core::ptr::null_mut(), &mut flags)
        };
        super::check(ret)?;

        // A len of -1 means the message had no control part.
        Ok(usize::try_from(ctlbuf.len).unwrap_or(0))
    }
}

#[cfg(not(any(target_os = "illumos", target_os = "solaris")))]
mod msg {
    use illumos_sys_hdrs::c_int;
    use std::io;

    pub(super) fn send(
        _fd: c_int,
        _ctl: &[u8],
        _flags: c_int,
    ) -> io::Result<()> {
        Err(io::Error::from_raw_os_error(libc::ENOSYS))
    }

    pub(super) fn recv(_fd: c_int, _ctl: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::from_raw_os_error(libc::ENOSYS))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use illumos_sys_hdrs::LifFlags;

    #[test]
    fn lifreq_payload_round_trips() {
        let mut lifr = lifreq::default();
        lifr.set_name(b"tap4");
        lifr.set_ppa(4);
        lifr.set_flags(LifFlags::IFF_IPV6);

        let bytes = payload_bytes(&mut lifr).to_vec();
        let back: lifreq = read_payload(&bytes).unwrap();
        assert_eq!(back.name(), b"tap4");
        assert_eq!(back.ppa(), 4);
        assert_eq!(back.flags(), LifFlags::IFF_IPV6);
        assert!(read_payload::<lifreq>(&bytes[..8]).is_none());
    }

    #[test]
    fn module_names() {
        assert_eq!(Module::Ip.name().to_bytes(), b"ip");
        assert_eq!(Module::Arp.to_string(), "arp");
    }
}
