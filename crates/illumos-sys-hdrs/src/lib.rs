// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The slice of the illumos userland ABI needed to plumb a STREAMS
//! pseudo-Ethernet device into IP: `stropts.h`, `sockio.h`,
//! `net/if.h`, the tun/tap driver requests, and `sys/dlpi.h`.
//!
//! These are transcribed as close to the C headers as is practical
//! so they can be checked against the source by eye.
#![allow(non_camel_case_types)]
#![no_std]

#[cfg(test)]
extern crate std;

pub mod dlpi;

use bitflags::bitflags;
use core::mem::size_of;

// The following are "C type" aliases for native Rust types so that
// the native illumos structures may be defined almost verbatim to the
// source. These definitions assume AMD64 arch/LP64.
pub type c_void = core::ffi::c_void;
pub type c_schar = i8;
pub type c_uchar = u8;
pub type c_char = c_schar;
pub type c_short = i16;
pub type c_ushort = u16;
pub type c_int = i32;
pub type c_uint = u32;
pub type c_long = i64;
pub type c_ulong = u64;

pub type uint_t = c_uint;
pub type int32_t = i32;
pub type uint16_t = u16;
pub type uint32_t = u32;
pub type uint64_t = u64;
pub type t_uscalar_t = u32;
pub type sa_family_t = u16;
pub type in_addr_t = u32;

/// The type of an ioctl(2) request as illumos declares it.
pub type ioc_t = c_int;

// ======================================================================
// uts/common/sys/errno.h
// ======================================================================
pub const EPERM: c_int = 1;
pub const ENOENT: c_int = 2;
pub const ENXIO: c_int = 6;
pub const EBADF: c_int = 9;
pub const EAGAIN: c_int = 11;
pub const EACCES: c_int = 13;
pub const EBUSY: c_int = 16;
pub const EEXIST: c_int = 17;
pub const EINVAL: c_int = 22;
pub const ENOTTY: c_int = 25;
pub const ENOSTR: c_int = 60;
pub const EPROTO: c_int = 71;
pub const ENOSYS: c_int = 89;

// ======================================================================
// uts/common/sys/socket.h
// ======================================================================
pub const AF_INET: c_int = 2;
pub const AF_INET6: c_int = 26;

// ======================================================================
// uts/common/sys/ioccom.h
// ======================================================================
pub const IOCPARM_MASK: u32 = 0xff;
pub const IOC_VOID: u32 = 0x20000000;
pub const IOC_OUT: u32 = 0x40000000;
pub const IOC_IN: u32 = 0x80000000;
pub const IOC_INOUT: u32 = IOC_IN | IOC_OUT;

const fn ioc(inout: u32, group: u8, num: u8, len: usize) -> ioc_t {
    (inout
        | ((len as u32 & IOCPARM_MASK) << 16)
        | ((group as u32) << 8)
        | num as u32) as ioc_t
}

/// `_IOW(group, num, type)`
pub const fn iow<T>(group: u8, num: u8) -> ioc_t {
    ioc(IOC_IN, group, num, size_of::<T>())
}

/// `_IOWR(group, num, type)`
pub const fn iowr<T>(group: u8, num: u8) -> ioc_t {
    ioc(IOC_INOUT, group, num, size_of::<T>())
}

// ======================================================================
// uts/common/sys/stropts.h
// ======================================================================
pub const STR: ioc_t = (b'S' as ioc_t) << 8;
pub const I_PUSH: ioc_t = STR | 0o2;
pub const I_POP: ioc_t = STR | 0o3;
pub const I_STR: ioc_t = STR | 0o10;
pub const I_PLINK: ioc_t = STR | 0o26;
pub const I_PUNLINK: ioc_t = STR | 0o27;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct strioctl {
    pub ic_cmd: c_int,
    pub ic_timout: c_int,
    pub ic_len: c_int,
    pub ic_dp: *mut c_char,
}

impl strioctl {
    /// Build a transparent request wrapping `len` bytes at `dp`. A
    /// zero timeout means the stream head default.
    pub fn new(cmd: c_int, dp: *mut c_char, len: usize) -> Self {
        Self { ic_cmd: cmd, ic_timout: 0, ic_len: len as c_int, ic_dp: dp }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct strbuf {
    pub maxlen: c_int,
    pub len: c_int,
    pub buf: *mut c_char,
}

// ======================================================================
// uts/common/sys/socket_impl.h
// ======================================================================
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct sockaddr {
    pub sa_family: sa_family_t,
    pub sa_data: [c_char; 14],
}

const _SS_MAXSIZE: usize = 256;
const _SS_ALIGNSIZE: usize = size_of::<i64>();
const _SS_PAD1SIZE: usize = _SS_ALIGNSIZE - size_of::<sa_family_t>();
const _SS_PAD2SIZE: usize = _SS_MAXSIZE
    - (size_of::<sa_family_t>() + _SS_PAD1SIZE + _SS_ALIGNSIZE);

#[repr(C)]
#[derive(Clone, Copy)]
pub struct sockaddr_storage {
    pub ss_family: sa_family_t,
    _ss_pad1: [c_char; _SS_PAD1SIZE],
    _ss_align: i64,
    _ss_pad2: [c_char; _SS_PAD2SIZE],
}

// ======================================================================
// uts/common/netinet/in.h
// ======================================================================
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct in_addr {
    /// Network byte order.
    pub s_addr: in_addr_t,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct sockaddr_in {
    pub sin_family: sa_family_t,
    pub sin_port: u16,
    pub sin_addr: in_addr,
    pub sin_zero: [c_char; 8],
}

impl sockaddr_in {
    /// An `AF_INET` address with no port, as the interface ioctls
    /// expect it.
    pub fn from_octets(octets: [u8; 4]) -> Self {
        Self {
            sin_family: AF_INET as sa_family_t,
            sin_port: 0,
            sin_addr: in_addr { s_addr: u32::from_ne_bytes(octets) },
            sin_zero: [0; 8],
        }
    }

    pub fn octets(&self) -> [u8; 4] {
        self.sin_addr.s_addr.to_ne_bytes()
    }
}

// ======================================================================
// uts/common/net/if.h
// ======================================================================
pub const IFNAMSIZ: usize = 16;
pub const LIFNAMSIZ: usize = 32;

bitflags! {
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
/// The 64-bit logical interface flags carried by `lifreq`.
pub struct LifFlags: u64 {
    const IFF_UP = 0x0000000001;
    const IFF_BROADCAST = 0x0000000002;
    const IFF_DEBUG = 0x0000000004;
    const IFF_LOOPBACK = 0x0000000008;
    const IFF_POINTOPOINT = 0x0000000010;
    const IFF_NOTRAILERS = 0x0000000020;
    const IFF_RUNNING = 0x0000000040;
    const IFF_NOARP = 0x0000000080;
    const IFF_PROMISC = 0x0000000100;
    const IFF_ALLMULTI = 0x0000000200;
    const IFF_MULTICAST = 0x0000000800;
    const IFF_MULTI_BCAST = 0x0000001000;
    const IFF_NOLOCAL = 0x0000020000;
    const IFF_DEPRECATED = 0x0000040000;
    const IFF_ROUTER = 0x0000100000;
    const IFF_IPV4 = 0x0001000000;
    const IFF_IPV6 = 0x0002000000;

    // The kernel owns the rest; keep whatever it hands back.
    const _ = !0;
}
}

/// The members of `lifr_lifru` this crate touches. The trailing pad
/// stands in for `struct lif_nd_req`, the largest member, so the
/// union has the kernel's size.
#[repr(C)]
#[derive(Clone, Copy)]
pub union lifreq_ru {
    pub lifru_addr: sockaddr_storage,
    pub lifru_index: c_int,
    pub lifru_flags: u64,
    pub lifru_metric: c_int,
    pub lifru_mtu: uint_t,
    pub lif_muxid: [c_int; 2],
    _lifru_nd_req: [u64; 42],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union lifreq_ru1 {
    pub lifru_addrlen: c_int,
    pub lifru_ppa: uint_t,
}

/// Index into `lif_muxid` for the IP stream's muxid.
pub const IP_MUXID: usize = 0;
/// Index into `lif_muxid` for the ARP stream's muxid.
pub const ARP_MUXID: usize = 1;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct lifreq {
    pub lifr_name: [c_char; LIFNAMSIZ],
    pub lifr_lifru1: lifreq_ru1,
    pub lifr_type: uint_t,
    pub lifr_lifru: lifreq_ru,
}

impl Default for lifreq {
    fn default() -> Self {
        Self {
            lifr_name: [0; LIFNAMSIZ],
            lifr_lifru1: lifreq_ru1 { lifru_ppa: 0 },
            lifr_type: 0,
            lifr_lifru: lifreq_ru { _lifru_nd_req: [0; 42] },
        }
    }
}

impl lifreq {
    /// Copy `name` into `lifr_name`. The caller guarantees it fits
    /// with room for the NUL; anything longer is truncated.
    pub fn set_name(&mut self, name: &[u8]) {
        copy_name(&mut self.lifr_name, name);
    }

    pub fn name(&self) -> &[u8] {
        name_bytes(&self.lifr_name)
    }

    pub fn ppa(&self) -> uint_t {
        // Safety: every bit pattern is a valid uint_t.
        unsafe { self.lifr_lifru1.lifru_ppa }
    }

    pub fn set_ppa(&mut self, ppa: uint_t) {
        self.lifr_lifru1.lifru_ppa = ppa;
    }

    pub fn flags(&self) -> LifFlags {
        // Safety: every bit pattern is a valid u64.
        LifFlags::from_bits_retain(unsafe { self.lifr_lifru.lifru_flags })
    }

    pub fn set_flags(&mut self, flags: LifFlags) {
        self.lifr_lifru.lifru_flags = flags.bits();
    }

    pub fn muxids(&self) -> [c_int; 2] {
        // Safety: every bit pattern is a valid [c_int; 2].
        unsafe { self.lifr_lifru.lif_muxid }
    }

    pub fn set_muxids(&mut self, muxids: [c_int; 2]) {
        self.lifr_lifru.lif_muxid = muxids;
    }

    pub fn mtu(&self) -> uint_t {
        // Safety: every bit pattern is a valid uint_t.
        unsafe { self.lifr_lifru.lifru_mtu }
    }

    pub fn set_mtu(&mut self, mtu: uint_t) {
        self.lifr_lifru.lifru_mtu = mtu;
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union ifreq_ru {
    pub ifru_addr: sockaddr,
    pub ifru_index: c_int,
    pub ifru_mtu: uint_t,
    pub ifru_flags: c_short,
    pub ifru_enaddr: [c_uchar; 6],
    pub if_muxid: [c_int; 2],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ifreq {
    pub ifr_name: [c_char; IFNAMSIZ],
    pub ifr_ifru: ifreq_ru,
}

impl Default for ifreq {
    fn default() -> Self {
        Self {
            ifr_name: [0; IFNAMSIZ],
            ifr_ifru: ifreq_ru {
                ifru_addr: sockaddr { sa_family: 0, sa_data: [0; 14] },
            },
        }
    }
}

impl ifreq {
    pub fn set_name(&mut self, name: &[u8]) {
        copy_name(&mut self.ifr_name, name);
    }

    pub fn name(&self) -> &[u8] {
        name_bytes(&self.ifr_name)
    }

    pub fn set_addr_in(&mut self, sin: sockaddr_in) {
        // Safety: sockaddr_in and sockaddr are both 16 bytes and
        // sockaddr has no invalid bit patterns.
        self.ifr_ifru.ifru_addr =
            unsafe { core::mem::transmute::<sockaddr_in, sockaddr>(sin) };
    }

    pub fn addr_in(&self) -> sockaddr_in {
        // Safety: as above.
        unsafe {
            core::mem::transmute::<sockaddr, sockaddr_in>(
                self.ifr_ifru.ifru_addr,
            )
        }
    }

    pub fn enaddr(&self) -> [c_uchar; 6] {
        // Safety: every bit pattern is a valid byte array.
        unsafe { self.ifr_ifru.ifru_enaddr }
    }

    pub fn set_enaddr(&mut self, addr: [c_uchar; 6]) {
        self.ifr_ifru.ifru_enaddr = addr;
    }
}

fn copy_name(dst: &mut [c_char], name: &[u8]) {
    let n = name.len().min(dst.len() - 1);
    for (d, s) in dst.iter_mut().zip(&name[..n]) {
        *d = *s as c_char;
    }
    for d in &mut dst[n..] {
        *d = 0;
    }
}

fn name_bytes(src: &[c_char]) -> &[u8] {
    let len = src.iter().position(|c| *c == 0).unwrap_or(src.len());
    // Safety: c_char and u8 have the same size and alignment.
    unsafe { core::slice::from_raw_parts(src.as_ptr() as *const u8, len) }
}

// ======================================================================
// uts/common/sys/sockio.h
// ======================================================================
pub const SIOCSIFADDR: ioc_t = iow::<ifreq>(b'i', 12);
pub const SIOCSIFNETMASK: ioc_t = iow::<ifreq>(b'i', 26);
pub const SIOCGENADDR: ioc_t = iowr::<ifreq>(b'i', 85);
pub const SIOCSLIFFLAGS: ioc_t = iow::<lifreq>(b'i', 116);
pub const SIOCGLIFFLAGS: ioc_t = iowr::<lifreq>(b'i', 117);
pub const SIOCSLIFMTU: ioc_t = iow::<lifreq>(b'i', 121);
pub const SIOCGLIFMTU: ioc_t = iowr::<lifreq>(b'i', 122);
pub const SIOCSLIFNAME: ioc_t = iowr::<lifreq>(b'i', 129);
pub const SIOCGLIFMUXID: ioc_t = iowr::<lifreq>(b'i', 131);
pub const SIOCSLIFMUXID: ioc_t = iow::<lifreq>(b'i', 132);

// ======================================================================
// tun/tap driver (tun.h)
// ======================================================================

/// Assign a new PPA to the tap stream. The argument is the desired
/// PPA; the ioctl returns the PPA actually assigned.
pub const TUNNEWPPA: ioc_t = ((b'T' as ioc_t) << 16) | 0x0001;
pub const TUNSETPPA: ioc_t = ((b'T' as ioc_t) << 16) | 0x0002;
