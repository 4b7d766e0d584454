// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

// ======================================================================
// uts/common/sys/dlpi.h
// ======================================================================

use crate::t_uscalar_t;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

pub const DL_BIND_REQ: t_uscalar_t = 0x01;
pub const DL_INFO_ACK: t_uscalar_t = 0x03;
pub const DL_ERROR_ACK: t_uscalar_t = 0x05;
pub const DL_OK_ACK: t_uscalar_t = 0x06;
pub const DL_ATTACH_REQ: t_uscalar_t = 0x0b;
pub const DL_DETACH_REQ: t_uscalar_t = 0x0c;
pub const DL_PHYS_ADDR_REQ: t_uscalar_t = 0x31;
pub const DL_SET_PHYS_ADDR_REQ: t_uscalar_t = 0x32;
pub const DL_PHYS_ADDR_ACK: t_uscalar_t = 0x33;

/// `dl_addr_type` for `DL_PHYS_ADDR_REQ`: the factory address.
pub const DL_FACT_PHYS_ADDR: t_uscalar_t = 0x01;
/// `dl_addr_type` for `DL_PHYS_ADDR_REQ`: the current address.
pub const DL_CURR_PHYS_ADDR: t_uscalar_t = 0x02;

// DLPI error codes carried in `dl_errno`.
pub const DL_BADADDR: t_uscalar_t = 0x01;
pub const DL_ACCESS: t_uscalar_t = 0x02;
pub const DL_OUTSTATE: t_uscalar_t = 0x03;
pub const DL_SYSERR: t_uscalar_t = 0x04;
pub const DL_BADPPA: t_uscalar_t = 0x08;
pub const DL_BADPRIM: t_uscalar_t = 0x09;
pub const DL_NOTSUPPORTED: t_uscalar_t = 0x12;
pub const DL_BUSY: t_uscalar_t = 0x15;

/// Size of the control buffer used to receive acknowledgements. Big
/// enough for any ack this crate asks for plus a trailing address.
pub const DLPI_CTL_BUFSZ: usize = 1024;

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct dl_attach_req_t {
    pub dl_primitive: t_uscalar_t,
    pub dl_ppa: t_uscalar_t,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct dl_phys_addr_req_t {
    pub dl_primitive: t_uscalar_t,
    pub dl_addr_type: t_uscalar_t,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct dl_phys_addr_ack_t {
    pub dl_primitive: t_uscalar_t,
    pub dl_addr_length: t_uscalar_t,
    pub dl_addr_offset: t_uscalar_t,
}

/// The address follows the header at `dl_addr_offset`.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct dl_set_phys_addr_req_t {
    pub dl_primitive: t_uscalar_t,
    pub dl_addr_length: t_uscalar_t,
    pub dl_addr_offset: t_uscalar_t,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct dl_ok_ack_t {
    pub dl_primitive: t_uscalar_t,
    pub dl_correct_primitive: t_uscalar_t,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct dl_error_ack_t {
    pub dl_primitive: t_uscalar_t,
    pub dl_error_primitive: t_uscalar_t,
    pub dl_errno: t_uscalar_t,
    pub dl_unix_errno: t_uscalar_t,
}
