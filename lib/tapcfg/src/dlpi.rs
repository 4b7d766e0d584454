// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Just enough DLPI to attach a tap stream to its PPA and read or
//! write its physical address.
//!
//! Every exchange is one `M_PROTO` request sent with putmsg(2) and one
//! reply read with getmsg(2). A `DL_ERROR_ACK` reply becomes
//! [`DlpiError::ErrorAck`].

use crate::sys::Streams;
use core::mem::size_of;
use illumos_sys_hdrs::dlpi::DL_ATTACH_REQ;
use illumos_sys_hdrs::dlpi::DL_CURR_PHYS_ADDR;
use illumos_sys_hdrs::dlpi::DL_ERROR_ACK;
use illumos_sys_hdrs::dlpi::DL_OK_ACK;
use illumos_sys_hdrs::dlpi::DL_PHYS_ADDR_ACK;
use illumos_sys_hdrs::dlpi::DL_PHYS_ADDR_REQ;
use illumos_sys_hdrs::dlpi::DL_SET_PHYS_ADDR_REQ;
use illumos_sys_hdrs::dlpi::DLPI_CTL_BUFSZ;
use illumos_sys_hdrs::dlpi::dl_attach_req_t;
use illumos_sys_hdrs::dlpi::dl_error_ack_t;
use illumos_sys_hdrs::dlpi::dl_ok_ack_t;
use illumos_sys_hdrs::dlpi::dl_phys_addr_ack_t;
use illumos_sys_hdrs::dlpi::dl_phys_addr_req_t;
use illumos_sys_hdrs::dlpi::dl_set_phys_addr_req_t;
use illumos_sys_hdrs::t_uscalar_t;
use std::io;
use tapcfg_api::ETHERADDRL;
use tapcfg_api::MacAddr;
use tapcfg_api::Ppa;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

#[derive(Debug, Error)]
pub enum DlpiError {
    #[error("DLPI message exchange failed")]
    Io(#[from] io::Error),

    #[error(
        "primitive {primitive:#x} rejected: dl_errno {dl_errno:#x}, \
        errno {unix_errno}"
    )]
    ErrorAck {
        primitive: t_uscalar_t,
        dl_errno: t_uscalar_t,
        unix_errno: t_uscalar_t,
    },

    #[error("expected primitive {expected:#x}, got {got:#x}")]
    Unexpected { expected: t_uscalar_t, got: t_uscalar_t },

    #[error("reply truncated at {0} bytes")]
    Short(usize),

    #[error("physical address is {0} bytes, not {ETHERADDRL}")]
    AddrLength(usize),
}

/// `DL_ATTACH_REQ`
pub fn attach<S: Streams>(
    sys: &S,
    fd: &S::Fd,
    ppa: Ppa,
) -> Result<(), DlpiError> {
    let req =
        dl_attach_req_t { dl_primitive: DL_ATTACH_REQ, dl_ppa: ppa.val() };
    sys.putmsg(fd, req.as_bytes(), 0)?;
    expect_ok_ack(sys, fd, DL_ATTACH_REQ)
}

/// `DL_PHYS_ADDR_REQ` for the current address.
pub fn phys_addr<S: Streams>(
    sys: &S,
    fd: &S::Fd,
) -> Result<MacAddr, DlpiError> {
    let req = dl_phys_addr_req_t {
        dl_primitive: DL_PHYS_ADDR_REQ,
        dl_addr_type: DL_CURR_PHYS_ADDR,
    };
    sys.putmsg(fd, req.as_bytes(), 0)?;

    let mut buf = [0u8; DLPI_CTL_BUFSZ];
    let ctl = recv(sys, fd, &mut buf)?;
    let (ack, _) = dl_phys_addr_ack_t::read_from_prefix(ctl)
        .map_err(|_| DlpiError::Short(ctl.len()))?;
    if ack.dl_primitive != DL_PHYS_ADDR_ACK {
        return Err(DlpiError::Unexpected {
            expected: DL_PHYS_ADDR_ACK,
            got: ack.dl_primitive,
        });
    }

    decode_phys_addr(ctl, &ack)
}

/// `DL_SET_PHYS_ADDR_REQ`
pub fn set_phys_addr<S: Streams>(
    sys: &S,
    fd: &S::Fd,
    mac: MacAddr,
) -> Result<(), DlpiError> {
    sys.putmsg(fd, &encode_set_phys_addr(mac), 0)?;
    expect_ok_ack(sys, fd, DL_SET_PHYS_ADDR_REQ)
}

/// The request header followed directly by the address.
pub fn encode_set_phys_addr(mac: MacAddr) -> Vec<u8> {
    let hdr = dl_set_phys_addr_req_t {
        dl_primitive: DL_SET_PHYS_ADDR_REQ,
        dl_addr_length: ETHERADDRL as t_uscalar_t,
        dl_addr_offset: size_of::<dl_set_phys_addr_req_t>() as t_uscalar_t,
    };

    let mut msg =
        Vec::with_capacity(size_of::<dl_set_phys_addr_req_t>() + ETHERADDRL);
    msg.extend_from_slice(hdr.as_bytes());
    msg.extend_from_slice(mac.as_ref());
    msg
}

/// Pull the address a `dl_phys_addr_ack_t` points at out of `ctl`.
pub fn decode_phys_addr(
    ctl: &[u8],
    ack: &dl_phys_addr_ack_t,
) -> Result<MacAddr, DlpiError> {
    let off = ack.dl_addr_offset as usize;
    let len = ack.dl_addr_length as usize;
    let addr = off
        .checked_add(len)
        .and_then(|end| ctl.get(off..end))
        .ok_or(DlpiError::Short(ctl.len()))?;
    MacAddr::from_slice(addr).ok_or(DlpiError::AddrLength(len))
}

fn expect_ok_ack<S: Streams>(
    sys: &S,
    fd: &S::Fd,
    req: t_uscalar_t,
) -> Result<(), DlpiError> {
    let mut buf = [0u8; DLPI_CTL_BUFSZ];
    let ctl = recv(sys, fd, &mut buf)?;
    let (ack, _) = dl_ok_ack_t::read_from_prefix(ctl)
        .map_err(|_| DlpiError::Short(ctl.len()))?;

    if ack.dl_primitive != DL_OK_ACK {
        return Err(DlpiError::Unexpected {
            expected: DL_OK_ACK,
            got: ack.dl_primitive,
        });
    }

    if ack.dl_correct_primitive != req {
        return Err(DlpiError::Unexpected {
            expected: req,
            got: ack.dl_correct_primitive,
        });
    }

    Ok(())
}

/// Read one reply, turning a `DL_ERROR_ACK` into an error.
fn recv<'b, S: Streams>(
    sys: &S,
    fd: &S::Fd,
    buf: &'b mut [u8],
) -> Result<&'b [u8], DlpiError> {
    let len = sys.getmsg(fd, buf)?;
    let ctl = &buf[..len.min(buf.len())];
    check_error_ack(ctl)?;
    Ok(ctl)
}

pub fn check_error_ack(ctl: &[u8]) -> Result<(), DlpiError> {
    let (primitive, _) = t_uscalar_t::read_from_prefix(ctl)
        .map_err(|_| DlpiError::Short(ctl.len()))?;
    if primitive != DL_ERROR_ACK {
        return Ok(());
    }

    let (err, _) = dl_error_ack_t::read_from_prefix(ctl)
        .map_err(|_| DlpiError::Short(ctl.len()))?;
    Err(DlpiError::ErrorAck {
        primitive: err.dl_error_primitive,
        dl_errno: err.dl_errno,
        unix_errno: err.dl_unix_errno,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use illumos_sys_hdrs::dlpi::DL_BADPPA;

    #[test]
    fn set_phys_addr_layout() {
        let mac = MacAddr::from([0x02, 0x08, 0x20, 0xaa, 0xbb, 0xcc]);
        let msg = encode_set_phys_addr(mac);
        assert_eq!(msg.len(), 18);

        let (hdr, rest) =
            dl_set_phys_addr_req_t::read_from_prefix(&msg).unwrap();
        assert_eq!(hdr.dl_primitive, DL_SET_PHYS_ADDR_REQ);
        assert_eq!(hdr.dl_addr_length, 6);
        assert_eq!(hdr.dl_addr_offset, 12);
        assert_eq!(rest, &mac.bytes());
    }

    #[test]
    fn phys_addr_at_offset() {
        let ack = dl_phys_addr_ack_t {
            dl_primitive: DL_PHYS_ADDR_ACK,
            dl_addr_length: 6,
            dl_addr_offset: 16,
        };
        let mut ctl = ack.as_bytes().to_vec();
        ctl.extend_from_slice(&[0; 4]);
        ctl.extend_from_slice(&[0xa8, 0x40, 0x25, 0, 0, 1]);

        let mac = decode_phys_addr(&ctl, &ack).unwrap();
        assert_eq!(mac, MacAddr::from([0xa8, 0x40, 0x25, 0, 0, 1]));

        assert!(matches!(
            decode_phys_addr(&ctl[..20], &ack),
            Err(DlpiError::Short(20))
        ));

        let odd = dl_phys_addr_ack_t { dl_addr_length: 4, ..ack };
        assert!(matches!(
            decode_phys_addr(&ctl, &odd),
            Err(DlpiError::AddrLength(4))
        ));
    }

    #[test]
    fn error_ack() {
        let err = dl_error_ack_t {
            dl_primitive: DL_ERROR_ACK,
            dl_error_primitive: DL_ATTACH_REQ,
            dl_errno: DL_BADPPA,
            dl_unix_errno: 0,
        };
        match check_error_ack(err.as_bytes()) {
            Err(DlpiError::ErrorAck { primitive, dl_errno, .. }) => {
                assert_eq!(primitive, DL_ATTACH_REQ);
                assert_eq!(dl_errno, DL_BADPPA);
            }
            res => panic!("unexpected {res:?}"),
        }

        let ok = dl_ok_ack_t {
            dl_primitive: DL_OK_ACK,
            dl_correct_primitive: DL_ATTACH_REQ,
        };
        assert!(check_error_ack(ok.as_bytes()).is_ok());
        assert!(matches!(check_error_ack(&[1, 0]), Err(DlpiError::Short(2))));
    }
}
