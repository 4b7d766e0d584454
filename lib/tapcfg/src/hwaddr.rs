// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Reading and writing the hardware address of a bound device.
//!
//! There are two ways to do this and which one a build uses is fixed
//! by the `dlpi` feature: [`Dlpi`] talks DLPI on the device's own
//! stream, [`EnAddr`] asks IP with `SIOCGENADDR` and can't change the
//! address at all.

use crate::Error;
use crate::dlpi;
use crate::dlpi::DlpiError;
use crate::sys::Streams;
use illumos_sys_hdrs::SIOCGENADDR;
use illumos_sys_hdrs::ifreq;
use std::io;
use tapcfg_api::IfName;
use tapcfg_api::MacAddr;
use tapcfg_api::Ppa;

#[derive(Debug, thiserror::Error)]
pub enum HwAddrError {
    #[error("DLPI request failed")]
    Dlpi(#[from] DlpiError),

    #[error("SIOCGENADDR failed")]
    EnAddr(#[source] io::Error),

    #[error("{0} is not a unicast address")]
    BadAddress(MacAddr),

    #[error("interface name {0} does not fit an ifreq")]
    NameTooLong(IfName),
}

/// What a provider gets to work with.
#[derive(Debug)]
pub struct HwAddrCtx<'a, F> {
    /// The tap stream used for packet I/O.
    pub tap: &'a F,
    /// The IPv4 multiplexor descriptor.
    pub ctl: &'a F,
    pub ifname: &'a IfName,
    pub ppa: Ppa,
}

pub trait HwAddrProvider {
    /// Get the device ready for [`HwAddrProvider::query`]. Run once,
    /// at bind time.
    fn prepare<S: Streams>(
        &self,
        sys: &S,
        ctx: &HwAddrCtx<'_, S::Fd>,
    ) -> Result<(), HwAddrError>;

    fn query<S: Streams>(
        &self,
        sys: &S,
        ctx: &HwAddrCtx<'_, S::Fd>,
    ) -> Result<MacAddr, HwAddrError>;

    fn set<S: Streams>(
        &self,
        sys: &S,
        ctx: &HwAddrCtx<'_, S::Fd>,
        mac: MacAddr,
    ) -> Result<(), Error>;
}

/// Attach the tap stream to its PPA and use DLPI physical address
/// primitives on it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Dlpi;

impl HwAddrProvider for Dlpi {
    fn prepare<S: Streams>(
        &self,
        sys: &S,
        ctx: &HwAddrCtx<'_, S::Fd>,
    ) -> Result<(), HwAddrError> {
        Ok(dlpi::attach(sys, ctx.tap, ctx.ppa)?)
    }

    fn query<S: Streams>(
        &self,
        sys: &S,
        ctx: &HwAddrCtx<'_, S::Fd>,
    ) -> Result<MacAddr, HwAddrError> {
        Ok(dlpi::phys_addr(sys, ctx.tap)?)
    }

    fn set<S: Streams>(
        &self,
        sys: &S,
        ctx: &HwAddrCtx<'_, S::Fd>,
        mac: MacAddr,
    ) -> Result<(), Error> {
        let set_err = |source| Error::HardwareAddressSetFailed {
            ifname: ctx.ifname.clone(),
            source,
        };

        if mac.is_multicast() {
            return Err(set_err(HwAddrError::BadAddress(mac)));
        }

        dlpi::set_phys_addr(sys, ctx.tap, mac)
            .map_err(|e| set_err(HwAddrError::Dlpi(e)))
    }
}

/// Ask IP for the address by interface name.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnAddr;

impl HwAddrProvider for EnAddr {
    fn prepare<S: Streams>(
        &self,
        _sys: &S,
        _ctx: &HwAddrCtx<'_, S::Fd>,
    ) -> Result<(), HwAddrError> {
        Ok(())
    }

    fn query<S: Streams>(
        &self,
        sys: &S,
        ctx: &HwAddrCtx<'_, S::Fd>,
    ) -> Result<MacAddr, HwAddrError> {
        if !ctx.ifname.fits_ifreq() {
            return Err(HwAddrError::NameTooLong(ctx.ifname.clone()));
        }

        let mut ifr = ifreq::default();
        ifr.set_name(ctx.ifname.as_bytes());
        sys.if_ioctl(ctx.ctl, SIOCGENADDR, &mut ifr)
            .map_err(HwAddrError::EnAddr)?;
        Ok(MacAddr::from(ifr.enaddr()))
    }

    fn set<S: Streams>(
        &self,
        _sys: &S,
        _ctx: &HwAddrCtx<'_, S::Fd>,
        _mac: MacAddr,
    ) -> Result<(), Error> {
        Err(Error::Unsupported("setting the hardware address"))
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "dlpi")] {
        pub type DefaultHwAddr = Dlpi;
    } else {
        pub type DefaultHwAddr = EnAddr;
    }
}
