// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Plumb tap pseudo-devices into the illumos IP stacks.
//!
//! A [`TapHdl`] binds a `/dev/tap` instance to the IPv4 and IPv6
//! multiplexors so that frames written to it are routed by the host
//! like those of any other NIC, and later tears that binding down
//! again. Binding is all-or-nothing: when a step fails, everything
//! acquired so far is released in reverse order before the error is
//! returned.
//!
//! ```no_run
//! use tapcfg::TapCfg;
//! use tapcfg::TapHdl;
//! use tapcfg::provider::PrintlnLog;
//!
//! let hdl = TapHdl::open(TapCfg::default(), Box::new(PrintlnLog))?;
//! let mut dev = hdl.bind("tap0", true)?;
//! println!("plumbed {} ({})", dev.ifname(), dev.hwaddr());
//! hdl.unbind(&mut dev)?;
//! hdl.release(dev);
//! # Ok::<(), tapcfg::Error>(())
//! ```

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod bind;
pub mod config;
pub mod dlpi;
pub mod hwaddr;
pub mod mux;
pub mod ppa;
pub mod provider;
pub mod state;
pub mod sys;

pub use bind::DeviceHandle;
pub use config::DEFAULT_IFNAME;
pub use config::TapCfg;
pub use hwaddr::DefaultHwAddr;
pub use hwaddr::HwAddrError;
pub use hwaddr::HwAddrProvider;
pub use state::IfStatus;
pub use sys::Family;
pub use sys::IllumosStreams;
pub use sys::Module;
pub use sys::MuxId;
pub use sys::Streams;
pub use tapcfg_api::IfName;
pub use tapcfg_api::Ipv4Cidr;
pub use tapcfg_api::MacAddr;
pub use tapcfg_api::Ppa;

use provider::LogLevel;
use provider::LogProvider;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from plumbing, unplumbing, and configuring a tap device.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid interface name: {0}")]
    InvalidName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The kernel refused the PPA that was asked for by name.
    #[error("PPA {ppa} was refused")]
    AllocationDenied {
        ppa: Ppa,
        #[source]
        source: io::Error,
    },

    /// Every PPA in the probe range was refused.
    #[error("no free PPA in 0..{probed}")]
    NoDeviceAvailable { probed: u32 },

    /// A device node could not be opened. Usually the tap driver is
    /// missing or the caller lacks privilege.
    #[error("failed to open {}", node.display())]
    DeviceUnavailable {
        node: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to push {module} module")]
    ModulePushFailed {
        module: Module,
        #[source]
        source: io::Error,
    },

    #[error("failed to name {family} interface {ifname}")]
    NameAssignFailed {
        ifname: IfName,
        family: Family,
        #[source]
        source: io::Error,
    },

    #[error("failed to link {what} stream of {ifname}")]
    LinkFailed {
        ifname: IfName,
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to unlink muxid {muxid}")]
    UnlinkFailed {
        muxid: MuxId,
        #[source]
        source: io::Error,
    },

    #[error("failed to set hardware address of {ifname}")]
    HardwareAddressSetFailed {
        ifname: IfName,
        #[source]
        source: HwAddrError,
    },

    #[error("failed to query hardware address of {ifname}")]
    HardwareAddressQueryFailed {
        ifname: IfName,
        #[source]
        source: HwAddrError,
    },

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("failed to set IPv4 address of {ifname}")]
    AddressSetFailed {
        ifname: IfName,
        #[source]
        source: io::Error,
    },

    /// The address was applied but the netmask was not.
    #[error("failed to set IPv4 netmask of {ifname}")]
    NetmaskSetFailed {
        ifname: IfName,
        #[source]
        source: io::Error,
    },

    #[error("{name} failed")]
    Ioctl {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("device is not bound")]
    NotBound,
}

impl Error {
    pub(crate) fn ioctl(name: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Ioctl { name, source }
    }
}

/// The handle used to plumb and configure tap devices.
///
/// `S` is the kernel the handle talks to and `H` the way hardware
/// addresses are read and written; both default to the real thing.
pub struct TapHdl<
    S: Streams = IllumosStreams,
    H: HwAddrProvider = DefaultHwAddr,
> {
    cfg: TapCfg,
    sys: S,
    hwaddr: H,
    log: Box<dyn LogProvider>,
}

impl TapHdl {
    pub fn open(cfg: TapCfg, log: Box<dyn LogProvider>) -> Result<Self, Error> {
        Self::with_streams(cfg, IllumosStreams, DefaultHwAddr::default(), log)
    }
}

impl<S: Streams, H: HwAddrProvider> TapHdl<S, H> {
    pub fn with_streams(
        cfg: TapCfg,
        sys: S,
        hwaddr: H,
        log: Box<dyn LogProvider>,
    ) -> Result<Self, Error> {
        cfg.validate()?;
        Ok(Self { cfg, sys, hwaddr, log })
    }

    pub fn cfg(&self) -> &TapCfg {
        &self.cfg
    }

    pub fn streams(&self) -> &S {
        &self.sys
    }

    pub(crate) fn log(&self, level: LogLevel, msg: &str) {
        self.log.log(level, msg);
    }
}
