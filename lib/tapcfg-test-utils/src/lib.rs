// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

pub mod kernel;

pub use illumos_sys_hdrs::EBUSY;
pub use illumos_sys_hdrs::EEXIST;
pub use illumos_sys_hdrs::EINVAL;
pub use illumos_sys_hdrs::ENXIO;
pub use illumos_sys_hdrs::EPERM;
pub use illumos_sys_hdrs::LifFlags;
pub use kernel::Event;
pub use kernel::Iface;
pub use kernel::MockFd;
pub use kernel::MockKernel;
pub use kernel::Node;
pub use kernel::Op;
pub use tapcfg::DeviceHandle;
pub use tapcfg::Error;
pub use tapcfg::Family;
pub use tapcfg::IfName;
pub use tapcfg::IfStatus;
pub use tapcfg::MacAddr;
pub use tapcfg::Module;
pub use tapcfg::MuxId;
pub use tapcfg::TapCfg;
pub use tapcfg::TapHdl;
pub use tapcfg::hwaddr::Dlpi;
pub use tapcfg::hwaddr::EnAddr;
pub use tapcfg::hwaddr::HwAddrProvider;
pub use tapcfg::provider::LogLevel;

use std::sync::Arc;
use std::sync::Mutex;
use tapcfg::provider::LogProvider;

/// A log provider that keeps everything for later inspection. Clones
/// share the same record.
#[derive(Clone, Debug, Default)]
pub struct CaptureLog {
    entries: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl CaptureLog {
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().unwrap().clone()
    }

    /// Whether some message at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }

    pub fn count(&self, level: LogLevel) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.iter().filter(|(l, _)| *l == level).count()
    }
}

impl LogProvider for CaptureLog {
    fn log(&self, level: LogLevel, msg: &str) {
        self.entries.lock().unwrap().push((level, msg.to_string()));
    }
}

pub type MockHdl<H = Dlpi> = TapHdl<MockKernel, H>;

/// A handle on a fresh fake kernel with the default configuration.
pub fn mock_hdl() -> (MockHdl, CaptureLog) {
    mock_hdl_with(Dlpi)
}

pub fn mock_hdl_with<H: HwAddrProvider>(
    hwaddr: H,
) -> (MockHdl<H>, CaptureLog) {
    let cfg = TapCfg::default();
    let log = CaptureLog::default();
    let hdl = TapHdl::with_streams(
        cfg.clone(),
        MockKernel::new(&cfg),
        hwaddr,
        Box::new(log.clone()),
    )
    .unwrap();
    (hdl, log)
}

pub fn ifname(name: &str) -> IfName {
    IfName::new(name).unwrap()
}

/// Bind, expecting success.
pub fn bind_ok<H: HwAddrProvider>(
    hdl: &MockHdl<H>,
    name: &str,
    fallback: bool,
) -> DeviceHandle<MockFd> {
    match hdl.bind(name, fallback) {
        Ok(dev) => dev,
        Err(e) => panic!("bind of {name} failed: {e:?}"),
    }
}

/// Unbind and release, expecting success.
pub fn teardown<H: HwAddrProvider>(
    hdl: &MockHdl<H>,
    mut dev: DeviceHandle<MockFd>,
) {
    hdl.unbind(&mut dev).unwrap();
    hdl.release(dev);
}
