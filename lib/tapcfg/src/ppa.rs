// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Picking the PPA a tap device is bound to.

use crate::Error;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::sys::Streams;
use crate::sys::payload_bytes;
use illumos_sys_hdrs::TUNNEWPPA;
use illumos_sys_hdrs::c_int;
use std::io;
use tapcfg_api::Ppa;

/// Parse the PPA out of a name like `tap3`.
///
/// The suffix must be a plain decimal number: no sign, no leading
/// zeros, and small enough for the kernel's `int`.
pub fn parse_name(prefix: &str, name: &str) -> Option<Ppa> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty()
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || (digits.len() > 1 && digits.starts_with('0'))
    {
        return None;
    }

    let ppa = digits.parse::<c_int>().ok()?;
    Some(Ppa::new(ppa as u32))
}

/// Asks the tap driver for an attachment point.
pub struct Allocator<'a, S: Streams> {
    sys: &'a S,
    log: &'a dyn LogProvider,
    prefix: &'a str,
    probe_count: u32,
}

impl<'a, S: Streams> Allocator<'a, S> {
    pub fn new(
        sys: &'a S,
        log: &'a dyn LogProvider,
        prefix: &'a str,
        probe_count: u32,
    ) -> Self {
        Self { sys, log, prefix, probe_count }
    }

    /// Bind `tap` to the PPA named by `requested`.
    ///
    /// With `fallback`, a name that doesn't parse starts from PPA 0,
    /// and a refused PPA leads to trying `0..probe_count` in order,
    /// skipping the one already refused. The first PPA the driver
    /// accepts wins.
    pub fn allocate(
        &self,
        tap: &S::Fd,
        requested: &str,
        fallback: bool,
    ) -> Result<Ppa, Error> {
        let want = match parse_name(self.prefix, requested) {
            Some(ppa) => ppa,
            None if fallback => Ppa::new(0),
            None => {
                return Err(Error::InvalidName(format!(
                    "{requested:?} is not of the form {}<N>",
                    self.prefix
                )));
            }
        };

        let err = match self.new_ppa(tap, want) {
            Ok(ppa) => return Ok(ppa),
            Err(e) => e,
        };

        if !fallback {
            return Err(Error::AllocationDenied { ppa: want, source: err });
        }

        self.log.log(
            LogLevel::Note,
            &format!(
                "PPA {want} refused ({err}), looking for a free one in \
                0..{}",
                self.probe_count
            ),
        );

        (0..self.probe_count)
            .map(Ppa::new)
            .filter(|ppa| *ppa != want)
            .find_map(|ppa| self.new_ppa(tap, ppa).ok())
            .ok_or(Error::NoDeviceAvailable { probed: self.probe_count })
    }

    /// `TUNNEWPPA`: the driver answers with the PPA it assigned.
    fn new_ppa(&self, tap: &S::Fd, ppa: Ppa) -> io::Result<Ppa> {
        let mut arg = ppa.val() as c_int;
        let ret = self.sys.str_ioctl(tap, TUNNEWPPA, payload_bytes(&mut arg))?;
        u32::try_from(ret)
            .map(Ppa::new)
            .map_err(|_| io::Error::from_raw_os_error(libc::EPROTO))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(parse_name("tap", "tap0"), Some(Ppa::new(0)));
        assert_eq!(parse_name("tap", "tap15"), Some(Ppa::new(15)));
        assert_eq!(
            parse_name("tap", "tap2147483647"),
            Some(Ppa::new(i32::MAX as u32))
        );
    }

    #[test]
    fn bad_names() {
        let bad = [
            "",
            "tap",
            "tun0",
            "tap01",
            "tap-1",
            "tap+1",
            "tap1a",
            "tap 1",
            "tap2147483648",
        ];
        for name in bad {
            assert_eq!(parse_name("tap", name), None, "{name}");
        }
    }
}
