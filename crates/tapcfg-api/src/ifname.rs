// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use core::fmt::Write;
use core::ops::Deref;
use core::str::FromStr;
use illumos_sys_hdrs::IFNAMSIZ;
use illumos_sys_hdrs::LIFNAMSIZ;
use serde::Deserialize;
use serde::Serialize;

/// The longest interface name the kernel accepts, not counting the
/// trailing NUL.
pub const IFNAME_MAX: usize = LIFNAMSIZ - 1;

/// A kernel attachment point: which instance of a cloned
/// pseudo-device a stream is bound to.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Ppa(u32);

impl Ppa {
    pub const fn new(ppa: u32) -> Self {
        Self(ppa)
    }

    pub fn val(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Ppa {
    fn from(ppa: u32) -> Self {
        Self(ppa)
    }
}

impl Display for Ppa {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A kernel-visible interface name such as `tap3`.
///
/// The name is stored inline with a fixed capacity; construction
/// rejects anything the kernel could not hold in `lifr_name`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct IfName(heapless::String<IFNAME_MAX>);

impl IfName {
    pub fn new(name: &str) -> Result<Self, String> {
        if name.is_empty() {
            return Err("empty interface name".into());
        }

        if let Some(c) =
            name.chars().find(|c| !c.is_ascii_graphic() || *c == ':')
        {
            return Err(format!("bad character {c:?} in interface name"));
        }

        let mut s = heapless::String::new();
        s.push_str(name).map_err(|_| {
            format!(
                "interface name too long: {name} ({} > {IFNAME_MAX})",
                name.len()
            )
        })?;
        Ok(Self(s))
    }

    /// The name a device instance gets: `prefix` followed by the
    /// attachment point in decimal.
    pub fn with_ppa(prefix: &str, ppa: Ppa) -> Result<Self, String> {
        let mut s = heapless::String::<IFNAME_MAX>::new();
        write!(s, "{prefix}{ppa}")
            .map_err(|_| format!("interface name too long: {prefix}{ppa}"))?;
        Self::new(&s)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether the name also fits the shorter `ifr_name` field used by
    /// the older `ifreq` ioctls.
    pub fn fits_ifreq(&self) -> bool {
        self.0.len() < IFNAMSIZ
    }
}

impl Deref for IfName {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for IfName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for IfName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Display for IfName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::string::ToString;

    #[test]
    fn name_from_ppa() {
        let name = IfName::with_ppa("tap", Ppa::new(12)).unwrap();
        assert_eq!(name.as_str(), "tap12");
        assert!(name.fits_ifreq());
    }

    #[test]
    fn length_is_checked() {
        let longest = "t".repeat(IFNAME_MAX);
        let name = IfName::new(&longest).unwrap();
        assert!(!name.fits_ifreq());

        let too_long = "t".repeat(IFNAME_MAX + 1);
        assert_eq!(
            IfName::new(&too_long),
            Err(format!("interface name too long: {too_long} (32 > 31)"))
        );
        assert!(IfName::with_ppa(&longest, Ppa::new(0)).is_err());
    }

    #[test]
    fn bad_names() {
        assert_eq!(IfName::new(""), Err("empty interface name".to_string()));
        assert!(IfName::new("tap0:1").is_err());
        assert!(IfName::new("tap 0").is_err());
    }
}
