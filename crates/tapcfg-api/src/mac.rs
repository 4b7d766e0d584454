// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// Length of an Ethernet hardware address.
pub const ETHERADDRL: usize = 6;

/// A MAC address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Hash,
)]
pub struct MacAddr {
    inner: [u8; ETHERADDRL],
}

impl MacAddr {
    pub const BROADCAST: Self = Self { inner: [0xFF; ETHERADDRL] };
    pub const ZERO: Self = Self { inner: [0x00; ETHERADDRL] };

    /// Return the bytes of the MAC address.
    #[inline]
    pub fn bytes(&self) -> [u8; ETHERADDRL] {
        self.inner
    }

    /// Build an address from a slice handed back by the kernel,
    /// which must be exactly [`ETHERADDRL`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let inner: [u8; ETHERADDRL] = bytes.try_into().ok()?;
        Some(Self { inner })
    }

    /// Group addresses can't be assigned to an interface.
    pub fn is_multicast(&self) -> bool {
        self.inner[0] & 0x01 != 0
    }
}

impl From<[u8; ETHERADDRL]> for MacAddr {
    fn from(bytes: [u8; ETHERADDRL]) -> Self {
        Self { inner: bytes }
    }
}

impl AsRef<[u8]> for MacAddr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl FromStr for MacAddr {
    type Err = String;

    /// Six colon-separated hex octets, e.g. `02:08:20:ab:cd:ef`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut inner = [0u8; ETHERADDRL];
        let mut octets = s.split(':');
        for (i, byte) in inner.iter_mut().enumerate() {
            let octet = octets
                .next()
                .ok_or_else(|| format!("{s}: only {i} of 6 octets"))?;
            let valid = matches!(octet.len(), 1 | 2)
                && octet.bytes().all(|b| b.is_ascii_hexdigit());
            *byte = u8::from_str_radix(octet, 16)
                .ok()
                .filter(|_| valid)
                .ok_or_else(|| format!("{s}: bad octet {octet:?}"))?;
        }

        match octets.next() {
            Some(_) => Err(format!("{s}: more than 6 octets")),
            None => Ok(Self { inner }),
        }
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.inner[0],
            self.inner[1],
            self.inner[2],
            self.inner[3],
            self.inner[4],
            self.inner[5]
        )
    }
}

impl Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}
