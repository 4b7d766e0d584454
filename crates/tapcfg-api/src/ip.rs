// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use core::fmt;
use core::net::Ipv4Addr;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The number of leading one bits in an IPv4 netmask, 0 through 32.
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
#[serde(try_from = "u8", into = "u8")]
pub struct Ipv4PrefixLen(u8);

impl Ipv4PrefixLen {
    pub const MAX: u8 = 32;

    pub fn new(bits: u8) -> Result<Self, String> {
        match bits {
            0..=Self::MAX => Ok(Self(bits)),
            _ => Err(format!("IPv4 prefix length {bits} exceeds 32")),
        }
    }

    /// `/20` is `255.255.240.0`.
    pub fn to_netmask(self) -> Ipv4Addr {
        let host_bits = u32::from(Self::MAX - self.0);
        Ipv4Addr::from(u32::MAX.checked_shl(host_bits).unwrap_or(0))
    }

    pub fn val(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Ipv4PrefixLen {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, String> {
        Self::new(bits)
    }
}

impl From<Ipv4PrefixLen> for u8 {
    fn from(len: Ipv4PrefixLen) -> u8 {
        len.0
    }
}

/// An interface address in CIDR notation, such as `10.0.0.5/24`.
///
/// The host part is significant: this names an address to assign,
/// not a network.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv4Cidr {
    ip: Ipv4Addr,
    prefix_len: Ipv4PrefixLen,
}

impl Ipv4Cidr {
    pub fn new(ip: Ipv4Addr, prefix_len: Ipv4PrefixLen) -> Self {
        Self { ip, prefix_len }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn prefix_len(&self) -> Ipv4PrefixLen {
        self.prefix_len
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.prefix_len.to_netmask()
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let (addr, bits) = s
            .split_once('/')
            .ok_or_else(|| format!("{s}: expected ADDRESS/PREFIX"))?;
        let ip = addr
            .parse::<Ipv4Addr>()
            .map_err(|e| format!("{s}: invalid address: {e}"))?;
        let bits = bits
            .parse::<u8>()
            .map_err(|e| format!("{s}: invalid prefix length: {e}"))?;
        Ok(Self::new(ip, Ipv4PrefixLen::new(bits)?))
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len.0)
    }
}
