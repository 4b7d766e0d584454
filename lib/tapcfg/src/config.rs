// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use crate::Error;
use serde::Deserialize;
use std::path::PathBuf;
use tapcfg_api::IfName;
use tapcfg_api::Ppa;

/// The interface name callers get when they don't ask for one.
pub const DEFAULT_IFNAME: &str = "tap0";

/// Where the device nodes live and how devices are named.
///
/// Every field has a default, so a config file only needs to mention
/// what differs on the host at hand.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TapCfg {
    /// The IPv4 multiplexor.
    pub ip_node: PathBuf,

    /// The IPv6 multiplexor.
    pub ip6_node: PathBuf,

    /// The tap pseudo-device clone node.
    pub tap_node: PathBuf,

    /// The node cloned for the ARP stream. On stock systems this is
    /// the tap node as well.
    pub arp_node: PathBuf,

    /// Interface names are this prefix followed by the PPA.
    pub name_prefix: String,

    /// When falling back, PPAs `0..probe_count` are tried in order.
    pub probe_count: u32,
}

impl Default for TapCfg {
    fn default() -> Self {
        Self {
            ip_node: "/dev/udp".into(),
            ip6_node: "/dev/udp6".into(),
            tap_node: "/dev/tap".into(),
            arp_node: "/dev/tap".into(),
            name_prefix: "tap".into(),
            probe_count: 16,
        }
    }
}

impl TapCfg {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name_prefix.is_empty()
            || self.name_prefix.bytes().any(|b| b.is_ascii_digit())
        {
            return Err(Error::InvalidName(format!(
                "bad name prefix {:?}: must be non-empty and contain no \
                digits",
                self.name_prefix
            )));
        }

        // Every PPA the kernel can hand out must still make a valid
        // name with this prefix.
        IfName::with_ppa(&self.name_prefix, Ppa::new(u32::MAX)).map_err(
            |e| {
                Error::InvalidName(format!(
                    "bad name prefix {:?}: {e}",
                    self.name_prefix
                ))
            },
        )?;

        if self.probe_count == 0 {
            return Err(Error::InvalidConfig(
                "probe_count must be at least 1".into(),
            ));
        }

        Ok(())
    }
}
