// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Value types shared between the tapcfg library, `tapadm`, and
//! tests.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod ifname;
pub mod ip;
pub mod mac;

pub use ifname::*;
pub use ip::*;
pub use mac::*;
