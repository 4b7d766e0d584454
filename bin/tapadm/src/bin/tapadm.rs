// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::io;
use std::io::Read;
use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

use tapadm::TapAdm;
use tapadm::print_device_into;
use tapadm::print_status;
use tapcfg::DEFAULT_IFNAME;
use tapcfg::Family;
use tapcfg_api::IfName;
use tapcfg_api::Ipv4Cidr;
use tapcfg_api::MacAddr;

/// Plumb and configure tap devices
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// A TOML file overriding the device nodes and naming.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plumb a tap device and hold it until stdin is closed.
    Plumb {
        /// The interface name to ask for.
        #[arg(default_value = DEFAULT_IFNAME)]
        name: String,

        /// Fail instead of taking another device when `name` is taken
        /// or malformed.
        #[arg(long)]
        no_fallback: bool,

        #[command(flatten)]
        settings: Settings,

        /// Bring the interface up once configured.
        #[arg(long)]
        up: bool,

        /// Set the hardware address after plumbing.
        #[arg(long)]
        hwaddr: Option<MacAddr>,
    },

    /// Unplumb an interface left behind by an exited process.
    Unplumb { name: IfName },

    /// Mark an interface administratively up.
    Up { name: IfName },

    /// Mark an interface administratively down.
    Down { name: IfName },

    /// Configure an already plumbed interface.
    Set {
        name: IfName,

        #[command(flatten)]
        settings: Settings,
    },

    /// Show administrative state and MTU.
    Status {
        #[arg(required = true)]
        names: Vec<IfName>,
    },
}

#[derive(Args, Debug)]
struct Settings {
    /// IPv4 address and prefix length, e.g. 10.0.0.1/24.
    #[arg(long)]
    ip: Option<Ipv4Cidr>,

    /// MTU of the IPv4 instance.
    #[arg(long)]
    mtu: Option<u32>,
}

impl Settings {
    fn apply(&self, hdl: &TapAdm, name: &IfName) -> anyhow::Result<()> {
        hdl.with_control_socket(Family::V4, |ctl| {
            if let Some(cidr) = self.ip {
                hdl.set_ipv4_cidr(ctl, name, cidr)?;
            }
            if let Some(mtu) = self.mtu {
                hdl.set_mtu(ctl, name, mtu)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = tapadm::load_config(cli.config.as_deref())?;
    let log = tapadm::logger();
    let hdl = TapAdm::open(cfg, log.clone())?;

    match cli.command {
        Command::Plumb { name, no_fallback, settings, up, hwaddr } => {
            let mut dev = hdl.bind(&name, !no_fallback)?;

            let configured = (|| {
                if let Some(mac) = hwaddr {
                    hdl.set_hwaddr(&mut dev, mac)?;
                }
                settings.apply(&hdl, dev.ifname())?;
                if up {
                    hdl.set_admin_state(dev.ifname(), true)?;
                }
                print_device_into(&mut io::stdout(), &dev)?;
                anyhow::Ok(())
            })();

            if configured.is_ok() {
                let ifname = dev.ifname().clone();
                slog::info!(log, "holding {}; close stdin to unplumb", ifname);
                let mut sink = vec![];
                io::stdin().read_to_end(&mut sink)?;
            }

            tapadm::unplumb(&*hdl, dev, configured, &log)?;
        }

        Command::Unplumb { name } => {
            hdl.unbind_by_name(&name)?;
        }

        Command::Up { name } => {
            hdl.set_admin_state(&name, true)?;
        }

        Command::Down { name } => {
            hdl.set_admin_state(&name, false)?;
        }

        Command::Set { name, settings } => {
            settings.apply(&hdl, &name)?;
        }

        Command::Status { names } => {
            let rows = names
                .iter()
                .map(|name| hdl.status(name))
                .collect::<Result<Vec<_>, _>>()?;
            print_status(&rows)?;
        }
    }

    Ok(())
}
