// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! tap device administration library

use anyhow::Context;
use slog::Drain;
use slog::Logger;
use std::io;
use std::io::Write;
use std::ops::Deref;
use std::path::Path;
use tabwriter::TabWriter;
use tapcfg::DeviceHandle;
use tapcfg::HwAddrProvider;
use tapcfg::IfStatus;
use tapcfg::Streams;
use tapcfg::TapCfg;
use tapcfg::TapHdl;
use tapcfg::provider::LogLevel;
use tapcfg::provider::LogProvider;

/// The handle used by `tapadm` to plumb and configure tap devices.
pub struct TapAdm(TapHdl);

impl Deref for TapAdm {
    type Target = TapHdl;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TapAdm {
    pub fn open(cfg: TapCfg, log: Logger) -> Result<Self, tapcfg::Error> {
        TapHdl::open(cfg, Box::new(SlogLog(log))).map(Self)
    }
}

/// Forwards library messages to an `slog` logger.
#[derive(Clone, Debug)]
pub struct SlogLog(pub Logger);

impl LogProvider for SlogLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Debug => slog::debug!(self.0, "{}", msg),
            LogLevel::Note => slog::info!(self.0, "{}", msg),
            LogLevel::Warn => slog::warn!(self.0, "{}", msg),
            LogLevel::Error => slog::error!(self.0, "{}", msg),
        }
    }
}

/// A terminal logger on stderr. `RUST_LOG` overrides the default
/// level of `info`.
pub fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();

    let mut filter = slog_envlogger::LogBuilder::new(drain);
    filter = match std::env::var("RUST_LOG") {
        Ok(spec) => filter.parse(&spec),
        Err(_) => filter.filter(None, slog::FilterLevel::Info),
    };
    let drain = filter.build().ignore_res();

    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, slog::o!())
}

/// Parse and validate a TOML configuration.
pub fn parse_config(text: &str) -> anyhow::Result<TapCfg> {
    let cfg: TapCfg = toml::from_str(text)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Read the configuration at `path`, or use the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<TapCfg> {
    let Some(path) = path else {
        return Ok(TapCfg::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_config(&text)
        .with_context(|| format!("bad configuration in {}", path.display()))
}

/// Unbind and release a device plumbed by `tapadm plumb`.
///
/// The device is released even when unbinding fails. An error from
/// configuring it, passed in as `configured`, takes precedence over
/// one from unbinding, which is then only logged.
pub fn unplumb<S: Streams, H: HwAddrProvider>(
    hdl: &TapHdl<S, H>,
    mut dev: DeviceHandle<S::Fd>,
    configured: anyhow::Result<()>,
    log: &Logger,
) -> anyhow::Result<()> {
    let ifname = dev.ifname().clone();
    let unbound = hdl.unbind(&mut dev);
    hdl.release(dev);

    match (configured, unbound) {
        (Err(e), Err(unbind_err)) => {
            slog::error!(log, "failed to unplumb {}: {}", ifname, unbind_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), unbound) => Ok(unbound?),
    }
}

fn print_status_header(t: &mut impl Write) -> io::Result<()> {
    writeln!(t, "NAME\tSTATE\tMTU")
}

/// Print one line per interface.
pub fn print_status(rows: &[IfStatus]) -> io::Result<()> {
    print_status_into(&mut io::stdout(), rows)
}

/// Print one line per interface into a given writer.
pub fn print_status_into(
    writer: &mut impl Write,
    rows: &[IfStatus],
) -> io::Result<()> {
    let mut t = TabWriter::new(writer);
    print_status_header(&mut t)?;
    for row in rows {
        let state = if row.up { "up" } else { "down" };
        writeln!(t, "{}\t{state}\t{}", row.ifname, row.mtu)?;
    }
    t.flush()
}

/// Print what a bind produced.
pub fn print_device_into<F>(
    writer: &mut impl Write,
    dev: &DeviceHandle<F>,
) -> io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "NAME\tPPA\tHWADDR")?;
    writeln!(t, "{}\t{}\t{}", dev.ifname(), dev.ppa(), dev.hwaddr())?;
    t.flush()
}

#[cfg(test)]
mod test {
    use super::*;
    use tapcfg_test_utils::EBUSY;
    use tapcfg_test_utils::Op;
    use tapcfg_test_utils::bind_ok;
    use tapcfg_test_utils::ifname;
    use tapcfg_test_utils::mock_hdl;
    use tapcfg_test_utils::teardown;

    #[test]
    fn empty_config_is_default() {
        assert_eq!(parse_config("").unwrap(), TapCfg::default());
    }

    #[test]
    fn config_overrides() {
        let cfg = parse_config(
            r#"
            tap_node = "/devices/pseudo/tap@0:tap"
            probe_count = 64
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tap_node, Path::new("/devices/pseudo/tap@0:tap"));
        assert_eq!(cfg.probe_count, 64);
        assert_eq!(cfg.name_prefix, "tap");
    }

    #[test]
    fn bad_configs() {
        assert!(parse_config("probe_count = 0").is_err());
        assert!(parse_config("name_prefix = \"tap2\"").is_err());
        assert!(parse_config("tun_node = \"/dev/tun\"").is_err());
        assert!(load_config(Some(Path::new("/nonexistent/tap.toml"))).is_err());
    }

    #[test]
    fn status_table() {
        let rows = [
            IfStatus { ifname: ifname("tap0"), up: true, mtu: 1500 },
            IfStatus { ifname: ifname("tap12"), up: false, mtu: 9000 },
        ];
        let mut out = vec![];
        print_status_into(&mut out, &rows).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "NAME   STATE  MTU\n\
             tap0   up     1500\n\
             tap12  down   9000\n"
        );
    }

    #[test]
    fn device_table() {
        let (hdl, _log) = mock_hdl();
        let dev = bind_ok(&hdl, "tap0", false);
        let mut out = vec![];
        print_device_into(&mut out, &dev).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "NAME  PPA  HWADDR\n\
             tap0  0    02:08:20:00:00:00\n"
        );
        teardown(&hdl, dev);
    }

    fn discard() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn unplumb_prefers_the_configuration_error() {
        let (hdl, _log) = mock_hdl();
        let k = hdl.streams();
        let dev = bind_ok(&hdl, "tap0", false);
        k.fail_always(Op::Punlink, EBUSY);

        let err =
            unplumb(&hdl, dev, Err(anyhow::anyhow!("bad mtu")), &discard())
                .unwrap_err();
        assert_eq!(err.to_string(), "bad mtu");

        // Released anyway; the links stay for `tapadm unplumb`.
        assert_eq!(k.open_fds(), 0);
        assert_eq!(k.live_links(), 3);
    }

    #[test]
    fn unplumb_reports_unbind_failure() {
        let (hdl, _log) = mock_hdl();
        let k = hdl.streams();
        let dev = bind_ok(&hdl, "tap0", false);
        k.fail(Op::Punlink, 0, EBUSY);

        let err = unplumb(&hdl, dev, Ok(()), &discard()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<tapcfg::Error>(),
            Some(tapcfg::Error::UnlinkFailed { .. })
        ));
        assert_eq!(k.open_fds(), 0);

        let (hdl, _log) = mock_hdl();
        let dev = bind_ok(&hdl, "tap0", false);
        unplumb(&hdl, dev, Ok(()), &discard()).unwrap();
        assert_eq!(hdl.streams().live_links(), 0);
        assert_eq!(hdl.streams().open_fds(), 0);
    }
}
