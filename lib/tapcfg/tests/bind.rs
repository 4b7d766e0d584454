// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Plumbing against the fake kernel.
//!
//! With the default configuration a bind opens, in order: the IPv4
//! multiplexor (fd 3), the IPv6 multiplexor (4), the tap device (5),
//! the IPv4 interface stream (6), the ARP stream (7), and the IPv6
//! interface stream (8). It makes, in order, the IPv4 link (muxid 1),
//! the ARP link (2), and the IPv6 link (3).

use tapcfg_test_utils::*;

fn assert_clean(hdl: &MockHdl) {
    let k = hdl.streams();
    assert_eq!(k.open_fds(), 0, "descriptors leaked: {:?}", k.events());
    assert_eq!(k.live_links(), 0, "links leaked: {:?}", k.muxids());
    assert_eq!(k.iface_count(), 0);
    assert!(k.held_ppas().is_empty());
}

fn opened(events: &[Event]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Open { fd, .. } => Some(*fd),
            _ => None,
        })
        .collect()
}

fn linked(events: &[Event]) -> Vec<i32> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Link { muxid, .. } => Some(muxid.0),
            _ => None,
        })
        .collect()
}

#[test]
fn bind_explicit_name() {
    let (hdl, log) = mock_hdl();
    let dev = bind_ok(&hdl, "tap0", false);
    let k = hdl.streams();

    assert_eq!(dev.ifname().as_str(), "tap0");
    assert_eq!(dev.ppa().val(), 0);
    assert!(dev.is_bound());
    assert_eq!(dev.hwaddr(), k.mac(0));
    assert_eq!(log.count(LogLevel::Warn), 0);

    assert_eq!(k.open_fds(), 3);
    assert_eq!(k.live_links(), 3);

    let v4 = k.iface("tap0", Family::V4).unwrap();
    assert_eq!(v4.muxids, [1, 2]);
    assert!(v4.arp_named);
    assert!(v4.flags.contains(LifFlags::IFF_IPV4));

    let v6 = k.iface("tap0", Family::V6).unwrap();
    assert_eq!(v6.muxids, [3, 0]);
    assert!(v6.flags.contains(LifFlags::IFF_IPV6));
    assert!(!v6.flags.intersects(LifFlags::IFF_BROADCAST | LifFlags::IFF_IPV4));

    // The interface streams are closed once linked.
    let events = k.events();
    assert!(events.contains(&Event::Close(6)));
    assert!(events.contains(&Event::Close(7)));
    assert!(events.contains(&Event::Close(8)));

    // The ARP module lands on the IPv4 interface stream and the IPv4
    // multiplexor, never on the packet stream.
    let arp_pushes: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            Event::Push { fd, module: Module::Arp } => Some(*fd),
            _ => None,
        })
        .collect();
    assert_eq!(arp_pushes, vec![6, 3, 7]);

    teardown(&hdl, dev);
    assert_clean(&hdl);
}

#[test]
fn explicit_ids_are_honored_or_denied() {
    for ppa in [0, 3, 15, 42] {
        let name = format!("tap{ppa}");

        let (hdl, _log) = mock_hdl();
        let dev = bind_ok(&hdl, &name, false);
        assert_eq!(dev.ifname().as_str(), name);
        teardown(&hdl, dev);
        assert_clean(&hdl);

        let (hdl, _log) = mock_hdl();
        hdl.streams().occupy(ppa);
        match hdl.bind(&name, false) {
            Err(Error::AllocationDenied { ppa: denied, .. }) => {
                assert_eq!(denied.val(), ppa);
            }
            res => panic!("expected AllocationDenied for {name}: {res:?}"),
        }
        assert_clean(&hdl);
        assert_eq!(hdl.streams().count(Op::NewPpa), 1);
    }
}

#[test]
fn bad_names_without_fallback() {
    for name in ["eth0", "tap", "tap01", "tapx", ""] {
        let (hdl, _log) = mock_hdl();
        assert!(
            matches!(hdl.bind(name, false), Err(Error::InvalidName(_))),
            "{name}"
        );
        assert_clean(&hdl);
        assert_eq!(hdl.streams().count(Op::NewPpa), 0);
    }
}

#[test]
fn bad_name_with_fallback_starts_at_zero() {
    let (hdl, _log) = mock_hdl();
    let dev = bind_ok(&hdl, "eth7", true);
    assert_eq!(dev.ifname().as_str(), "tap0");
    teardown(&hdl, dev);
}

#[test]
fn fallback_finds_the_only_free_id() {
    for free in 0..16 {
        let (hdl, log) = mock_hdl();
        let k = hdl.streams();
        (0..16).filter(|p| *p != free).for_each(|p| k.occupy(p));

        let dev = bind_ok(&hdl, "tap0", true);
        assert_eq!(dev.ppa().val(), free);
        assert_eq!(dev.ifname().as_str(), format!("tap{free}"));

        // Lowest first, stopping at the first success; 0 is not
        // retried.
        let expected = if free == 0 { 1 } else { free as usize + 1 };
        assert_eq!(k.count(Op::NewPpa), expected);
        assert_eq!(free != 0, log.contains(LogLevel::Note, "PPA 0 refused"));

        teardown(&hdl, dev);
        assert_clean(&hdl);
    }
}

#[test]
fn fallback_skips_the_requested_id() {
    let (hdl, _log) = mock_hdl();
    let k = hdl.streams();
    for p in [0, 1, 5] {
        k.occupy(p);
    }

    let dev = bind_ok(&hdl, "tap5", true);
    assert_eq!(dev.ifname().as_str(), "tap2");
    // 5, then 0, 1, 2.
    assert_eq!(k.count(Op::NewPpa), 4);
    teardown(&hdl, dev);
}

#[test]
fn exhaustion_leaks_nothing() {
    let (hdl, _log) = mock_hdl();
    let k = hdl.streams();
    (0..16).for_each(|p| k.occupy(p));

    match hdl.bind("tap3", true) {
        Err(Error::NoDeviceAvailable { probed: 16 }) => {}
        res => panic!("expected NoDeviceAvailable: {res:?}"),
    }

    // The requested id plus the 15 others.
    assert_eq!(k.count(Op::NewPpa), 16);
    assert_eq!(k.count(Op::Plink), 0);
    assert_eq!(opened(&k.events()), vec![3, 4, 5]);
    assert_clean(&hdl);
}

#[test]
fn missing_driver_is_reported_distinctly() {
    let (hdl, log) = mock_hdl();
    hdl.streams().remove_node("/dev/tap");

    match hdl.bind("tap0", true) {
        Err(Error::DeviceUnavailable { node, .. }) => {
            assert_eq!(node, std::path::PathBuf::from("/dev/tap"));
        }
        res => panic!("expected DeviceUnavailable: {res:?}"),
    }
    assert!(log.contains(LogLevel::Note, "tap driver is installed"));
    assert_clean(&hdl);
}

struct Fault {
    op: Op,
    nth: usize,
    check: fn(&Error) -> bool,
    opened: &'static [u32],
    linked: &'static [i32],
    unwind: Vec<Event>,
}

fn close(fd: u32) -> Event {
    Event::Close(fd)
}

fn unlink4(muxid: i32) -> Event {
    Event::Unlink { family: Family::V4, muxid: MuxId(muxid) }
}

fn unlink6(muxid: i32) -> Event {
    Event::Unlink { family: Family::V6, muxid: MuxId(muxid) }
}

fn faults() -> Vec<Fault> {
    vec![
        // Step 1: device nodes.
        Fault {
            op: Op::Open,
            nth: 0,
            check: |e| matches!(e, Error::DeviceUnavailable { .. }),
            opened: &[],
            linked: &[],
            unwind: vec![],
        },
        Fault {
            op: Op::Open,
            nth: 1,
            check: |e| matches!(e, Error::DeviceUnavailable { .. }),
            opened: &[3],
            linked: &[],
            unwind: vec![close(3)],
        },
        Fault {
            op: Op::Open,
            nth: 2,
            check: |e| matches!(e, Error::DeviceUnavailable { .. }),
            opened: &[3, 4],
            linked: &[],
            unwind: vec![close(4), close(3)],
        },
        // Step 2: the PPA.
        Fault {
            op: Op::NewPpa,
            nth: 0,
            check: |e| matches!(e, Error::AllocationDenied { .. }),
            opened: &[3, 4, 5],
            linked: &[],
            unwind: vec![close(5), close(4), close(3)],
        },
        // Step 3: IPv4 and ARP.
        Fault {
            op: Op::Open,
            nth: 3,
            check: |e| matches!(e, Error::DeviceUnavailable { .. }),
            opened: &[3, 4, 5],
            linked: &[],
            unwind: vec![close(5), close(4), close(3)],
        },
        Fault {
            op: Op::Push,
            nth: 0,
            check: |e| {
                matches!(e, Error::ModulePushFailed { module: Module::Ip, .. })
            },
            opened: &[3, 4, 5, 6],
            linked: &[],
            unwind: vec![close(6), close(5), close(4), close(3)],
        },
        Fault {
            op: Op::GetFlags,
            nth: 0,
            check: |e| {
                matches!(e, Error::NameAssignFailed { family: Family::V4, .. })
            },
            opened: &[3, 4, 5, 6],
            linked: &[],
            unwind: vec![close(6), close(5), close(4), close(3)],
        },
        Fault {
            op: Op::SetName,
            nth: 0,
            check: |e| {
                matches!(e, Error::NameAssignFailed { family: Family::V4, .. })
            },
            opened: &[3, 4, 5, 6],
            linked: &[],
            unwind: vec![close(6), close(5), close(4), close(3)],
        },
        Fault {
            op: Op::Push,
            nth: 1,
            check: |e| {
                matches!(
                    e,
                    Error::ModulePushFailed { module: Module::Arp, .. }
                )
            },
            opened: &[3, 4, 5, 6],
            linked: &[],
            unwind: vec![close(6), close(5), close(4), close(3)],
        },
        Fault {
            op: Op::Push,
            nth: 2,
            check: |e| {
                matches!(
                    e,
                    Error::ModulePushFailed { module: Module::Arp, .. }
                )
            },
            opened: &[3, 4, 5, 6],
            linked: &[],
            unwind: vec![close(6), close(5), close(4), close(3)],
        },
        Fault {
            op: Op::Open,
            nth: 4,
            check: |e| matches!(e, Error::DeviceUnavailable { .. }),
            opened: &[3, 4, 5, 6],
            linked: &[],
            unwind: vec![close(6), close(5), close(4), close(3)],
        },
        Fault {
            op: Op::Push,
            nth: 3,
            check: |e| {
                matches!(
                    e,
                    Error::ModulePushFailed { module: Module::Arp, .. }
                )
            },
            opened: &[3, 4, 5, 6, 7],
            linked: &[],
            unwind: vec![close(7), close(6), close(5), close(4), close(3)],
        },
        Fault {
            op: Op::ArpSetName,
            nth: 0,
            check: |e| matches!(e, Error::NameAssignFailed { .. }),
            opened: &[3, 4, 5, 6, 7],
            linked: &[],
            unwind: vec![close(7), close(6), close(5), close(4), close(3)],
        },
        // The stream being linked is closed by the failed link itself.
        Fault {
            op: Op::Plink,
            nth: 0,
            check: |e| matches!(e, Error::LinkFailed { what: "IPv4", .. }),
            opened: &[3, 4, 5, 6, 7],
            linked: &[],
            unwind: vec![close(6), close(7), close(5), close(4), close(3)],
        },
        Fault {
            op: Op::Plink,
            nth: 1,
            check: |e| matches!(e, Error::LinkFailed { what: "ARP", .. }),
            opened: &[3, 4, 5, 6, 7],
            linked: &[1],
            unwind: vec![close(7), unlink4(1), close(5), close(4), close(3)],
        },
        Fault {
            op: Op::SetMuxId,
            nth: 0,
            check: |e| {
                matches!(e, Error::Ioctl { name: "SIOCSLIFMUXID", .. })
            },
            opened: &[3, 4, 5, 6, 7],
            linked: &[1, 2],
            unwind: vec![unlink4(2), unlink4(1), close(5), close(4), close(3)],
        },
        // Step 4: IPv6.
        Fault {
            op: Op::Open,
            nth: 5,
            check: |e| matches!(e, Error::DeviceUnavailable { .. }),
            opened: &[3, 4, 5, 6, 7],
            linked: &[1, 2],
            unwind: vec![unlink4(2), unlink4(1), close(5), close(4), close(3)],
        },
        Fault {
            op: Op::Push,
            nth: 4,
            check: |e| {
                matches!(e, Error::ModulePushFailed { module: Module::Ip, .. })
            },
            opened: &[3, 4, 5, 6, 7, 8],
            linked: &[1, 2],
            unwind: vec![
                close(8),
                unlink4(2),
                unlink4(1),
                close(5),
                close(4),
                close(3),
            ],
        },
        Fault {
            op: Op::SetName,
            nth: 1,
            check: |e| {
                matches!(e, Error::NameAssignFailed { family: Family::V6, .. })
            },
            opened: &[3, 4, 5, 6, 7, 8],
            linked: &[1, 2],
            unwind: vec![
                close(8),
                unlink4(2),
                unlink4(1),
                close(5),
                close(4),
                close(3),
            ],
        },
        Fault {
            op: Op::Plink,
            nth: 2,
            check: |e| matches!(e, Error::LinkFailed { what: "IPv6", .. }),
            opened: &[3, 4, 5, 6, 7, 8],
            linked: &[1, 2],
            unwind: vec![
                close(8),
                unlink4(2),
                unlink4(1),
                close(5),
                close(4),
                close(3),
            ],
        },
        Fault {
            op: Op::SetMuxId,
            nth: 1,
            check: |e| {
                matches!(e, Error::Ioctl { name: "SIOCSLIFMUXID", .. })
            },
            opened: &[3, 4, 5, 6, 7, 8],
            linked: &[1, 2, 3],
            unwind: vec![
                unlink4(2),
                unlink4(1),
                unlink6(3),
                close(5),
                close(4),
                close(3),
            ],
        },
    ]
}

#[test]
fn every_step_unwinds() {
    for f in faults() {
        let (hdl, log) = mock_hdl();
        let k = hdl.streams();
        k.fail(f.op, f.nth, EPERM);

        let err = match hdl.bind("tap0", false) {
            Ok(_) => panic!("{:?} #{} did not fail the bind", f.op, f.nth),
            Err(e) => e,
        };
        assert!((f.check)(&err), "{:?} #{}: wrong error {err:?}", f.op, f.nth);

        let events = k.events();
        assert_eq!(opened(&events), f.opened, "{:?} #{}", f.op, f.nth);
        assert_eq!(linked(&events), f.linked, "{:?} #{}", f.op, f.nth);
        assert!(
            events.ends_with(&f.unwind),
            "{:?} #{}: unwound as {events:?}",
            f.op,
            f.nth
        );

        assert_clean(&hdl);
        assert_eq!(log.count(LogLevel::Error), 0);
    }
}

#[test]
fn late_failure_unlinks_ipv4_before_ipv6() {
    let (hdl, _log) = mock_hdl();
    let k = hdl.streams();
    k.fail(Op::SetMuxId, 1, EINVAL);

    assert!(hdl.bind("tap0", false).is_err());
    let unlinks: Vec<Event> = k
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Unlink { .. }))
        .collect();
    assert_eq!(unlinks, vec![unlink4(2), unlink4(1), unlink6(3)]);
    assert_clean(&hdl);
}

#[test]
fn unwind_failure_does_not_mask_the_error() {
    let (hdl, log) = mock_hdl();
    let k = hdl.streams();
    k.fail(Op::SetMuxId, 1, EINVAL);
    k.fail_always(Op::Punlink, EBUSY);

    match hdl.bind("tap0", false) {
        Err(Error::Ioctl { name: "SIOCSLIFMUXID", .. }) => {}
        res => panic!("expected the SIOCSLIFMUXID failure: {res:?}"),
    }

    // Every unlink was attempted and each failure logged; the
    // descriptors are closed regardless.
    assert_eq!(k.count(Op::Punlink), 3);
    assert_eq!(log.count(LogLevel::Error), 3);
    assert!(log.contains(LogLevel::Error, "muxid 3"));
    assert_eq!(k.open_fds(), 0);
    assert_eq!(k.live_links(), 3);
}

#[test]
fn hwaddr_failure_is_not_fatal_at_bind() {
    let (hdl, log) = mock_hdl();
    let k = hdl.streams();
    k.fail(Op::PutMsg, 0, EINVAL);

    let dev = bind_ok(&hdl, "tap0", false);
    assert_eq!(dev.hwaddr(), MacAddr::ZERO);
    assert!(log.contains(LogLevel::Warn, "hardware address of tap0"));
    assert_eq!(k.live_links(), 3);
    assert_eq!(k.open_fds(), 3);

    teardown(&hdl, dev);
    assert_clean(&hdl);
}

#[test]
fn dlpi_error_ack_is_not_fatal_at_bind() {
    let (hdl, log) = mock_hdl();

    // The attach request goes out but no acknowledgement comes back.
    hdl.streams().fail_always(Op::GetMsg, ENXIO);
    let dev = bind_ok(&hdl, "tap1", false);
    assert_eq!(dev.hwaddr(), MacAddr::ZERO);
    assert_eq!(log.count(LogLevel::Warn), 1);
    teardown(&hdl, dev);
}

#[test]
fn enaddr_strategy_reads_through_ip() {
    let (hdl, log) = mock_hdl_with(EnAddr);
    let k = hdl.streams();
    let mut dev = bind_ok(&hdl, "tap4", false);

    assert_eq!(dev.hwaddr(), k.mac(4));
    assert_eq!(k.count(Op::PutMsg), 0);
    assert_eq!(k.count(Op::GetEnAddr), 1);
    assert_eq!(log.count(LogLevel::Warn), 0);

    let mac: MacAddr = "02:00:00:aa:bb:cc".parse().unwrap();
    assert!(matches!(
        hdl.set_hwaddr(&mut dev, mac),
        Err(Error::Unsupported(_))
    ));
    assert_eq!(dev.hwaddr(), k.mac(4));

    teardown(&hdl, dev);
}

#[test]
fn set_hwaddr_updates_cache_only_on_success() {
    let (hdl, _log) = mock_hdl();
    let k = hdl.streams();
    let mut dev = bind_ok(&hdl, "tap0", false);
    let orig = dev.hwaddr();

    let mac: MacAddr = "02:08:20:12:34:56".parse().unwrap();
    hdl.set_hwaddr(&mut dev, mac).unwrap();
    assert_eq!(dev.hwaddr(), mac);
    assert_eq!(hdl.hwaddr(&dev), mac);
    assert_eq!(hdl.query_hwaddr(&dev).unwrap(), mac);
    assert_eq!(k.mac(0), mac);

    let other: MacAddr = "02:08:20:65:43:21".parse().unwrap();
    k.fail_always(Op::PutMsg, EINVAL);
    assert!(matches!(
        hdl.set_hwaddr(&mut dev, other),
        Err(Error::HardwareAddressSetFailed { .. })
    ));
    assert!(matches!(
        hdl.query_hwaddr(&dev),
        Err(Error::HardwareAddressQueryFailed { .. })
    ));
    assert_eq!(dev.hwaddr(), mac);
    assert_eq!(k.mac(0), mac);
    k.clear_faults();

    assert!(matches!(
        hdl.set_hwaddr(&mut dev, MacAddr::BROADCAST),
        Err(Error::HardwareAddressSetFailed { .. })
    ));
    assert_eq!(dev.hwaddr(), mac);
    assert_ne!(orig, mac);

    teardown(&hdl, dev);
}

#[test]
fn two_devices_side_by_side() {
    let (hdl, _log) = mock_hdl();
    let k = hdl.streams();
    let a = bind_ok(&hdl, "tap0", true);
    let b = bind_ok(&hdl, "tap0", true);

    assert_eq!(a.ifname().as_str(), "tap0");
    assert_eq!(b.ifname().as_str(), "tap1");
    assert_eq!(k.live_links(), 6);
    assert_ne!(a.hwaddr(), b.hwaddr());

    teardown(&hdl, b);
    assert!(k.iface("tap0", Family::V4).is_some());
    teardown(&hdl, a);
    assert_clean(&hdl);
}
