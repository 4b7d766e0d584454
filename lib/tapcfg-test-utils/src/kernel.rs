// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A fake STREAMS kernel.
//!
//! [`MockKernel`] models just enough of the tap driver, IP, ARP, and
//! the IP multiplexors to tell a correct plumbing sequence from a
//! broken one: streams, pushed modules, PPAs, named interfaces,
//! persistent links, and the DLPI attach/physical address exchange.
//! Every call is journaled and any call can be made to fail.

use illumos_sys_hdrs::EAGAIN;
use illumos_sys_hdrs::EBADF;
use illumos_sys_hdrs::EEXIST;
use illumos_sys_hdrs::EINVAL;
use illumos_sys_hdrs::ENOENT;
use illumos_sys_hdrs::ENXIO;
use illumos_sys_hdrs::LifFlags;
use illumos_sys_hdrs::SIOCGENADDR;
use illumos_sys_hdrs::SIOCGLIFFLAGS;
use illumos_sys_hdrs::SIOCGLIFMTU;
use illumos_sys_hdrs::SIOCGLIFMUXID;
use illumos_sys_hdrs::SIOCSIFADDR;
use illumos_sys_hdrs::SIOCSIFNETMASK;
use illumos_sys_hdrs::SIOCSLIFFLAGS;
use illumos_sys_hdrs::SIOCSLIFMTU;
use illumos_sys_hdrs::SIOCSLIFMUXID;
use illumos_sys_hdrs::SIOCSLIFNAME;
use illumos_sys_hdrs::TUNNEWPPA;
use illumos_sys_hdrs::c_int;
use illumos_sys_hdrs::dlpi::DL_ATTACH_REQ;
use illumos_sys_hdrs::dlpi::DL_BADADDR;
use illumos_sys_hdrs::dlpi::DL_BADPPA;
use illumos_sys_hdrs::dlpi::DL_BADPRIM;
use illumos_sys_hdrs::dlpi::DL_ERROR_ACK;
use illumos_sys_hdrs::dlpi::DL_OK_ACK;
use illumos_sys_hdrs::dlpi::DL_OUTSTATE;
use illumos_sys_hdrs::dlpi::DL_PHYS_ADDR_ACK;
use illumos_sys_hdrs::dlpi::DL_PHYS_ADDR_REQ;
use illumos_sys_hdrs::dlpi::DL_SET_PHYS_ADDR_REQ;
use illumos_sys_hdrs::dlpi::dl_attach_req_t;
use illumos_sys_hdrs::dlpi::dl_error_ack_t;
use illumos_sys_hdrs::dlpi::dl_ok_ack_t;
use illumos_sys_hdrs::dlpi::dl_phys_addr_ack_t;
use illumos_sys_hdrs::dlpi::dl_set_phys_addr_req_t;
use illumos_sys_hdrs::ifreq;
use illumos_sys_hdrs::ioc_t;
use illumos_sys_hdrs::lifreq;
use illumos_sys_hdrs::t_uscalar_t;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::path::PathBuf;
use tapcfg::Family;
use tapcfg::MacAddr;
use tapcfg::Module;
use tapcfg::MuxId;
use tapcfg::Streams;
use tapcfg::TapCfg;
use tapcfg::sys::read_payload;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

/// A descriptor handed out by [`MockKernel`].
#[derive(Debug, Eq, PartialEq)]
pub struct MockFd(u32);

impl MockFd {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// What a descriptor refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Node {
    Mux(Family),
    Tap,
    Socket(Family),
}

/// Every kernel request the fake understands, for journaling and
/// fault injection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Op {
    Open,
    Socket,
    Push,
    Pop,
    NewPpa,
    ArpSetName,
    GetFlags,
    SetFlags,
    SetName,
    GetMuxId,
    SetMuxId,
    GetMtu,
    SetMtu,
    SetAddr,
    SetNetmask,
    GetEnAddr,
    Plink,
    Punlink,
    PutMsg,
    GetMsg,
}

/// A change to the resources a caller holds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Open { fd: u32, node: Node },
    Close(u32),
    Push { fd: u32, module: Module },
    Link { family: Family, muxid: MuxId },
    Unlink { family: Family, muxid: MuxId },
}

/// A plumbed interface as the kernel sees it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Iface {
    pub ppa: u32,
    pub flags: LifFlags,
    pub muxids: [c_int; 2],
    pub addr: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub mtu: u32,
    pub arp_named: bool,
}

#[derive(Debug)]
struct Stream {
    node: Node,
    modules: Vec<Module>,
    ppa: Option<u32>,
    iface: Option<(String, Family)>,
    linked: bool,
    dlpi_ppa: Option<u32>,
    reply: Option<Vec<u8>>,
}

impl Stream {
    fn new(node: Node) -> Self {
        Self {
            node,
            modules: vec![],
            ppa: None,
            iface: None,
            linked: false,
            dlpi_ppa: None,
            reply: None,
        }
    }

    fn family(&self) -> Family {
        match self.node {
            Node::Mux(f) | Node::Socket(f) => f,
            Node::Tap => self.iface.as_ref().map_or(Family::V4, |(_, f)| *f),
        }
    }
}

#[derive(Debug)]
struct Link {
    family: Family,
    iface: Option<(String, Family)>,
}

#[derive(Debug)]
struct Fault {
    op: Op,
    nth: Option<usize>,
    errno: c_int,
}

#[derive(Debug, Default)]
struct State {
    next_fd: u32,
    next_muxid: c_int,
    streams: BTreeMap<u32, Stream>,
    ifaces: BTreeMap<(String, Family), Iface>,
    links: BTreeMap<c_int, Link>,
    occupied: BTreeSet<u32>,
    macs: BTreeMap<u32, MacAddr>,
    missing: BTreeSet<PathBuf>,
    counts: HashMap<Op, usize>,
    faults: Vec<Fault>,
    calls: Vec<Op>,
    events: Vec<Event>,
}

fn errno(e: c_int) -> io::Error {
    io::Error::from_raw_os_error(e)
}

fn name_of(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

impl State {
    /// Journal `op` and fail it if a fault says so.
    fn gate(&mut self, op: Op) -> io::Result<()> {
        self.calls.push(op);
        let count = self.counts.entry(op).or_default();
        let nth = *count;
        *count += 1;

        match self
            .faults
            .iter()
            .find(|f| f.op == op && f.nth.is_none_or(|n| n == nth))
        {
            Some(f) => Err(errno(f.errno)),
            None => Ok(()),
        }
    }

    fn stream(&mut self, fd: &MockFd) -> io::Result<&mut Stream> {
        self.streams.get_mut(&fd.0).ok_or_else(|| errno(EBADF))
    }

    fn new_fd(&mut self, node: Node) -> MockFd {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.streams.insert(fd, Stream::new(node));
        self.events.push(Event::Open { fd, node });
        MockFd(fd)
    }

    fn ppa_in_use(&self, ppa: u32) -> bool {
        self.occupied.contains(&ppa)
            || self.streams.values().any(|s| s.ppa == Some(ppa))
    }

    fn ppa_open(&self, ppa: u32) -> bool {
        self.streams
            .values()
            .any(|s| s.node == Node::Tap && s.ppa == Some(ppa))
    }

    fn mac(&self, ppa: u32) -> MacAddr {
        self.macs
            .get(&ppa)
            .copied()
            .unwrap_or(MacAddr::from([0x02, 0x08, 0x20, 0x00, 0x00, ppa as u8]))
    }

    fn iface_mut(
        &mut self,
        name: &[u8],
        family: Family,
    ) -> io::Result<&mut Iface> {
        self.ifaces
            .get_mut(&(name_of(name), family))
            .ok_or_else(|| errno(ENXIO))
    }

    fn new_ppa(&mut self, fd: &MockFd, data: &[u8]) -> io::Result<c_int> {
        let want: c_int = read_payload(data).ok_or_else(|| errno(EINVAL))?;
        let stream = self.stream(fd)?;
        if stream.node != Node::Tap || !stream.modules.is_empty() {
            return Err(errno(EINVAL));
        }
        if stream.ppa.is_some() {
            return Err(errno(EEXIST));
        }

        let want = u32::try_from(want).map_err(|_| errno(EINVAL))?;
        if self.ppa_in_use(want) {
            return Err(errno(EEXIST));
        }

        self.stream(fd)?.ppa = Some(want);
        Ok(want as c_int)
    }

    fn arp_set_name(&mut self, fd: &MockFd, data: &[u8]) -> io::Result<c_int> {
        let lifr: lifreq = read_payload(data).ok_or_else(|| errno(EINVAL))?;
        let stream = self.stream(fd)?;
        if stream.modules.last() != Some(&Module::Arp) {
            return Err(errno(EINVAL));
        }

        self.iface_mut(lifr.name(), Family::V4)?.arp_named = true;
        Ok(0)
    }

    fn set_name(&mut self, fd: &MockFd, lifr: &lifreq) -> io::Result<()> {
        let stream = self.stream(fd)?;
        if stream.node != Node::Tap
            || stream.modules != [Module::Ip]
            || stream.iface.is_some()
        {
            return Err(errno(EINVAL));
        }

        let name = name_of(lifr.name());
        if name.is_empty() {
            return Err(errno(EINVAL));
        }

        let mut flags = lifr.flags();
        let family = if flags.contains(LifFlags::IFF_IPV6) {
            Family::V6
        } else {
            flags |= LifFlags::IFF_IPV4;
            Family::V4
        };

        let key = (name, family);
        if self.ifaces.contains_key(&key) {
            return Err(errno(EEXIST));
        }
        if !self.ppa_open(lifr.ppa()) {
            return Err(errno(ENXIO));
        }

        self.ifaces.insert(
            key.clone(),
            Iface {
                ppa: lifr.ppa(),
                flags,
                muxids: [0; 2],
                addr: None,
                netmask: None,
                mtu: 1500,
                arp_named: false,
            },
        );
        self.stream(fd)?.iface = Some(key);
        Ok(())
    }

    fn get_flags(&mut self, fd: &MockFd, lifr: &mut lifreq) -> io::Result<()> {
        let stream = self.stream(fd)?;
        let node = stream.node;
        let has_ip = stream.modules.contains(&Module::Ip);
        let own = stream.iface.clone();
        let family = stream.family();

        // A fresh IP stream answers for its not yet named interface.
        if node == Node::Tap && lifr.name().is_empty() {
            if !has_ip {
                return Err(errno(EINVAL));
            }
            let flags = match own {
                Some(key) => self.ifaces[&key].flags,
                None => {
                    LifFlags::IFF_BROADCAST
                        | LifFlags::IFF_MULTICAST
                        | LifFlags::IFF_IPV4
                }
            };
            lifr.set_flags(flags);
            return Ok(());
        }

        let flags = self.iface_mut(lifr.name(), family)?.flags;
        lifr.set_flags(flags);
        Ok(())
    }

    fn set_flags(&mut self, fd: &MockFd, lifr: &lifreq) -> io::Result<()> {
        let family = self.stream(fd)?.family();
        let iface = self.iface_mut(lifr.name(), family)?;
        let fixed = LifFlags::IFF_IPV4 | LifFlags::IFF_IPV6;
        iface.flags = lifr.flags().difference(fixed) | (iface.flags & fixed);
        Ok(())
    }

    fn plink(&mut self, mux: &MockFd, lower: &MockFd) -> io::Result<MuxId> {
        let Node::Mux(family) = self.stream(mux)?.node else {
            return Err(errno(EINVAL));
        };

        let stream = self.stream(lower)?;
        if stream.node != Node::Tap || stream.linked {
            return Err(errno(EINVAL));
        }

        match (&stream.iface, stream.modules.first()) {
            (Some((_, f)), Some(Module::Ip)) if *f == family => {}
            (None, Some(Module::Arp)) if family == Family::V4 => {}
            _ => return Err(errno(EINVAL)),
        }

        stream.linked = true;
        let iface = stream.iface.clone();
        self.next_muxid += 1;
        let muxid = MuxId(self.next_muxid);
        self.links.insert(muxid.0, Link { family, iface });
        self.events.push(Event::Link { family, muxid });
        Ok(muxid)
    }

    fn punlink(&mut self, mux: &MockFd, muxid: MuxId) -> io::Result<()> {
        let Node::Mux(family) = self.stream(mux)?.node else {
            return Err(errno(EINVAL));
        };

        match self.links.get(&muxid.0) {
            Some(link) if link.family == family => {}
            _ => return Err(errno(EINVAL)),
        }

        if let Some(link) = self.links.remove(&muxid.0) {
            if let Some(key) = link.iface {
                self.ifaces.remove(&key);
            }
        }
        self.events.push(Event::Unlink { family, muxid });
        Ok(())
    }

    fn dlpi(&mut self, fd: &MockFd, ctl: &[u8]) -> io::Result<Vec<u8>> {
        let (prim, _) =
            t_uscalar_t::read_from_prefix(ctl).map_err(|_| errno(EINVAL))?;
        let stream = self.stream(fd)?;
        if stream.node != Node::Tap || !stream.modules.is_empty() {
            return Err(errno(EINVAL));
        }
        let attached = stream.dlpi_ppa;

        let error_ack = |dl_errno| {
            dl_error_ack_t {
                dl_primitive: DL_ERROR_ACK,
                dl_error_primitive: prim,
                dl_errno,
                dl_unix_errno: 0,
            }
            .as_bytes()
            .to_vec()
        };
        let ok_ack = || {
            dl_ok_ack_t { dl_primitive: DL_OK_ACK, dl_correct_primitive: prim }
                .as_bytes()
                .to_vec()
        };

        let reply = match (prim, attached) {
            (DL_ATTACH_REQ, Some(_)) => error_ack(DL_OUTSTATE),
            (DL_ATTACH_REQ, None) => {
                let (req, _) = dl_attach_req_t::read_from_prefix(ctl)
                    .map_err(|_| errno(EINVAL))?;
                if self.ppa_open(req.dl_ppa) {
                    self.stream(fd)?.dlpi_ppa = Some(req.dl_ppa);
                    ok_ack()
                } else {
                    error_ack(DL_BADPPA)
                }
            }
            (DL_PHYS_ADDR_REQ, Some(ppa)) => {
                let ack = dl_phys_addr_ack_t {
                    dl_primitive: DL_PHYS_ADDR_ACK,
                    dl_addr_length: 6,
                    dl_addr_offset: 12,
                };
                let mut msg = ack.as_bytes().to_vec();
                msg.extend_from_slice(&self.mac(ppa).bytes());
                msg
            }
            (DL_SET_PHYS_ADDR_REQ, Some(ppa)) => {
                let (req, _) = dl_set_phys_addr_req_t::read_from_prefix(ctl)
                    .map_err(|_| errno(EINVAL))?;
                let off = req.dl_addr_offset as usize;
                let len = req.dl_addr_length as usize;
                match ctl.get(off..off + len).and_then(MacAddr::from_slice) {
                    Some(mac) => {
                        self.macs.insert(ppa, mac);
                        ok_ack()
                    }
                    None => error_ack(DL_BADADDR),
                }
            }
            (DL_PHYS_ADDR_REQ | DL_SET_PHYS_ADDR_REQ, None) => {
                error_ack(DL_OUTSTATE)
            }
            _ => error_ack(DL_BADPRIM),
        };

        Ok(reply)
    }
}

/// The fake kernel. See the module docs.
#[derive(Debug)]
pub struct MockKernel {
    cfg: TapCfg,
    state: RefCell<State>,
}

impl MockKernel {
    /// A kernel whose device nodes are where `cfg` says.
    pub fn new(cfg: &TapCfg) -> Self {
        let state = State { next_fd: 3, ..Default::default() };
        Self { cfg: cfg.clone(), state: RefCell::new(state) }
    }

    fn node(&self, path: &Path) -> Option<Node> {
        if path == self.cfg.ip_node {
            Some(Node::Mux(Family::V4))
        } else if path == self.cfg.ip6_node {
            Some(Node::Mux(Family::V6))
        } else if path == self.cfg.tap_node || path == self.cfg.arp_node {
            Some(Node::Tap)
        } else {
            None
        }
    }

    /// Make `op` fail with `errno` on its `nth` call, counting from
    /// zero since the kernel was created.
    pub fn fail(&self, op: Op, nth: usize, errno: c_int) {
        let fault = Fault { op, nth: Some(nth), errno };
        self.state.borrow_mut().faults.push(fault);
    }

    /// Make every call of `op` fail with `errno`.
    pub fn fail_always(&self, op: Op, errno: c_int) {
        self.state.borrow_mut().faults.push(Fault { op, nth: None, errno });
    }

    pub fn clear_faults(&self) {
        self.state.borrow_mut().faults.clear();
    }

    /// Pretend some other process holds `ppa`.
    pub fn occupy(&self, ppa: u32) {
        self.state.borrow_mut().occupied.insert(ppa);
    }

    /// Make `path` disappear, as if the driver weren't installed.
    pub fn remove_node(&self, path: impl Into<PathBuf>) {
        self.state.borrow_mut().missing.insert(path.into());
    }

    pub fn mac(&self, ppa: u32) -> MacAddr {
        self.state.borrow().mac(ppa)
    }

    pub fn open_fds(&self) -> usize {
        self.state.borrow().streams.len()
    }

    pub fn is_open(&self, fd: u32) -> bool {
        self.state.borrow().streams.contains_key(&fd)
    }

    pub fn live_links(&self) -> usize {
        self.state.borrow().links.len()
    }

    pub fn muxids(&self) -> Vec<MuxId> {
        self.state.borrow().links.keys().map(|id| MuxId(*id)).collect()
    }

    pub fn iface(&self, name: &str, family: Family) -> Option<Iface> {
        self.state.borrow().ifaces.get(&(name.to_string(), family)).cloned()
    }

    pub fn iface_count(&self) -> usize {
        self.state.borrow().ifaces.len()
    }

    /// The PPAs held by open tap streams.
    pub fn held_ppas(&self) -> Vec<u32> {
        self.state.borrow().streams.values().filter_map(|s| s.ppa).collect()
    }

    /// Every call made so far, failed ones included.
    pub fn calls(&self) -> Vec<Op> {
        self.state.borrow().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.state.borrow().calls.iter().filter(|c| **c == op).count()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    /// Forget the journal, but not the call counts faults are keyed
    /// on.
    pub fn clear_journal(&self) {
        let mut st = self.state.borrow_mut();
        st.calls.clear();
        st.events.clear();
    }
}

impl Streams for MockKernel {
    type Fd = MockFd;

    fn open(&self, node: &Path) -> io::Result<MockFd> {
        let kind = self.node(node);
        let mut st = self.state.borrow_mut();
        st.gate(Op::Open)?;
        match kind {
            Some(kind) if !st.missing.contains(node) => Ok(st.new_fd(kind)),
            _ => Err(errno(ENOENT)),
        }
    }

    fn control_socket(&self, family: Family) -> io::Result<MockFd> {
        let mut st = self.state.borrow_mut();
        st.gate(Op::Socket)?;
        Ok(st.new_fd(Node::Socket(family)))
    }

    fn close(&self, fd: MockFd) {
        let mut st = self.state.borrow_mut();
        let Some(stream) = st.streams.remove(&fd.0) else {
            panic!("close of unknown fd {}", fd.0);
        };

        // An interface whose stream was never linked goes away with it.
        if let (Some(key), false) = (stream.iface, stream.linked) {
            st.ifaces.remove(&key);
        }
        st.events.push(Event::Close(fd.0));
    }

    fn push(&self, fd: &MockFd, module: Module) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        st.gate(Op::Push)?;
        let stream = st.stream(fd)?;
        if matches!(stream.node, Node::Socket(_)) {
            return Err(errno(EINVAL));
        }
        stream.modules.push(module);
        st.events.push(Event::Push { fd: fd.0, module });
        Ok(())
    }

    fn pop(&self, fd: &MockFd) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        st.gate(Op::Pop)?;
        st.stream(fd)?.modules.pop().map(|_| ()).ok_or_else(|| errno(EINVAL))
    }

    fn str_ioctl(
        &self,
        fd: &MockFd,
        cmd: ioc_t,
        data: &mut [u8],
    ) -> io::Result<c_int> {
        let mut st = self.state.borrow_mut();
        match cmd {
            TUNNEWPPA => {
                st.gate(Op::NewPpa)?;
                st.new_ppa(fd, data)
            }
            SIOCSLIFNAME => {
                st.gate(Op::ArpSetName)?;
                st.arp_set_name(fd, data)
            }
            _ => Err(errno(EINVAL)),
        }
    }

    fn lif_ioctl(
        &self,
        fd: &MockFd,
        req: ioc_t,
        lifr: &mut lifreq,
    ) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        match req {
            SIOCGLIFFLAGS => {
                st.gate(Op::GetFlags)?;
                st.get_flags(fd, lifr)
            }
            SIOCSLIFFLAGS => {
                st.gate(Op::SetFlags)?;
                st.set_flags(fd, lifr)
            }
            SIOCSLIFNAME => {
                st.gate(Op::SetName)?;
                st.set_name(fd, lifr)
            }
            SIOCGLIFMUXID => {
                st.gate(Op::GetMuxId)?;
                let family = st.stream(fd)?.family();
                let muxids = st.iface_mut(lifr.name(), family)?.muxids;
                lifr.set_muxids(muxids);
                Ok(())
            }
            SIOCSLIFMUXID => {
                st.gate(Op::SetMuxId)?;
                let family = st.stream(fd)?.family();
                st.iface_mut(lifr.name(), family)?.muxids = lifr.muxids();
                Ok(())
            }
            SIOCGLIFMTU => {
                st.gate(Op::GetMtu)?;
                let family = st.stream(fd)?.family();
                let mtu = st.iface_mut(lifr.name(), family)?.mtu;
                lifr.set_mtu(mtu);
                Ok(())
            }
            SIOCSLIFMTU => {
                st.gate(Op::SetMtu)?;
                let family = st.stream(fd)?.family();
                if lifr.mtu() < 68 {
                    return Err(errno(EINVAL));
                }
                st.iface_mut(lifr.name(), family)?.mtu = lifr.mtu();
                Ok(())
            }
            _ => Err(errno(EINVAL)),
        }
    }

    fn if_ioctl(
        &self,
        fd: &MockFd,
        req: ioc_t,
        ifr: &mut ifreq,
    ) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        let op = match req {
            SIOCSIFADDR => Op::SetAddr,
            SIOCSIFNETMASK => Op::SetNetmask,
            SIOCGENADDR => Op::GetEnAddr,
            _ => return Err(errno(EINVAL)),
        };
        st.gate(op)?;

        if st.stream(fd)?.family() != Family::V4 {
            return Err(errno(EINVAL));
        }

        let addr = Ipv4Addr::from(ifr.addr_in().octets());
        let iface = st.iface_mut(ifr.name(), Family::V4)?;
        match op {
            Op::SetAddr => iface.addr = Some(addr),
            Op::SetNetmask => iface.netmask = Some(addr),
            _ => {
                let ppa = iface.ppa;
                ifr.set_enaddr(st.mac(ppa).bytes());
            }
        }
        Ok(())
    }

    fn plink(&self, mux: &MockFd, lower: &MockFd) -> io::Result<MuxId> {
        let mut st = self.state.borrow_mut();
        st.gate(Op::Plink)?;
        st.plink(mux, lower)
    }

    fn punlink(&self, mux: &MockFd, muxid: MuxId) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        st.gate(Op::Punlink)?;
        st.punlink(mux, muxid)
    }

    fn putmsg(
        &self,
        fd: &MockFd,
        ctl: &[u8],
        _flags: c_int,
    ) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        st.gate(Op::PutMsg)?;
        let reply = st.dlpi(fd, ctl)?;
        st.stream(fd)?.reply = Some(reply);
        Ok(())
    }

    fn getmsg(&self, fd: &MockFd, ctl: &mut [u8]) -> io::Result<usize> {
        let mut st = self.state.borrow_mut();
        st.gate(Op::GetMsg)?;
        let reply = st.stream(fd)?.reply.take().ok_or_else(|| errno(EAGAIN))?;
        let len = reply.len().min(ctl.len());
        ctl[..len].copy_from_slice(&reply[..len]);
        Ok(len)
    }
}
