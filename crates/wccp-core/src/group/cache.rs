//! Cache side view of a service group.
//!
//! A cache tracks every router that answered it and every peer cache those
//! routers report. Each peer cache carries one receive stamp per router,
//! kept parallel to `routers`; a cache is a candidate for the assignment
//! only when its stamp for every router matches that router's latest
//! I_SEE_YOU, i.e. every router currently lists it.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use super::{GroupData, PacketStamp, Time, ASSIGN_WAIT, PEER_TIMEOUT, TIME_UNIT};
use crate::assignment::AssignmentForm;
use crate::component::CapComp;
use crate::element::{AssignmentKeyElt, AssignmentStyle, CacheIdElt, PacketStyle, RouterAssignElt, RouterIdElt};

/// A peer cache as reported by the routers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePeer {
    pub id: CacheIdElt,
    /// Last I_SEE_YOU listing this cache, per router.
    pub src: Vec<PacketStamp>,
}

/// A router this cache is talking to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRouter {
    pub addr: Ipv4Addr,
    /// Change number of the router's last view.
    pub generation: u32,
    pub xmit: PacketStamp,
    pub recv: PacketStamp,
    /// Remaining fast pings.
    pub rapid: u32,
    /// A REDIRECT_ASSIGN is owed to this router.
    pub assign: bool,
    /// Include capabilities in the next HERE_I_AM.
    pub send_caps: bool,
    pub packet_forward: PacketStyle,
    pub packet_return: PacketStyle,
    pub cache_assign: AssignmentStyle,
    /// This cache's identity as the router reports it.
    pub local_cache_id: Option<CacheIdElt>,
}

impl CacheRouter {
    pub fn new(addr: Ipv4Addr, methods: Methods, xmit_time: Time) -> Self {
        Self {
            addr,
            generation: 0,
            xmit: PacketStamp::new(xmit_time, 0),
            recv: PacketStamp::default(),
            rapid: 0,
            assign: false,
            send_caps: false,
            packet_forward: methods.forward,
            packet_return: methods.ret,
            cache_assign: methods.assign,
            local_cache_id: None,
        }
    }

    /// Seconds until the next HERE_I_AM is due.
    pub fn ping_time(&self, now: Time) -> Time {
        let period = if self.rapid > 0 { TIME_UNIT / 10 } else { TIME_UNIT };
        (self.xmit.time + period).saturating_sub(now)
    }

    pub fn wait_time(&self, now: Time) -> Time {
        if self.assign {
            0
        } else {
            self.ping_time(now)
        }
    }

    /// Capabilities as negotiated with this router.
    pub fn capabilities(&self) -> CapComp {
        CapComp::new(self.packet_forward, self.packet_return, self.cache_assign)
    }
}

/// A configured router not heard from yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedRouter {
    pub addr: Ipv4Addr,
    pub xmit: Time,
    pub count: u32,
}

/// Forwarding, return and assignment methods agreed with one router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Methods {
    pub forward: PacketStyle,
    pub ret: PacketStyle,
    pub assign: AssignmentStyle,
}

impl Default for Methods {
    fn default() -> Self {
        Self {
            forward: PacketStyle::Gre,
            ret: PacketStyle::Gre,
            assign: AssignmentStyle::HashOnly,
        }
    }
}

fn pick_packet(preferred: PacketStyle, offered: u32) -> Option<PacketStyle> {
    let common = preferred.bits() & offered;
    if common & PacketStyle::Gre.bits() != 0 {
        Some(PacketStyle::Gre)
    } else if common & PacketStyle::L2.bits() != 0 {
        Some(PacketStyle::L2)
    } else {
        None
    }
}

fn pick_assign(preferred: AssignmentStyle, offered: u32) -> Option<AssignmentStyle> {
    let common = preferred.bits() & offered;
    if common & AssignmentStyle::HashOnly.bits() != 0 {
        Some(AssignmentStyle::HashOnly)
    } else if common & AssignmentStyle::MaskOnly.bits() != 0 {
        Some(AssignmentStyle::MaskOnly)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct CacheGroup {
    pub data: GroupData,
    /// Local cache identity.
    pub id: CacheIdElt,
    pub caches: Vec<CachePeer>,
    pub routers: Vec<CacheRouter>,
    pub assignment_pending: bool,
    pub seeds: Vec<SeedRouter>,
    pub packet_forward: PacketStyle,
    pub packet_return: PacketStyle,
    pub cache_assign: AssignmentStyle,
    /// Pid file of the process whose liveness gates HERE_I_AM.
    pub proc_pid_file: Option<PathBuf>,
}

impl CacheGroup {
    /// New group for the cache at `addr`. Generation starts at 1.
    pub fn new(data: GroupData, addr: Ipv4Addr) -> Self {
        Self {
            data: GroupData { generation: 1, ..data },
            id: CacheIdElt::default_hash(addr),
            caches: Vec::new(),
            routers: Vec::new(),
            assignment_pending: false,
            seeds: Vec::new(),
            packet_forward: PacketStyle::Gre,
            packet_return: PacketStyle::Gre,
            cache_assign: AssignmentStyle::HashOnly,
            proc_pid_file: None,
        }
    }

    pub fn find_router(&self, addr: Ipv4Addr) -> Option<usize> {
        self.routers.iter().position(|r| r.addr == addr)
    }

    pub fn find_cache(&self, addr: Ipv4Addr) -> Option<usize> {
        self.caches.iter().position(|c| c.id.addr() == addr)
    }

    /// Add a seed unless the router is already a seed or known.
    pub fn seed_router(&mut self, addr: Ipv4Addr) -> &mut Self {
        if self.find_router(addr).is_none() && !self.seeds.iter().any(|s| s.addr == addr) {
            self.seeds.push(SeedRouter { addr, xmit: 0, count: 0 });
        }
        self
    }

    /// Drop a seed, returning its last transmit time.
    pub fn remove_seed(&mut self, addr: Ipv4Addr) -> Option<Time> {
        let idx = self.seeds.iter().position(|s| s.addr == addr)?;
        Some(self.seeds.swap_remove(idx).xmit)
    }

    /// Agree on methods with a router that offered `caps`. No capability
    /// component means GRE forward, GRE return, hash assignment.
    pub fn negotiate(&self, caps: Option<&CapComp>) -> Option<Methods> {
        let offered = caps.cloned().unwrap_or_default();
        Some(Methods {
            forward: pick_packet(self.packet_forward, offered.packet_forward())?,
            ret: pick_packet(self.packet_return, offered.packet_return())?,
            assign: pick_assign(self.cache_assign, offered.cache_assign())?,
        })
    }

    /// Switch the local identity and the assignment to the mask scheme.
    pub fn use_mask_assignment(&mut self) {
        if !self.id.is_mask() {
            self.id = CacheIdElt::default_mask(self.id.addr());
        }
        self.data.assignment.set_form(AssignmentForm::Mask);
    }

    /// Advance the generation and schedule a new assignment.
    pub fn view_changed(&mut self, now: Time) {
        self.data.bump_generation(now);
        self.data.assignment.set_active(false);
        self.assignment_pending = !self.routers.is_empty() && !self.caches.is_empty();
        for r in &mut self.routers {
            r.assign = false;
        }
    }

    /// Keep every cache's stamp list parallel to the router list.
    pub fn resize_cache_sources(&mut self) {
        let n = self.routers.len();
        for c in &mut self.caches {
            c.src.resize(n, PacketStamp::default());
        }
    }

    /// Remove routers silent for longer than the peer timeout. Removed
    /// routers go back to the seed list.
    pub fn cull_routers(&mut self, now: Time) -> Vec<Ipv4Addr> {
        let mut removed = Vec::new();
        let mut idx = 0;
        while idx < self.routers.len() {
            if self.routers[idx].recv.time + PEER_TIMEOUT < now {
                let router = self.routers.swap_remove(idx);
                for c in &mut self.caches {
                    if idx < c.src.len() {
                        c.src.swap_remove(idx);
                    }
                }
                tracing::info!(router = %router.addr, group = self.data.svc.svc_id(), "router timed out");
                self.seeds.push(SeedRouter {
                    addr: router.addr,
                    xmit: router.xmit.time,
                    count: 0,
                });
                removed.push(router.addr);
            } else {
                idx += 1;
            }
        }
        if !removed.is_empty() {
            self.view_changed(now);
        }
        removed
    }

    /// Caches listed in the latest view of every router, in group order.
    pub fn candidates(&self) -> Vec<Ipv4Addr> {
        self.caches
            .iter()
            .filter(|c| {
                self.routers
                    .iter()
                    .enumerate()
                    .all(|(i, r)| c.src.get(i).map(|s| s.time) == Some(r.recv.time))
            })
            .map(|c| c.id.addr())
            .collect()
    }

    /// The cache with the lowest address builds the assignment.
    pub fn is_designated(&self, local: Ipv4Addr) -> bool {
        self.caches.iter().map(|c| c.id.addr()).min() == Some(local)
    }

    /// Rebuild the assignment from the current view.
    pub fn fill_assignment(&mut self, local: Ipv4Addr) -> bool {
        if self.routers.is_empty() || self.caches.is_empty() {
            return false;
        }
        let key = AssignmentKeyElt::new(local, self.data.generation);
        let routers = self
            .routers
            .iter()
            .map(|r| RouterAssignElt::new(r.addr, r.recv.sn, r.generation))
            .collect();
        let candidates = self.candidates();
        self.data.assignment.fill(key, routers, &candidates)
    }

    /// Router ids as advertised in this cache's view.
    pub fn router_ids(&self) -> Vec<RouterIdElt> {
        self.routers
            .iter()
            .map(|r| RouterIdElt::new(r.addr, r.recv.sn))
            .collect()
    }

    pub fn cache_addrs(&self) -> Vec<Ipv4Addr> {
        self.caches.iter().map(|c| c.id.addr()).collect()
    }

    /// Seconds until this group next needs attention, `Time::MAX` if never.
    pub fn wait_time(&self, now: Time) -> Time {
        let routers = self.routers.iter().map(|r| r.wait_time(now));
        let seeds = self.seeds.iter().map(|s| (s.xmit + TIME_UNIT).saturating_sub(now));
        let assign = self
            .assignment_pending
            .then(|| (self.data.generation_time + ASSIGN_WAIT).saturating_sub(now));
        routers.chain(seeds).chain(assign).min().unwrap_or(Time::MAX)
    }

    /// True when no process is tracked or the tracked one is alive.
    pub fn process_up(&self) -> bool {
        match &self.proc_pid_file {
            None => true,
            Some(path) => pid_alive(path),
        }
    }
}

fn pid_alive(pid_file: &Path) -> bool {
    let Ok(text) = std::fs::read_to_string(pid_file) else {
        return false;
    };
    match text.trim().parse::<u32>() {
        Ok(pid) => Path::new("/proc").join(pid.to_string()).exists(),
        Err(_) => false,
    }
}
