//! Cache role engine.
//!
//! The cache announces itself to its routers with HERE_I_AM, learns the
//! group from their I_SEE_YOU replies and, when it is the designated cache,
//! builds the assignment and sends it to every router in REDIRECT_ASSIGN.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use super::{send, Endpoint, EndpointCore, EndpointError, IpHeader, Transport};
use crate::component::{CacheIdComp, CacheViewComp, SecurityComp, ServiceComp};
use crate::config::ServiceLoad;
use crate::element::{AssignmentStyle, ServiceGroup};
use crate::group::{
    CacheGroup, CachePeer, CacheRouter, DefineResult, GroupData, PacketStamp, SecurityPolicy, Time, ASSIGN_WAIT,
    RAPID_PINGS, TIME_UNIT,
};
use crate::message::{HereIAmMsg, ISeeYouMsg, Message, RedirectAssignMsg, RemovalQueryMsg};
use crate::wire::{MessageType, WireError};

#[derive(Debug, Clone)]
pub struct CacheEndpoint {
    core: EndpointCore,
    groups: BTreeMap<u8, CacheGroup>,
}

impl CacheEndpoint {
    pub fn new(addr: Ipv4Addr, security: SecurityPolicy) -> Self {
        Self {
            core: EndpointCore::new(addr, security),
            groups: BTreeMap::new(),
        }
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.core.addr
    }

    pub fn set_addr(&mut self, addr: Ipv4Addr) {
        self.core.addr = addr;
        for g in self.groups.values_mut() {
            g.id.set_addr(addr);
        }
    }

    /// Define a service group. An existing group is left untouched; the
    /// result says whether its definition matched.
    pub fn define_service_group(&mut self, svc: ServiceGroup) -> (DefineResult, &mut CacheGroup) {
        let addr = self.core.addr;
        match self.groups.entry(svc.svc_id()) {
            Entry::Occupied(e) => {
                let group = e.into_mut();
                let result = if group.data.svc == svc {
                    DefineResult::Exists
                } else {
                    DefineResult::Conflict
                };
                (result, group)
            }
            Entry::Vacant(e) => {
                tracing::info!(group = svc.svc_id(), "cache service group defined");
                (DefineResult::Defined, e.insert(CacheGroup::new(GroupData::new(svc, 1), addr)))
            }
        }
    }

    pub fn group(&self, svc_id: u8) -> Option<&CacheGroup> {
        self.groups.get(&svc_id)
    }

    pub fn group_mut(&mut self, svc_id: u8) -> Option<&mut CacheGroup> {
        self.groups.get_mut(&svc_id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &CacheGroup> {
        self.groups.values()
    }

    /// Apply loaded service definitions: default security, then one group per
    /// definition with its seeds and preferences.
    pub fn load_services(&mut self, load: &ServiceLoad) -> usize {
        if let Some(security) = load.security {
            self.core.security = security;
        }
        let mut defined = 0;
        for def in &load.services {
            let (result, group) = self.define_service_group(def.svc);
            if result == DefineResult::Conflict {
                tracing::warn!(group = def.svc.svc_id(), "conflicting service definition ignored");
                continue;
            }
            def.apply(group, &load.routers);
            defined += 1;
        }
        defined
    }

    fn build_here_i_am(core: &EndpointCore, group: &CacheGroup, router: Option<&CacheRouter>) -> Result<Vec<u8>, WireError> {
        let (option, key) = group.data.security.resolve(&core.security);
        let cache_id = match router.and_then(|r| r.local_cache_id.clone()) {
            // A stale form from before the switch to mask assignment is dropped.
            Some(mut id) if id.is_mask() == group.id.is_mask() => {
                id.set_unassigned(false);
                id
            }
            _ => group.id.clone(),
        };
        HereIAmMsg {
            security: SecurityComp::new(option),
            service: ServiceComp::new(group.data.svc),
            cache_id: CacheIdComp::new(cache_id),
            cache_view: CacheViewComp {
                change_number: group.data.generation,
                routers: group.router_ids(),
                caches: group.cache_addrs(),
            },
            capabilities: router.filter(|r| r.send_caps).map(CacheRouter::capabilities),
            command: None,
        }
        .encode(&key)
    }

    fn build_redirect_assign(core: &EndpointCore, group: &mut CacheGroup) -> Result<Vec<u8>, WireError> {
        let (option, key) = group.data.security.resolve(&core.security);
        let service = ServiceComp::new(group.data.svc);
        let assignment = group.data.assignment.serialized()?;
        RedirectAssignMsg::encode_serialized(&SecurityComp::new(option), &service, assignment, &key)
    }

    fn housekeep_group(core: &EndpointCore, group: &mut CacheGroup, now: Time, tx: &mut dyn Transport) -> usize {
        let local = core.addr;
        let svc_id = group.data.svc.svc_id();
        let mut sent = 0;

        if group.assignment_pending && group.data.generation_time + ASSIGN_WAIT <= now {
            if group.is_designated(local) && group.fill_assignment(local) {
                group.data.assignment.set_active(true);
                for r in &mut group.routers {
                    r.assign = true;
                }
                tracing::info!(
                    group = svc_id,
                    generation = group.data.generation,
                    caches = group.data.assignment.hash().caches.len(),
                    "assignment generated"
                );
            }
            group.assignment_pending = false;
        }

        group.cull_routers(now);

        if group.process_up() {
            for idx in 0..group.routers.len() {
                if group.routers[idx].ping_time(now) == 0 {
                    match Self::build_here_i_am(core, group, Some(&group.routers[idx])) {
                        Ok(bytes) => {
                            let generation = group.data.generation;
                            let router = &mut group.routers[idx];
                            if send(tx, router.addr, MessageType::HereIAm, &bytes) {
                                sent += 1;
                            }
                            router.xmit.set(now, generation);
                            router.send_caps = false;
                            router.rapid = router.rapid.saturating_sub(1);
                        }
                        Err(e) => tracing::warn!(group = svc_id, error = %e, "HERE_I_AM not built"),
                    }
                } else if group.routers[idx].assign {
                    match Self::build_redirect_assign(core, group) {
                        Ok(bytes) => {
                            let router = &mut group.routers[idx];
                            if send(tx, router.addr, MessageType::RedirectAssign, &bytes) {
                                sent += 1;
                            }
                            router.assign = false;
                        }
                        Err(e) => tracing::warn!(group = svc_id, error = %e, "REDIRECT_ASSIGN not built"),
                    }
                }
            }
        } else {
            tracing::debug!(group = svc_id, "tracked process down, staying quiet");
        }

        if group.seeds.iter().any(|s| s.xmit + TIME_UNIT <= now) {
            match Self::build_here_i_am(core, group, None) {
                Ok(bytes) => {
                    for seed in group.seeds.iter_mut().filter(|s| s.xmit + TIME_UNIT <= now) {
                        if send(tx, seed.addr, MessageType::HereIAm, &bytes) {
                            sent += 1;
                        }
                        seed.xmit = now;
                        seed.count += 1;
                    }
                }
                Err(e) => tracing::warn!(group = svc_id, error = %e, "HERE_I_AM not built"),
            }
        }
        sent
    }
}

impl Endpoint for CacheEndpoint {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    fn handle_i_see_you(&mut self, now: Time, ip: IpHeader, bytes: &[u8]) -> Result<(), EndpointError> {
        let parsed = ISeeYouMsg::parse(bytes)?;
        if parsed.trailing > 0 {
            tracing::debug!(from = %ip.src, trailing = parsed.trailing, "unparsed bytes after I_SEE_YOU");
        }
        let msg = parsed.msg;
        let svc_id = msg.service.group.svc_id();
        let local = self.core.addr;
        let group = self
            .groups
            .get_mut(&svc_id)
            .ok_or(EndpointError::UnknownGroup(svc_id))?;
        self.core
            .validate_security(&group.data.security, &msg.security, bytes, svc_id)?;
        if group.data.svc != msg.service.group {
            return Err(EndpointError::ServiceMismatch(svc_id));
        }
        let router_addr = msg.router_id.id.addr();
        let recv_id = msg.router_id.id.recv_id();
        if !msg.router_id.find_from_addr(local) {
            return Err(EndpointError::NotInFromList(router_addr));
        }
        let view = &msg.router_view;
        let mut changed = false;

        let router_idx = match group.find_router(router_addr) {
            Some(idx) => {
                let assignment = &mut group.data.assignment;
                assignment.update_router_id(router_addr, recv_id, view.change_number);
                if assignment.is_active() && assignment.key() != view.key {
                    group.routers[idx].assign = true;
                }
                idx
            }
            None => {
                let Some(methods) = group.negotiate(msg.capabilities.as_ref()) else {
                    tracing::warn!(router = %router_addr, group = svc_id, "router rejected, no common capabilities");
                    return Err(EndpointError::CapabilityMismatch(router_addr));
                };
                if methods.assign == AssignmentStyle::MaskOnly {
                    group.use_mask_assignment();
                }
                // The seed is the address this cache reached the router on,
                // which need not be its identity.
                let xmit = group.remove_seed(msg.router_id.to_addr).unwrap_or(0);
                group.routers.push(CacheRouter::new(router_addr, methods, xmit));
                tracing::info!(router = %router_addr, group = svc_id, "router added to view");
                changed = true;
                group.routers.len() - 1
            }
        };

        let router = &mut group.routers[router_idx];
        let then = router.recv.time;
        router.recv.set(now, recv_id);
        router.generation = view.change_number;
        router.send_caps = msg.capabilities.is_some();

        for addr in &view.routers {
            if *addr != router_addr {
                group.seed_router(*addr);
            }
        }
        group.resize_cache_sources();

        let n_routers = group.routers.len();
        for id in &view.caches {
            let addr = id.addr();
            let idx = match group.find_cache(addr) {
                Some(idx) => {
                    if group.caches[idx].src.get(router_idx).map(|s| s.time) != Some(then) {
                        changed = true;
                    }
                    idx
                }
                None => {
                    tracing::info!(cache = %addr, group = svc_id, "cache added to view");
                    group.caches.push(CachePeer {
                        id: id.clone(),
                        src: vec![PacketStamp::default(); n_routers],
                    });
                    changed = true;
                    group.caches.len() - 1
                }
            };
            let cache = &mut group.caches[idx];
            cache.id = id.clone();
            if let Some(stamp) = cache.src.get_mut(router_idx) {
                stamp.set(now, recv_id);
            }
            if addr == local {
                group.routers[router_idx].local_cache_id = Some(id.clone());
            }
        }

        // A cache this router listed last time but not now has left its view.
        if then != 0 {
            let dropped = group.caches.iter().any(|c| {
                c.src
                    .get(router_idx)
                    .map_or(false, |s| s.time == then && then != now)
            });
            changed |= dropped;
        }

        if let Some(cmd) = &msg.command {
            tracing::info!(router = %router_addr, command = ?cmd.cmd, data = cmd.data, "command received");
        }

        if changed {
            group.view_changed(now);
            tracing::debug!(group = svc_id, generation = group.data.generation, "view changed");
        }
        Ok(())
    }

    fn handle_removal_query(&mut self, now: Time, ip: IpHeader, bytes: &[u8]) -> Result<(), EndpointError> {
        let msg = RemovalQueryMsg::parse(bytes)?.msg;
        let svc_id = msg.service.group.svc_id();
        let local = self.core.addr;
        let group = self
            .groups
            .get_mut(&svc_id)
            .ok_or(EndpointError::UnknownGroup(svc_id))?;
        self.core
            .validate_security(&group.data.security, &msg.security, bytes, svc_id)?;
        let query = msg.query.query;
        if query.cache_addr() != local {
            tracing::debug!(from = %ip.src, cache = %query.cache_addr(), "removal query for another cache");
            return Ok(());
        }
        if let Some(idx) = group.find_router(query.router_addr()) {
            let router = &mut group.routers[idx];
            router.rapid = RAPID_PINGS;
            router.recv.set(now, query.recv_id());
            tracing::info!(router = %router.addr, group = svc_id, "removal query, pinging rapidly");
        }
        Ok(())
    }

    fn housekeeping(&mut self, now: Time, tx: &mut dyn Transport) -> usize {
        let mut sent = 0;
        for group in self.groups.values_mut() {
            sent += Self::housekeep_group(&self.core, group, now, tx);
        }
        sent
    }

    fn wait_time(&self, now: Time) -> Time {
        self.groups
            .values()
            .map(|g| g.wait_time(now))
            .min()
            .unwrap_or(Time::MAX)
    }
}
