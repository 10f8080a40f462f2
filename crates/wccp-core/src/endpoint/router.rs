//! Router role engine.
//!
//! Routers answer each HERE_I_AM with an I_SEE_YOU describing their view of
//! the group, store the assignment the designated cache sends, and echo it
//! back so every cache can confirm the routers agree.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use super::{send, Endpoint, EndpointCore, EndpointError, IpHeader, Transport};
use crate::component::{
    CapComp, QueryComp, RouterIdComp, RouterViewComp, SecurityComp, ServiceComp,
};
use crate::config::ServiceLoad;
use crate::element::{AssignmentStyle, PacketStyle, QueryElt, RouterIdElt, ServiceGroup};
use crate::group::{DefineResult, GroupData, RouterGroup, SecurityPolicy, Time, TIME_UNIT};
use crate::message::{HereIAmMsg, ISeeYouMsg, Message, RedirectAssignMsg, RemovalQueryMsg};
use crate::wire::{MessageType, WireError};

#[derive(Debug, Clone)]
pub struct RouterEndpoint {
    core: EndpointCore,
    groups: BTreeMap<u8, RouterGroup>,
    capabilities: CapComp,
}

impl RouterEndpoint {
    /// A router offering every forwarding, return and assignment method.
    pub fn new(addr: Ipv4Addr, security: SecurityPolicy) -> Self {
        Self {
            core: EndpointCore::new(addr, security),
            groups: BTreeMap::new(),
            capabilities: CapComp::new(PacketStyle::GreOrL2, PacketStyle::GreOrL2, AssignmentStyle::HashOrMask),
        }
    }

    pub fn with_capabilities(mut self, caps: CapComp) -> Self {
        self.capabilities = caps;
        self
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.core.addr
    }

    pub fn set_addr(&mut self, addr: Ipv4Addr) {
        self.core.addr = addr;
    }

    pub fn define_service_group(&mut self, svc: ServiceGroup) -> (DefineResult, &mut RouterGroup) {
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
                tracing::info!(group = svc.svc_id(), "router service group defined");
                (DefineResult::Defined, e.insert(RouterGroup::new(GroupData::new(svc, 0))))
            }
        }
    }

    /// Pre-define groups from loaded definitions so their security applies
    /// to the first HERE_I_AM. Cache-side settings are ignored.
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
            if let Some(security) = def.security {
                group.data.security = security;
            }
            defined += 1;
        }
        defined
    }

    pub fn group(&self, svc_id: u8) -> Option<&RouterGroup> {
        self.groups.get(&svc_id)
    }

    pub fn group_mut(&mut self, svc_id: u8) -> Option<&mut RouterGroup> {
        self.groups.get_mut(&svc_id)
    }

    /// I_SEE_YOU for the cache at `idx`, with the receive id it carries.
    fn build_i_see_you(
        core: &EndpointCore,
        caps: &CapComp,
        group: &RouterGroup,
        idx: usize,
    ) -> Result<(Vec<u8>, u32), WireError> {
        let cache = &group.caches[idx];
        let recv_id = cache.recv_count.wrapping_add(1);
        let (option, key) = group.data.security.resolve(&core.security);
        let (assignment, assign_map) = group.data.assignment.echo();
        let routers = std::iter::once(core.addr)
            .chain(group.routers.iter().map(|r| r.addr))
            .collect();
        let bytes = ISeeYouMsg {
            security: SecurityComp::new(option),
            service: ServiceComp::new(group.data.svc),
            router_id: RouterIdComp::new(
                RouterIdElt::new(core.addr, recv_id),
                cache.to_addr,
                vec![cache.id.addr()],
            ),
            router_view: RouterViewComp {
                change_number: group.data.generation,
                key: group.data.assignment.key(),
                routers,
                caches: group.caches.iter().map(|c| c.id.clone()).collect(),
            },
            assignment,
            assign_map,
            capabilities: Some(caps.clone()),
            command: None,
        }
        .encode(&key)?;
        Ok((bytes, recv_id))
    }

    fn build_removal_query(core: &EndpointCore, group: &RouterGroup, idx: usize) -> Result<Vec<u8>, WireError> {
        let cache = &group.caches[idx];
        let (option, key) = group.data.security.resolve(&core.security);
        RemovalQueryMsg {
            security: SecurityComp::new(option),
            service: ServiceComp::new(group.data.svc),
            query: QueryComp::new(QueryElt::new(core.addr, cache.recv_count, cache.to_addr, cache.id.addr())),
        }
        .encode(&key)
    }

    fn housekeep_group(
        core: &EndpointCore,
        caps: &CapComp,
        group: &mut RouterGroup,
        now: Time,
        tx: &mut dyn Transport,
    ) -> usize {
        let svc_id = group.data.svc.svc_id();
        let mut sent = 0;

        for addr in group.cull_caches(now) {
            tracing::info!(cache = %addr, group = svc_id, "cache timed out");
        }

        for idx in group.caches_to_query(now) {
            match Self::build_removal_query(core, group, idx) {
                Ok(bytes) => {
                    let cache = &mut group.caches[idx];
                    if send(tx, cache.id.addr(), MessageType::RemovalQuery, &bytes) {
                        sent += 1;
                    }
                    cache.query_sent = true;
                }
                Err(e) => tracing::warn!(group = svc_id, error = %e, "REMOVAL_QUERY not built"),
            }
        }

        for idx in 0..group.caches.len() {
            if !group.caches[idx].pending {
                continue;
            }
            match Self::build_i_see_you(core, caps, group, idx) {
                Ok((bytes, recv_id)) => {
                    let generation = group.data.generation;
                    let cache = &mut group.caches[idx];
                    if send(tx, cache.id.addr(), MessageType::ISeeYou, &bytes) {
                        sent += 1;
                    }
                    cache.xmit.set(now, generation);
                    cache.pending = false;
                    cache.recv_count = recv_id;
                }
                Err(e) => tracing::warn!(group = svc_id, error = %e, "I_SEE_YOU not built"),
            }
        }
        sent
    }
}

impl Endpoint for RouterEndpoint {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    fn handle_here_i_am(&mut self, now: Time, ip: IpHeader, bytes: &[u8]) -> Result<(), EndpointError> {
        let parsed = HereIAmMsg::parse(bytes)?;
        if parsed.trailing > 0 {
            tracing::debug!(from = %ip.src, trailing = parsed.trailing, "unparsed bytes after HERE_I_AM");
        }
        let msg = parsed.msg;
        let svc = msg.service.group;
        let svc_id = svc.svc_id();
        let local = self.core.addr;

        // The group may not exist yet, so its override may not either.
        let policy = self
            .groups
            .get(&svc_id)
            .map(|g| g.data.security)
            .unwrap_or_default();
        self.core
            .validate_security(&policy, &msg.security, bytes, svc_id)?;

        let (result, group) = self.define_service_group(svc);
        if result == DefineResult::Conflict {
            return Err(EndpointError::Conflict(svc_id));
        }

        let cache_addr = msg.cache_id.id.addr();
        let view = &msg.cache_view;
        let mut changed = false;
        let idx = match group.find_cache(cache_addr) {
            Some(idx) => {
                if let Some(me) = view.find_router(local) {
                    if me.recv_id() != group.caches[idx].recv_count {
                        tracing::debug!(
                            cache = %cache_addr,
                            seen = me.recv_id(),
                            sent = group.caches[idx].recv_count,
                            "out of date HERE_I_AM"
                        );
                        return Err(EndpointError::Stale(cache_addr));
                    }
                }
                idx
            }
            None => {
                tracing::info!(cache = %cache_addr, group = svc_id, "cache added to view");
                changed = true;
                group.add_cache(msg.cache_id.id.clone(), ip.dst)
            }
        };

        let cache = &mut group.caches[idx];
        cache.id = msg.cache_id.id.clone();
        cache.recv.set(now, view.change_number);
        cache.pending = true;
        cache.to_addr = ip.dst;
        cache.query_sent = false;

        for r in &view.routers {
            if r.addr() == local {
                continue;
            }
            let ridx = match group.find_router(r.addr()) {
                Some(ridx) => ridx,
                None => {
                    tracing::info!(router = %r.addr(), group = svc_id, "router added to view");
                    changed = true;
                    group.add_router(r.addr())
                }
            };
            if let Some(stamp) = group.routers[ridx].src.get_mut(idx) {
                stamp.set(now, r.recv_id());
            }
        }

        if let Some(caps) = &msg.capabilities {
            tracing::debug!(
                cache = %cache_addr,
                forward = caps.packet_forward(),
                ret = caps.packet_return(),
                assign = caps.cache_assign(),
                "cache capabilities"
            );
        }

        if changed {
            group.view_changed(now);
        }
        Ok(())
    }

    fn handle_redirect_assign(&mut self, _now: Time, ip: IpHeader, bytes: &[u8]) -> Result<(), EndpointError> {
        let msg = RedirectAssignMsg::parse(bytes)?.msg;
        let svc_id = msg.service.group.svc_id();
        let group = self
            .groups
            .get_mut(&svc_id)
            .ok_or(EndpointError::UnknownGroup(svc_id))?;
        self.core
            .validate_security(&group.data.security, &msg.security, bytes, svc_id)?;
        if group.data.svc != msg.service.group {
            return Err(EndpointError::ServiceMismatch(svc_id));
        }
        let mask = msg.assignment.is_mask();
        group.data.assignment.install(msg.assignment);
        let key = group.data.assignment.key();
        tracing::info!(
            from = %ip.src,
            group = svc_id,
            key_addr = %key.addr(),
            change_number = key.change_number(),
            mask,
            "assignment received"
        );
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
        if query.router_addr() != local {
            tracing::debug!(from = %ip.src, router = %query.router_addr(), "removal query for another router");
            return Ok(());
        }
        if let Some(idx) = group.find_cache(query.cache_addr()) {
            group.remove_cache(idx);
            group.view_changed(now);
            tracing::info!(cache = %query.cache_addr(), group = svc_id, "cache removed on query");
        }
        Ok(())
    }

    fn housekeeping(&mut self, now: Time, tx: &mut dyn Transport) -> usize {
        let mut sent = 0;
        for group in self.groups.values_mut() {
            sent += Self::housekeep_group(&self.core, &self.capabilities, group, now, tx);
        }
        sent
    }

    fn wait_time(&self, _now: Time) -> Time {
        if self.groups.values().any(RouterGroup::any_pending) {
            0
        } else {
            TIME_UNIT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{AssignInfoComp, CacheIdComp, CacheViewComp, SecurityKey, SecurityOption};
    use crate::element::{AssignmentKeyElt, CacheIdElt, HashAssignElt};
    use crate::endpoint::Outbox;
    use crate::message::RedirectAssignment;

    const CACHE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn svc() -> ServiceGroup {
        ServiceGroup::standard(0)
    }

    fn ip() -> IpHeader {
        IpHeader { src: CACHE, dst: ROUTER }
    }

    fn here_i_am(routers: Vec<RouterIdElt>) -> Vec<u8> {
        HereIAmMsg {
            security: SecurityComp::new(SecurityOption::None),
            service: ServiceComp::new(svc()),
            cache_id: CacheIdComp::new(CacheIdElt::default_hash(CACHE)),
            cache_view: CacheViewComp {
                change_number: 1,
                routers,
                caches: Vec::new(),
            },
            capabilities: None,
            command: None,
        }
        .encode(&SecurityKey::default())
        .unwrap()
    }

    fn sent_i_see_you(out: &mut Outbox) -> ISeeYouMsg {
        let d = out.drain().next().expect("a datagram");
        assert_eq!(d.to, CACHE);
        ISeeYouMsg::parse(&d.bytes).unwrap().msg
    }

    #[test]
    fn here_i_am_defines_group_and_answers() {
        let mut ep = RouterEndpoint::new(ROUTER, SecurityPolicy::default());
        ep.handle_message(100, ip(), &here_i_am(Vec::new())).unwrap();
        assert_eq!(ep.wait_time(100), 0, "pending reply");

        let mut out = Outbox::new();
        assert_eq!(ep.housekeeping(100, &mut out), 1);
        let isy = sent_i_see_you(&mut out);
        assert_eq!(isy.router_id.id.recv_id(), 1);
        assert_eq!(isy.router_id.from, vec![CACHE]);
        assert_eq!(isy.router_view.routers, vec![ROUTER]);
        assert_eq!(isy.router_view.caches.len(), 1);
        assert_eq!(isy.router_view.change_number, 1);
        assert!(isy.assignment.is_none());
        assert!(isy.capabilities.is_some());
        assert_eq!(ep.wait_time(100), TIME_UNIT);
        assert_eq!(ep.group(0).unwrap().caches[0].recv_count, 1);
    }

    #[test]
    fn stale_here_i_am_is_dropped() {
        let mut ep = RouterEndpoint::new(ROUTER, SecurityPolicy::default());
        ep.handle_message(100, ip(), &here_i_am(Vec::new())).unwrap();
        let mut out = Outbox::new();
        ep.housekeeping(100, &mut out);

        let stale = here_i_am(vec![RouterIdElt::new(ROUTER, 7)]);
        assert!(matches!(
            ep.handle_message(101, ip(), &stale),
            Err(EndpointError::Stale(CACHE))
        ));
        let current = here_i_am(vec![RouterIdElt::new(ROUTER, 1)]);
        ep.handle_message(102, ip(), &current).unwrap();
        assert!(ep.group(0).unwrap().caches[0].pending);
    }

    #[test]
    fn redirect_assign_is_stored_and_echoed() {
        let mut ep = RouterEndpoint::new(ROUTER, SecurityPolicy::default());
        ep.handle_message(100, ip(), &here_i_am(Vec::new())).unwrap();

        let mut hash = HashAssignElt::new(vec![CACHE]);
        hash.round_robin_assign();
        let info = AssignInfoComp {
            key: AssignmentKeyElt::new(CACHE, 3),
            routers: Vec::new(),
            hash,
        };
        let ra = RedirectAssignMsg {
            security: SecurityComp::new(SecurityOption::None),
            service: ServiceComp::new(svc()),
            assignment: RedirectAssignment::Hash(info.clone()),
        }
        .encode(&SecurityKey::default())
        .unwrap();
        ep.handle_message(101, ip(), &ra).unwrap();

        let mut out = Outbox::new();
        ep.housekeeping(101, &mut out);
        let isy = sent_i_see_you(&mut out);
        assert_eq!(isy.router_view.key, info.key);
        assert_eq!(isy.assignment, Some(info));
        assert!(isy.assign_map.is_none());
    }

    #[test]
    fn removal_query_naming_this_router_drops_cache() {
        let mut ep = RouterEndpoint::new(ROUTER, SecurityPolicy::default());
        ep.handle_message(100, ip(), &here_i_am(Vec::new())).unwrap();
        let gen = ep.group(0).unwrap().data.generation;

        let other = RemovalQueryMsg {
            security: SecurityComp::new(SecurityOption::None),
            service: ServiceComp::new(svc()),
            query: QueryComp::new(QueryElt::new(Ipv4Addr::new(10, 9, 9, 9), 1, ROUTER, CACHE)),
        }
        .encode(&SecurityKey::default())
        .unwrap();
        ep.handle_message(101, ip(), &other).unwrap();
        assert_eq!(ep.group(0).unwrap().caches.len(), 1);

        let mine = RemovalQueryMsg {
            security: SecurityComp::new(SecurityOption::None),
            service: ServiceComp::new(svc()),
            query: QueryComp::new(QueryElt::new(ROUTER, 1, ROUTER, CACHE)),
        }
        .encode(&SecurityKey::default())
        .unwrap();
        ep.handle_message(102, ip(), &mine).unwrap();
        let g = ep.group(0).unwrap();
        assert!(g.caches.is_empty());
        assert_eq!(g.data.generation, gen + 1);
    }

    #[test]
    fn silent_cache_gets_queried_then_removed() {
        let mut ep = RouterEndpoint::new(ROUTER, SecurityPolicy::default());
        ep.handle_message(100, ip(), &here_i_am(Vec::new())).unwrap();
        let mut out = Outbox::new();
        ep.housekeeping(100, &mut out);
        out.drain();

        assert_eq!(ep.housekeeping(121, &mut out), 1);
        let d = out.drain().next().unwrap();
        let q = RemovalQueryMsg::parse(&d.bytes).unwrap().msg.query.query;
        assert_eq!(q.cache_addr(), CACHE);
        assert_eq!(q.router_addr(), ROUTER);

        assert_eq!(ep.housekeeping(125, &mut out), 0, "one query per silence");
        ep.housekeeping(131, &mut out);
        assert!(ep.group(0).unwrap().caches.is_empty());
    }

    #[test]
    fn md5_mismatch_rejects_before_defining() {
        let mut ep = RouterEndpoint::new(ROUTER, SecurityPolicy::md5(SecurityKey::new(b"pw")));
        assert!(matches!(
            ep.handle_message(100, ip(), &here_i_am(Vec::new())),
            Err(EndpointError::Security(0))
        ));
        assert!(ep.group(0).is_none());
    }
}
