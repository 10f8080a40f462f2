//! Real cache and router endpoints talking over the simulated network.

use anyhow::{Context, Result};

use crate::*;
use wccp_core::component::SecurityKey;
use wccp_core::element::{AssignmentStyle, ServiceGroup};
use wccp_core::message::{ISeeYouMsg, Message};
use wccp_core::SecurityPolicy;

pub fn service() -> ServiceGroup {
    ServiceGroup::dynamic(80, 6)
        .with_flags(ServiceGroup::SRC_IP_HASH | ServiceGroup::PORTS_DEFINED)
        .with_port(0, 80)
}

pub fn cache(addr: Ipv4Addr, security: SecurityPolicy) -> CacheEndpoint {
    let mut ep = CacheEndpoint::new(addr, security);
    ep.define_service_group(service()).1.seed_router(ROUTER);
    ep
}

/// One router, two caches, all sharing `security`.
pub fn two_cache_net(security: SecurityPolicy) -> Net {
    let mut net = Net::new(T0);
    net.routers.push(RouterEndpoint::new(ROUTER, security));
    net.caches.push(cache(CACHE_A, security));
    net.caches.push(cache(CACHE_B, security));
    net
}

#[test]
fn test_two_caches_converge_on_one_assignment() -> Result<()> {
    let mut net = two_cache_net(SecurityPolicy::default());
    net.run(60);
    assert!(net.rejected.is_empty(), "rejected: {:?}", net.rejected);

    let router = net.router(ROUTER).group(80).context("router never defined group 80")?;
    let ids: Vec<_> = router.caches.iter().map(|c| c.id.addr()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&CACHE_A) && ids.contains(&CACHE_B));

    let a = &router.data.assignment;
    assert!(a.is_active(), "router holds the designated cache's assignment");
    assert_eq!(a.key().addr(), CACHE_A, "lowest address is designated");
    assert_eq!(a.hash().caches.len(), 2);
    let first = a.hash().cache_for_bucket(0);
    let second = a.hash().cache_for_bucket(1);
    assert!(first.is_some() && second.is_some() && first != second, "buckets alternate");

    for addr in [CACHE_A, CACHE_B] {
        let g = net.cache(addr).group(80).context("cache group missing")?;
        assert_eq!(g.routers.len(), 1, "{addr} knows the router");
        assert_eq!(g.caches.len(), 2, "{addr} sees both caches");
        assert!(g.seeds.is_empty());
    }
    assert!(net.cache(CACHE_A).group(80).map_or(false, |g| g.data.assignment.is_active()));
    assert!(
        !net.cache(CACHE_B).group(80).map_or(true, |g| g.data.assignment.is_active()),
        "only the designated cache builds"
    );
    assert!(net.count(CACHE_B, ROUTER, MessageType::RedirectAssign, T0) == 0);
    Ok(())
}

#[test]
fn test_router_echoes_stored_assignment() -> Result<()> {
    let mut net = two_cache_net(SecurityPolicy::default());
    net.run(60);

    let stored = net
        .router(ROUTER)
        .group(80)
        .context("no group")?
        .data
        .assignment
        .clone();
    for addr in [CACHE_A, CACHE_B] {
        let sent = net
            .last(ROUTER, addr, MessageType::ISeeYou)
            .context("router never answered")?;
        let isy = ISeeYouMsg::parse(&sent.bytes)?.msg;
        let echoed = isy.assignment.context("assignment not echoed")?;
        assert_eq!(echoed.key, stored.key());
        assert_eq!(echoed.hash, *stored.hash());
        assert!(isy.assign_map.is_none());
        assert_eq!(isy.router_view.key, stored.key());
        assert_eq!(isy.router_view.caches.len(), 2);
    }

    // Once the echo matches, the designated cache stops resending.
    let quiet_from = net.now;
    net.run(30);
    assert_eq!(net.count(CACHE_A, ROUTER, MessageType::RedirectAssign, quiet_from), 0);
    Ok(())
}

#[test]
fn test_md5_group_converges_and_rejects_wrong_key() -> Result<()> {
    let key = SecurityPolicy::md5(SecurityKey::new(b"s3cret"));
    let mut net = Net::new(T0);
    net.routers.push(RouterEndpoint::new(ROUTER, key));
    net.caches.push(cache(CACHE_A, key));
    net.caches
        .push(cache(CACHE_B, SecurityPolicy::md5(SecurityKey::new(b"wrong"))));
    net.run(40);

    let router = net.router(ROUTER).group(80).context("no group")?;
    let ids: Vec<_> = router.caches.iter().map(|c| c.id.addr()).collect();
    assert_eq!(ids, vec![CACHE_A], "cache with the wrong key never joins");
    assert!(net
        .rejected
        .iter()
        .any(|r| r.from == CACHE_B && r.to == ROUTER));
    assert!(net.cache(CACHE_A).group(80).map_or(false, |g| g.data.assignment.is_active()));
    Ok(())
}

#[test]
fn test_mask_only_cache_sends_mask_assignment() -> Result<()> {
    let mut net = Net::new(T0);
    net.routers.push(RouterEndpoint::new(ROUTER, SecurityPolicy::default()));
    let mut ep = CacheEndpoint::new(CACHE_A, SecurityPolicy::default());
    let group = ep.define_service_group(service()).1;
    group.seed_router(ROUTER);
    group.cache_assign = AssignmentStyle::MaskOnly;
    net.caches.push(ep);
    net.run(40);
    assert!(net.rejected.is_empty(), "rejected: {:?}", net.rejected);

    let g = net.cache(CACHE_A).group(80).context("no group")?;
    assert!(g.id.is_mask(), "identity switched to mask");

    let sent = net
        .last(ROUTER, CACHE_A, MessageType::ISeeYou)
        .context("router never answered")?;
    let isy = ISeeYouMsg::parse(&sent.bytes)?.msg;
    assert!(isy.assignment.is_none());
    let map = isy.assign_map.context("mask assignment not echoed")?;
    assert_eq!(map.mask.sets.len(), 1);
    assert_eq!(map.mask.sets[0].values[0].cache_addr(), CACHE_A);
    Ok(())
}
