//! Peers going quiet: removal queries, rapid pings and culling.

use anyhow::{Context, Result};

use crate::convergence::two_cache_net;
use crate::*;
use wccp_core::endpoint::TIME_UNIT;
use wccp_core::SecurityPolicy;

#[test]
fn test_silent_cache_is_queried_then_culled() -> Result<()> {
    let mut net = two_cache_net(SecurityPolicy::default());
    net.run(40);
    let before = net.router(ROUTER).group(80).context("no group")?.data.generation;

    let gone_at = net.now;
    net.unplug(CACHE_B).context("cache B missing")?;
    net.run(4 * TIME_UNIT);

    assert_eq!(
        net.count(ROUTER, CACHE_B, MessageType::RemovalQuery, gone_at),
        1,
        "one query per silence"
    );
    let router = net.router(ROUTER).group(80).context("no group")?;
    let ids: Vec<_> = router.caches.iter().map(|c| c.id.addr()).collect();
    assert_eq!(ids, vec![CACHE_A]);
    assert!(router.data.generation > before, "culling changes the view");

    // The survivor sees B drop out and reassigns everything to itself.
    net.run(3 * TIME_UNIT);
    let a = net.cache(CACHE_A).group(80).context("no group")?;
    assert_eq!(a.candidates(), vec![CACHE_A], "B left the router's view");
    let stored = &net.router(ROUTER).group(80).context("no group")?.data.assignment;
    assert!(stored.is_active());
    assert_eq!(stored.hash().caches, vec![CACHE_A]);
    assert!(stored.hash().buckets.iter().all(|b| b.idx() == 0));
    Ok(())
}

#[test]
fn test_removal_query_triggers_rapid_pings() -> Result<()> {
    let mut net = two_cache_net(SecurityPolicy::default());
    net.run(40);

    // Pause right after a ping so the silence stays under the timeout.
    loop {
        let t = net.now;
        net.run(1);
        if net.count(CACHE_A, ROUTER, MessageType::HereIAm, t) > 0 {
            break;
        }
    }
    // A stops pinging but keeps listening.
    net.paused.insert(CACHE_A);
    let paused_at = net.now;
    net.run(2 * TIME_UNIT + 3);
    assert_eq!(net.count(ROUTER, CACHE_A, MessageType::RemovalQuery, paused_at), 1);

    net.paused.remove(&CACHE_A);
    let resumed_at = net.now;
    net.run(3);
    assert!(
        net.count(CACHE_A, ROUTER, MessageType::HereIAm, resumed_at) >= 3,
        "queried cache pings every second"
    );

    net.run(2 * TIME_UNIT);
    let router = net.router(ROUTER).group(80).context("no group")?;
    assert_eq!(router.caches.len(), 2, "answering the query keeps the cache");
    assert!(net.rejected.is_empty(), "rejected: {:?}", net.rejected);
    Ok(())
}

#[test]
fn test_silent_router_is_culled_and_reseeded() -> Result<()> {
    let mut net = two_cache_net(SecurityPolicy::default());
    net.run(30);
    net.routers.clear();
    let gone_at = net.now;
    net.run(5 * TIME_UNIT);

    let g = net.cache(CACHE_A).group(80).context("no group")?;
    assert!(g.routers.is_empty(), "router timed out");
    assert_eq!(g.seeds.len(), 1, "timed out router becomes a seed again");
    assert_eq!(g.seeds[0].addr, ROUTER);
    assert!(!g.data.assignment.is_active());
    assert!(
        net.count(CACHE_A, ROUTER, MessageType::HereIAm, gone_at + 4 * TIME_UNIT) >= 1,
        "seed keeps being pinged"
    );
    Ok(())
}
