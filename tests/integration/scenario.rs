//! A cache against a router played by hand: every I_SEE_YOU is built here
//! and the cache's replies are decoded and checked.

use anyhow::{bail, Context, Result};

use crate::*;
use wccp_core::component::{
    CacheIdComp, CacheViewComp, RouterIdComp, RouterViewComp, SecurityComp, SecurityKey, SecurityOption, ServiceComp,
};
use wccp_core::element::{AssignmentKeyElt, CacheIdElt, RouterIdElt, ServiceGroup};
use wccp_core::message::{HereIAmMsg, ISeeYouMsg, Message, RedirectAssignMsg, RedirectAssignment};
use wccp_core::endpoint::{ASSIGN_WAIT, TIME_UNIT};
use wccp_core::SecurityPolicy;

fn service() -> ServiceGroup {
    ServiceGroup::dynamic(80, 6)
        .with_flags(ServiceGroup::SRC_IP_HASH | ServiceGroup::PORTS_DEFINED)
        .with_port(0, 80)
}

fn i_see_you(recv_id: u32, change_number: u32, caches: &[Ipv4Addr]) -> Result<Vec<u8>> {
    let msg = ISeeYouMsg {
        security: SecurityComp::new(SecurityOption::None),
        service: ServiceComp::new(service()),
        router_id: RouterIdComp::new(RouterIdElt::new(ROUTER, recv_id), ROUTER, vec![CACHE_A]),
        router_view: RouterViewComp {
            change_number,
            key: AssignmentKeyElt::default(),
            routers: vec![ROUTER],
            caches: caches.iter().map(|a| CacheIdElt::default_hash(*a)).collect(),
        },
        assignment: None,
        assign_map: None,
        capabilities: None,
        command: None,
    };
    Ok(msg.encode(&SecurityKey::default())?)
}

fn from_router() -> IpHeader {
    IpHeader {
        src: ROUTER,
        dst: CACHE_A,
    }
}

/// Housekeeping at `now`, returning what went out.
fn step(cache: &mut CacheEndpoint, now: Time) -> Vec<Datagram> {
    let mut out = Outbox::new();
    cache.housekeeping(now, &mut out);
    out.drain().collect()
}

fn only_here_i_am(sent: &[Datagram]) -> Result<HereIAmMsg> {
    let [d] = sent else {
        bail!("expected one datagram, got {}", sent.len());
    };
    anyhow::ensure!(d.to == ROUTER, "sent to {} instead of the router", d.to);
    Ok(HereIAmMsg::parse(&d.bytes)?.msg)
}

/// Run housekeeping until a REDIRECT_ASSIGN goes out, up to `limit` seconds.
fn wait_for_assign(cache: &mut CacheEndpoint, from: Time, limit: Time) -> Result<(Time, RedirectAssignMsg)> {
    for now in from..from + limit {
        for d in step(cache, now) {
            if MsgHeader::peek(&d.bytes)?.msg_type == MessageType::RedirectAssign {
                return Ok((now, RedirectAssignMsg::parse(&d.bytes)?.msg));
            }
        }
    }
    bail!("no REDIRECT_ASSIGN within {limit}s of {from}")
}

#[test]
fn test_single_cache_then_second_cache() -> Result<()> {
    let mut cache = CacheEndpoint::new(CACHE_A, SecurityPolicy::default());
    cache.define_service_group(service()).1.seed_router(ROUTER);

    // First announcement: change number 1, nobody in view yet.
    let hia = only_here_i_am(&step(&mut cache, T0))?;
    assert_eq!(hia.cache_view.change_number, 1);
    assert!(hia.cache_view.routers.is_empty());
    assert!(hia.cache_view.caches.is_empty());
    assert_eq!(hia.cache_id.id.addr(), CACHE_A);
    assert_eq!(hia.service.group, service());

    // The router acknowledges this cache.
    cache
        .handle_message(T0 + 1, from_router(), &i_see_you(1, 1, &[CACHE_A])?)
        .context("first I_SEE_YOU rejected")?;
    let group = cache.group(80).context("group 80 missing")?;
    assert_eq!(group.routers.len(), 1);
    assert_eq!(group.caches.len(), 1);
    assert!(group.seeds.is_empty(), "answered seed becomes a router");

    let (at, ra) = wait_for_assign(&mut cache, T0 + 2, 3 * TIME_UNIT)?;
    assert!(at >= T0 + 1 + ASSIGN_WAIT, "assignment waits for the view to settle");
    let RedirectAssignment::Hash(info) = ra.assignment else {
        bail!("expected a hash assignment");
    };
    assert_eq!(info.hash.caches, vec![CACHE_A]);
    assert_eq!(info.key.addr(), CACHE_A);
    assert_eq!(info.routers.len(), 1);
    assert_eq!(info.routers[0].addr(), ROUTER);
    assert_eq!(info.routers[0].recv_id(), 1);
    assert!(info.hash.buckets.iter().all(|b| b.idx() == 0 && !b.alt()));

    // A second cache joins the router's view.
    let t = at + 1;
    cache.handle_message(t, from_router(), &i_see_you(2, 2, &[CACHE_A, CACHE_B])?)?;
    assert_eq!(cache.group(80).map(|g| g.caches.len()), Some(2));

    // The next ping reports both caches and the router's latest receive id.
    let mut hia = None;
    for now in t..t + TIME_UNIT + 1 {
        let sent = step(&mut cache, now);
        if !sent.is_empty() {
            hia = Some(only_here_i_am(&sent)?);
            break;
        }
    }
    let hia = hia.context("no HERE_I_AM after the second cache joined")?;
    assert_eq!(hia.cache_view.caches, vec![CACHE_A, CACHE_B]);
    assert_eq!(hia.cache_view.routers, vec![RouterIdElt::new(ROUTER, 2)]);

    let (_, ra) = wait_for_assign(&mut cache, t, 3 * TIME_UNIT)?;
    let RedirectAssignment::Hash(info) = ra.assignment else {
        bail!("expected a hash assignment");
    };
    assert_eq!(info.hash.caches, vec![CACHE_A, CACHE_B]);
    assert_eq!(info.hash.cache_for_bucket(0), Some(CACHE_A));
    assert_eq!(info.hash.cache_for_bucket(1), Some(CACHE_B));
    assert_eq!(info.hash.cache_for_bucket(254), Some(CACHE_A));
    assert_eq!(info.hash.cache_for_bucket(255), Some(CACHE_B));
    Ok(())
}

#[test]
fn test_cache_not_listed_by_every_router_gets_no_buckets() -> Result<()> {
    let other_router = Ipv4Addr::new(10, 0, 1, 1);
    let mut cache = CacheEndpoint::new(CACHE_A, SecurityPolicy::default());
    cache.define_service_group(service()).1.seed_router(ROUTER).seed_router(other_router);
    step(&mut cache, T0);

    // First router sees both caches, second router only this one.
    cache.handle_message(T0 + 1, from_router(), &i_see_you(1, 1, &[CACHE_A, CACHE_B])?)?;
    let second = ISeeYouMsg {
        security: SecurityComp::new(SecurityOption::None),
        service: ServiceComp::new(service()),
        router_id: RouterIdComp::new(RouterIdElt::new(other_router, 1), other_router, vec![CACHE_A]),
        router_view: RouterViewComp {
            change_number: 1,
            key: AssignmentKeyElt::default(),
            routers: vec![other_router],
            caches: vec![CacheIdElt::default_hash(CACHE_A)],
        },
        assignment: None,
        assign_map: None,
        capabilities: None,
        command: None,
    }
    .encode(&SecurityKey::default())?;
    let ip = IpHeader {
        src: other_router,
        dst: CACHE_A,
    };
    cache.handle_message(T0 + 1, ip, &second)?;

    let (_, ra) = wait_for_assign(&mut cache, T0 + 2, 3 * TIME_UNIT)?;
    let RedirectAssignment::Hash(info) = ra.assignment else {
        bail!("expected a hash assignment");
    };
    assert_eq!(info.hash.caches, vec![CACHE_A], "only caches every router lists take buckets");
    assert_eq!(info.routers.len(), 2);
    Ok(())
}

#[test]
fn test_seed_is_dropped_when_router_answers_under_another_identity() -> Result<()> {
    let router_id = Ipv4Addr::new(10, 0, 0, 254);
    let mut cache = CacheEndpoint::new(CACHE_A, SecurityPolicy::default());
    cache.define_service_group(service()).1.seed_router(ROUTER);
    only_here_i_am(&step(&mut cache, T0))?;

    // Reached on the seed address, answering as 10.0.0.254.
    let isy = ISeeYouMsg {
        security: SecurityComp::new(SecurityOption::None),
        service: ServiceComp::new(service()),
        router_id: RouterIdComp::new(RouterIdElt::new(router_id, 1), ROUTER, vec![CACHE_A]),
        router_view: RouterViewComp {
            change_number: 1,
            key: AssignmentKeyElt::default(),
            routers: vec![router_id],
            caches: vec![CacheIdElt::default_hash(CACHE_A)],
        },
        assignment: None,
        assign_map: None,
        capabilities: None,
        command: None,
    }
    .encode(&SecurityKey::default())?;
    cache.handle_message(T0 + 1, from_router(), &isy)?;

    let group = cache.group(80).context("group 80 missing")?;
    assert!(group.seeds.is_empty(), "seed left behind: {:?}", group.seeds);
    assert_eq!(group.routers.len(), 1);
    assert_eq!(group.routers[0].addr, router_id);
    assert_eq!(group.routers[0].xmit.time, T0, "seed send time carried over");

    let mut to_seed = 0;
    let mut to_router = 0;
    for now in T0 + 2..T0 + 3 * TIME_UNIT {
        for d in step(&mut cache, now) {
            if d.to == ROUTER {
                to_seed += 1;
            } else if d.to == router_id {
                to_router += 1;
            }
        }
    }
    assert_eq!(to_seed, 0, "answered seed is no longer pinged");
    assert!(to_router >= 2, "router pinged under its identity");
    Ok(())
}

#[test]
fn test_here_i_am_round_trips_through_view() -> Result<()> {
    let view = CacheViewComp {
        change_number: 7,
        routers: vec![RouterIdElt::new(ROUTER, 3)],
        caches: vec![CACHE_A, CACHE_B],
    };
    let msg = HereIAmMsg {
        security: SecurityComp::new(SecurityOption::Md5),
        service: ServiceComp::new(service()),
        cache_id: CacheIdComp::new(CacheIdElt::default_hash(CACHE_A)),
        cache_view: view.clone(),
        capabilities: None,
        command: None,
    };
    let key = SecurityKey::new(b"shared");
    let bytes = msg.encode(&key)?;
    let parsed = HereIAmMsg::parse(&bytes)?;
    assert_eq!(parsed.trailing, 0);
    assert_eq!(parsed.msg.cache_view, view);
    assert!(parsed.msg.security.validate(&key, &bytes));
    assert!(!parsed.msg.security.validate(&SecurityKey::new(b"other"), &bytes));
    Ok(())
}
