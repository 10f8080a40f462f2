//! WCCP integration test harness.
//!
//! Endpoints run in-process on a simulated network. Every datagram an
//! endpoint queues during housekeeping is delivered to the endpoint owning
//! the destination address, with the sender as the IP source. No sockets,
//! no root, no sleeping: time is a counter advanced one second per tick.
//!
//!   cargo test --test integration

use std::collections::HashSet;
use std::net::Ipv4Addr;

use wccp_core::endpoint::{Datagram, Outbox};
use wccp_core::{CacheEndpoint, Endpoint, IpHeader, MessageType, MsgHeader, RouterEndpoint, Time};

mod config;
mod convergence;
mod removal;
mod scenario;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const ROUTER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const CACHE_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const CACHE_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

/// Start time. Seeds are first pinged at zero, so anything well past one
/// time unit works.
pub const T0: Time = 1000;

/// One datagram as seen on the wire.
#[derive(Debug, Clone)]
pub struct Sent {
    pub at: Time,
    pub from: Ipv4Addr,
    pub to: Ipv4Addr,
    pub msg: Option<MessageType>,
    pub bytes: Vec<u8>,
}

/// A message an endpoint refused.
#[derive(Debug, Clone)]
pub struct Rejected {
    pub at: Time,
    pub from: Ipv4Addr,
    pub to: Ipv4Addr,
    pub error: String,
}

#[derive(Default)]
pub struct Net {
    pub now: Time,
    pub caches: Vec<CacheEndpoint>,
    pub routers: Vec<RouterEndpoint>,
    /// Nodes that skip housekeeping but still receive.
    pub paused: HashSet<Ipv4Addr>,
    pub sent: Vec<Sent>,
    pub rejected: Vec<Rejected>,
}

impl Net {
    pub fn new(now: Time) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    fn endpoints(&mut self) -> impl Iterator<Item = &mut dyn Endpoint> {
        self.caches
            .iter_mut()
            .map(|c| c as &mut dyn Endpoint)
            .chain(self.routers.iter_mut().map(|r| r as &mut dyn Endpoint))
    }

    pub fn cache(&self, addr: Ipv4Addr) -> &CacheEndpoint {
        self.caches
            .iter()
            .find(|c| c.addr() == addr)
            .unwrap_or_else(|| panic!("no cache {addr}"))
    }

    pub fn router(&self, addr: Ipv4Addr) -> &RouterEndpoint {
        self.routers
            .iter()
            .find(|r| r.addr() == addr)
            .unwrap_or_else(|| panic!("no router {addr}"))
    }

    /// Take a cache off the network. Datagrams to it are lost.
    pub fn unplug(&mut self, addr: Ipv4Addr) -> Option<CacheEndpoint> {
        let idx = self.caches.iter().position(|c| c.addr() == addr)?;
        Some(self.caches.swap_remove(idx))
    }

    /// Run housekeeping everywhere at the current time and deliver the
    /// results.
    pub fn tick(&mut self) {
        let now = self.now;
        let paused = self.paused.clone();
        let mut queued: Vec<(Ipv4Addr, Datagram)> = Vec::new();
        for ep in self.endpoints() {
            let from = ep.core().addr;
            if paused.contains(&from) {
                continue;
            }
            let mut out = Outbox::new();
            ep.housekeeping(now, &mut out);
            queued.extend(out.drain().map(|d| (from, d)));
        }
        for (from, d) in queued {
            self.deliver(from, d);
        }
    }

    fn deliver(&mut self, from: Ipv4Addr, d: Datagram) {
        let now = self.now;
        let to = d.to;
        self.sent.push(Sent {
            at: now,
            from,
            to,
            msg: MsgHeader::peek(&d.bytes).ok().map(|h| h.msg_type),
            bytes: d.bytes.clone(),
        });
        let ip = IpHeader { src: from, dst: to };
        let result = self
            .endpoints()
            .find(|ep| ep.core().addr == to)
            .map(|ep| ep.handle_message(now, ip, &d.bytes));
        if let Some(Err(e)) = result {
            self.rejected.push(Rejected {
                at: now,
                from,
                to,
                error: e.to_string(),
            });
        }
    }

    /// Tick once per second for `secs` seconds.
    pub fn run(&mut self, secs: Time) {
        for _ in 0..secs {
            self.tick();
            self.now += 1;
        }
    }

    /// Datagrams of type `msg` from `from` to `to`, sent at or after `since`.
    pub fn count(&self, from: Ipv4Addr, to: Ipv4Addr, msg: MessageType, since: Time) -> usize {
        self.sent
            .iter()
            .filter(|s| s.from == from && s.to == to && s.msg == Some(msg) && s.at >= since)
            .count()
    }

    /// Most recent datagram of type `msg` from `from` to `to`.
    pub fn last(&self, from: Ipv4Addr, to: Ipv4Addr, msg: MessageType) -> Option<&Sent> {
        self.sent
            .iter()
            .rev()
            .find(|s| s.from == from && s.to == to && s.msg == Some(msg))
    }
}
