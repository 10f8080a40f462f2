//! Service group state shared by both roles.
//!
//! Each endpoint keeps one group per defined service. The shared part is the
//! service descriptor, the generation counter advanced on every view change,
//! the security override and the assignment. Role specific peer tracking
//! lives in [`cache`] and [`router`].

pub mod cache;
pub mod router;

pub use cache::{CacheGroup, CachePeer, CacheRouter, Methods, SeedRouter};
pub use router::{RouterCache, RouterGroup, RouterPeer};

use crate::assignment::Assignment;
use crate::component::{SecurityKey, SecurityOption};
use crate::element::ServiceGroup;

/// Seconds. Endpoints never read the clock; callers pass `now` in.
pub type Time = u64;

/// Base protocol period.
pub const TIME_UNIT: Time = 10;

/// Settling delay between a view change and building the assignment.
pub const ASSIGN_WAIT: Time = 15;

/// Silence after which a peer is dropped.
pub const PEER_TIMEOUT: Time = 3 * TIME_UNIT;

/// Fast pings sent to a router after it queried this cache.
pub const RAPID_PINGS: u32 = 3;

/// When a packet was last sent to or received from a peer, and its sequence
/// number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketStamp {
    pub time: Time,
    pub sn: u32,
}

impl PacketStamp {
    pub fn new(time: Time, sn: u32) -> Self {
        Self { time, sn }
    }

    pub fn set(&mut self, time: Time, sn: u32) -> &mut Self {
        self.time = time;
        self.sn = sn;
        self
    }
}

/// Security settings. On a group, unset fields fall back to the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub option: Option<SecurityOption>,
    pub key: Option<SecurityKey>,
}

impl SecurityPolicy {
    pub fn none() -> Self {
        Self {
            option: Some(SecurityOption::None),
            key: None,
        }
    }

    pub fn md5(key: SecurityKey) -> Self {
        Self {
            option: Some(SecurityOption::Md5),
            key: Some(key),
        }
    }

    /// Option and key in effect: this policy first, then `fallback`, then
    /// no security.
    pub fn resolve(&self, fallback: &SecurityPolicy) -> (SecurityOption, SecurityKey) {
        let option = self
            .option
            .or(fallback.option)
            .unwrap_or(SecurityOption::None);
        let key = self.key.or(fallback.key).unwrap_or_default();
        (option, key)
    }
}

/// Outcome of defining a service group on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefineResult {
    /// The group did not exist and was created.
    Defined,
    /// An equal definition was already present.
    Exists,
    /// A different definition with the same id is present. Nothing changed.
    Conflict,
}

/// State common to cache and router groups.
#[derive(Debug, Clone)]
pub struct GroupData {
    pub svc: ServiceGroup,
    /// Change number, advanced on every view change.
    pub generation: u32,
    pub generation_time: Time,
    pub security: SecurityPolicy,
    pub assignment: Assignment,
}

impl GroupData {
    pub fn new(svc: ServiceGroup, generation: u32) -> Self {
        Self {
            svc,
            generation,
            generation_time: 0,
            security: SecurityPolicy::default(),
            assignment: Assignment::default(),
        }
    }

    pub fn bump_generation(&mut self, now: Time) {
        self.generation = self.generation.wrapping_add(1);
        self.generation_time = now;
    }
}
