//! Protocol endpoints.
//!
//! An endpoint is a synchronous state machine owning its service groups. The
//! caller feeds it datagrams through [`Endpoint::handle_message`] and calls
//! [`Endpoint::housekeeping`] whenever [`Endpoint::wait_time`] elapses.
//! Outgoing datagrams go through a [`Transport`], so the engines never touch
//! a socket and tests can capture every send.

pub mod cache;
pub mod router;

pub use cache::CacheEndpoint;
pub use router::RouterEndpoint;

use std::io;
use std::net::Ipv4Addr;

use crate::component::{SecurityComp, SecurityOption};
use crate::group::{SecurityPolicy, Time};
use crate::message::MsgHeader;
use crate::wire::{MessageType, ParseError, WireError};

pub use crate::group::{ASSIGN_WAIT, TIME_UNIT};

// ── Transport ─────────────────────────────────────────────────────────────────

/// Where outgoing datagrams go.
pub trait Transport {
    fn send_to(&mut self, to: Ipv4Addr, bytes: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub to: Ipv4Addr,
    pub bytes: Vec<u8>,
}

/// Transport that queues datagrams for the caller to flush.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<Datagram>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Datagram> {
        self.queue.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Transport for Outbox {
    fn send_to(&mut self, to: Ipv4Addr, bytes: &[u8]) -> io::Result<()> {
        self.queue.push(Datagram {
            to,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }
}

/// Addresses from the IP header of a received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("malformed message: {0}")]
    Parse(#[from] ParseError),

    #[error("encode failed: {0}")]
    Wire(#[from] WireError),

    #[error("security check failed for group {0}")]
    Security(u8),

    #[error("no service group {0}")]
    UnknownGroup(u8),

    #[error("service definition for group {0} does not match")]
    ServiceMismatch(u8),

    #[error("service group {0} already defined differently")]
    Conflict(u8),

    #[error("local address not in router {0} from list")]
    NotInFromList(Ipv4Addr),

    #[error("no common capabilities with router {0}")]
    CapabilityMismatch(Ipv4Addr),

    #[error("out of date message from {0}")]
    Stale(Ipv4Addr),

    #[error("unexpected {0} message")]
    Unexpected(MessageType),

    #[error("send failed: {0}")]
    Io(#[from] io::Error),
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// State every endpoint carries.
#[derive(Debug, Clone)]
pub struct EndpointCore {
    pub addr: Ipv4Addr,
    /// Default security, overridden per group.
    pub security: SecurityPolicy,
}

impl EndpointCore {
    pub fn new(addr: Ipv4Addr, security: SecurityPolicy) -> Self {
        Self { addr, security }
    }

    /// Check a received security component against the policy in effect.
    ///
    /// The received option must equal the resolved one; MD5 is then verified
    /// over the raw message bytes.
    pub fn validate_security(
        &self,
        group: &SecurityPolicy,
        received: &SecurityComp,
        bytes: &[u8],
        svc_id: u8,
    ) -> Result<(), EndpointError> {
        let (option, key) = group.resolve(&self.security);
        if received.option() != option {
            return Err(EndpointError::Security(svc_id));
        }
        if option == SecurityOption::Md5 && !received.validate(&key, bytes) {
            return Err(EndpointError::Security(svc_id));
        }
        Ok(())
    }
}

pub trait Endpoint {
    fn core(&self) -> &EndpointCore;

    /// Route a datagram to the handler for its type.
    fn handle_message(&mut self, now: Time, ip: IpHeader, bytes: &[u8]) -> Result<(), EndpointError> {
        let header = MsgHeader::peek(bytes)?;
        tracing::debug!(from = %ip.src, msg = %header.msg_type, len = bytes.len(), "received");
        match header.msg_type {
            MessageType::HereIAm => self.handle_here_i_am(now, ip, bytes),
            MessageType::ISeeYou => self.handle_i_see_you(now, ip, bytes),
            MessageType::RedirectAssign => self.handle_redirect_assign(now, ip, bytes),
            MessageType::RemovalQuery => self.handle_removal_query(now, ip, bytes),
        }
    }

    fn handle_here_i_am(&mut self, _now: Time, _ip: IpHeader, _bytes: &[u8]) -> Result<(), EndpointError> {
        Err(EndpointError::Unexpected(MessageType::HereIAm))
    }

    fn handle_i_see_you(&mut self, _now: Time, _ip: IpHeader, _bytes: &[u8]) -> Result<(), EndpointError> {
        Err(EndpointError::Unexpected(MessageType::ISeeYou))
    }

    fn handle_redirect_assign(&mut self, _now: Time, _ip: IpHeader, _bytes: &[u8]) -> Result<(), EndpointError> {
        Err(EndpointError::Unexpected(MessageType::RedirectAssign))
    }

    fn handle_removal_query(&mut self, _now: Time, _ip: IpHeader, _bytes: &[u8]) -> Result<(), EndpointError> {
        Err(EndpointError::Unexpected(MessageType::RemovalQuery))
    }

    /// Periodic work: timeouts, keepalives, assignments. Returns the number of
    /// datagrams sent.
    fn housekeeping(&mut self, now: Time, tx: &mut dyn Transport) -> usize;

    /// Seconds until `housekeeping` next has something to do.
    fn wait_time(&self, now: Time) -> Time;
}

/// Send and log. A failed send is logged and not retried; the next
/// housekeeping pass covers it.
pub(crate) fn send(tx: &mut dyn Transport, to: Ipv4Addr, msg: MessageType, bytes: &[u8]) -> bool {
    match tx.send_to(to, bytes) {
        Ok(()) => {
            tracing::debug!(to = %to, msg = %msg, len = bytes.len(), "sent");
            true
        }
        Err(e) => {
            tracing::warn!(to = %to, msg = %msg, error = %e, "send failed");
            false
        }
    }
}
