//! WCCPv2 messages.
//!
//! A message is an eight byte header followed by components. Every message
//! starts with security then service; the rest depends on the type:
//!
//! | Message          | Mandatory                      | Optional                               |
//! |------------------|--------------------------------|----------------------------------------|
//! | HERE_I_AM        | cache id, cache view           | capabilities, command                  |
//! | I_SEE_YOU        | router id, router view         | assignment, assign map, caps, command  |
//! | REDIRECT_ASSIGN  | hash or alternate assignment   |                                        |
//! | REMOVAL_QUERY    | query                          |                                        |
//!
//! Building a message is `fill` into a buffer followed by `finalize`, which
//! patches the header length and then writes the MD5 digest when security is
//! on. `Message::encode` does all three.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::component::{
    parse_optional, AltAssignBody, AltAssignComp, AssignInfoComp, AssignMapComp, CacheIdComp, CacheViewComp,
    CapComp, CmdComp, Component, QueryComp, RouterIdComp, RouterViewComp, SecurityComp, SecurityKey, ServiceComp,
};
use crate::wire::{
    Be16, Be32, MessageType, MsgBuffer, ParseError, WireError, BUFFER_SIZE, MSG_HEADER_SIZE, VERSION,
};

// ── Header ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct RawHeader {
    msg_type: Be32,
    version: Be16,
    length: Be16,
}

static_assertions::assert_eq_size!(RawHeader, [u8; MSG_HEADER_SIZE]);

/// Decoded message header. `length` excludes the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub msg_type: MessageType,
    pub version: u16,
    pub length: u16,
}

impl MsgHeader {
    /// Decode the header at the start of `bytes` without consuming anything.
    pub fn peek(bytes: &[u8]) -> Result<Self, ParseError> {
        let raw = RawHeader::read_from_prefix(bytes).ok_or(ParseError::BufferTooSmall)?;
        let length = raw.length.get();
        if length as usize + MSG_HEADER_SIZE > bytes.len() {
            return Err(ParseError::MsgTooBig);
        }
        let msg_type = MessageType::try_from(raw.msg_type.get()).map_err(|_| ParseError::CompTypeInvalid)?;
        Ok(Self {
            msg_type,
            version: raw.version.get(),
            length,
        })
    }

    /// Decode the header at the buffer tail and advance past it.
    pub fn parse(buf: &mut MsgBuffer) -> Result<Self, ParseError> {
        let header = Self::peek(buf.tail())?;
        buf.consume(MSG_HEADER_SIZE);
        Ok(header)
    }

    /// Write a header with a zero length; `finalize` patches it.
    pub fn fill(buf: &mut MsgBuffer, msg_type: MessageType) -> Result<(), WireError> {
        buf.fill_with(MSG_HEADER_SIZE, |w| {
            w.put(&RawHeader {
                msg_type: Be32::new(msg_type.into()),
                version: Be16::new(VERSION),
                length: Be16::ZERO,
            })
        })
    }
}

/// Set the header length from the bytes written so far, then secure.
pub fn finalize(buf: &mut MsgBuffer, security: &SecurityComp, key: &SecurityKey) -> Result<(), WireError> {
    let length = buf.count().saturating_sub(MSG_HEADER_SIZE);
    let length = u16::try_from(length).map_err(|_| WireError::FieldOverflow("message length", length))?;
    let used = buf.used_mut();
    if used.len() < MSG_HEADER_SIZE {
        return Err(WireError::BufferTooSmall {
            needed: MSG_HEADER_SIZE,
            space: used.len(),
        });
    }
    used[6..8].copy_from_slice(&length.to_be_bytes());
    SecurityComp::secure(security.option(), key, used)
}

/// A parsed message plus what the parser learned about the datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed<M> {
    pub header: MsgHeader,
    pub msg: M,
    /// Bytes inside the declared length that no known component claimed.
    pub trailing: usize,
}

// ── Message trait ─────────────────────────────────────────────────────────────

pub trait Message: Sized {
    const TYPE: MessageType;

    fn security(&self) -> &SecurityComp;

    fn service(&self) -> &ServiceComp;

    /// Write the components after the header.
    fn fill_components(&self, buf: &mut MsgBuffer) -> Result<(), WireError>;

    /// Read the components after security and service.
    fn parse_components(
        security: SecurityComp,
        service: ServiceComp,
        buf: &mut MsgBuffer,
    ) -> Result<Self, ParseError>;

    /// Header, components and finalize into a fresh buffer.
    fn fill(&self, buf: &mut MsgBuffer, key: &SecurityKey) -> Result<(), WireError> {
        MsgHeader::fill(buf, Self::TYPE)?;
        self.security().fill(buf)?;
        self.service().fill(buf)?;
        self.fill_components(buf)?;
        finalize(buf, self.security(), key)
    }

    fn encode(&self, key: &SecurityKey) -> Result<Vec<u8>, WireError> {
        let mut buf = MsgBuffer::new(BUFFER_SIZE);
        self.fill(&mut buf, key)?;
        Ok(buf.into_used())
    }

    /// Parse a datagram. Decoding is confined to the length the header
    /// declares; anything left over is reported as `trailing`.
    fn parse(bytes: &[u8]) -> Result<Parsed<Self>, ParseError> {
        let mut buf = MsgBuffer::from_bytes(bytes);
        let header = MsgHeader::parse(&mut buf)?;
        if header.msg_type != Self::TYPE {
            return Err(ParseError::MsgWrongType);
        }
        buf.truncate(MSG_HEADER_SIZE + header.length as usize);
        let security = SecurityComp::parse(&mut buf)?;
        let service = ServiceComp::parse(&mut buf)?;
        let msg = Self::parse_components(security, service, &mut buf)?;
        Ok(Parsed {
            header,
            msg,
            trailing: buf.space(),
        })
    }
}

// ── HERE_I_AM ─────────────────────────────────────────────────────────────────

/// Cache to router: identity, view and optionally capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HereIAmMsg {
    pub security: SecurityComp,
    pub service: ServiceComp,
    pub cache_id: CacheIdComp,
    pub cache_view: CacheViewComp,
    pub capabilities: Option<CapComp>,
    pub command: Option<CmdComp>,
}

impl Message for HereIAmMsg {
    const TYPE: MessageType = MessageType::HereIAm;

    fn security(&self) -> &SecurityComp {
        &self.security
    }

    fn service(&self) -> &ServiceComp {
        &self.service
    }

    fn fill_components(&self, buf: &mut MsgBuffer) -> Result<(), WireError> {
        self.cache_id.fill(buf)?;
        self.cache_view.fill(buf)?;
        if let Some(caps) = &self.capabilities {
            caps.fill(buf)?;
        }
        if let Some(cmd) = &self.command {
            cmd.fill(buf)?;
        }
        Ok(())
    }

    fn parse_components(
        security: SecurityComp,
        service: ServiceComp,
        buf: &mut MsgBuffer,
    ) -> Result<Self, ParseError> {
        let cache_id = CacheIdComp::parse(buf)?;
        let cache_view = CacheViewComp::parse(buf)?;
        let capabilities = parse_optional(buf);
        let command = parse_optional(buf);
        Ok(Self {
            security,
            service,
            cache_id,
            cache_view,
            capabilities,
            command,
        })
    }
}

// ── I_SEE_YOU ─────────────────────────────────────────────────────────────────

/// Router to cache: identity, view and whatever assignment the router holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ISeeYouMsg {
    pub security: SecurityComp,
    pub service: ServiceComp,
    pub router_id: RouterIdComp,
    pub router_view: RouterViewComp,
    pub assignment: Option<AssignInfoComp>,
    pub assign_map: Option<AssignMapComp>,
    pub capabilities: Option<CapComp>,
    pub command: Option<CmdComp>,
}

impl Message for ISeeYouMsg {
    const TYPE: MessageType = MessageType::ISeeYou;

    fn security(&self) -> &SecurityComp {
        &self.security
    }

    fn service(&self) -> &ServiceComp {
        &self.service
    }

    fn fill_components(&self, buf: &mut MsgBuffer) -> Result<(), WireError> {
        self.router_id.fill(buf)?;
        self.router_view.fill(buf)?;
        if let Some(a) = &self.assignment {
            a.fill(buf)?;
        }
        if let Some(m) = &self.assign_map {
            m.fill(buf)?;
        }
        if let Some(caps) = &self.capabilities {
            caps.fill(buf)?;
        }
        if let Some(cmd) = &self.command {
            cmd.fill(buf)?;
        }
        Ok(())
    }

    fn parse_components(
        security: SecurityComp,
        service: ServiceComp,
        buf: &mut MsgBuffer,
    ) -> Result<Self, ParseError> {
        let router_id = RouterIdComp::parse(buf)?;
        let router_view = RouterViewComp::parse(buf)?;
        let assignment = parse_optional(buf);
        let assign_map = parse_optional(buf);
        let capabilities = parse_optional(buf);
        let command = parse_optional(buf);
        Ok(Self {
            security,
            service,
            router_id,
            router_view,
            assignment,
            assign_map,
            capabilities,
            command,
        })
    }
}

// ── REDIRECT_ASSIGN ───────────────────────────────────────────────────────────

/// The assignment a REDIRECT_ASSIGN carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectAssignment {
    Hash(AssignInfoComp),
    Alt(AltAssignComp),
}

impl RedirectAssignment {
    pub fn is_mask(&self) -> bool {
        matches!(
            self,
            RedirectAssignment::Alt(AltAssignComp {
                body: AltAssignBody::Mask(_),
                ..
            })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectAssignMsg {
    pub security: SecurityComp,
    pub service: ServiceComp,
    pub assignment: RedirectAssignment,
}

impl RedirectAssignMsg {
    /// Build a REDIRECT_ASSIGN around an already encoded assignment component.
    pub fn encode_serialized(
        security: &SecurityComp,
        service: &ServiceComp,
        assignment: &[u8],
        key: &SecurityKey,
    ) -> Result<Vec<u8>, WireError> {
        let mut buf = MsgBuffer::new(BUFFER_SIZE);
        MsgHeader::fill(&mut buf, MessageType::RedirectAssign)?;
        security.fill(&mut buf)?;
        service.fill(&mut buf)?;
        buf.append(assignment)?;
        finalize(&mut buf, security, key)?;
        Ok(buf.into_used())
    }
}

impl Message for RedirectAssignMsg {
    const TYPE: MessageType = MessageType::RedirectAssign;

    fn security(&self) -> &SecurityComp {
        &self.security
    }

    fn service(&self) -> &ServiceComp {
        &self.service
    }

    fn fill_components(&self, buf: &mut MsgBuffer) -> Result<(), WireError> {
        match &self.assignment {
            RedirectAssignment::Hash(a) => a.fill(buf),
            RedirectAssignment::Alt(a) => a.fill(buf),
        }
    }

    fn parse_components(
        security: SecurityComp,
        service: ServiceComp,
        buf: &mut MsgBuffer,
    ) -> Result<Self, ParseError> {
        let assignment = match AssignInfoComp::parse(buf) {
            Ok(a) => RedirectAssignment::Hash(a),
            Err(ParseError::OtherType) => RedirectAssignment::Alt(AltAssignComp::parse(buf)?),
            Err(e) => return Err(e),
        };
        Ok(Self {
            security,
            service,
            assignment,
        })
    }
}

// ── REMOVAL_QUERY ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalQueryMsg {
    pub security: SecurityComp,
    pub service: ServiceComp,
    pub query: QueryComp,
}

impl Message for RemovalQueryMsg {
    const TYPE: MessageType = MessageType::RemovalQuery;

    fn security(&self) -> &SecurityComp {
        &self.security
    }

    fn service(&self) -> &ServiceComp {
        &self.service
    }

    fn fill_components(&self, buf: &mut MsgBuffer) -> Result<(), WireError> {
        self.query.fill(buf)
    }

    fn parse_components(
        security: SecurityComp,
        service: ServiceComp,
        buf: &mut MsgBuffer,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            security,
            service,
            query: QueryComp::parse(buf)?,
        })
    }
}
