//! WCCPv2 wire format: buffer, cursors, constants and error types.
//!
//! Every multi-byte field on the wire is big-endian. Fixed-layout elements
//! are zerocopy structs built from `U16<BigEndian>` / `U32<BigEndian>` and
//! four-octet addresses, so decoding is a bounds-checked copy out of the
//! buffer and never a reinterpretation of memory. There is no unsafe code
//! in this module.

use std::net::Ipv4Addr;

use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes};

/// Big-endian u16 field.
pub type Be16 = U16<BigEndian>;
/// Big-endian u32 field.
pub type Be32 = U32<BigEndian>;

// ── Constants ─────────────────────────────────────────────────────────────────

/// UDP port used by both routers and caches.
pub const DEFAULT_PORT: u16 = 2048;

/// Protocol version carried in every message header.
pub const VERSION: u16 = 0x0200;

/// Number of hash buckets in a hash assignment.
pub const N_BUCKETS: usize = 256;

/// Bucket value meaning "no cache".
pub const UNASSIGNED_BUCKET: u8 = 0xFF;

/// Shared secret length for MD5 security. Shorter keys are zero padded.
pub const KEY_SIZE: usize = 8;

/// MD5 digest length.
pub const DIGEST_SIZE: usize = 16;

/// Maximum caches in a service group.
pub const MAX_CACHES: usize = 32;

/// Maximum routers in a service group.
pub const MAX_ROUTERS: usize = 32;

/// Component tag: type (u16) + length (u16).
pub const COMPONENT_HEADER_SIZE: usize = 4;

/// Message header: type (u32) + version (u16) + length (u16).
pub const MSG_HEADER_SIZE: usize = 8;

/// Largest valid component type code. Anything above is corruption.
pub const MAX_COMPONENT_TYPE: u16 = 15;

/// Scratch size for building outgoing messages.
pub const BUFFER_SIZE: usize = 4096;

// ── Type codes ────────────────────────────────────────────────────────────────

/// Component type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ComponentType {
    Security = 0,
    Service = 1,
    RouterId = 2,
    CacheId = 3,
    RouterView = 4,
    CacheView = 5,
    RedirectAssignment = 6,
    Query = 7,
    Capability = 8,
    AltAssignment = 13,
    AssignMap = 14,
    CommandExtension = 15,
}

impl ComponentType {
    /// True if `code` is inside the range of component codes the protocol
    /// defines, whether or not this implementation knows the type.
    pub fn in_range(code: u16) -> bool {
        code <= MAX_COMPONENT_TYPE
    }
}

impl From<ComponentType> for u16 {
    fn from(t: ComponentType) -> u16 {
        t as u16
    }
}

/// Message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Cache → router keepalive and view announcement.
    HereIAm = 10,
    /// Router → cache acknowledgement carrying the router's view.
    ISeeYou = 11,
    /// Designated cache → routers, the traffic assignment.
    RedirectAssign = 12,
    /// Router → cache, "are you still there".
    RemovalQuery = 13,
}

impl TryFrom<u32> for MessageType {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(MessageType::HereIAm),
            11 => Ok(MessageType::ISeeYou),
            12 => Ok(MessageType::RedirectAssign),
            13 => Ok(MessageType::RemovalQuery),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u32 {
    fn from(t: MessageType) -> u32 {
        t as u32
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::HereIAm => "HERE_I_AM",
            MessageType::ISeeYou => "I_SEE_YOU",
            MessageType::RedirectAssign => "REDIRECT_ASSIGN",
            MessageType::RemovalQuery => "REMOVAL_QUERY",
        };
        f.write_str(name)
    }
}

// ── Message buffer ────────────────────────────────────────────────────────────

/// Fixed-capacity byte buffer with a "bytes used" cursor.
///
/// Encoding writes at the tail and advances the cursor. Decoding reads at the
/// tail and advances only once a component has fully validated. The buffer
/// never grows after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgBuffer {
    data: Vec<u8>,
    count: usize,
}

impl MsgBuffer {
    /// Zeroed buffer of `size` bytes, for encoding.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
            count: 0,
        }
    }

    /// Buffer holding a copy of received bytes, for decoding.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            count: 0,
        }
    }

    /// Total capacity.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes consumed so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Bytes remaining after the cursor.
    pub fn space(&self) -> usize {
        self.data.len() - self.count
    }

    /// Everything from the cursor to the end of the buffer.
    pub fn tail(&self) -> &[u8] {
        &self.data[self.count..]
    }

    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.count..]
    }

    /// The consumed prefix.
    pub fn used(&self) -> &[u8] {
        &self.data[..self.count]
    }

    pub fn used_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.count]
    }

    /// Mark `n` more bytes as used, clamped to the remaining space.
    pub fn consume(&mut self, n: usize) -> &mut Self {
        self.count += n.min(self.space());
        self
    }

    /// Shrink the buffer so it ends `n` bytes after the start.
    /// Used to confine decoding to the length a message header declares.
    pub fn truncate(&mut self, n: usize) {
        if n < self.data.len() {
            self.data.truncate(n.max(self.count));
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Consume the buffer, returning the used bytes.
    pub fn into_used(mut self) -> Vec<u8> {
        self.data.truncate(self.count);
        self.data
    }

    /// Run `write` over the next `size` bytes, then advance past them.
    ///
    /// Fails up front without touching the buffer if fewer than `size` bytes
    /// remain.
    pub fn fill_with<F>(&mut self, size: usize, write: F) -> Result<(), WireError>
    where
        F: FnOnce(&mut Writer<'_>) -> Result<(), WireError>,
    {
        if self.space() < size {
            return Err(WireError::BufferTooSmall {
                needed: size,
                space: self.space(),
            });
        }
        let mut w = Writer::new(&mut self.tail_mut()[..size]);
        write(&mut w)?;
        self.consume(size);
        Ok(())
    }

    /// Copy pre-encoded bytes to the tail.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.fill_with(bytes.len(), |w| w.put_bytes(bytes))
    }
}

// ── Cursors ───────────────────────────────────────────────────────────────────

/// Bounds-checked read cursor over a byte slice.
///
/// Every read reports `ParseError::BufferTooSmall` rather than reading past
/// the end of the slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Copy a fixed-layout element out of the slice.
    pub fn read<T: FromBytes>(&mut self) -> Result<T, ParseError> {
        let value = T::read_from_prefix(&self.bytes[self.pos..]).ok_or(ParseError::BufferTooSmall)?;
        self.pos += std::mem::size_of::<T>();
        Ok(value)
    }

    /// Read `count` fixed-layout elements, refusing counts the remaining
    /// bytes cannot possibly hold.
    pub fn read_array<T: FromBytes>(&mut self, count: usize) -> Result<Vec<T>, ParseError> {
        let need = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(ParseError::BufferTooSmall)?;
        if need > self.remaining() {
            return Err(ParseError::BufferTooSmall);
        }
        (0..count).map(|_| self.read::<T>()).collect()
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        Ok(self.read::<Be16>()?.get())
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        Ok(self.read::<Be32>()?.get())
    }

    pub fn read_addr(&mut self) -> Result<Ipv4Addr, ParseError> {
        Ok(Ipv4Addr::from(self.read::<[u8; 4]>()?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if n > self.remaining() {
            return Err(ParseError::BufferTooSmall);
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

/// Bounds-checked write cursor over a byte slice.
#[derive(Debug)]
pub struct Writer<'a> {
    bytes: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Write a fixed-layout element.
    pub fn put<T: AsBytes + ?Sized>(&mut self, value: &T) -> Result<(), WireError> {
        self.put_bytes(value.as_bytes())
    }

    pub fn put_bytes(&mut self, src: &[u8]) -> Result<(), WireError> {
        let space = self.bytes.len() - self.pos;
        if src.len() > space {
            return Err(WireError::BufferTooSmall {
                needed: src.len(),
                space,
            });
        }
        self.bytes[self.pos..self.pos + src.len()].copy_from_slice(src);
        self.pos += src.len();
        Ok(())
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), WireError> {
        self.put(&Be16::new(v))
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), WireError> {
        self.put(&Be32::new(v))
    }

    pub fn put_addr(&mut self, addr: Ipv4Addr) -> Result<(), WireError> {
        self.put_bytes(&addr.octets())
    }

    /// Write a count field, rejecting values that do not fit in 32 bits.
    pub fn put_count(&mut self, n: usize) -> Result<(), WireError> {
        let v = u32::try_from(n).map_err(|_| WireError::FieldOverflow("count", n))?;
        self.put_u32(v)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("buffer too small for component: {needed} bytes needed, {space} available")]
    BufferTooSmall { needed: usize, space: usize },

    #[error("too many {what}: {count} exceeds maximum {max}")]
    TooManyElements {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("{0} value {1} does not fit its wire field")]
    FieldOverflow(&'static str, usize),

    #[error("unknown message type: {0}")]
    UnknownMessageType(u32),

    #[error("unknown service type: {0}")]
    UnknownServiceType(u8),

    #[error("unknown security option: {0}")]
    UnknownSecurityOption(u32),

    #[error("unknown packet style: {0}")]
    UnknownPacketStyle(u32),

    #[error("unknown cache assignment style: {0}")]
    UnknownAssignmentStyle(u32),

    #[error("unknown command: {0}")]
    UnknownCommand(u16),
}

/// Closed set of decode outcomes. Success is `Ok`.
///
/// Each variant keeps the numeric code used by other WCCP stacks so logs stay
/// comparable across implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A valid component of a different type. Optional slots treat this as
    /// "absent".
    #[error("component is of another valid type")]
    OtherType,

    #[error("component type out of range")]
    CompTypeInvalid,

    #[error("message length runs past end of buffer")]
    MsgTooBig,

    #[error("component content invalid")]
    CompInvalid,

    #[error("message content invalid")]
    MsgInvalid,

    #[error("message is not of the expected type")]
    MsgWrongType,

    #[error("component length runs past end of buffer")]
    CompTooBig,

    #[error("buffer too small")]
    BufferTooSmall,

    #[error("component length does not match its contents")]
    CompWrongSize,

    #[error("unconsumed data after last component")]
    DataOverrun,
}

impl ParseError {
    pub fn code(self) -> u8 {
        match self {
            ParseError::OtherType => 1,
            ParseError::CompTypeInvalid => 2,
            ParseError::MsgTooBig => 3,
            ParseError::CompInvalid => 4,
            ParseError::MsgInvalid => 5,
            ParseError::MsgWrongType => 6,
            ParseError::CompTooBig => 7,
            ParseError::BufferTooSmall => 8,
            ParseError::CompWrongSize => 9,
            ParseError::DataOverrun => 10,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
