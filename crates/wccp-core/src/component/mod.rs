//! Type/length tagged message components.
//!
//! Every component starts with a four byte tag: type (u16) and length (u16),
//! where length excludes the tag. Implementors supply the body codec and
//! their exact size; the tag handling, space checks and size validation live
//! in the provided `fill` / `parse` methods so every component follows the
//! same rules:
//!
//! - `fill` refuses to write anything when the buffer is short.
//! - `parse` never advances the cursor unless the whole component validated.
//! - A valid component of another type parses as `OtherType`, which is how
//!   optional components are detected as absent.

mod assign;
mod capability;
mod identity;
mod security;
mod service;
mod view;

pub use assign::{AltAssignBody, AltAssignComp, AssignInfoComp, AssignMapComp};
pub use capability::{CapComp, CmdComp, Command};
pub use identity::{CacheIdComp, QueryComp, RouterIdComp};
pub use security::{SecurityComp, SecurityKey, SecurityOption};
pub use service::ServiceComp;
pub use view::{CacheViewComp, RouterViewComp};

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::wire::{
    Be16, ComponentType, MsgBuffer, ParseError, Reader, WireError, Writer, COMPONENT_HEADER_SIZE,
};

/// Component tag as laid out on the wire.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct ComponentHeader {
    comp_type: Be16,
    length: Be16,
}

static_assertions::assert_eq_size!(ComponentHeader, [u8; COMPONENT_HEADER_SIZE]);

/// Validate the tag at the start of `tail` against `expected`.
///
/// Returns the declared body length.
pub(crate) fn check_header(tail: &[u8], expected: ComponentType) -> Result<usize, ParseError> {
    let header = ComponentHeader::read_from_prefix(tail).ok_or(ParseError::BufferTooSmall)?;
    let comp_type = header.comp_type.get();
    if comp_type != u16::from(expected) {
        return Err(if ComponentType::in_range(comp_type) {
            ParseError::OtherType
        } else {
            ParseError::CompTypeInvalid
        });
    }
    let length = header.length.get() as usize;
    if length + COMPONENT_HEADER_SIZE > tail.len() {
        return Err(ParseError::CompTooBig);
    }
    Ok(length)
}

/// A message component with a type tag.
pub trait Component: Sized {
    const TYPE: ComponentType;

    /// Exact size on the wire, tag included.
    fn calc_size(&self) -> usize;

    /// Reject contents the wire format cannot carry. Runs before anything
    /// is written.
    fn check_limits(&self) -> Result<(), WireError> {
        Ok(())
    }

    /// Write everything after the tag.
    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError>;

    /// Read everything after the tag. The reader is confined to the
    /// declared length.
    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError>;

    /// Write the component at the buffer tail and advance past it.
    fn fill(&self, buf: &mut MsgBuffer) -> Result<(), WireError> {
        self.check_limits()?;
        let size = self.calc_size();
        let length = size - COMPONENT_HEADER_SIZE;
        let length = u16::try_from(length).map_err(|_| WireError::FieldOverflow("component length", length))?;
        buf.fill_with(size, |w| {
            w.put(&ComponentHeader {
                comp_type: Be16::new(Self::TYPE.into()),
                length: Be16::new(length),
            })?;
            self.encode_body(w)
        })
    }

    /// Decode the component at the buffer tail, advancing only on success.
    fn parse(buf: &mut MsgBuffer) -> Result<Self, ParseError> {
        let tail = buf.tail();
        let length = check_header(tail, Self::TYPE)?;
        let body = &tail[COMPONENT_HEADER_SIZE..COMPONENT_HEADER_SIZE + length];
        // Running out of body means the declared length is wrong, not that the
        // datagram is short; that was checked above.
        let comp = Self::decode_body(&mut Reader::new(body)).map_err(|e| match e {
            ParseError::BufferTooSmall => ParseError::CompWrongSize,
            other => other,
        })?;
        if comp.calc_size() != length + COMPONENT_HEADER_SIZE {
            return Err(ParseError::CompWrongSize);
        }
        buf.consume(length + COMPONENT_HEADER_SIZE);
        Ok(comp)
    }
}

/// Parse an optional component. Any failure means "absent" and leaves the
/// cursor where it was.
pub(crate) fn parse_optional<C: Component>(buf: &mut MsgBuffer) -> Option<C> {
    match C::parse(buf) {
        Ok(c) => Some(c),
        Err(ParseError::OtherType) | Err(ParseError::BufferTooSmall) => None,
        Err(e) => {
            tracing::trace!(component = ?C::TYPE, error = %e, "optional component skipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ServiceGroup;

    #[test]
    fn check_header_classifies_type_mismatch() {
        let other = [0u8, 1, 0, 0];
        assert_eq!(
            check_header(&other, ComponentType::Security),
            Err(ParseError::OtherType)
        );
        let garbage = [0u8, 16, 0, 0];
        assert_eq!(
            check_header(&garbage, ComponentType::Security),
            Err(ParseError::CompTypeInvalid)
        );
        assert_eq!(
            check_header(&[0u8, 0, 0], ComponentType::Security),
            Err(ParseError::BufferTooSmall)
        );
    }

    #[test]
    fn check_header_rejects_length_past_end() {
        let bytes = [0u8, 1, 0, 24, 0, 0];
        assert_eq!(
            check_header(&bytes, ComponentType::Service),
            Err(ParseError::CompTooBig)
        );
    }

    #[test]
    fn parse_does_not_advance_on_failure() {
        let mut buf = MsgBuffer::new(64);
        ServiceComp::new(ServiceGroup::standard(0)).fill(&mut buf).unwrap();
        let mut rx = MsgBuffer::from_bytes(buf.used());
        assert_eq!(SecurityComp::parse(&mut rx).unwrap_err(), ParseError::OtherType);
        assert_eq!(rx.count(), 0, "failed parse must leave the cursor alone");
        assert!(parse_optional::<CapComp>(&mut rx).is_none());
        assert_eq!(rx.count(), 0);
        ServiceComp::parse(&mut rx).unwrap();
        assert_eq!(rx.count(), 28);
    }

    #[test]
    fn declared_length_must_match_contents() {
        let mut buf = MsgBuffer::new(64);
        ServiceComp::new(ServiceGroup::standard(0)).fill(&mut buf).unwrap();
        let mut bytes = buf.into_used();
        // Claim a shorter body; the reader runs dry inside the element.
        bytes[3] = 20;
        assert_eq!(
            ServiceComp::parse(&mut MsgBuffer::from_bytes(&bytes)).unwrap_err(),
            ParseError::CompWrongSize
        );
    }

    #[test]
    fn fill_refuses_short_buffer() {
        let mut buf = MsgBuffer::new(27);
        let err = ServiceComp::new(ServiceGroup::standard(0)).fill(&mut buf).unwrap_err();
        assert_eq!(err, WireError::BufferTooSmall { needed: 28, space: 27 });
        assert_eq!(buf.count(), 0);
    }
}
