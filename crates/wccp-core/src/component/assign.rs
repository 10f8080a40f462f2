//! Assignment carrying components.
//!
//! - `AssignInfoComp`: classic hash assignment, sent by the designated cache
//!   and echoed by routers in I_SEE_YOU.
//! - `AltAssignComp`: alternate assignment wrapper holding either a hash or a
//!   mask body, tagged by an inner assignment type.
//! - `AssignMapComp`: the mask/value map a router echoes back to caches.

use super::Component;
use crate::element::{AssignmentKeyElt, HashAssignElt, MaskAssignElt, RouterAssignElt};
use crate::wire::{ComponentType, ParseError, Reader, WireError, Writer, COMPONENT_HEADER_SIZE};

fn routers_size(n: usize) -> usize {
    4 + n * std::mem::size_of::<RouterAssignElt>()
}

fn put_routers(w: &mut Writer<'_>, routers: &[RouterAssignElt]) -> Result<(), WireError> {
    w.put_count(routers.len())?;
    for r in routers {
        w.put(r)?;
    }
    Ok(())
}

fn read_routers(r: &mut Reader<'_>) -> Result<Vec<RouterAssignElt>, ParseError> {
    let n = r.read_u32()? as usize;
    r.read_array::<RouterAssignElt>(n)
}

/// Hash assignment: key, router list, cache list and bucket table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignInfoComp {
    pub key: AssignmentKeyElt,
    pub routers: Vec<RouterAssignElt>,
    pub hash: HashAssignElt,
}

impl Component for AssignInfoComp {
    const TYPE: ComponentType = ComponentType::RedirectAssignment;

    fn calc_size(&self) -> usize {
        COMPONENT_HEADER_SIZE
            + std::mem::size_of::<AssignmentKeyElt>()
            + routers_size(self.routers.len())
            + self.hash.size()
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put(&self.key)?;
        put_routers(w, &self.routers)?;
        self.hash.encode(w)
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let key = r.read::<AssignmentKeyElt>()?;
        let routers = read_routers(r)?;
        let hash = HashAssignElt::decode(r)?;
        Ok(Self { key, routers, hash })
    }
}

/// Body of an alternate assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltAssignBody {
    Hash(HashAssignElt),
    Mask(MaskAssignElt),
}

impl AltAssignBody {
    const HASH: u16 = 0;
    const MASK: u16 = 1;

    fn code(&self) -> u16 {
        match self {
            AltAssignBody::Hash(_) => Self::HASH,
            AltAssignBody::Mask(_) => Self::MASK,
        }
    }

    fn size(&self) -> usize {
        match self {
            AltAssignBody::Hash(h) => h.size(),
            AltAssignBody::Mask(m) => m.size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltAssignComp {
    pub key: AssignmentKeyElt,
    pub routers: Vec<RouterAssignElt>,
    pub body: AltAssignBody,
}

impl AltAssignComp {
    /// Inner assignment type and length fields.
    const INNER_HEADER: usize = 4;

    fn assign_length(&self) -> usize {
        self.calc_size() - COMPONENT_HEADER_SIZE - Self::INNER_HEADER
    }
}

impl Component for AltAssignComp {
    const TYPE: ComponentType = ComponentType::AltAssignment;

    fn calc_size(&self) -> usize {
        COMPONENT_HEADER_SIZE
            + Self::INNER_HEADER
            + std::mem::size_of::<AssignmentKeyElt>()
            + routers_size(self.routers.len())
            + self.body.size()
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        let len = self.assign_length();
        w.put_u16(self.body.code())?;
        w.put_u16(u16::try_from(len).map_err(|_| WireError::FieldOverflow("assignment length", len))?)?;
        w.put(&self.key)?;
        put_routers(w, &self.routers)?;
        match &self.body {
            AltAssignBody::Hash(h) => h.encode(w),
            AltAssignBody::Mask(m) => m.encode(w),
        }
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let code = r.read_u16()?;
        let assign_length = r.read_u16()? as usize;
        let key = r.read::<AssignmentKeyElt>()?;
        let routers = read_routers(r)?;
        let body = match code {
            AltAssignBody::HASH => AltAssignBody::Hash(HashAssignElt::decode(r)?),
            AltAssignBody::MASK => AltAssignBody::Mask(MaskAssignElt::decode(r)?),
            _ => return Err(ParseError::CompInvalid),
        };
        let comp = Self { key, routers, body };
        if comp.assign_length() != assign_length {
            return Err(ParseError::CompWrongSize);
        }
        Ok(comp)
    }
}

/// Mask/value map echoed by routers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignMapComp {
    pub mask: MaskAssignElt,
}

impl Component for AssignMapComp {
    const TYPE: ComponentType = ComponentType::AssignMap;

    fn calc_size(&self) -> usize {
        COMPONENT_HEADER_SIZE + self.mask.size()
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        self.mask.encode(w)
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            mask: MaskAssignElt::decode(r)?,
        })
    }
}
