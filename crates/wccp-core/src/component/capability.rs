//! Capability and command extension components.

use super::Component;
use crate::element::{AssignmentStyle, CapabilityElt, CapabilityType, PacketStyle};
use crate::wire::{ComponentType, ParseError, Reader, WireError, Writer, COMPONENT_HEADER_SIZE};

/// List of capability elements. The count is implied by the length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapComp {
    pub elts: Vec<CapabilityElt>,
}

impl CapComp {
    /// Advertise one value for each of the three capabilities.
    pub fn new(forward: PacketStyle, ret: PacketStyle, assign: AssignmentStyle) -> Self {
        Self {
            elts: vec![
                CapabilityElt::new(CapabilityType::PacketForward, forward.bits()),
                CapabilityElt::new(CapabilityType::CacheAssignment, assign.bits()),
                CapabilityElt::new(CapabilityType::PacketReturn, ret.bits()),
            ],
        }
    }

    fn value(&self, t: CapabilityType) -> Option<u32> {
        self.elts
            .iter()
            .find(|e| e.cap_type() == t as u16)
            .map(CapabilityElt::data)
    }

    /// Forwarding methods offered. GRE when not stated.
    pub fn packet_forward(&self) -> u32 {
        self.value(CapabilityType::PacketForward)
            .unwrap_or(PacketStyle::Gre.bits())
    }

    /// Return methods offered. GRE when not stated.
    pub fn packet_return(&self) -> u32 {
        self.value(CapabilityType::PacketReturn)
            .unwrap_or(PacketStyle::Gre.bits())
    }

    /// Assignment methods offered. Hash when not stated.
    pub fn cache_assign(&self) -> u32 {
        self.value(CapabilityType::CacheAssignment)
            .unwrap_or(AssignmentStyle::HashOnly.bits())
    }
}

impl Component for CapComp {
    const TYPE: ComponentType = ComponentType::Capability;

    fn calc_size(&self) -> usize {
        COMPONENT_HEADER_SIZE + self.elts.len() * std::mem::size_of::<CapabilityElt>()
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        for e in &self.elts {
            w.put(e)?;
        }
        Ok(())
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let elt_size = std::mem::size_of::<CapabilityElt>();
        if r.remaining() % elt_size != 0 {
            return Err(ParseError::CompWrongSize);
        }
        let elts = r.read_array::<CapabilityElt>(r.remaining() / elt_size)?;
        Ok(Self { elts })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    Shutdown = 1,
    ShutdownResponse = 2,
}

impl TryFrom<u16> for Command {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Shutdown),
            2 => Ok(Command::ShutdownResponse),
            other => Err(WireError::UnknownCommand(other)),
        }
    }
}

/// Command extension: a command code and a 32-bit argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdComp {
    pub cmd: Command,
    pub data: u32,
}

impl CmdComp {
    const INNER_LENGTH: u16 = 4;

    pub fn new(cmd: Command, data: u32) -> Self {
        Self { cmd, data }
    }
}

impl Component for CmdComp {
    const TYPE: ComponentType = ComponentType::CommandExtension;

    fn calc_size(&self) -> usize {
        COMPONENT_HEADER_SIZE + 8
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put_u16(self.cmd as u16)?;
        w.put_u16(Self::INNER_LENGTH)?;
        w.put_u32(self.data)
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let cmd = Command::try_from(r.read_u16()?).map_err(|_| ParseError::CompInvalid)?;
        if r.read_u16()? != Self::INNER_LENGTH {
            return Err(ParseError::CompWrongSize);
        }
        let data = r.read_u32()?;
        Ok(Self { cmd, data })
    }
}
