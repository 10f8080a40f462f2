//! Service component. The body is the service group itself, with every
//! field after the id zeroed for STANDARD groups.

use super::Component;
use crate::element::{ServiceGroup, ServiceType};
use crate::wire::{ComponentType, ParseError, Reader, WireError, Writer, COMPONENT_HEADER_SIZE};

/// The service group a message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceComp {
    pub group: ServiceGroup,
}

impl ServiceComp {
    pub fn new(group: ServiceGroup) -> Self {
        Self { group }
    }
}

impl Component for ServiceComp {
    const TYPE: ComponentType = ComponentType::Service;

    fn calc_size(&self) -> usize {
        COMPONENT_HEADER_SIZE + std::mem::size_of::<ServiceGroup>()
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put(&self.group)
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let group = r.read::<ServiceGroup>()?;
        ServiceType::try_from(group.raw_svc_type()).map_err(|_| ParseError::CompInvalid)?;
        Ok(Self { group })
    }
}
