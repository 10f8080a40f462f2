//! Router identity, cache identity and removal query components.

use std::net::Ipv4Addr;

use super::Component;
use crate::element::{CacheIdElt, QueryElt, RouterIdElt};
use crate::wire::{ComponentType, ParseError, Reader, WireError, Writer, COMPONENT_HEADER_SIZE};

/// A router's identity, the address it was reached on, and the caches the
/// message answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterIdComp {
    pub id: RouterIdElt,
    pub to_addr: Ipv4Addr,
    pub from: Vec<Ipv4Addr>,
}

impl RouterIdComp {
    pub fn new(id: RouterIdElt, to_addr: Ipv4Addr, from: Vec<Ipv4Addr>) -> Self {
        Self { id, to_addr, from }
    }

    pub fn calc_size_for(n_from: usize) -> usize {
        COMPONENT_HEADER_SIZE + std::mem::size_of::<RouterIdElt>() + 4 + 4 + n_from * 4
    }

    /// True if `addr` appears in the from list.
    pub fn find_from_addr(&self, addr: Ipv4Addr) -> bool {
        self.from.contains(&addr)
    }
}

impl Component for RouterIdComp {
    const TYPE: ComponentType = ComponentType::RouterId;

    fn calc_size(&self) -> usize {
        Self::calc_size_for(self.from.len())
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put(&self.id)?;
        w.put_addr(self.to_addr)?;
        w.put_count(self.from.len())?;
        for addr in &self.from {
            w.put_addr(*addr)?;
        }
        Ok(())
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let id = r.read::<RouterIdElt>()?;
        let to_addr = r.read_addr()?;
        let n = r.read_u32()? as usize;
        let from = r
            .read_array::<[u8; 4]>(n)?
            .into_iter()
            .map(Ipv4Addr::from)
            .collect();
        Ok(Self { id, to_addr, from })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheIdComp {
    pub id: CacheIdElt,
}

impl CacheIdComp {
    pub fn new(id: CacheIdElt) -> Self {
        Self { id }
    }
}

impl Component for CacheIdComp {
    const TYPE: ComponentType = ComponentType::CacheId;

    fn calc_size(&self) -> usize {
        COMPONENT_HEADER_SIZE + self.id.size()
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        self.id.encode(w)
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            id: CacheIdElt::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryComp {
    pub query: QueryElt,
}

impl QueryComp {
    pub fn new(query: QueryElt) -> Self {
        Self { query }
    }
}

impl Component for QueryComp {
    const TYPE: ComponentType = ComponentType::Query;

    fn calc_size(&self) -> usize {
        COMPONENT_HEADER_SIZE + std::mem::size_of::<QueryElt>()
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put(&self.query)
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self { query: r.read()? })
    }
}
