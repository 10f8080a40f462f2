//! Router and cache view components.

use std::net::Ipv4Addr;

use super::Component;
use crate::element::{AssignmentKeyElt, CacheIdElt, RouterIdElt};
use crate::wire::{
    ComponentType, ParseError, Reader, WireError, Writer, COMPONENT_HEADER_SIZE, MAX_CACHES, MAX_ROUTERS,
};

fn check_encode_limit(what: &'static str, count: usize, max: usize) -> Result<(), WireError> {
    if count > max {
        return Err(WireError::TooManyElements { what, count, max });
    }
    Ok(())
}

fn read_limited_count(r: &mut Reader<'_>, max: usize) -> Result<usize, ParseError> {
    let n = r.read_u32()? as usize;
    if n > max {
        return Err(ParseError::MsgInvalid);
    }
    Ok(n)
}

/// What a router believes the group looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterViewComp {
    pub change_number: u32,
    pub key: AssignmentKeyElt,
    pub routers: Vec<Ipv4Addr>,
    pub caches: Vec<CacheIdElt>,
}

impl Component for RouterViewComp {
    const TYPE: ComponentType = ComponentType::RouterView;

    fn calc_size(&self) -> usize {
        COMPONENT_HEADER_SIZE
            + 4
            + std::mem::size_of::<AssignmentKeyElt>()
            + 4
            + self.routers.len() * 4
            + 4
            + self.caches.iter().map(CacheIdElt::size).sum::<usize>()
    }

    fn check_limits(&self) -> Result<(), WireError> {
        check_encode_limit("routers", self.routers.len(), MAX_ROUTERS)?;
        check_encode_limit("caches", self.caches.len(), MAX_CACHES)
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put_u32(self.change_number)?;
        w.put(&self.key)?;
        w.put_count(self.routers.len())?;
        for addr in &self.routers {
            w.put_addr(*addr)?;
        }
        w.put_count(self.caches.len())?;
        for cache in &self.caches {
            cache.encode(w)?;
        }
        Ok(())
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let change_number = r.read_u32()?;
        let key = r.read::<AssignmentKeyElt>()?;
        let n_routers = read_limited_count(r, MAX_ROUTERS)?;
        let routers = r
            .read_array::<[u8; 4]>(n_routers)?
            .into_iter()
            .map(Ipv4Addr::from)
            .collect();
        let n_caches = read_limited_count(r, MAX_CACHES)?;
        let caches = (0..n_caches)
            .map(|_| CacheIdElt::decode(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            change_number,
            key,
            routers,
            caches,
        })
    }
}

/// What a cache believes the group looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheViewComp {
    pub change_number: u32,
    pub routers: Vec<RouterIdElt>,
    pub caches: Vec<Ipv4Addr>,
}

impl CacheViewComp {
    /// The entry for router `addr`, if the cache lists it.
    pub fn find_router(&self, addr: Ipv4Addr) -> Option<&RouterIdElt> {
        self.routers.iter().find(|r| r.addr() == addr)
    }
}

impl Component for CacheViewComp {
    const TYPE: ComponentType = ComponentType::CacheView;

    fn calc_size(&self) -> usize {
        COMPONENT_HEADER_SIZE
            + 4
            + 4
            + self.routers.len() * std::mem::size_of::<RouterIdElt>()
            + 4
            + self.caches.len() * 4
    }

    fn check_limits(&self) -> Result<(), WireError> {
        check_encode_limit("routers", self.routers.len(), MAX_ROUTERS)?;
        check_encode_limit("caches", self.caches.len(), MAX_CACHES)
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put_u32(self.change_number)?;
        w.put_count(self.routers.len())?;
        for router in &self.routers {
            w.put(router)?;
        }
        w.put_count(self.caches.len())?;
        for addr in &self.caches {
            w.put_addr(*addr)?;
        }
        Ok(())
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let change_number = r.read_u32()?;
        let n_routers = read_limited_count(r, MAX_ROUTERS)?;
        let routers = r.read_array::<RouterIdElt>(n_routers)?;
        let n_caches = read_limited_count(r, MAX_CACHES)?;
        let caches = r
            .read_array::<[u8; 4]>(n_caches)?
            .into_iter()
            .map(Ipv4Addr::from)
            .collect();
        Ok(Self {
            change_number,
            routers,
            caches,
        })
    }
}
