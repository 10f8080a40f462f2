//! Router side view of a service group.

use std::net::Ipv4Addr;

use super::{GroupData, PacketStamp, Time, PEER_TIMEOUT, TIME_UNIT};
use crate::element::CacheIdElt;

/// A cache that announced itself to this router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterCache {
    pub id: CacheIdElt,
    /// Time of the last HERE_I_AM and the change number it carried.
    pub recv: PacketStamp,
    pub xmit: PacketStamp,
    /// Receive id of the last I_SEE_YOU sent to this cache.
    pub recv_count: u32,
    /// An I_SEE_YOU is owed.
    pub pending: bool,
    /// Local address the cache reached us on.
    pub to_addr: Ipv4Addr,
    /// A removal query went out since the last HERE_I_AM.
    pub query_sent: bool,
}

/// Another router reported by the caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterPeer {
    pub addr: Ipv4Addr,
    /// Last HERE_I_AM listing this router, per cache.
    pub src: Vec<PacketStamp>,
}

#[derive(Debug, Clone)]
pub struct RouterGroup {
    pub data: GroupData,
    pub caches: Vec<RouterCache>,
    pub routers: Vec<RouterPeer>,
}

impl RouterGroup {
    pub fn new(data: GroupData) -> Self {
        Self {
            data,
            caches: Vec::new(),
            routers: Vec::new(),
        }
    }

    pub fn find_cache(&self, addr: Ipv4Addr) -> Option<usize> {
        self.caches.iter().position(|c| c.id.addr() == addr)
    }

    pub fn find_router(&self, addr: Ipv4Addr) -> Option<usize> {
        self.routers.iter().position(|r| r.addr == addr)
    }

    /// Append a cache, growing every router's stamp list to match.
    pub fn add_cache(&mut self, id: CacheIdElt, to_addr: Ipv4Addr) -> usize {
        self.caches.push(RouterCache {
            id,
            recv: PacketStamp::default(),
            xmit: PacketStamp::default(),
            recv_count: 0,
            pending: false,
            to_addr,
            query_sent: false,
        });
        let n = self.caches.len();
        for r in &mut self.routers {
            r.src.resize(n, PacketStamp::default());
        }
        n - 1
    }

    pub fn add_router(&mut self, addr: Ipv4Addr) -> usize {
        self.routers.push(RouterPeer {
            addr,
            src: vec![PacketStamp::default(); self.caches.len()],
        });
        self.routers.len() - 1
    }

    /// Swap-remove a cache and its column in every router's stamp list.
    pub fn remove_cache(&mut self, idx: usize) -> RouterCache {
        for r in &mut self.routers {
            if idx < r.src.len() {
                r.src.swap_remove(idx);
            }
        }
        self.caches.swap_remove(idx)
    }

    pub fn view_changed(&mut self, now: Time) {
        self.data.bump_generation(now);
    }

    /// Caches silent for half the timeout, not yet queried.
    pub fn caches_to_query(&self, now: Time) -> Vec<usize> {
        self.caches
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.query_sent && c.recv.time + 2 * TIME_UNIT < now)
            .map(|(i, _)| i)
            .collect()
    }

    /// Remove caches silent for longer than the peer timeout.
    pub fn cull_caches(&mut self, now: Time) -> Vec<Ipv4Addr> {
        let mut removed = Vec::new();
        let mut idx = 0;
        while idx < self.caches.len() {
            if self.caches[idx].recv.time + PEER_TIMEOUT < now {
                removed.push(self.remove_cache(idx).id.addr());
            } else {
                idx += 1;
            }
        }
        if !removed.is_empty() {
            self.view_changed(now);
        }
        removed
    }

    pub fn any_pending(&self) -> bool {
        self.caches.iter().any(|c| c.pending)
    }
}
