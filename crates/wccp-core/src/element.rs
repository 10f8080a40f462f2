//! Protocol elements, the value types components are built from.
//!
//! Fixed-size elements are `#[repr(C)]` zerocopy structs whose fields are
//! already in wire order, guarded by compile-time size checks. Variable-size
//! elements (mask/value sets, hash assignments, cache identities) are owned
//! Rust values with explicit `encode` / `decode` over the bounds-checked
//! cursors in [`crate::wire`].

use std::net::Ipv4Addr;

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::wire::{Be16, Be32, ParseError, Reader, WireError, Writer, MAX_CACHES, N_BUCKETS, UNASSIGNED_BUCKET};

// ── Service Group ─────────────────────────────────────────────────────────────

/// Service type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceType {
    /// Well-known service. Only the id is significant.
    Standard = 0,
    /// Locally defined service described by its protocol, flags and ports.
    Dynamic = 1,
}

impl TryFrom<u8> for ServiceType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServiceType::Standard),
            1 => Ok(ServiceType::Dynamic),
            other => Err(WireError::UnknownServiceType(other)),
        }
    }
}

/// Identity of a redirection service.
///
/// Wire size: 24 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct ServiceGroup {
    svc_type: u8,
    svc_id: u8,
    priority: u8,
    protocol: u8,
    flags: Be32,
    ports: [Be16; ServiceGroup::N_PORTS],
}

assert_eq_size!(ServiceGroup, [u8; 24]);

impl ServiceGroup {
    /// Number of port slots.
    pub const N_PORTS: usize = 8;
    /// Service ids at or below this are well-known (STANDARD) by default.
    pub const RESERVED: u8 = 50;

    pub const SRC_IP_HASH: u32 = 1 << 0;
    pub const DST_IP_HASH: u32 = 1 << 1;
    pub const SRC_PORT_HASH: u32 = 1 << 2;
    pub const DST_PORT_HASH: u32 = 1 << 3;
    /// The port list is meaningful.
    pub const PORTS_DEFINED: u32 = 1 << 4;
    /// Ports are source ports rather than destination ports.
    pub const PORTS_SOURCE: u32 = 1 << 5;
    pub const SRC_IP_ALT_HASH: u32 = 1 << 8;
    pub const DST_IP_ALT_HASH: u32 = 1 << 9;
    pub const SRC_PORT_ALT_HASH: u32 = 1 << 10;
    pub const DST_PORT_ALT_HASH: u32 = 1 << 11;

    pub fn standard(id: u8) -> Self {
        Self::new_zeroed().with_svc_id(id).with_svc_type(ServiceType::Standard)
    }

    pub fn dynamic(id: u8, protocol: u8) -> Self {
        Self::new_zeroed()
            .with_svc_id(id)
            .with_svc_type(ServiceType::Dynamic)
            .with_protocol(protocol)
    }

    /// Raw type byte. Decoded values are validated, so this is 0 or 1 for
    /// anything that came off the wire through a component parse.
    pub fn svc_type(&self) -> ServiceType {
        if self.svc_type == ServiceType::Dynamic as u8 {
            ServiceType::Dynamic
        } else {
            ServiceType::Standard
        }
    }

    pub(crate) fn raw_svc_type(&self) -> u8 {
        self.svc_type
    }

    /// Setting STANDARD zeroes every field after the id.
    pub fn with_svc_type(mut self, t: ServiceType) -> Self {
        if t == ServiceType::Standard {
            self.priority = 0;
            self.protocol = 0;
            self.flags = Be32::ZERO;
            self.ports = [Be16::ZERO; Self::N_PORTS];
        }
        self.svc_type = t as u8;
        self
    }

    pub fn svc_id(&self) -> u8 {
        self.svc_id
    }

    pub fn with_svc_id(mut self, id: u8) -> Self {
        self.svc_id = id;
        self
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn with_priority(mut self, p: u8) -> Self {
        self.priority = p;
        self
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn with_protocol(mut self, p: u8) -> Self {
        self.protocol = p;
        self
    }

    pub fn flags(&self) -> u32 {
        self.flags.get()
    }

    pub fn with_flags(mut self, f: u32) -> Self {
        self.flags.set(f);
        self
    }

    pub fn enable_flags(self, f: u32) -> Self {
        let current = self.flags();
        self.with_flags(current | f)
    }

    pub fn disable_flags(self, f: u32) -> Self {
        let current = self.flags();
        self.with_flags(current & !f)
    }

    pub fn port(&self, idx: usize) -> u16 {
        self.ports.get(idx).map(|p| p.get()).unwrap_or(0)
    }

    /// Set the port in slot `idx`. Slots past the last are ignored.
    pub fn with_port(mut self, idx: usize, port: u16) -> Self {
        if let Some(slot) = self.ports.get_mut(idx) {
            slot.set(port);
        }
        self
    }

    pub fn ports(&self) -> [u16; Self::N_PORTS] {
        let mut out = [0u16; Self::N_PORTS];
        for (o, p) in out.iter_mut().zip(self.ports.iter()) {
            *o = p.get();
        }
        out
    }

    pub fn clear_ports(mut self) -> Self {
        self.ports = [Be16::ZERO; Self::N_PORTS];
        self
    }
}

impl PartialEq for ServiceGroup {
    /// STANDARD groups match on id alone. DYNAMIC groups match on id,
    /// protocol, flags, priority and every port slot.
    fn eq(&self, that: &Self) -> bool {
        match (self.svc_type(), that.svc_type()) {
            (ServiceType::Standard, ServiceType::Standard) => self.svc_id == that.svc_id,
            (ServiceType::Dynamic, ServiceType::Dynamic) => {
                self.svc_id == that.svc_id
                    && self.protocol == that.protocol
                    && self.flags() == that.flags()
                    && self.priority == that.priority
                    && self.ports() == that.ports()
            }
            _ => false,
        }
    }
}

impl Eq for ServiceGroup {}

// ── Router Identity ───────────────────────────────────────────────────────────

/// Router address and receive id.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RouterIdElt {
    addr: [u8; 4],
    recv_id: Be32,
}

assert_eq_size!(RouterIdElt, [u8; 8]);

impl RouterIdElt {
    pub fn new(addr: Ipv4Addr, recv_id: u32) -> Self {
        Self {
            addr: addr.octets(),
            recv_id: Be32::new(recv_id),
        }
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.addr)
    }

    pub fn recv_id(&self) -> u32 {
        self.recv_id.get()
    }
}

// ── Assignment Key ────────────────────────────────────────────────────────────

/// Identifies one generation of an assignment: the designated cache's
/// address and the change number it was built from.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct AssignmentKeyElt {
    addr: [u8; 4],
    change_number: Be32,
}

assert_eq_size!(AssignmentKeyElt, [u8; 8]);

impl AssignmentKeyElt {
    pub fn new(addr: Ipv4Addr, change_number: u32) -> Self {
        Self {
            addr: addr.octets(),
            change_number: Be32::new(change_number),
        }
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.addr)
    }

    pub fn change_number(&self) -> u32 {
        self.change_number.get()
    }
}

impl Default for AssignmentKeyElt {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

/// One router's entry in an assignment.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RouterAssignElt {
    addr: [u8; 4],
    recv_id: Be32,
    change_number: Be32,
}

assert_eq_size!(RouterAssignElt, [u8; 12]);

impl RouterAssignElt {
    pub fn new(addr: Ipv4Addr, recv_id: u32, change_number: u32) -> Self {
        Self {
            addr: addr.octets(),
            recv_id: Be32::new(recv_id),
            change_number: Be32::new(change_number),
        }
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.addr)
    }

    pub fn recv_id(&self) -> u32 {
        self.recv_id.get()
    }

    pub fn change_number(&self) -> u32 {
        self.change_number.get()
    }

    pub fn set_recv_id(&mut self, id: u32) -> &mut Self {
        self.recv_id.set(id);
        self
    }

    pub fn set_change_number(&mut self, n: u32) -> &mut Self {
        self.change_number.set(n);
        self
    }
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// Capability element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CapabilityType {
    PacketForward = 1,
    CacheAssignment = 2,
    PacketReturn = 3,
}

/// How redirected packets travel between router and cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketStyle {
    Gre = 1,
    L2 = 2,
    GreOrL2 = 3,
}

impl PacketStyle {
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// True if this preference permits `style`.
    pub fn allows(self, style: PacketStyle) -> bool {
        self.bits() & style.bits() == style.bits()
    }
}

impl TryFrom<u32> for PacketStyle {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketStyle::Gre),
            2 => Ok(PacketStyle::L2),
            3 => Ok(PacketStyle::GreOrL2),
            other => Err(WireError::UnknownPacketStyle(other)),
        }
    }
}

/// How traffic is partitioned across caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AssignmentStyle {
    HashOnly = 1,
    MaskOnly = 2,
    HashOrMask = 3,
}

impl AssignmentStyle {
    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn allows(self, style: AssignmentStyle) -> bool {
        self.bits() & style.bits() == style.bits()
    }
}

impl TryFrom<u32> for AssignmentStyle {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AssignmentStyle::HashOnly),
            2 => Ok(AssignmentStyle::MaskOnly),
            3 => Ok(AssignmentStyle::HashOrMask),
            other => Err(WireError::UnknownAssignmentStyle(other)),
        }
    }
}

/// Single capability entry: type, length (always 4), value.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct CapabilityElt {
    cap_type: Be16,
    length: Be16,
    data: Be32,
}

assert_eq_size!(CapabilityElt, [u8; 8]);

impl CapabilityElt {
    pub fn new(cap_type: CapabilityType, data: u32) -> Self {
        Self {
            cap_type: Be16::new(cap_type as u16),
            length: Be16::new(4),
            data: Be32::new(data),
        }
    }

    pub fn cap_type(&self) -> u16 {
        self.cap_type.get()
    }

    pub fn data(&self) -> u32 {
        self.data.get()
    }
}

// ── Mask / Value ──────────────────────────────────────────────────────────────

/// Mask applied to packet fields before value matching.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct MaskElt {
    src_addr: Be32,
    dst_addr: Be32,
    src_port: Be16,
    dst_port: Be16,
}

assert_eq_size!(MaskElt, [u8; 12]);

impl MaskElt {
    pub fn new(src_addr: u32, dst_addr: u32, src_port: u16, dst_port: u16) -> Self {
        Self {
            src_addr: Be32::new(src_addr),
            dst_addr: Be32::new(dst_addr),
            src_port: Be16::new(src_port),
            dst_port: Be16::new(dst_port),
        }
    }

    pub fn src_addr(&self) -> u32 {
        self.src_addr.get()
    }

    pub fn dst_addr(&self) -> u32 {
        self.dst_addr.get()
    }

    pub fn src_port(&self) -> u16 {
        self.src_port.get()
    }

    pub fn dst_port(&self) -> u16 {
        self.dst_port.get()
    }
}

/// Masked field values and the cache that takes matching traffic.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct ValueElt {
    src_addr: Be32,
    dst_addr: Be32,
    src_port: Be16,
    dst_port: Be16,
    cache_addr: [u8; 4],
}

assert_eq_size!(ValueElt, [u8; 16]);

impl ValueElt {
    pub fn new(cache_addr: Ipv4Addr, src_addr: u32, dst_addr: u32, src_port: u16, dst_port: u16) -> Self {
        Self {
            src_addr: Be32::new(src_addr),
            dst_addr: Be32::new(dst_addr),
            src_port: Be16::new(src_port),
            dst_port: Be16::new(dst_port),
            cache_addr: cache_addr.octets(),
        }
    }

    pub fn cache_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.cache_addr)
    }

    pub fn src_addr(&self) -> u32 {
        self.src_addr.get()
    }

    pub fn dst_addr(&self) -> u32 {
        self.dst_addr.get()
    }

    pub fn src_port(&self) -> u16 {
        self.src_port.get()
    }

    pub fn dst_port(&self) -> u16 {
        self.dst_port.get()
    }
}

/// A mask and the values matched under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskValueSetElt {
    pub mask: MaskElt,
    pub values: Vec<ValueElt>,
}

impl MaskValueSetElt {
    pub fn new(mask: MaskElt) -> Self {
        Self {
            mask,
            values: Vec::new(),
        }
    }

    /// Size on the wire of a set holding `n_values` values.
    pub fn calc_size(n_values: usize) -> usize {
        std::mem::size_of::<MaskElt>() + 4 + n_values * std::mem::size_of::<ValueElt>()
    }

    pub fn size(&self) -> usize {
        Self::calc_size(self.values.len())
    }

    pub fn add_value(&mut self, cache_addr: Ipv4Addr, src_addr: u32, dst_addr: u32, src_port: u16, dst_port: u16) -> &mut Self {
        self.values
            .push(ValueElt::new(cache_addr, src_addr, dst_addr, src_port, dst_port));
        self
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put(&self.mask)?;
        w.put_count(self.values.len())?;
        for v in &self.values {
            w.put(v)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let mask = r.read::<MaskElt>()?;
        let n = r.read_u32()? as usize;
        let values = r.read_array::<ValueElt>(n)?;
        Ok(Self { mask, values })
    }
}

/// A list of mask/value sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskAssignElt {
    pub sets: Vec<MaskValueSetElt>,
}

impl MaskAssignElt {
    /// The minimal partition: one set with all-zero masks whose single value
    /// sends everything to `cache_addr`.
    pub fn single(cache_addr: Ipv4Addr) -> Self {
        let mut set = MaskValueSetElt::new(MaskElt::new(0, 0, 0, 0));
        set.add_value(cache_addr, 0, 0, 0, 0);
        Self { sets: vec![set] }
    }

    pub fn size(&self) -> usize {
        4 + self.sets.iter().map(MaskValueSetElt::size).sum::<usize>()
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put_count(self.sets.len())?;
        for set in &self.sets {
            set.encode(w)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let n = r.read_u32()? as usize;
        // Every set needs at least its mask and count.
        if n.saturating_mul(MaskValueSetElt::calc_size(0)) > r.remaining() {
            return Err(ParseError::BufferTooSmall);
        }
        let sets = (0..n)
            .map(|_| MaskValueSetElt::decode(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sets })
    }
}

// ── Hash Assignment ───────────────────────────────────────────────────────────

/// One hash bucket: cache index in the low seven bits, alternate-hash flag in
/// the high bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(transparent)]
pub struct Bucket(u8);

assert_eq_size!(Bucket, u8);

impl Bucket {
    pub const UNASSIGNED: Bucket = Bucket(UNASSIGNED_BUCKET);

    pub fn new(idx: u8, alt: bool) -> Self {
        Bucket((idx & 0x7F) | if alt { 0x80 } else { 0 })
    }

    pub fn idx(self) -> u8 {
        self.0 & 0x7F
    }

    pub fn alt(self) -> bool {
        self.0 & 0x80 != 0
    }

    pub fn is_unassigned(self) -> bool {
        self.0 == UNASSIGNED_BUCKET
    }

    pub fn raw(self) -> u8 {
        self.0
    }
}

/// Cache list plus the 256-entry bucket table indexing into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashAssignElt {
    pub caches: Vec<Ipv4Addr>,
    pub buckets: [Bucket; N_BUCKETS],
}

impl Default for HashAssignElt {
    fn default() -> Self {
        Self {
            caches: Vec::new(),
            buckets: [Bucket::UNASSIGNED; N_BUCKETS],
        }
    }
}

impl HashAssignElt {
    pub fn new(caches: Vec<Ipv4Addr>) -> Self {
        Self {
            caches,
            ..Self::default()
        }
    }

    pub fn calc_size(n_caches: usize) -> usize {
        4 + n_caches * 4 + N_BUCKETS
    }

    pub fn size(&self) -> usize {
        Self::calc_size(self.caches.len())
    }

    /// Spread buckets across the caches: bucket `i` goes to cache
    /// `i % n`, alternate flag clear. A lone cache gets every bucket.
    ///
    /// Caches past `MAX_CACHES` are dropped first; a bucket index has only
    /// seven bits.
    pub fn round_robin_assign(&mut self) -> &mut Self {
        if self.caches.len() > MAX_CACHES {
            tracing::warn!(caches = self.caches.len(), max = MAX_CACHES, "too many caches, truncating assignment");
            self.caches.truncate(MAX_CACHES);
        }
        let n = self.caches.len();
        if n == 1 {
            self.buckets = [Bucket::new(0, false); N_BUCKETS];
        } else if n > 1 {
            for (i, b) in self.buckets.iter_mut().enumerate() {
                *b = Bucket::new((i % n) as u8, false);
            }
        }
        self
    }

    /// Address of the cache serving bucket `idx`, if assigned.
    pub fn cache_for_bucket(&self, idx: usize) -> Option<Ipv4Addr> {
        let b = self.buckets.get(idx)?;
        if b.is_unassigned() {
            return None;
        }
        self.caches.get(b.idx() as usize).copied()
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put_count(self.caches.len())?;
        for addr in &self.caches {
            w.put_addr(*addr)?;
        }
        w.put(&self.buckets[..])
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let n = r.read_u32()? as usize;
        let caches = r
            .read_array::<[u8; 4]>(n)?
            .into_iter()
            .map(Ipv4Addr::from)
            .collect();
        let buckets = r.read::<[Bucket; N_BUCKETS]>()?;
        Ok(Self { caches, buckets })
    }
}

// ── Cache Identity ────────────────────────────────────────────────────────────

/// Leading eight bytes shared by both cache identity shapes.
///
/// `bits[0] & 0x80` is the unassigned flag. `bits[1] & 0x02` selects the
/// mask shape.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct CacheIdPrefix {
    addr: [u8; 4],
    hash_rev: Be16,
    bits: [u8; 2],
}

assert_eq_size!(CacheIdPrefix, [u8; 8]);

const UNASSIGNED_BIT: u8 = 0x80;
const IS_MASK_BIT: u8 = 0x02;

/// Hash revision always advertised.
pub const HASH_REVISION: u16 = 0;

/// Trailing weight and status pair.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct CacheIdTail {
    weight: Be16,
    status: Be16,
}

/// Cache identity advertising hash bucket occupancy.
///
/// Wire size: 44 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHashIdElt {
    pub addr: Ipv4Addr,
    pub unassigned: bool,
    pub buckets: [u8; N_BUCKETS / 8],
    pub weight: u16,
    pub status: u16,
}

impl CacheHashIdElt {
    pub const SIZE: usize = 8 + N_BUCKETS / 8 + 4;

    pub fn set_bucket(&mut self, idx: usize, state: bool) -> &mut Self {
        let mask = 1u8 << (idx & 7);
        if let Some(byte) = self.buckets.get_mut(idx >> 3) {
            if state {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
        self
    }

    pub fn set_buckets(&mut self, state: bool) -> &mut Self {
        self.buckets = [if state { 0xFF } else { 0 }; N_BUCKETS / 8];
        self
    }

    pub fn bucket(&self, idx: usize) -> bool {
        self.buckets
            .get(idx >> 3)
            .map(|b| b & (1 << (idx & 7)) != 0)
            .unwrap_or(false)
    }
}

/// Cache identity carrying a mask/value assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMaskIdElt {
    pub addr: Ipv4Addr,
    pub unassigned: bool,
    pub assign: MaskAssignElt,
    pub weight: u16,
    pub status: u16,
}

/// A cache identity, in either of its two wire shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheIdElt {
    Hash(CacheHashIdElt),
    Mask(CacheMaskIdElt),
}

impl CacheIdElt {
    /// Hash identity with no buckets, marked unassigned.
    pub fn default_hash(addr: Ipv4Addr) -> Self {
        CacheIdElt::Hash(CacheHashIdElt {
            addr,
            unassigned: true,
            buckets: [0; N_BUCKETS / 8],
            weight: 0,
            status: 0,
        })
    }

    /// Mask identity with the single catch-all value for this cache,
    /// marked unassigned.
    pub fn default_mask(addr: Ipv4Addr) -> Self {
        CacheIdElt::Mask(CacheMaskIdElt {
            addr,
            unassigned: true,
            assign: MaskAssignElt::single(addr),
            weight: 0,
            status: 0,
        })
    }

    pub fn addr(&self) -> Ipv4Addr {
        match self {
            CacheIdElt::Hash(h) => h.addr,
            CacheIdElt::Mask(m) => m.addr,
        }
    }

    pub fn set_addr(&mut self, addr: Ipv4Addr) -> &mut Self {
        match self {
            CacheIdElt::Hash(h) => h.addr = addr,
            CacheIdElt::Mask(m) => m.addr = addr,
        }
        self
    }

    pub fn is_mask(&self) -> bool {
        matches!(self, CacheIdElt::Mask(_))
    }

    pub fn is_unassigned(&self) -> bool {
        match self {
            CacheIdElt::Hash(h) => h.unassigned,
            CacheIdElt::Mask(m) => m.unassigned,
        }
    }

    pub fn set_unassigned(&mut self, state: bool) -> &mut Self {
        match self {
            CacheIdElt::Hash(h) => h.unassigned = state,
            CacheIdElt::Mask(m) => m.unassigned = state,
        }
        self
    }

    pub fn weight(&self) -> u16 {
        match self {
            CacheIdElt::Hash(h) => h.weight,
            CacheIdElt::Mask(m) => m.weight,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            CacheIdElt::Hash(h) => h.status,
            CacheIdElt::Mask(m) => m.status,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            CacheIdElt::Hash(_) => CacheHashIdElt::SIZE,
            CacheIdElt::Mask(m) => 8 + m.assign.size() + 4,
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        let (addr, unassigned, mask_bit) = match self {
            CacheIdElt::Hash(h) => (h.addr, h.unassigned, 0),
            CacheIdElt::Mask(m) => (m.addr, m.unassigned, IS_MASK_BIT),
        };
        w.put(&CacheIdPrefix {
            addr: addr.octets(),
            hash_rev: Be16::new(HASH_REVISION),
            bits: [if unassigned { UNASSIGNED_BIT } else { 0 }, mask_bit],
        })?;
        match self {
            CacheIdElt::Hash(h) => {
                w.put(&h.buckets)?;
                w.put(&CacheIdTail {
                    weight: Be16::new(h.weight),
                    status: Be16::new(h.status),
                })
            }
            CacheIdElt::Mask(m) => {
                m.assign.encode(w)?;
                w.put(&CacheIdTail {
                    weight: Be16::new(m.weight),
                    status: Be16::new(m.status),
                })
            }
        }
    }

    /// Read the shared prefix, then branch on the mask bit for the rest.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let prefix = r.read::<CacheIdPrefix>()?;
        let addr = Ipv4Addr::from(prefix.addr);
        let unassigned = prefix.bits[0] & UNASSIGNED_BIT != 0;
        if prefix.bits[1] & IS_MASK_BIT != 0 {
            let assign = MaskAssignElt::decode(r)?;
            let tail = r.read::<CacheIdTail>()?;
            Ok(CacheIdElt::Mask(CacheMaskIdElt {
                addr,
                unassigned,
                assign,
                weight: tail.weight.get(),
                status: tail.status.get(),
            }))
        } else {
            let buckets = r.read::<[u8; N_BUCKETS / 8]>()?;
            let tail = r.read::<CacheIdTail>()?;
            Ok(CacheIdElt::Hash(CacheHashIdElt {
                addr,
                unassigned,
                buckets,
                weight: tail.weight.get(),
                status: tail.status.get(),
            }))
        }
    }
}

// ── Query ─────────────────────────────────────────────────────────────────────

/// Body of a removal query.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct QueryElt {
    router_addr: [u8; 4],
    recv_id: Be32,
    to_addr: [u8; 4],
    cache_addr: [u8; 4],
}

assert_eq_size!(QueryElt, [u8; 16]);

impl QueryElt {
    pub fn new(router_addr: Ipv4Addr, recv_id: u32, to_addr: Ipv4Addr, cache_addr: Ipv4Addr) -> Self {
        Self {
            router_addr: router_addr.octets(),
            recv_id: Be32::new(recv_id),
            to_addr: to_addr.octets(),
            cache_addr: cache_addr.octets(),
        }
    }

    pub fn router_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.router_addr)
    }

    pub fn recv_id(&self) -> u32 {
        self.recv_id.get()
    }

    pub fn to_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.to_addr)
    }

    pub fn cache_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.cache_addr)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MsgBuffer;

    fn encode_with<F>(size: usize, f: F) -> Vec<u8>
    where
        F: FnOnce(&mut Writer<'_>) -> Result<(), WireError>,
    {
        let mut buf = MsgBuffer::new(size);
        buf.fill_with(size, f).unwrap();
        buf.into_used()
    }

    #[test]
    fn standard_type_zeroes_trailing_fields() {
        let svc = ServiceGroup::dynamic(90, 6)
            .with_priority(7)
            .with_flags(ServiceGroup::SRC_IP_HASH)
            .with_port(0, 80)
            .with_svc_type(ServiceType::Standard);
        assert_eq!(svc.svc_id(), 90);
        assert_eq!(svc.priority(), 0);
        assert_eq!(svc.protocol(), 0);
        assert_eq!(svc.flags(), 0);
        assert_eq!(svc.ports(), [0; 8]);
    }

    #[test]
    fn standard_groups_compare_on_id_only() {
        let a = ServiceGroup::standard(0);
        let mut b = ServiceGroup::standard(0);
        b.priority = 9;
        assert_eq!(a, b);
        assert_ne!(a, ServiceGroup::standard(1));
        assert_ne!(a, ServiceGroup::dynamic(0, 6), "type mismatch is never equal");
    }

    #[test]
    fn dynamic_groups_compare_all_fields() {
        let base = ServiceGroup::dynamic(80, 6)
            .with_flags(ServiceGroup::DST_IP_HASH)
            .with_port(0, 80);
        assert_eq!(base, base);
        assert_ne!(base, base.with_port(1, 8080));
        assert_ne!(base, base.with_priority(1));
        assert_ne!(base, base.with_protocol(17));
        assert_ne!(base, base.enable_flags(ServiceGroup::PORTS_SOURCE));
    }

    #[test]
    fn service_group_wire_layout() {
        let svc = ServiceGroup::dynamic(80, 6)
            .with_priority(2)
            .with_flags(0x0102_0304)
            .with_port(0, 0x1F90);
        let bytes = svc.as_bytes();
        assert_eq!(&bytes[..8], &[1, 80, 2, 6, 1, 2, 3, 4]);
        assert_eq!(&bytes[8..10], &[0x1F, 0x90]);
    }

    #[test]
    fn bucket_packs_index_and_alt() {
        let b = Bucket::new(5, true);
        assert_eq!(b.raw(), 0x85);
        assert_eq!(b.idx(), 5);
        assert!(b.alt());
        assert!(Bucket::UNASSIGNED.is_unassigned());
        assert!(!Bucket::new(0x7F, false).is_unassigned());
    }

    #[test]
    fn round_robin_single_cache_takes_everything() {
        let mut ha = HashAssignElt::new(vec![Ipv4Addr::new(10, 0, 0, 2)]);
        ha.round_robin_assign();
        assert!(ha.buckets.iter().all(|b| b.raw() == 0));
    }

    #[test]
    fn round_robin_cycles_through_caches() {
        let caches: Vec<_> = (1..=3).map(|i| Ipv4Addr::new(10, 0, 0, i)).collect();
        let mut ha = HashAssignElt::new(caches.clone());
        ha.round_robin_assign();
        for i in 0..N_BUCKETS {
            assert_eq!(ha.buckets[i].idx() as usize, i % 3, "bucket {i}");
            assert!(!ha.buckets[i].alt());
            assert_eq!(ha.cache_for_bucket(i), Some(caches[i % 3]));
        }
    }

    #[test]
    fn round_robin_caps_cache_list() {
        let caches: Vec<_> = (0..200u8).map(|i| Ipv4Addr::new(10, 1, 0, i)).collect();
        let mut ha = HashAssignElt::new(caches.clone());
        ha.round_robin_assign();
        assert_eq!(ha.caches.len(), MAX_CACHES);
        for i in 0..N_BUCKETS {
            assert_eq!(ha.cache_for_bucket(i), Some(caches[i % MAX_CACHES]), "bucket {i}");
        }
    }

    #[test]
    fn hash_assign_decode_rejects_short_input() {
        let ha = HashAssignElt::new(vec![Ipv4Addr::new(1, 2, 3, 4)]);
        let bytes = encode_with(ha.size(), |w| ha.encode(w));
        for cut in 0..bytes.len() {
            let mut r = Reader::new(&bytes[..cut]);
            assert_eq!(
                HashAssignElt::decode(&mut r),
                Err(ParseError::BufferTooSmall),
                "truncated at {cut}"
            );
        }
    }

    #[test]
    fn cache_hash_id_flags_and_size() {
        let mut id = CacheIdElt::default_hash(Ipv4Addr::new(10, 1, 1, 1));
        if let CacheIdElt::Hash(h) = &mut id {
            h.set_bucket(9, true);
            assert!(h.bucket(9));
            h.set_bucket(9, false);
            assert!(!h.bucket(9), "clearing one bucket must only clear that bit");
            h.set_bucket(3, true);
        }
        let bytes = encode_with(id.size(), |w| id.encode(w));
        assert_eq!(bytes.len(), CacheHashIdElt::SIZE);
        assert_eq!(bytes[6], UNASSIGNED_BIT);
        assert_eq!(bytes[7], 0);
        assert_eq!(bytes[8], 0x08, "bucket 3 lives in bit 3 of the first byte");

        let decoded = CacheIdElt::decode(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn cache_mask_id_branches_on_mask_bit() {
        let addr = Ipv4Addr::new(10, 1, 1, 2);
        let mut id = CacheIdElt::default_mask(addr);
        id.set_unassigned(false);
        let bytes = encode_with(id.size(), |w| id.encode(w));
        assert_eq!(bytes[6], 0);
        assert_eq!(bytes[7], IS_MASK_BIT);
        assert_eq!(bytes.len(), 8 + 4 + MaskValueSetElt::calc_size(1) + 4);

        match CacheIdElt::decode(&mut Reader::new(&bytes)).unwrap() {
            CacheIdElt::Mask(m) => {
                assert_eq!(m.addr, addr);
                assert!(!m.unassigned);
                assert_eq!(m.assign.sets.len(), 1);
                assert_eq!(m.assign.sets[0].values[0].cache_addr(), addr);
            }
            other => panic!("expected mask identity, got {other:?}"),
        }
    }

    #[test]
    fn mask_assign_rejects_absurd_set_count() {
        let mut bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        bytes.extend_from_slice(&[0u8; 16]);
        assert_eq!(
            MaskAssignElt::decode(&mut Reader::new(&bytes)),
            Err(ParseError::BufferTooSmall)
        );
    }

    #[test]
    fn capability_elt_layout() {
        let c = CapabilityElt::new(CapabilityType::PacketReturn, PacketStyle::L2 as u32);
        assert_eq!(c.as_bytes(), &[0, 3, 0, 4, 0, 0, 0, 2]);
    }

    #[test]
    fn style_allows() {
        assert!(PacketStyle::GreOrL2.allows(PacketStyle::Gre));
        assert!(PacketStyle::GreOrL2.allows(PacketStyle::L2));
        assert!(!PacketStyle::Gre.allows(PacketStyle::L2));
        assert!(AssignmentStyle::HashOrMask.allows(AssignmentStyle::MaskOnly));
        assert!(!AssignmentStyle::HashOnly.allows(AssignmentStyle::MaskOnly));
        assert!(PacketStyle::try_from(0).is_err());
        assert!(AssignmentStyle::try_from(4).is_err());
    }
}
