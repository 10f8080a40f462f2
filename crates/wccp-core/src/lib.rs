//! wccp-core: WCCPv2 wire format and endpoint state machines.
//! The daemon and the integration tests depend on this crate.

pub mod assignment;
pub mod component;
pub mod config;
pub mod element;
pub mod endpoint;
pub mod group;
pub mod message;
pub mod wire;

pub use config::{load_services, Diagnostics, GroupDef, ServiceLoad, WccpConfig};
pub use endpoint::{CacheEndpoint, Endpoint, EndpointError, IpHeader, Outbox, RouterEndpoint, Transport};
pub use group::{SecurityPolicy, Time};
pub use message::{Message, MsgHeader};
pub use wire::{MessageType, ParseError, WireError};
