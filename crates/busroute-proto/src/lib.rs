//! Wire layer of the busroute fabric.
//!
//! Everything a router needs to look at a packet without touching its body:
//!
//! - [`BusId`]: the packed `world.zone.type.instance` server address
//! - [`Endpoint`]: the 64-bit source/destination handle carried in packets
//! - [`PacketHeader`] / [`Packet`]: fixed 64-byte big-endian header plus an
//!   opaque payload
//! - [`ControlPayload`]: CBOR bodies of the registration messages
//!
//! Application payloads are never decoded here. Routers forward them
//! byte-for-byte.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus_id;
pub mod endpoint;
pub mod errors;
pub mod header;
pub mod packet;
pub mod payloads;
pub mod route_code;
pub mod server_type;

pub use bus_id::{AddressError, BusField, BusId, BusParts};
pub use endpoint::Endpoint;
pub use errors::{ProtocolError, Result};
pub use header::{ControlOpcode, PacketHeader};
pub use packet::Packet;
pub use payloads::{ControlPayload, ServerInfo, ServerInfoList, ServerState};
pub use route_code::RouteCode;
pub use server_type::ServerType;
