//! Source/destination handles carried in packet headers.
//!
//! The `src_id` and `dst_id` header fields are not bare bus ids: they pair the
//! peer's server type with its address so that sentinel destinations (which
//! are not real addresses) still say which kind of server they target.
//!
//! Layout of the 64-bit handle: `server_type << 32 | bus_id`. Bits above 40
//! are ignored on decode.

use std::fmt;

use crate::{BusId, ServerType};

/// A (server type, bus id) pair as carried on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Endpoint {
    /// Type of server addressed
    pub server_type: ServerType,
    /// Address, or a routing sentinel for destinations
    pub bus_id: BusId,
}

impl Endpoint {
    /// Pair a server type with an address.
    #[must_use]
    pub const fn new(server_type: ServerType, bus_id: BusId) -> Self {
        Self { server_type, bus_id }
    }

    /// Endpoint of a concrete server, taking the type from the address.
    #[must_use]
    pub const fn of(bus_id: BusId) -> Self {
        Self { server_type: bus_id.server_type(), bus_id }
    }

    /// Decode a header handle. Total.
    #[must_use]
    pub const fn from_u64(handle: u64) -> Self {
        Self {
            server_type: ServerType::new((handle >> 32) as u8),
            bus_id: BusId::from_raw(handle as u32),
        }
    }

    /// Encode as a header handle.
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        ((self.server_type.get() as u64) << 32) | self.bus_id.raw() as u64
    }

    /// Same server type, different address.
    #[must_use]
    pub const fn with_bus_id(self, bus_id: BusId) -> Self {
        Self { server_type: self.server_type, bus_id }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({}@{})", self.server_type, self.bus_id.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_layout() {
        let ep = Endpoint::new(ServerType::LOGIC, BusId::from_raw(40_000));
        assert_eq!(ep.to_u64(), (7u64 << 32) | 40_000);
        assert_eq!(Endpoint::from_u64(ep.to_u64()), ep);
    }

    #[test]
    fn high_bits_are_ignored() {
        let ep = Endpoint::from_u64(0xFFFF_FF05_0000_0001);
        assert_eq!(ep.server_type, ServerType::GAME);
        assert_eq!(ep.bus_id.raw(), 1);
    }

    #[test]
    fn of_takes_type_from_address() {
        let id = BusId::parse("1.1.7.2").unwrap();
        assert_eq!(Endpoint::of(id).server_type, ServerType::LOGIC);
    }
}
