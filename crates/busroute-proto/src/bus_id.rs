//! Hierarchical server addresses.
//!
//! A bus id packs four fields into a `u32`, most significant first:
//!
//! ```text
//!  31    28 27           16 15        8 7         0
//! +--------+---------------+-----------+-----------+
//! | world  |     zone      |   type    | instance  |
//! | 4 bits |    12 bits    |  8 bits   |  8 bits   |
//! +--------+---------------+-----------+-----------+
//! ```
//!
//! The textual form is `"w.z.t.i"`. In memory a [`BusId`] is a host-order
//! integer; on the wire it is always written big-endian.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ServerType;

/// Field of a bus id, used to report range violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusField {
    /// World (bits 28-31)
    World,
    /// Zone (bits 16-27)
    Zone,
    /// Server type (bits 8-15)
    ServerType,
    /// Instance (bits 0-7)
    Instance,
}

impl BusField {
    /// Width of this field in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::World => BusId::WORLD_BITS,
            Self::Zone => BusId::ZONE_BITS,
            Self::ServerType => BusId::TYPE_BITS,
            Self::Instance => BusId::INSTANCE_BITS,
        }
    }

    /// Largest value the field can hold.
    #[must_use]
    pub const fn max(self) -> u32 {
        (1 << self.bits()) - 1
    }

    const fn shift(self) -> u32 {
        match self {
            Self::World => BusId::ZONE_BITS + BusId::TYPE_BITS + BusId::INSTANCE_BITS,
            Self::Zone => BusId::TYPE_BITS + BusId::INSTANCE_BITS,
            Self::ServerType => BusId::INSTANCE_BITS,
            Self::Instance => 0,
        }
    }
}

impl fmt::Display for BusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::World => "world",
            Self::Zone => "zone",
            Self::ServerType => "server type",
            Self::Instance => "instance",
        };
        f.write_str(name)
    }
}

/// Errors from building or parsing bus ids.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// A field value does not fit its bit width.
    #[error("{field} {value} exceeds {}-bit width (max {})", .field.bits(), .field.max())]
    Range {
        /// Field that overflowed
        field: BusField,
        /// Rejected value
        value: u64,
    },

    /// Dotted address string is malformed.
    #[error("malformed bus address {input:?}: {reason}")]
    Format {
        /// Original input
        input: String,
        /// What was wrong with it
        reason: &'static str,
    },
}

/// The four decoded fields of a bus id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BusParts {
    /// World (0-15)
    pub world: u8,
    /// Zone (0-4095)
    pub zone: u16,
    /// Server type
    pub server_type: u8,
    /// Instance
    pub instance: u8,
}

/// Packed 32-bit server address.
///
/// Any `u32` is a valid `BusId` value: decoding is total and routing
/// sentinels (small integers) travel in the same field as real addresses.
/// Only [`BusId::encode`] and [`BusId::parse`] validate field ranges.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(u32);

impl BusId {
    /// Width of the world field.
    pub const WORLD_BITS: u32 = 4;
    /// Width of the zone field.
    pub const ZONE_BITS: u32 = 12;
    /// Width of the server-type field.
    pub const TYPE_BITS: u32 = 8;
    /// Width of the instance field.
    pub const INSTANCE_BITS: u32 = 8;

    /// Address 0. Never assigned to a server.
    pub const UNSET: Self = Self(0);

    /// Pack four fields into a bus id.
    ///
    /// # Errors
    ///
    /// `AddressError::Range` if any field exceeds its bit width.
    pub fn encode(world: u32, zone: u32, server_type: u32, instance: u32) -> Result<Self, AddressError> {
        let fields = [
            (BusField::World, world),
            (BusField::Zone, zone),
            (BusField::ServerType, server_type),
            (BusField::Instance, instance),
        ];

        let mut raw = 0u32;
        for (field, value) in fields {
            if value > field.max() {
                return Err(AddressError::Range { field, value: u64::from(value) });
            }
            raw |= value << field.shift();
        }

        Ok(Self(raw))
    }

    /// Build a bus id from parts that are already in range.
    #[must_use]
    pub const fn from_parts(parts: BusParts) -> Self {
        Self(
            ((parts.world as u32 & BusField::World.max()) << BusField::World.shift())
                | ((parts.zone as u32 & BusField::Zone.max()) << BusField::Zone.shift())
                | ((parts.server_type as u32) << BusField::ServerType.shift())
                | parts.instance as u32,
        )
    }

    /// Wrap a raw host-order value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw host-order value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Unpack all four fields.
    #[must_use]
    pub const fn decode(self) -> BusParts {
        BusParts {
            world: self.world(),
            zone: self.zone(),
            server_type: self.server_type_raw(),
            instance: self.instance(),
        }
    }

    /// World field.
    #[must_use]
    pub const fn world(self) -> u8 {
        ((self.0 >> BusField::World.shift()) & BusField::World.max()) as u8
    }

    /// Zone field.
    #[must_use]
    pub const fn zone(self) -> u16 {
        ((self.0 >> BusField::Zone.shift()) & BusField::Zone.max()) as u16
    }

    /// Server-type field as a raw byte.
    #[must_use]
    pub const fn server_type_raw(self) -> u8 {
        ((self.0 >> BusField::ServerType.shift()) & BusField::ServerType.max()) as u8
    }

    /// Server-type field.
    #[must_use]
    pub const fn server_type(self) -> ServerType {
        ServerType::new(self.server_type_raw())
    }

    /// Instance field.
    #[must_use]
    pub const fn instance(self) -> u8 {
        (self.0 & BusField::Instance.max()) as u8
    }

    /// Parse `"w.z.t.i"`.
    ///
    /// Missing trailing components default to 0, so `"1.2"` is `1.2.0.0`.
    ///
    /// # Errors
    ///
    /// - `AddressError::Format` for empty, non-numeric or extra components
    /// - `AddressError::Range` for components exceeding their bit width
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let format_err = |reason| AddressError::Format { input: input.to_owned(), reason };

        let mut values = [0u32; 4];
        let mut count = 0;
        for token in input.trim().split('.') {
            if count == values.len() {
                return Err(format_err("more than four components"));
            }
            let token = token.trim();
            if token.is_empty() {
                return Err(format_err("empty component"));
            }
            if !token.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format_err("non-numeric component"));
            }
            values[count] = token.parse::<u32>().map_err(|_| format_err("component overflows u32"))?;
            count += 1;
        }

        let [world, zone, server_type, instance] = values;
        Self::encode(world, zone, server_type, instance)
    }

    /// Network byte order.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Read from network byte order.
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    /// Same world and zone with a different type and instance.
    ///
    /// # Errors
    ///
    /// `AddressError::Range` if `instance` exceeds its bit width.
    pub fn sibling(self, server_type: ServerType, instance: u32) -> Result<Self, AddressError> {
        Self::encode(
            u32::from(self.world()),
            u32::from(self.zone()),
            u32::from(server_type.get()),
            instance,
        )
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.decode();
        write!(f, "{}.{}.{}.{}", p.world, p.zone, p.server_type, p.instance)
    }
}

impl fmt::Debug for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BusId({self})")
    }
}

impl FromStr for BusId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<BusParts> for BusId {
    fn from(parts: BusParts) -> Self {
        Self::from_parts(parts)
    }
}
