//! Destination classification.
//!
//! The low end of the 32-bit destination space is not used for real
//! addresses (world 0, zone 0). Part of it is repurposed as routing
//! selectors: "any LOGIC server", "LOGIC instance 3 in my zone", "every GAME
//! server in zone 12", and so on. A [`SentinelBand`] holds the thresholds and
//! [`SentinelBand::classify`] is the single place that interprets them.
//!
//! ```text
//! 0        local_route            LocalAny
//! (0, 10000)                      LocalIndexed(d - 0)
//! 10000    cross_route            CrossAny
//! (10000, 20000)                  CrossIndexed(d - 10000)
//! [20000, 30000)                  LocalZone(d - 20000)
//! [30000, 40000)                  CrossZone(d - 30000)
//! 40000    local_all_route        LocalBroadcast
//! 40001    cross_all_route        CrossBroadcast
//! 40002    local_and_cross_all    LocalAndCrossBroadcast
//! 40003    all_local_and_cross    GlobalBroadcast
//! anything else                   Direct(d)
//! ```

use std::fmt;

use busroute_proto::BusId;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Delivery strategy selected by a destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingClass {
    /// A concrete server address
    Direct(BusId),
    /// Any one server of the type in the sender's domain
    LocalAny,
    /// Instance `n` of the type in the local world/zone
    LocalIndexed(u32),
    /// Any one cross server of the type
    CrossAny,
    /// Instance `n` of the type among cross servers
    CrossIndexed(u32),
    /// Servers of the type in zone `z`, local domain
    LocalZone(u32),
    /// Servers of the type in zone `z`, cross domain
    CrossZone(u32),
    /// Every server of the type in the local domain
    LocalBroadcast,
    /// Every cross server of the type
    CrossBroadcast,
    /// Every server of the type in the node's domain and the cross domain
    LocalAndCrossBroadcast,
    /// Every server of the type everywhere
    GlobalBroadcast,
}

impl RoutingClass {
    /// Whether this class fans out to every matching server.
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        matches!(
            self,
            Self::LocalBroadcast
                | Self::CrossBroadcast
                | Self::LocalAndCrossBroadcast
                | Self::GlobalBroadcast
        )
    }

    /// Short label for logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::LocalAny => "local-any",
            Self::LocalIndexed(_) => "local-indexed",
            Self::CrossAny => "cross-any",
            Self::CrossIndexed(_) => "cross-indexed",
            Self::LocalZone(_) => "local-zone",
            Self::CrossZone(_) => "cross-zone",
            Self::LocalBroadcast => "local-broadcast",
            Self::CrossBroadcast => "cross-broadcast",
            Self::LocalAndCrossBroadcast => "local-and-cross-broadcast",
            Self::GlobalBroadcast => "global-broadcast",
        }
    }
}

impl fmt::Display for RoutingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(id) => write!(f, "direct({id})"),
            Self::LocalIndexed(n) | Self::CrossIndexed(n) => write!(f, "{}({n})", self.label()),
            Self::LocalZone(z) | Self::CrossZone(z) => write!(f, "{}({z})", self.label()),
            _ => f.write_str(self.label()),
        }
    }
}

/// Ordered sentinel thresholds.
///
/// Deserializable so deployments can move the band; every missing key takes
/// its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelBand {
    /// Exact value selecting any local server
    pub local_route: u32,
    /// Exact value selecting any cross server
    pub cross_route: u32,
    /// Start of the local zone range
    pub local_route_zone: u32,
    /// Start of the cross zone range
    pub cross_route_zone: u32,
    /// Local broadcast
    pub local_all_route: u32,
    /// Cross broadcast
    pub cross_all_route: u32,
    /// Local-and-cross broadcast
    pub local_and_cross_all_route: u32,
    /// Global broadcast
    pub all_local_and_all_cross_route: u32,
    /// Upper end of the reserved space
    pub reserved_max: u32,
}

impl Default for SentinelBand {
    fn default() -> Self {
        Self {
            local_route: 0,
            cross_route: 10_000,
            local_route_zone: 20_000,
            cross_route_zone: 30_000,
            local_all_route: 40_000,
            cross_all_route: 40_001,
            local_and_cross_all_route: 40_002,
            all_local_and_all_cross_route: 40_003,
            reserved_max: 41_000,
        }
    }
}

impl SentinelBand {
    /// Check that the thresholds are strictly increasing.
    ///
    /// # Errors
    ///
    /// `ConfigError::BandNotOrdered` naming the first out-of-order pair.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = [
            ("local_route", self.local_route),
            ("cross_route", self.cross_route),
            ("local_route_zone", self.local_route_zone),
            ("cross_route_zone", self.cross_route_zone),
            ("local_all_route", self.local_all_route),
            ("cross_all_route", self.cross_all_route),
            ("local_and_cross_all_route", self.local_and_cross_all_route),
            ("all_local_and_all_cross_route", self.all_local_and_all_cross_route),
            ("reserved_max", self.reserved_max),
        ];

        for pair in ordered.windows(2) {
            let [(lower, lower_value), (upper, upper_value)] = [pair[0], pair[1]];
            if upper_value <= lower_value {
                return Err(ConfigError::BandNotOrdered { lower, lower_value, upper, upper_value });
            }
        }
        Ok(())
    }

    /// Classify a destination. Total: every `u32` maps to exactly one class.
    #[must_use]
    pub fn classify(&self, dest: BusId) -> RoutingClass {
        let d = dest.raw();
        match d {
            _ if d == self.local_route => RoutingClass::LocalAny,
            _ if d > self.local_route && d < self.cross_route => {
                RoutingClass::LocalIndexed(d - self.local_route)
            },
            _ if d == self.cross_route => RoutingClass::CrossAny,
            _ if d > self.cross_route && d < self.local_route_zone => {
                RoutingClass::CrossIndexed(d - self.cross_route)
            },
            _ if d >= self.local_route_zone && d < self.cross_route_zone => {
                RoutingClass::LocalZone(d - self.local_route_zone)
            },
            _ if d >= self.cross_route_zone && d < self.local_all_route => {
                RoutingClass::CrossZone(d - self.cross_route_zone)
            },
            _ if d == self.local_all_route => RoutingClass::LocalBroadcast,
            _ if d == self.cross_all_route => RoutingClass::CrossBroadcast,
            _ if d == self.local_and_cross_all_route => RoutingClass::LocalAndCrossBroadcast,
            _ if d == self.all_local_and_all_cross_route => RoutingClass::GlobalBroadcast,
            _ => RoutingClass::Direct(dest),
        }
    }

    /// Whether `dest` lies in the reserved space (rendered raw in logs).
    #[must_use]
    pub fn is_reserved(&self, dest: BusId) -> bool {
        dest.raw() <= self.reserved_max
    }

    /// Display adapter: sentinels as plain numbers, addresses dotted.
    #[must_use]
    pub fn display(&self, dest: BusId) -> DestDisplay {
        DestDisplay { dest, reserved: self.is_reserved(dest) }
    }
}

/// See [`SentinelBand::display`].
#[derive(Debug, Clone, Copy)]
pub struct DestDisplay {
    dest: BusId,
    reserved: bool,
}

impl fmt::Display for DestDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reserved { write!(f, "#{}", self.dest.raw()) } else { write!(f, "{}", self.dest) }
    }
}
