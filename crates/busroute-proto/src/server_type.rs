//! Server type identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of server process, the third field of a [`crate::BusId`].
///
/// The set is open: unknown values are carried and routed like any other,
/// they just have no name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerType(u8);

impl ServerType {
    /// No type
    pub const NONE: Self = Self(0);
    /// Cluster master
    pub const MASTER: Self = Self(1);
    /// Route server (inter-zone relay)
    pub const ROUTE_SERVER: Self = Self(2);
    /// Route agent (per-zone proxy)
    pub const ROUTE_AGENT: Self = Self(3);
    /// Client-facing proxy
    pub const PROXY: Self = Self(4);
    /// Gameplay shard
    pub const GAME: Self = Self(5);
    /// World server
    pub const WORLD: Self = Self(6);
    /// Logic server
    pub const LOGIC: Self = Self(7);
    /// Social server
    pub const SNS: Self = Self(8);
    /// Storage front
    pub const STORE: Self = Self(9);
    /// Web/HTTP gateway
    pub const WEB: Self = Self(10);
    /// Online presence
    pub const ONLINE: Self = Self(11);
    /// Login/account check
    pub const CHECK: Self = Self(12);

    const NAMES: [&'static str; 13] = [
        "none",
        "master",
        "route-server",
        "route-agent",
        "proxy",
        "game",
        "world",
        "logic",
        "sns",
        "store",
        "web",
        "online",
        "check",
    ];

    /// Wrap a raw type byte.
    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Raw type byte.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Well-known name, if any.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        Self::NAMES.get(usize::from(self.0)).copied()
    }

    /// Look up a well-known type by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .and_then(|i| u8::try_from(i).ok())
            .map(Self)
    }

    /// Fabric plumbing rather than a leaf server.
    ///
    /// Agents never announce these as leaves and never accept them through
    /// leaf registration.
    #[must_use]
    pub const fn is_infrastructure(self) -> bool {
        matches!(self, Self::MASTER | Self::ROUTE_SERVER | Self::ROUTE_AGENT)
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "type#{}", self.0),
        }
    }
}

impl fmt::Debug for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerType({self})")
    }
}

impl From<u8> for ServerType {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for raw in 0..=12u8 {
            let ty = ServerType::new(raw);
            let name = ty.name().unwrap();
            assert_eq!(ServerType::from_name(name), Some(ty));
        }
        assert_eq!(ServerType::from_name("Route-Agent"), Some(ServerType::ROUTE_AGENT));
        assert_eq!(ServerType::from_name("nope"), None);
    }

    #[test]
    fn unknown_types_still_display() {
        assert_eq!(ServerType::new(200).to_string(), "type#200");
        assert_eq!(ServerType::LOGIC.to_string(), "logic");
    }

    #[test]
    fn infrastructure_types() {
        assert!(ServerType::ROUTE_SERVER.is_infrastructure());
        assert!(ServerType::ROUTE_AGENT.is_infrastructure());
        assert!(ServerType::MASTER.is_infrastructure());
        assert!(!ServerType::GAME.is_infrastructure());
    }
}
