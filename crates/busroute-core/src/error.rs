//! Error types for the routing core.
//!
//! Routing misses are not errors. They surface as
//! [`crate::RouteOutcome::Bounced`] with the packet sent back to its sender.
//! The errors here are caller mistakes or inputs that cannot be attributed
//! to any sender.

use busroute_proto::BusId;

use crate::registry::LinkId;

/// Registry operation on a server that is not known.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No record with this bus id.
    #[error("unknown server {0}")]
    UnknownServer(BusId),
}

/// Route server received traffic it cannot attribute.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// Packet arrived on a link that no registered agent owns.
    #[error("packet on link {0} which belongs to no registered agent")]
    UnknownLink(LinkId),
}

/// Invalid node configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Sentinel thresholds are not strictly increasing.
    #[error("sentinel {upper} ({upper_value}) must be greater than {lower} ({lower_value})")]
    BandNotOrdered {
        /// Lower sentinel name
        lower: &'static str,
        /// Its value
        lower_value: u32,
        /// Upper sentinel name
        upper: &'static str,
        /// Its value
        upper_value: u32,
    },

    /// The node's own address falls inside the sentinel band.
    #[error("bus id {0} collides with the routing sentinel band")]
    AddressInBand(BusId),
}
