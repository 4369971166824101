//! Identity of the local node.

use busroute_proto::{BusId, Endpoint, ServerInfo, ServerType};

use crate::{classifier::SentinelBand, error::ConfigError};

/// Read-only configuration a router is built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// This node's address
    pub bus_id: BusId,
    /// This node's type
    pub server_type: ServerType,
    /// Human-readable name
    pub name: String,
    /// URL peers connect to
    pub url: String,
    /// Serves the cross-server domain
    pub is_cross_server: bool,
    /// Routing sentinel thresholds
    pub band: SentinelBand,
}

impl NodeConfig {
    /// Config for `bus_id` with the type taken from the address.
    #[must_use]
    pub fn new(bus_id: BusId, name: impl Into<String>) -> Self {
        Self {
            bus_id,
            server_type: bus_id.server_type(),
            name: name.into(),
            url: String::new(),
            is_cross_server: false,
            band: SentinelBand::default(),
        }
    }

    /// Set the advertised URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the cross-server flag.
    #[must_use]
    pub fn cross_server(mut self, is_cross_server: bool) -> Self {
        self.is_cross_server = is_cross_server;
        self
    }

    /// Replace the sentinel band.
    #[must_use]
    pub fn with_band(mut self, band: SentinelBand) -> Self {
        self.band = band;
        self
    }

    /// Reject bands that are out of order or would swallow this node's address.
    ///
    /// # Errors
    ///
    /// `ConfigError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.band.validate()?;
        if self.band.is_reserved(self.bus_id) {
            return Err(ConfigError::AddressInBand(self.bus_id));
        }
        Ok(())
    }

    /// World of this node.
    #[must_use]
    pub fn world(&self) -> u8 {
        self.bus_id.world()
    }

    /// Zone of this node.
    #[must_use]
    pub fn zone(&self) -> u16 {
        self.bus_id.zone()
    }

    /// This node as a packet endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.server_type, self.bus_id)
    }

    /// Self-description sent when registering with a peer.
    #[must_use]
    pub fn self_info(&self) -> ServerInfo {
        ServerInfo {
            server_type: self.server_type,
            ..ServerInfo::new(self.bus_id, self.name.clone())
                .with_url(self.url.clone())
                .cross_server(self.is_cross_server)
        }
    }
}
