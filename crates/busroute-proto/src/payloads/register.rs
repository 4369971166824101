//! Registration payload types.

use serde::{Deserialize, Serialize};

use crate::{BusId, ServerType};

/// Liveness reported for a server inside a registration list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServerState {
    /// Connected and serving
    #[default]
    Normal,
    /// Known but currently disconnected
    Crash,
}

/// One server's self-description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Kind of server
    pub server_type: ServerType,
    /// Address
    pub bus_id: BusId,
    /// Human-readable name
    pub server_name: String,
    /// Connect URL (e.g. `tcp://10.0.0.5:7001`)
    pub url: String,
    /// Advertised IP
    #[serde(default)]
    pub ip: String,
    /// Advertised port
    #[serde(default)]
    pub port: u16,
    /// Serves players from several home zones
    pub is_cross_server: bool,
    /// Liveness at the sender
    #[serde(default)]
    pub state: ServerState,
}

impl ServerInfo {
    /// Minimal description: type taken from the address, no endpoint.
    #[must_use]
    pub fn new(bus_id: BusId, server_name: impl Into<String>) -> Self {
        Self {
            server_type: bus_id.server_type(),
            bus_id,
            server_name: server_name.into(),
            url: String::new(),
            ip: String::new(),
            port: 0,
            is_cross_server: false,
            state: ServerState::Normal,
        }
    }

    /// Set the connect URL.
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
}

/// Batch of server descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerInfoList {
    /// Servers in this batch
    pub servers: Vec<ServerInfo>,
}

impl From<Vec<ServerInfo>> for ServerInfoList {
    fn from(servers: Vec<ServerInfo>) -> Self {
        Self { servers }
    }
}
