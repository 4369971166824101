//! Node file.
//!
//! A node is described by one TOML file:
//!
//! ```toml
//! role = "agent"
//! bus_id = "1.1.3.1"
//! name = "agent-zone-1"
//! listen = "0.0.0.0:7301"
//!
//! [[route_servers]]
//! bus_id = "1.0.2.1"
//! url = "tcp://10.0.0.5:7201"
//! ```
//!
//! Everything except `role`, `bus_id` and `listen` has a default.

use std::{path::Path, time::Duration};

use busroute_core::{NodeConfig, SentinelBand};
use busroute_proto::{BusId, ServerInfo, ServerType};
use serde::Deserialize;

use crate::{driver::DriverConfig, error::NodeError};

/// Which driver a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Route agent in front of a zone's leaves
    Agent,
    /// Route server relaying between agents
    RouteServer,
}

impl Role {
    /// Server type a bus id must carry for this role.
    #[must_use]
    pub fn server_type(self) -> ServerType {
        match self {
            Self::Agent => ServerType::ROUTE_AGENT,
            Self::RouteServer => ServerType::ROUTE_SERVER,
        }
    }
}

/// A route server an agent should dial.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteServerEntry {
    /// Dotted address
    pub bus_id: String,
    /// Where to reach it
    pub url: String,
    /// Serves the cross-server domain
    #[serde(default)]
    pub cross_server: bool,
}

/// Contents of a node file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeFileConfig {
    /// Driver to run
    pub role: Role,
    /// Dotted address of this node
    pub bus_id: String,
    /// Human-readable name
    #[serde(default = "default_name")]
    pub name: String,
    /// Address to accept links on
    pub listen: String,
    /// URL peers dial, `tcp://{listen}` if unset
    #[serde(default)]
    pub url: Option<String>,
    /// Serves the cross-server domain
    #[serde(default)]
    pub cross_server: bool,
    /// Route servers to dial (agents only)
    #[serde(default)]
    pub route_servers: Vec<RouteServerEntry>,
    /// Leaf-set announcement period
    #[serde(default = "default_announce_interval_ms")]
    pub announce_interval_ms: u64,
    /// Redial period for lost route servers
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Driver tick period
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Routing sentinel thresholds
    #[serde(default)]
    pub band: SentinelBand,
}

fn default_name() -> String {
    "busroute".to_string()
}

fn default_announce_interval_ms() -> u64 {
    100
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

fn default_tick_interval_ms() -> u64 {
    50
}

impl NodeFileConfig {
    /// Read and parse a node file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read '{}': {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Parse a node file from text.
    pub fn parse(text: &str) -> Result<Self, NodeError> {
        toml::from_str(text).map_err(|e| NodeError::Config(format!("invalid node file: {e}")))
    }

    /// Identity of this node, validated against its role and band.
    pub fn node(&self) -> Result<NodeConfig, NodeError> {
        let bus_id = parse_bus_id(&self.bus_id)?;
        let expected = self.role.server_type();
        if bus_id.server_type() != expected {
            return Err(NodeError::Config(format!(
                "bus id {bus_id} has type {}, role {:?} needs {expected}",
                bus_id.server_type(),
                self.role
            )));
        }

        let url = self.url.clone().unwrap_or_else(|| format!("tcp://{}", self.listen));
        let node = NodeConfig::new(bus_id, self.name.clone())
            .with_url(url)
            .cross_server(self.cross_server)
            .with_band(self.band);
        node.validate().map_err(|e| NodeError::Config(e.to_string()))?;
        Ok(node)
    }

    /// Configured route servers as discovery reports.
    pub fn route_server_infos(&self) -> Result<Vec<ServerInfo>, NodeError> {
        self.route_servers
            .iter()
            .map(|entry| {
                let bus_id = parse_bus_id(&entry.bus_id)?;
                if bus_id.server_type() != ServerType::ROUTE_SERVER {
                    return Err(NodeError::Config(format!("{bus_id} is not a route server address")));
                }
                Ok(ServerInfo::new(bus_id, bus_id.to_string())
                    .with_url(entry.url.clone())
                    .cross_server(entry.cross_server))
            })
            .collect()
    }

    /// Driver timing.
    pub fn driver(&self) -> DriverConfig {
        DriverConfig {
            announce_interval: Duration::from_millis(self.announce_interval_ms),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
        }
    }

    /// Runtime tick period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

fn parse_bus_id(text: &str) -> Result<BusId, NodeError> {
    BusId::parse(text).map_err(|e| NodeError::Config(format!("bad bus id '{text}': {e}")))
}
