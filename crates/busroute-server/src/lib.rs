//! Busroute node runtime.
//!
//! Production glue around the action-based drivers: TCP transport, tokio
//! runtime, system time and OS randomness.
//!
//! # Architecture
//!
//! [`RouteAgentDriver`] and [`RouteServerDriver`] follow the Sans-IO pattern:
//! they take [`RouterEvent`]s and return [`RouterAction`]s. [`Node`] owns one
//! driver on a single task and executes its actions. The transport's accept
//! loop, dialers and per-link readers all feed one channel, so the driver
//! never needs a lock.
//!
//! # Components
//!
//! - [`RouteAgentDriver`]: route agent plus the leaf side of registration
//! - [`RouteServerDriver`]: route server plus the agent side of registration
//! - [`Node`]: production runtime executing driver actions
//! - [`TcpTransport`]: listener and per-link reader/writer tasks
//! - [`NodeFileConfig`]: TOML node file
//! - [`SystemEnv`]: production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod agent_driver;
pub mod config;
mod driver;
mod driver_error;
mod error;
pub mod registration;
mod relay_driver;
mod system_env;
pub mod transport;

use std::{collections::HashMap, net::SocketAddr, time::Duration};

pub use agent_driver::RouteAgentDriver;
use busroute_core::{Environment, LinkId};
use busroute_proto::ServerInfo;
pub use config::{NodeFileConfig, Role};
pub use driver::{DriverConfig, LogLevel, NodeDriver, RouterAction, RouterEvent};
pub use driver_error::DriverError;
pub use error::NodeError;
pub use relay_driver::RouteServerDriver;
pub use system_env::SystemEnv;
use tokio::sync::mpsc;
pub use transport::TcpTransport;
use transport::{Inbound, LinkHandle};

/// Depth of the runtime's inbound channel.
const INBOUND_DEPTH: usize = 4096;

/// Production busroute node.
///
/// Wraps a [`NodeDriver`] with TCP transport and the system environment.
pub struct Node {
    /// The action-based driver
    driver: NodeDriver<SystemEnv>,
    /// Listener for incoming links
    transport: TcpTransport,
    /// Environment
    env: SystemEnv,
    /// Driver tick period
    tick_interval: Duration,
    /// Route servers fed to the driver at startup
    route_servers: Vec<ServerInfo>,
}

impl Node {
    /// Build the driver for a node file and bind its listener.
    pub async fn bind(config: &NodeFileConfig) -> Result<Self, NodeError> {
        let env = SystemEnv::new();
        let node = config.node()?;
        let driver = match config.role {
            Role::Agent => NodeDriver::Agent(RouteAgentDriver::new(env.clone(), node, config.driver())),
            Role::RouteServer => NodeDriver::RouteServer(RouteServerDriver::new(env.clone(), node)),
        };

        let transport = TcpTransport::bind(&config.listen).await?;

        Ok(Self {
            driver,
            transport,
            env,
            tick_interval: config.tick_interval(),
            route_servers: config.route_server_infos()?,
        })
    }

    /// Local address the node listens on.
    pub fn local_addr(&self) -> Result<SocketAddr, NodeError> {
        self.transport.local_addr()
    }

    /// Run the node until the process is stopped.
    pub async fn run(self) -> Result<(), NodeError> {
        let me = self.driver.node_config();
        tracing::info!("{} {} ({}) starting on {}", me.server_type, me.bus_id, me.name, self.local_addr()?);

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_DEPTH);
        tokio::spawn(self.transport.accept_loop(inbound_tx.clone()));

        let mut runtime = Runtime { driver: self.driver, env: self.env, links: HashMap::new(), inbound: inbound_tx };
        for info in self.route_servers {
            runtime.feed(RouterEvent::RouteServerReport { info });
        }

        runtime.run(inbound_rx, self.tick_interval).await;
        Ok(())
    }
}

/// State owned by the node's single task.
struct Runtime {
    driver: NodeDriver<SystemEnv>,
    env: SystemEnv,
    links: HashMap<LinkId, LinkHandle>,
    inbound: mpsc::Sender<Inbound>,
}

impl Runtime {
    async fn run(&mut self, mut inbound: mpsc::Receiver<Inbound>, tick_interval: Duration) {
        let env = self.env.clone();
        let mut tick = Box::pin(env.sleep(tick_interval));

        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => self.handle_inbound(event),
                    None => return,
                },
                () = &mut tick => {
                    tick.set(env.sleep(tick_interval));
                    self.feed(RouterEvent::Tick);
                },
            }
        }
    }

    fn handle_inbound(&mut self, event: Inbound) {
        match event {
            Inbound::Accepted { stream, remote } => {
                let link_id = self.open_link(stream);
                tracing::debug!("link {} from {}", link_id, remote);
                self.feed(RouterEvent::LinkConnected { link_id, peer: None });
            },
            Inbound::Dialed { bus_id, result: Ok(stream) } => {
                let link_id = self.open_link(stream);
                self.feed(RouterEvent::LinkConnected { link_id, peer: Some(bus_id) });
            },
            Inbound::Dialed { bus_id, result: Err(reason) } => {
                self.feed(RouterEvent::ConnectFailed { bus_id, reason });
            },
            Inbound::Packet { link_id, packet } => {
                if self.links.contains_key(&link_id) {
                    self.feed(RouterEvent::PacketReceived { link_id, packet });
                }
            },
            Inbound::Closed { link_id, reason } => {
                if self.links.remove(&link_id).is_some() {
                    self.feed(RouterEvent::LinkClosed { link_id, reason });
                }
            },
        }
    }

    fn open_link(&mut self, stream: tokio::net::TcpStream) -> LinkId {
        let mut link_id = self.env.random_u64();
        while self.links.contains_key(&link_id) {
            link_id = self.env.random_u64();
        }
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed on link {}: {}", link_id, e);
        }
        self.links.insert(link_id, LinkHandle::spawn(link_id, stream, self.inbound.clone()));
        link_id
    }

    /// Run the driver on one event and execute what it asks for.
    fn feed(&mut self, event: RouterEvent) {
        match self.driver.process_event(event) {
            Ok(actions) => self.execute_actions(actions),
            Err(e) => tracing::warn!("event processing error: {}", e),
        }
    }

    fn execute_actions(&mut self, actions: Vec<RouterAction<<SystemEnv as Environment>::Instant>>) {
        let mut stalled = Vec::new();

        for action in actions {
            match action {
                RouterAction::Send { link_id, packet } => match self.links.get(&link_id) {
                    Some(link) => {
                        if let Err(e) = link.send(&packet) {
                            tracing::warn!("send on link {} failed: {}", link_id, e);
                            stalled.push(link_id);
                        }
                    },
                    None => tracing::warn!("send on unknown link {}", link_id),
                },

                RouterAction::Connect { bus_id, url } => {
                    tracing::info!("dialing {} at {}", bus_id, url);
                    transport::spawn_dial(bus_id, url, self.inbound.clone());
                },

                RouterAction::CloseLink { link_id, reason } => {
                    tracing::info!("closing link {}: {}", link_id, reason);
                    if let Some(link) = self.links.remove(&link_id) {
                        link.close();
                    }
                },

                RouterAction::Log { level, message, .. } => match level {
                    LogLevel::Debug => tracing::debug!("{}", message),
                    LogLevel::Info => tracing::info!("{}", message),
                    LogLevel::Warn => tracing::warn!("{}", message),
                    LogLevel::Error => tracing::error!("{}", message),
                },
            }
        }

        // A link that cannot keep up is dropped; the driver sees it close.
        for link_id in stalled {
            if let Some(link) = self.links.remove(&link_id) {
                link.close();
                self.feed(RouterEvent::LinkClosed { link_id, reason: "send queue stalled".to_string() });
            }
        }
    }
}
