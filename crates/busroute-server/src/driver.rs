//! Driver events and actions.
//!
//! Both node roles are action-based: the runtime feeds [`RouterEvent`]s in
//! and executes the [`RouterAction`]s that come out. Drivers never touch a
//! socket or a clock directly.

use std::time::Duration;

use busroute_core::{
    Dispatch, Environment, LinkId, NodeConfig, RouteOutcome, SentinelBand, ServerRegistry,
};
use busroute_proto::{BusId, ControlPayload, Endpoint, Packet, ServerInfo, ServerInfoList};

use crate::{
    agent_driver::RouteAgentDriver, driver_error::DriverError, relay_driver::RouteServerDriver,
};

/// Driver timing.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Minimum gap between two leaf-set announcements to route servers
    pub announce_interval: Duration,
    /// Minimum gap between two redial sweeps for lost route servers
    pub reconnect_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { announce_interval: Duration::from_millis(100), reconnect_interval: Duration::from_secs(1) }
    }
}

/// Events that a driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// A link came up
    LinkConnected {
        /// Link id assigned by the runtime
        link_id: LinkId,
        /// Peer this node dialed, `None` for accepted links
        peer: Option<BusId>,
    },

    /// A dial requested with [`RouterAction::Connect`] failed
    ConnectFailed {
        /// Peer that could not be reached
        bus_id: BusId,
        /// Reason for failure
        reason: String,
    },

    /// A packet arrived on a link
    PacketReceived {
        /// Link the packet arrived on
        link_id: LinkId,
        /// The received packet
        packet: Packet,
    },

    /// A link went down (by peer, error, or a requested close)
    LinkClosed {
        /// Link that was closed
        link_id: LinkId,
        /// Reason for closure
        reason: String,
    },

    /// Discovery reported a route server
    RouteServerReport {
        /// Route server description
        info: ServerInfo,
    },

    /// Operator removed a server for good
    Unregister {
        /// Server to forget
        bus_id: BusId,
    },

    /// Periodic tick for announcements and redials
    Tick,
}

/// Actions that a driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterAction<I> {
    /// Put a packet on a link
    Send {
        /// Outgoing link
        link_id: LinkId,
        /// Packet to send
        packet: Packet,
    },

    /// Dial a peer; the runtime answers with `LinkConnected` or `ConnectFailed`
    Connect {
        /// Peer to dial
        bus_id: BusId,
        /// Where to reach it
        url: String,
    },

    /// Close a link
    CloseLink {
        /// Link to close
        link_id: LinkId,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
        /// When the event occurred
        timestamp: I,
    },
}

impl<I> RouterAction<I> {
    pub(crate) fn log(level: LogLevel, message: impl Into<String>, timestamp: I) -> Self {
        Self::Log { level, message: message.into(), timestamp }
    }
}

/// Log levels for driver actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Driver for either node role.
pub enum NodeDriver<E: Environment> {
    /// Route agent in front of a zone's leaves
    Agent(RouteAgentDriver<E>),
    /// Route server relaying between agents
    RouteServer(RouteServerDriver<E>),
}

impl<E: Environment> NodeDriver<E> {
    /// Process an event and return actions to execute.
    pub fn process_event(&mut self, event: RouterEvent) -> Result<Vec<RouterAction<E::Instant>>, DriverError> {
        match self {
            Self::Agent(driver) => driver.process_event(event),
            Self::RouteServer(driver) => driver.process_event(event),
        }
    }

    /// Identity of this node.
    pub fn node_config(&self) -> &NodeConfig {
        match self {
            Self::Agent(driver) => driver.router().config(),
            Self::RouteServer(driver) => driver.router().config(),
        }
    }

    /// Servers this node knows about.
    pub fn registry(&self) -> &ServerRegistry {
        match self {
            Self::Agent(driver) => driver.router().registry(),
            Self::RouteServer(driver) => driver.router().registry(),
        }
    }
}

/// `src -> dst` of a packet for log lines, sentinels rendered raw.
pub(crate) fn describe(packet: &Packet, band: &SentinelBand) -> String {
    let dst = packet.dst();
    format!("{} -> {} ({})", packet.src().bus_id, band.display(dst.bus_id), dst.server_type)
}

/// Turn a routing decision into sends plus at most one log line.
pub(crate) fn dispatch_actions<I: Copy>(dispatch: Dispatch, summary: &str, now: I) -> Vec<RouterAction<I>> {
    let mut actions = Vec::with_capacity(dispatch.forwards.len() + 1);
    let class = dispatch.class.map_or_else(|| "bounce notice".to_string(), |c| c.to_string());

    match dispatch.outcome {
        RouteOutcome::Dispatched { copies: 0 } => {
            actions.push(RouterAction::log(LogLevel::Debug, format!("{class} {summary}: no recipient"), now));
        },
        RouteOutcome::Dispatched { .. } => {},
        RouteOutcome::Bounced(code) => {
            actions.push(RouterAction::log(LogLevel::Debug, format!("{class} {summary}: bounced {code}"), now));
        },
        RouteOutcome::Undeliverable => {
            actions.push(RouterAction::log(
                LogLevel::Error,
                format!("{class} {summary}: sender unreachable, dropped"),
                now,
            ));
        },
    }

    actions.extend(
        dispatch.forwards.into_iter().map(|f| RouterAction::Send { link_id: f.link, packet: f.packet }),
    );
    actions
}

/// Build a control packet and the action sending it.
pub(crate) fn send_control<I>(
    link_id: LinkId,
    src: Endpoint,
    dst: Endpoint,
    make: fn(ServerInfoList) -> ControlPayload,
    servers: Vec<ServerInfo>,
) -> Result<RouterAction<I>, DriverError> {
    let packet = make(ServerInfoList::from(servers)).into_packet(src, dst)?;
    Ok(RouterAction::Send { link_id, packet })
}

/// Whether an interval has elapsed since `last`.
pub(crate) fn is_due<I>(last: Option<I>, now: I, interval: Duration) -> bool
where
    I: Copy + std::ops::Sub<Output = Duration>,
{
    last.is_none_or(|at| now - at >= interval)
}
