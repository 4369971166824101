//! In-memory fabric of agents, route servers and leaves.
//!
//! Drivers run exactly as in production, but links are entries in a table
//! and every event goes through one FIFO queue. Given the same seed and the
//! same calls, a fabric replays the same run.
//!
//! A link has two ends, each with its own [`LinkId`] as seen by its holder.
//! Closing one end tells the other holder; the closing side gets no event,
//! matching the TCP runtime.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    time::Duration,
};

use busroute_core::{Environment, LinkId, NodeConfig, ServerRegistry};
use busroute_proto::{BusId, ControlPayload, Endpoint, Packet, ServerInfo, ServerType};
use busroute_server::{
    DriverConfig, LogLevel, NodeDriver, RouteAgentDriver, RouteServerDriver, RouterAction, RouterEvent,
};

use crate::sim_env::{SimEnv, SimInstant};

/// Events processed before [`SimFabric::run_until_idle`] gives up.
pub const MAX_STEPS: usize = 1_000_000;

/// Who holds one end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Node(BusId),
    Leaf(BusId),
}

#[derive(Debug, Clone, Copy)]
struct LinkEnd {
    holder: Holder,
    peer: LinkId,
}

struct SimNode {
    config: NodeConfig,
    driver_config: DriverConfig,
    driver: NodeDriver<SimEnv>,
    up: bool,
    /// Route servers reported to this node, replayed on restart
    reported: Vec<BusId>,
}

/// A leaf server: registers with one agent and collects what it receives.
#[derive(Debug)]
pub struct SimLeaf {
    info: ServerInfo,
    agent: BusId,
    link: Option<LinkId>,
    registered: bool,
    inbox: Vec<Packet>,
}

impl SimLeaf {
    /// Whether the agent acknowledged the registration on the current link.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Data packets received, oldest first.
    pub fn inbox(&self) -> &[Packet] {
        &self.inbox
    }
}

/// Deterministic in-memory fabric.
pub struct SimFabric {
    env: SimEnv,
    nodes: BTreeMap<BusId, SimNode>,
    leaves: BTreeMap<BusId, SimLeaf>,
    links: HashMap<LinkId, LinkEnd>,
    queue: VecDeque<(BusId, RouterEvent)>,
    errors: Vec<(BusId, String)>,
}

impl SimFabric {
    /// Empty fabric with a seeded environment.
    pub fn new(seed: u64) -> Self {
        Self {
            env: SimEnv::with_seed(seed),
            nodes: BTreeMap::new(),
            leaves: BTreeMap::new(),
            links: HashMap::new(),
            queue: VecDeque::new(),
            errors: Vec::new(),
        }
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Current virtual time.
    pub fn now(&self) -> SimInstant {
        self.env.now()
    }

    /// Add a route agent.
    pub fn add_agent(&mut self, config: NodeConfig, driver_config: DriverConfig) -> Result<(), String> {
        self.add_node(config, driver_config, ServerType::ROUTE_AGENT)
    }

    /// Add a route server.
    pub fn add_route_server(&mut self, config: NodeConfig) -> Result<(), String> {
        self.add_node(config, DriverConfig::default(), ServerType::ROUTE_SERVER)
    }

    fn add_node(&mut self, config: NodeConfig, driver_config: DriverConfig, expected: ServerType) -> Result<(), String> {
        if config.server_type != expected {
            return Err(format!("{} is a {}, expected {expected}", config.bus_id, config.server_type));
        }
        config.validate().map_err(|e| e.to_string())?;
        if self.nodes.contains_key(&config.bus_id) || self.leaves.contains_key(&config.bus_id) {
            return Err(format!("{} already in the fabric", config.bus_id));
        }

        let config = if config.url.is_empty() {
            let bus_id = config.bus_id;
            config.with_url(sim_url(bus_id))
        } else {
            config
        };
        let driver = build_driver(&self.env, &config, &driver_config);
        self.nodes.insert(config.bus_id, SimNode { config, driver_config, driver, up: true, reported: Vec::new() });
        Ok(())
    }

    /// Tell an agent about a route server, as discovery would.
    pub fn report_route_server(&mut self, agent: BusId, route_server: BusId) -> Result<(), String> {
        let info = self.nodes.get(&route_server).ok_or(format!("no route server {route_server}"))?.config.self_info();
        let node = self.nodes.get_mut(&agent).ok_or(format!("no agent {agent}"))?;
        if !node.reported.contains(&route_server) {
            node.reported.push(route_server);
        }
        self.queue.push_back((agent, RouterEvent::RouteServerReport { info }));
        Ok(())
    }

    /// Add a leaf homed on `agent`. It is not connected yet.
    pub fn add_leaf(&mut self, info: ServerInfo, agent: BusId) -> Result<(), String> {
        if !self.nodes.contains_key(&agent) {
            return Err(format!("no agent {agent}"));
        }
        if self.nodes.contains_key(&info.bus_id) || self.leaves.contains_key(&info.bus_id) {
            return Err(format!("{} already in the fabric", info.bus_id));
        }
        self.leaves.insert(info.bus_id, SimLeaf { info, agent, link: None, registered: false, inbox: Vec::new() });
        Ok(())
    }

    /// Connect a leaf to its agent and send `ServerRegister`.
    pub fn leaf_connect(&mut self, leaf: BusId) -> Result<(), String> {
        let (agent, info) = {
            let l = self.leaves.get(&leaf).ok_or(format!("no leaf {leaf}"))?;
            if l.link.is_some() {
                return Err(format!("leaf {leaf} already connected"));
            }
            (l.agent, l.info.clone())
        };
        if !self.is_up(agent) {
            return Err(format!("agent {agent} is down"));
        }

        let (leaf_link, agent_link) = self.open_link(Holder::Leaf(leaf), Holder::Node(agent));
        if let Some(l) = self.leaves.get_mut(&leaf) {
            l.link = Some(leaf_link);
            l.registered = false;
        }

        let register = ControlPayload::ServerRegister(vec![info].into())
            .into_packet(Endpoint::of(leaf), Endpoint::new(ServerType::ROUTE_AGENT, agent))
            .map_err(|e| e.to_string())?;
        self.queue.push_back((agent, RouterEvent::LinkConnected { link_id: agent_link, peer: None }));
        self.queue.push_back((agent, RouterEvent::PacketReceived { link_id: agent_link, packet: register }));
        Ok(())
    }

    /// Put a packet on a leaf's link to its agent.
    pub fn leaf_send(&mut self, leaf: BusId, packet: Packet) -> Result<(), String> {
        let link = self.leaves.get(&leaf).and_then(|l| l.link).ok_or(format!("leaf {leaf} is not connected"))?;
        let end = self.links.get(&link).copied().ok_or(format!("leaf {leaf} link vanished"))?;
        let Some(Holder::Node(agent)) = self.far_holder(end) else {
            return Err(format!("leaf {leaf} is not linked to a node"));
        };
        self.queue.push_back((agent, RouterEvent::PacketReceived { link_id: end.peer, packet }));
        Ok(())
    }

    /// Drop a leaf's link.
    pub fn leaf_disconnect(&mut self, leaf: BusId) -> Result<(), String> {
        let link = self.leaves.get_mut(&leaf).and_then(|l| l.link.take()).ok_or(format!("leaf {leaf} is not connected"))?;
        self.close_link(link, "leaf disconnected");
        Ok(())
    }

    /// Take a leaf's received data packets.
    pub fn take_inbox(&mut self, leaf: BusId) -> Vec<Packet> {
        self.leaves.get_mut(&leaf).map(|l| std::mem::take(&mut l.inbox)).unwrap_or_default()
    }

    /// A leaf, if known.
    pub fn leaf(&self, leaf: BusId) -> Option<&SimLeaf> {
        self.leaves.get(&leaf)
    }

    /// Crash a node: every link it holds drops and its state is lost.
    pub fn crash(&mut self, node: BusId) -> Result<(), String> {
        let n = self.nodes.get_mut(&node).ok_or(format!("no node {node}"))?;
        n.up = false;

        let held: Vec<LinkId> =
            self.links.iter().filter(|(_, end)| end.holder == Holder::Node(node)).map(|(id, _)| *id).collect();
        for link in held {
            self.close_link(link, "peer crashed");
        }
        self.queue.retain(|(target, _)| *target != node);
        Ok(())
    }

    /// Restart a crashed node with empty state. Agents get their route
    /// servers reported again.
    pub fn restart(&mut self, node: BusId) -> Result<(), String> {
        let n = self.nodes.get_mut(&node).ok_or(format!("no node {node}"))?;
        if n.up {
            return Err(format!("{node} is already running"));
        }
        n.driver = build_driver(&self.env, &n.config, &n.driver_config);
        n.up = true;

        for route_server in n.reported.clone() {
            self.report_route_server(node, route_server)?;
        }
        Ok(())
    }

    /// Whether a node is running.
    pub fn is_up(&self, node: BusId) -> bool {
        self.nodes.get(&node).is_some_and(|n| n.up)
    }

    /// Registry of a running node.
    pub fn registry(&self, node: BusId) -> Option<&ServerRegistry> {
        self.nodes.get(&node).filter(|n| n.up).map(|n| n.driver.registry())
    }

    /// Driver errors so far, oldest first.
    pub fn errors(&self) -> &[(BusId, String)] {
        &self.errors
    }

    /// Move the clock, tick every running node, and settle.
    pub fn advance(&mut self, by: Duration) -> Result<(), String> {
        self.env.advance(by);
        let running: Vec<BusId> = self.nodes.iter().filter(|(_, n)| n.up).map(|(id, _)| *id).collect();
        for node in running {
            self.queue.push_back((node, RouterEvent::Tick));
        }
        self.run_until_idle()
    }

    /// Process queued events until none are left.
    pub fn run_until_idle(&mut self) -> Result<(), String> {
        for _ in 0..MAX_STEPS {
            let Some((target, event)) = self.queue.pop_front() else {
                return Ok(());
            };
            self.step(target, event);
        }
        Err(format!("fabric did not settle within {MAX_STEPS} events"))
    }

    fn step(&mut self, target: BusId, event: RouterEvent) {
        // Packets still queued for a link that closed meanwhile are lost.
        if let RouterEvent::PacketReceived { link_id, .. } = &event
            && !self.links.contains_key(link_id)
        {
            return;
        }
        let Some(node) = self.nodes.get_mut(&target).filter(|n| n.up) else {
            return;
        };
        match node.driver.process_event(event) {
            Ok(actions) => self.execute(target, actions),
            Err(e) => {
                tracing::debug!("{} driver error: {}", target, e);
                self.errors.push((target, e.to_string()));
            },
        }
    }

    fn execute(&mut self, source: BusId, actions: Vec<RouterAction<SimInstant>>) {
        for action in actions {
            match action {
                RouterAction::Send { link_id, packet } => self.deliver(link_id, packet),
                RouterAction::Connect { bus_id, url } => self.dial(source, bus_id, &url),
                RouterAction::CloseLink { link_id, reason } => self.close_link(link_id, &reason),
                RouterAction::Log { level, message, timestamp } => {
                    let at = timestamp.elapsed_since_start();
                    match level {
                        LogLevel::Debug => tracing::debug!("[{:?}] {}: {}", at, source, message),
                        LogLevel::Info => tracing::info!("[{:?}] {}: {}", at, source, message),
                        LogLevel::Warn => tracing::warn!("[{:?}] {}: {}", at, source, message),
                        LogLevel::Error => tracing::error!("[{:?}] {}: {}", at, source, message),
                    }
                },
            }
        }
    }

    fn deliver(&mut self, link_id: LinkId, packet: Packet) {
        let Some(end) = self.links.get(&link_id).copied() else {
            tracing::debug!("send on closed link {}", link_id);
            return;
        };
        match self.far_holder(end) {
            None => {},
            Some(Holder::Node(node)) => {
                self.queue.push_back((node, RouterEvent::PacketReceived { link_id: end.peer, packet }));
            },
            Some(Holder::Leaf(leaf)) => {
                if let Some(l) = self.leaves.get_mut(&leaf) {
                    if !packet.header.is_control() {
                        l.inbox.push(packet);
                    } else if let Ok(ControlPayload::ServerRegisterReply(_)) = ControlPayload::from_packet(&packet) {
                        l.registered = true;
                    }
                }
            },
        }
    }

    fn dial(&mut self, source: BusId, target: BusId, url: &str) {
        let reachable = self.nodes.get(&target).is_some_and(|n| n.up && n.config.url == url);
        if !reachable {
            let reason = format!("{url} refused");
            self.queue.push_back((source, RouterEvent::ConnectFailed { bus_id: target, reason }));
            return;
        }

        let (source_link, target_link) = self.open_link(Holder::Node(source), Holder::Node(target));
        self.queue.push_back((target, RouterEvent::LinkConnected { link_id: target_link, peer: None }));
        self.queue.push_back((source, RouterEvent::LinkConnected { link_id: source_link, peer: Some(target) }));
    }

    fn open_link(&mut self, a: Holder, b: Holder) -> (LinkId, LinkId) {
        let a_link = self.fresh_link_id();
        let b_link = self.fresh_link_id_excluding(a_link);
        self.links.insert(a_link, LinkEnd { holder: a, peer: b_link });
        self.links.insert(b_link, LinkEnd { holder: b, peer: a_link });
        (a_link, b_link)
    }

    fn fresh_link_id(&self) -> LinkId {
        self.fresh_link_id_excluding(LinkId::MAX)
    }

    fn fresh_link_id_excluding(&self, taken: LinkId) -> LinkId {
        loop {
            let id = self.env.random_u64();
            if id != taken && id != LinkId::MAX && !self.links.contains_key(&id) {
                return id;
            }
        }
    }

    fn far_holder(&self, end: LinkEnd) -> Option<Holder> {
        self.links.get(&end.peer).map(|far| far.holder)
    }

    /// Remove both ends of a link and tell the holder of the far end.
    fn close_link(&mut self, link_id: LinkId, reason: &str) {
        let Some(end) = self.links.remove(&link_id) else {
            return;
        };
        let Some(far) = self.links.remove(&end.peer) else {
            return;
        };

        match far.holder {
            Holder::Node(node) => {
                self.queue.push_back((node, RouterEvent::LinkClosed { link_id: end.peer, reason: reason.to_string() }));
            },
            Holder::Leaf(leaf) => {
                if let Some(l) = self.leaves.get_mut(&leaf) {
                    l.link = None;
                    l.registered = false;
                }
            },
        }
    }
}

fn sim_url(bus_id: BusId) -> String {
    format!("sim://{bus_id}")
}

fn build_driver(env: &SimEnv, config: &NodeConfig, driver_config: &DriverConfig) -> NodeDriver<SimEnv> {
    if config.server_type == ServerType::ROUTE_SERVER {
        NodeDriver::RouteServer(RouteServerDriver::new(env.clone(), config.clone()))
    } else {
        NodeDriver::Agent(RouteAgentDriver::new(env.clone(), config.clone(), driver_config.clone()))
    }
}
