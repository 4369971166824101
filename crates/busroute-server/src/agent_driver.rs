//! Route agent driver.
//!
//! Wraps [`RouteAgentRouter`] with the agent half of the registration
//! protocol: leaves register over accepted links, route servers are dialed
//! from discovery reports, and the leaf set is re-announced to every live
//! route server on a timer so a restarted route server heals without any
//! leaf re-registering.

use std::collections::HashSet;

use busroute_core::{
    CrossScope, Environment, LinkId, NodeConfig, RouteAgentRouter, ServerRegistry, Upsert,
};
use busroute_proto::{BusId, ControlPayload, Endpoint, Packet, ServerInfo, ServerState, ServerType};

use crate::{
    driver::{
        DriverConfig, LogLevel, RouterAction, RouterEvent, describe, dispatch_actions, is_due,
        send_control,
    },
    driver_error::DriverError,
    registration::{admit_leaves, leaf_snapshot, live_peers},
};

type Actions<E> = Vec<RouterAction<<E as Environment>::Instant>>;

/// Action-based route agent.
pub struct RouteAgentDriver<E: Environment> {
    /// Routing logic and registry
    router: RouteAgentRouter,
    /// Environment (time)
    env: E,
    /// Timing
    config: DriverConfig,
    /// Route servers with a dial in flight
    dialing: HashSet<BusId>,
    /// Last leaf-set announcement
    last_announce: Option<E::Instant>,
    /// Last redial sweep
    last_redial: Option<E::Instant>,
}

impl<E: Environment> RouteAgentDriver<E> {
    /// Create an agent with an empty registry.
    pub fn new(env: E, node: NodeConfig, config: DriverConfig) -> Self {
        Self {
            router: RouteAgentRouter::new(node, ServerRegistry::new()),
            env,
            config,
            dialing: HashSet::new(),
            last_announce: None,
            last_redial: None,
        }
    }

    /// Routing logic and registry.
    pub fn router(&self) -> &RouteAgentRouter {
        &self.router
    }

    /// Process an event and return actions to execute.
    pub fn process_event(&mut self, event: RouterEvent) -> Result<Actions<E>, DriverError> {
        match event {
            RouterEvent::LinkConnected { link_id, peer } => self.handle_link_connected(link_id, peer),
            RouterEvent::ConnectFailed { bus_id, reason } => Ok(self.handle_connect_failed(bus_id, &reason)),
            RouterEvent::PacketReceived { link_id, packet } => self.handle_packet(link_id, packet),
            RouterEvent::LinkClosed { link_id, reason } => self.handle_link_closed(link_id, &reason),
            RouterEvent::RouteServerReport { info } => Ok(self.handle_route_server_report(info)),
            RouterEvent::Unregister { bus_id } => self.handle_unregister(bus_id),
            RouterEvent::Tick => self.handle_tick(),
        }
    }

    fn handle_link_connected(&mut self, link_id: LinkId, peer: Option<BusId>) -> Result<Actions<E>, DriverError> {
        let now = self.env.now();
        let Some(bus_id) = peer else {
            return Ok(vec![RouterAction::log(LogLevel::Debug, format!("link {link_id} accepted"), now)]);
        };
        self.dialing.remove(&bus_id);

        let is_route_server = self
            .router
            .registry()
            .get(bus_id)
            .is_some_and(|r| r.server_type == ServerType::ROUTE_SERVER);
        if !is_route_server {
            return Ok(vec![RouterAction::CloseLink {
                link_id,
                reason: format!("{bus_id} is not a known route server"),
            }]);
        }

        let stale = self.router.registry_mut().attach(bus_id, link_id)?;

        let me = self.router.config().endpoint();
        let peer = Endpoint::new(ServerType::ROUTE_SERVER, bus_id);
        let mut actions: Actions<E> = stale
            .map(|old| RouterAction::CloseLink { link_id: old, reason: "superseded".to_string() })
            .into_iter()
            .collect();
        actions.extend([
            RouterAction::log(LogLevel::Info, format!("connected to route server {bus_id} on link {link_id}"), now),
            send_control(link_id, me, peer, ControlPayload::ServerRegister, vec![
                self.router.config().self_info(),
            ])?,
        ]);

        let leaves = leaf_snapshot(self.router.registry());
        if !leaves.is_empty() {
            actions.push(send_control(link_id, me, peer, ControlPayload::RouteAnnounce, leaves)?);
        }
        Ok(actions)
    }

    fn handle_connect_failed(&mut self, bus_id: BusId, reason: &str) -> Actions<E> {
        self.dialing.remove(&bus_id);
        vec![RouterAction::log(
            LogLevel::Warn,
            format!("dial to route server {bus_id} failed: {reason}"),
            self.env.now(),
        )]
    }

    fn handle_packet(&mut self, link_id: LinkId, packet: Packet) -> Result<Actions<E>, DriverError> {
        if packet.header.is_control() {
            return self.handle_control(link_id, ControlPayload::from_packet(&packet)?);
        }

        if self.router.registry().by_link(link_id).is_none() {
            return Err(DriverError::UnknownLink(link_id));
        }

        let summary = describe(&packet, &self.router.config().band);
        let dispatch = self.router.route(link_id, packet);
        Ok(dispatch_actions(dispatch, &summary, self.env.now()))
    }

    fn handle_control(&mut self, link_id: LinkId, payload: ControlPayload) -> Result<Actions<E>, DriverError> {
        let from_route_server = self
            .router
            .registry()
            .by_link(link_id)
            .filter(|r| r.server_type == ServerType::ROUTE_SERVER)
            .map(|r| r.bus_id);

        match (payload, from_route_server) {
            (ControlPayload::ServerRegister(list), None) => self.handle_leaf_register(link_id, list.servers),
            (ControlPayload::ServerRegisterReply(_), Some(bus_id)) => Ok(vec![RouterAction::log(
                LogLevel::Info,
                format!("route server {bus_id} accepted registration"),
                self.env.now(),
            )]),
            (payload, _) => Err(DriverError::UnexpectedControl { link_id, opcode: payload.opcode() }),
        }
    }

    fn handle_leaf_register(&mut self, link_id: LinkId, servers: Vec<ServerInfo>) -> Result<Actions<E>, DriverError> {
        let now = self.env.now();
        let is_cross = self.router.config().is_cross_server;
        let admission = admit_leaves(self.router.registry_mut(), is_cross, link_id, servers)?;

        let mut actions = Vec::new();
        for (info, rejection) in &admission.rejected {
            actions.push(RouterAction::log(
                LogLevel::Warn,
                format!("rejected {} {} on link {link_id}: {rejection}", info.server_type, info.bus_id),
                now,
            ));
        }

        let Some(leaf) = admission.accepted.first() else {
            actions.push(RouterAction::CloseLink { link_id, reason: "registration rejected".to_string() });
            return Ok(actions);
        };
        actions.extend(
            admission
                .superseded
                .iter()
                .map(|&old| RouterAction::CloseLink { link_id: old, reason: "superseded".to_string() }),
        );

        actions.push(RouterAction::log(
            LogLevel::Info,
            format!("registered {} {} ({}) on link {link_id}", leaf.server_type, leaf.bus_id, leaf.server_name),
            now,
        ));

        let me = self.router.config().endpoint();
        let leaf_endpoint = Endpoint::new(leaf.server_type, leaf.bus_id);
        actions.push(send_control(
            link_id,
            me,
            leaf_endpoint,
            ControlPayload::ServerRegisterReply,
            admission.accepted.clone(),
        )?);
        actions.extend(self.announce(&admission.accepted)?);
        Ok(actions)
    }

    fn handle_link_closed(&mut self, link_id: LinkId, reason: &str) -> Result<Actions<E>, DriverError> {
        let now = self.env.now();
        let Some(bus_id) = self.router.registry_mut().detach(link_id) else {
            return Ok(vec![RouterAction::log(
                LogLevel::Debug,
                format!("unregistered link {link_id} closed: {reason}"),
                now,
            )]);
        };

        let mut actions =
            vec![RouterAction::log(LogLevel::Info, format!("{bus_id} lost on link {link_id}: {reason}"), now)];

        let crashed = self.router.registry().get(bus_id).filter(|r| !r.server_type.is_infrastructure());
        if let Some(record) = crashed {
            let info = record.to_info();
            actions.extend(self.announce(&[info])?);
        }
        Ok(actions)
    }

    fn handle_route_server_report(&mut self, info: ServerInfo) -> Actions<E> {
        let now = self.env.now();
        if info.server_type != ServerType::ROUTE_SERVER {
            return vec![RouterAction::log(
                LogLevel::Warn,
                format!("ignoring report for {} {}: not a route server", info.server_type, info.bus_id),
                now,
            )];
        }

        let bus_id = info.bus_id;
        let url = info.url.clone();
        let upsert = self.router.registry_mut().upsert(info);
        let link = self.router.registry().get(bus_id).and_then(|r| r.link);

        match (upsert, link) {
            (Upsert::UrlChanged { previous_url }, Some(old)) => {
                self.router.registry_mut().detach(old);
                self.dialing.insert(bus_id);
                vec![
                    RouterAction::log(
                        LogLevel::Info,
                        format!("route server {bus_id} moved from {previous_url} to {url}"),
                        now,
                    ),
                    RouterAction::CloseLink { link_id: old, reason: "route server moved".to_string() },
                    RouterAction::Connect { bus_id, url },
                ]
            },
            (_, Some(_)) => Vec::new(),
            (_, None) if self.dialing.contains(&bus_id) => Vec::new(),
            (_, None) => {
                self.dialing.insert(bus_id);
                vec![RouterAction::Connect { bus_id, url }]
            },
        }
    }

    fn handle_unregister(&mut self, bus_id: BusId) -> Result<Actions<E>, DriverError> {
        let now = self.env.now();
        let Some(record) = self.router.registry_mut().unregister(bus_id) else {
            return Ok(vec![RouterAction::log(LogLevel::Debug, format!("unregister of unknown {bus_id}"), now)]);
        };
        self.dialing.remove(&bus_id);

        let mut actions = vec![RouterAction::log(LogLevel::Info, format!("unregistered {bus_id}"), now)];
        if let Some(link_id) = record.link {
            actions.push(RouterAction::CloseLink { link_id, reason: "unregistered".to_string() });
        }
        if !record.server_type.is_infrastructure() {
            let mut gone = record.info;
            gone.state = ServerState::Crash;
            actions.extend(self.announce(&[gone])?);
        }
        Ok(actions)
    }

    fn handle_tick(&mut self) -> Result<Actions<E>, DriverError> {
        let now = self.env.now();
        let mut actions = Vec::new();

        if is_due(self.last_announce, now, self.config.announce_interval) {
            self.last_announce = Some(now);
            let leaves = leaf_snapshot(self.router.registry());
            if !leaves.is_empty() {
                actions.extend(self.announce(&leaves)?);
            }
        }

        if is_due(self.last_redial, now, self.config.reconnect_interval) {
            self.last_redial = Some(now);
            actions.extend(self.redial());
        }

        Ok(actions)
    }

    /// `RouteAnnounce` of `servers` to every live route server.
    fn announce(&self, servers: &[ServerInfo]) -> Result<Actions<E>, DriverError> {
        let me = self.router.config().endpoint();
        live_peers(self.router.registry(), ServerType::ROUTE_SERVER)
            .into_iter()
            .map(|(bus_id, link_id)| {
                let peer = Endpoint::new(ServerType::ROUTE_SERVER, bus_id);
                send_control(link_id, me, peer, ControlPayload::RouteAnnounce, servers.to_vec())
            })
            .collect()
    }

    /// Dial every known route server that has no link and no dial in flight.
    fn redial(&mut self) -> Actions<E> {
        let lost: Vec<_> = self
            .router
            .registry()
            .all_by_type(ServerType::ROUTE_SERVER, CrossScope::Any)
            .filter(|r| !r.is_live() && !r.info.url.is_empty() && !self.dialing.contains(&r.bus_id))
            .map(|r| (r.bus_id, r.info.url.clone()))
            .collect();

        lost.into_iter()
            .map(|(bus_id, url)| {
                self.dialing.insert(bus_id);
                RouterAction::Connect { bus_id, url }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use busroute_core::PeerState;
    use busroute_proto::RouteCode;

    use super::*;

    #[derive(Clone)]
    struct TestEnv;

    impl Environment for TestEnv {
        type Instant = Instant;

        #[allow(clippy::disallowed_methods)]
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(7);
        }
    }

    const LEAF_LINK: LinkId = 1;
    const RS_LINK: LinkId = 50;

    fn id(addr: &str) -> BusId {
        BusId::parse(addr).unwrap()
    }

    fn agent() -> RouteAgentDriver<TestEnv> {
        let node = NodeConfig::new(id("1.1.3.1"), "agent").with_url("tcp://agent");
        RouteAgentDriver::new(TestEnv, node, DriverConfig::default())
    }

    fn register(leaf: ServerInfo) -> Packet {
        ControlPayload::ServerRegister(vec![leaf.clone()].into())
            .into_packet(Endpoint::of(leaf.bus_id), Endpoint::of(id("1.1.3.1")))
            .unwrap()
    }

    fn sends(actions: &[RouterAction<Instant>]) -> Vec<(LinkId, ControlPayload)> {
        actions
            .iter()
            .filter_map(|a| match a {
                RouterAction::Send { link_id, packet } if packet.header.is_control() => {
                    Some((*link_id, ControlPayload::from_packet(packet).unwrap()))
                },
                _ => None,
            })
            .collect()
    }

    fn connect_route_server(driver: &mut RouteAgentDriver<TestEnv>) -> Vec<RouterAction<Instant>> {
        let info = ServerInfo::new(id("1.0.2.1"), "rs").with_url("tcp://rs");
        driver.process_event(RouterEvent::RouteServerReport { info }).unwrap();
        driver.process_event(RouterEvent::LinkConnected { link_id: RS_LINK, peer: Some(id("1.0.2.1")) }).unwrap()
    }

    #[test]
    fn leaf_registration_replies_and_binds() {
        let mut driver = agent();
        let leaf = ServerInfo::new(id("1.1.5.1"), "game-1");

        let actions =
            driver.process_event(RouterEvent::PacketReceived { link_id: LEAF_LINK, packet: register(leaf.clone()) }).unwrap();

        assert_eq!(sends(&actions), vec![(LEAF_LINK, ControlPayload::ServerRegisterReply(vec![leaf].into()))]);
        assert_eq!(driver.router().registry().by_link(LEAF_LINK).unwrap().state, PeerState::Registered);
    }

    #[test]
    fn reregistration_on_new_link_closes_old_one() {
        let mut driver = agent();
        let leaf = ServerInfo::new(id("1.1.5.1"), "game-1");
        driver.process_event(RouterEvent::PacketReceived { link_id: LEAF_LINK, packet: register(leaf.clone()) }).unwrap();

        let actions =
            driver.process_event(RouterEvent::PacketReceived { link_id: 2, packet: register(leaf.clone()) }).unwrap();

        assert!(actions.contains(&RouterAction::CloseLink { link_id: LEAF_LINK, reason: "superseded".to_string() }));
        assert_eq!(sends(&actions), vec![(2, ControlPayload::ServerRegisterReply(vec![leaf].into()))]);
        assert_eq!(driver.router().registry().by_link(2).unwrap().bus_id, id("1.1.5.1"));
        assert!(driver.router().registry().by_link(LEAF_LINK).is_none());
    }

    #[test]
    fn rejected_registration_closes_link() {
        let mut driver = agent();
        let leaf = ServerInfo::new(id("1.1.5.1"), "game-1").cross_server(true);

        let actions =
            driver.process_event(RouterEvent::PacketReceived { link_id: LEAF_LINK, packet: register(leaf) }).unwrap();

        assert!(actions.iter().any(|a| matches!(a, RouterAction::Log { level: LogLevel::Warn, .. })));
        assert!(actions.iter().any(|a| matches!(a, RouterAction::CloseLink { link_id: LEAF_LINK, .. })));
        assert!(driver.router().registry().is_empty());
    }

    #[test]
    fn report_dials_once() {
        let mut driver = agent();
        let info = ServerInfo::new(id("1.0.2.1"), "rs").with_url("tcp://rs");

        let first = driver.process_event(RouterEvent::RouteServerReport { info: info.clone() }).unwrap();
        let second = driver.process_event(RouterEvent::RouteServerReport { info }).unwrap();

        assert_eq!(first, vec![RouterAction::Connect { bus_id: id("1.0.2.1"), url: "tcp://rs".to_string() }]);
        assert!(second.is_empty());
    }

    #[test]
    fn connected_route_server_gets_register_and_leaf_set() {
        let mut driver = agent();
        let leaf = ServerInfo::new(id("1.1.5.1"), "game-1");
        driver.process_event(RouterEvent::PacketReceived { link_id: LEAF_LINK, packet: register(leaf.clone()) }).unwrap();

        let actions = connect_route_server(&mut driver);

        let sent = sends(&actions);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, RS_LINK);
        assert_eq!(sent[0].1.opcode(), busroute_proto::ControlOpcode::ServerRegister);
        assert_eq!(sent[0].1.servers()[0].bus_id, id("1.1.3.1"));
        assert_eq!(sent[1], (RS_LINK, ControlPayload::RouteAnnounce(vec![leaf].into())));
    }

    #[test]
    fn registration_is_announced_to_live_route_servers() {
        let mut driver = agent();
        connect_route_server(&mut driver);
        let leaf = ServerInfo::new(id("1.1.5.1"), "game-1");

        let actions =
            driver.process_event(RouterEvent::PacketReceived { link_id: LEAF_LINK, packet: register(leaf.clone()) }).unwrap();

        assert!(sends(&actions).contains(&(RS_LINK, ControlPayload::RouteAnnounce(vec![leaf].into()))));
    }

    #[test]
    fn leaf_disconnect_announces_crash() {
        let mut driver = agent();
        connect_route_server(&mut driver);
        let leaf = ServerInfo::new(id("1.1.5.1"), "game-1");
        driver.process_event(RouterEvent::PacketReceived { link_id: LEAF_LINK, packet: register(leaf) }).unwrap();

        let actions = driver
            .process_event(RouterEvent::LinkClosed { link_id: LEAF_LINK, reason: "eof".to_string() })
            .unwrap();

        let sent = sends(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.servers()[0].state, ServerState::Crash);
        assert_eq!(driver.router().registry().get(id("1.1.5.1")).unwrap().state, PeerState::Crashed);
    }

    #[test]
    fn tick_announces_at_most_once_per_interval() {
        let mut driver = agent();
        connect_route_server(&mut driver);
        let leaf = ServerInfo::new(id("1.1.5.1"), "game-1");
        driver.process_event(RouterEvent::PacketReceived { link_id: LEAF_LINK, packet: register(leaf) }).unwrap();

        let first = driver.process_event(RouterEvent::Tick).unwrap();
        let second = driver.process_event(RouterEvent::Tick).unwrap();

        assert_eq!(sends(&first).len(), 1);
        assert!(sends(&second).is_empty());
    }

    #[test]
    fn data_from_unregistered_link_is_rejected() {
        let mut driver = agent();
        let packet = Packet::application(9, 1, Endpoint::of(id("1.1.5.1")), Endpoint::of(id("1.1.7.1")), &b"x"[..]);

        let result = driver.process_event(RouterEvent::PacketReceived { link_id: 77, packet });

        assert!(matches!(result, Err(DriverError::UnknownLink(77))));
    }

    #[test]
    fn miss_without_route_server_bounces_to_sender() {
        let mut driver = agent();
        let leaf = ServerInfo::new(id("1.1.5.1"), "game-1");
        driver.process_event(RouterEvent::PacketReceived { link_id: LEAF_LINK, packet: register(leaf) }).unwrap();
        let packet = Packet::application(9, 1, Endpoint::of(id("1.1.5.1")), Endpoint::of(id("1.2.7.1")), &b"x"[..]);

        let actions = driver.process_event(RouterEvent::PacketReceived { link_id: LEAF_LINK, packet }).unwrap();

        let bounced: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                RouterAction::Send { link_id, packet } => Some((*link_id, packet.err_code())),
                _ => None,
            })
            .collect();
        assert_eq!(bounced, vec![(LEAF_LINK, RouteCode::DestNotExist)]);
    }

    #[test]
    fn route_server_loss_triggers_redial() {
        let mut driver = agent();
        connect_route_server(&mut driver);
        driver.process_event(RouterEvent::Tick).unwrap();

        driver.process_event(RouterEvent::LinkClosed { link_id: RS_LINK, reason: "reset".to_string() }).unwrap();
        driver.last_redial = None;

        let connects: Vec<_> = driver
            .process_event(RouterEvent::Tick)
            .unwrap()
            .into_iter()
            .filter_map(|a| match a {
                RouterAction::Connect { bus_id, .. } => Some(bus_id),
                _ => None,
            })
            .collect();

        assert_eq!(connects, vec![id("1.0.2.1")]);
    }

    #[test]
    fn moved_route_server_is_redialed() {
        let mut driver = agent();
        connect_route_server(&mut driver);
        let moved = ServerInfo::new(id("1.0.2.1"), "rs").with_url("tcp://rs-new");

        let actions = driver.process_event(RouterEvent::RouteServerReport { info: moved }).unwrap();

        assert!(actions.contains(&RouterAction::CloseLink { link_id: RS_LINK, reason: "route server moved".to_string() }));
        assert!(actions.contains(&RouterAction::Connect { bus_id: id("1.0.2.1"), url: "tcp://rs-new".to_string() }));
        assert!(driver.router().registry().get_live(id("1.0.2.1")).is_none());
    }

    #[test]
    fn unregister_closes_link_and_announces() {
        let mut driver = agent();
        connect_route_server(&mut driver);
        let leaf = ServerInfo::new(id("1.1.5.1"), "game-1");
        driver.process_event(RouterEvent::PacketReceived { link_id: LEAF_LINK, packet: register(leaf) }).unwrap();

        let actions = driver.process_event(RouterEvent::Unregister { bus_id: id("1.1.5.1") }).unwrap();

        assert!(actions.iter().any(|a| matches!(a, RouterAction::CloseLink { link_id: LEAF_LINK, .. })));
        assert_eq!(sends(&actions)[0].1.servers()[0].state, ServerState::Crash);
        assert!(driver.router().registry().get(id("1.1.5.1")).is_none());
    }
}
