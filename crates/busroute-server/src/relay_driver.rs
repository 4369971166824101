//! Route server driver.
//!
//! Accepts agent registrations, records the leaf sets agents announce, and
//! relays data packets through [`RouteServerRouter`]. A route server never
//! dials; agents find it through discovery and connect in.

use busroute_core::{Environment, LinkId, NodeConfig, RouteServerRouter, ServerRegistry};
use busroute_proto::{BusId, ControlPayload, Endpoint, Packet, ServerInfo, ServerType};

use crate::{
    driver::{LogLevel, RouterAction, RouterEvent, describe, dispatch_actions, send_control},
    driver_error::DriverError,
    registration::{admit_agent, apply_announce},
};

type Actions<E> = Vec<RouterAction<<E as Environment>::Instant>>;

/// Action-based route server.
pub struct RouteServerDriver<E: Environment> {
    router: RouteServerRouter,
    env: E,
}

impl<E: Environment> RouteServerDriver<E> {
    /// Create a route server with an empty registry.
    pub fn new(env: E, node: NodeConfig) -> Self {
        Self { router: RouteServerRouter::new(node, ServerRegistry::new()), env }
    }

    /// Routing logic and registry.
    pub fn router(&self) -> &RouteServerRouter {
        &self.router
    }

    /// Process an event and return actions to execute.
    pub fn process_event(&mut self, event: RouterEvent) -> Result<Actions<E>, DriverError> {
        let now = self.env.now();
        match event {
            RouterEvent::LinkConnected { link_id, .. } => {
                Ok(vec![RouterAction::log(LogLevel::Debug, format!("link {link_id} accepted"), now)])
            },
            RouterEvent::ConnectFailed { bus_id, reason } => Ok(vec![RouterAction::log(
                LogLevel::Warn,
                format!("unexpected dial result for {bus_id}: {reason}"),
                now,
            )]),
            RouterEvent::PacketReceived { link_id, packet } => self.handle_packet(link_id, packet),
            RouterEvent::LinkClosed { link_id, reason } => Ok(self.handle_link_closed(link_id, &reason)),
            RouterEvent::RouteServerReport { info } => Ok(vec![RouterAction::log(
                LogLevel::Debug,
                format!("route server {} reported, nothing to dial", info.bus_id),
                now,
            )]),
            RouterEvent::Unregister { bus_id } => Ok(self.handle_unregister(bus_id)),
            RouterEvent::Tick => Ok(Vec::new()),
        }
    }

    fn handle_packet(&mut self, link_id: LinkId, packet: Packet) -> Result<Actions<E>, DriverError> {
        if packet.header.is_control() {
            return self.handle_control(link_id, ControlPayload::from_packet(&packet)?);
        }

        let summary = describe(&packet, &self.router.config().band);
        let dispatch = self.router.route(link_id, packet)?;
        Ok(dispatch_actions(dispatch, &summary, self.env.now()))
    }

    fn handle_control(&mut self, link_id: LinkId, payload: ControlPayload) -> Result<Actions<E>, DriverError> {
        match payload {
            ControlPayload::ServerRegister(list) => self.handle_agent_register(link_id, list.servers),
            ControlPayload::RouteAnnounce(list) => self.handle_announce(link_id, list.servers),
            payload @ ControlPayload::ServerRegisterReply(_) => {
                Err(DriverError::UnexpectedControl { link_id, opcode: payload.opcode() })
            },
        }
    }

    fn handle_agent_register(&mut self, link_id: LinkId, servers: Vec<ServerInfo>) -> Result<Actions<E>, DriverError> {
        let now = self.env.now();
        let admission = admit_agent(self.router.registry_mut(), link_id, servers)?;

        let mut actions: Actions<E> = admission
            .rejected
            .iter()
            .map(|(info, rejection)| {
                RouterAction::log(
                    LogLevel::Warn,
                    format!("rejected {} {} on link {link_id}: {rejection}", info.server_type, info.bus_id),
                    now,
                )
            })
            .collect();

        let Some(agent) = admission.accepted.first() else {
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
            format!("agent {} ({}) registered on link {link_id}", agent.bus_id, agent.server_name),
            now,
        ));
        actions.push(send_control(
            link_id,
            self.router.config().endpoint(),
            Endpoint::new(ServerType::ROUTE_AGENT, agent.bus_id),
            ControlPayload::ServerRegisterReply,
            admission.accepted.clone(),
        )?);
        Ok(actions)
    }

    fn handle_announce(&mut self, link_id: LinkId, servers: Vec<ServerInfo>) -> Result<Actions<E>, DriverError> {
        let now = self.env.now();
        let owner = self
            .router
            .registry()
            .by_link(link_id)
            .filter(|r| r.server_type == ServerType::ROUTE_AGENT)
            .map(|r| r.bus_id)
            .ok_or(DriverError::UnknownLink(link_id))?;

        let announcement = apply_announce(self.router.registry_mut(), owner, servers)?;

        let mut actions = vec![RouterAction::log(
            LogLevel::Debug,
            format!("agent {owner} announced {} servers", announcement.applied),
            now,
        )];
        actions.extend(announcement.conflicts.iter().map(|c| {
            RouterAction::log(
                LogLevel::Warn,
                format!("{} moved from agent {} to agent {}", c.server, c.previous, c.current),
                now,
            )
        }));
        actions.extend(announcement.ignored.iter().map(|info| {
            RouterAction::log(
                LogLevel::Warn,
                format!("agent {owner} announced infrastructure {} {}", info.server_type, info.bus_id),
                now,
            )
        }));
        Ok(actions)
    }

    fn handle_link_closed(&mut self, link_id: LinkId, reason: &str) -> Actions<E> {
        let message = match self.router.registry_mut().detach(link_id) {
            Some(agent) => format!("agent {agent} lost on link {link_id}: {reason}"),
            None => format!("unregistered link {link_id} closed: {reason}"),
        };
        vec![RouterAction::log(LogLevel::Info, message, self.env.now())]
    }

    fn handle_unregister(&mut self, bus_id: BusId) -> Actions<E> {
        let now = self.env.now();
        let Some(record) = self.router.registry_mut().unregister(bus_id) else {
            return vec![RouterAction::log(LogLevel::Debug, format!("unregister of unknown {bus_id}"), now)];
        };

        let mut actions = vec![RouterAction::log(LogLevel::Info, format!("unregistered {bus_id}"), now)];
        if let Some(link_id) = record.link {
            actions.push(RouterAction::CloseLink { link_id, reason: "unregistered".to_string() });
        }
        actions
    }
}
