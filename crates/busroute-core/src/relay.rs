//! Route server routing.
//!
//! A route server only holds links to agents. Every leaf it knows about was
//! announced by an agent and carries that agent as its owner, so resolving a
//! destination means finding the owner and forwarding on the owner's link.
//! Zone and broadcast classes fan out once per distinct owning agent; the
//! agents do the final fan-out to their leaves.

use std::collections::{BTreeMap, HashSet};

use busroute_proto::{BusId, Packet, RouteCode, ServerType};

use crate::{
    classifier::RoutingClass,
    config::NodeConfig,
    error::RouteError,
    registry::{CrossScope, LinkId, PeerState, ServerRecord, ServerRegistry},
    router::{Dispatch, Forward},
};

/// Routing logic of a route server.
#[derive(Debug)]
pub struct RouteServerRouter {
    config: NodeConfig,
    registry: ServerRegistry,
}

impl RouteServerRouter {
    /// Create a router over an existing registry.
    #[must_use]
    pub fn new(config: NodeConfig, registry: ServerRegistry) -> Self {
        Self { config, registry }
    }

    /// Local node configuration.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Known agents and the servers they announced.
    #[must_use]
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Known agents and servers, for the registration protocol.
    pub fn registry_mut(&mut self) -> &mut ServerRegistry {
        &mut self.registry
    }

    /// Route a packet that arrived from an agent on `ingress`.
    ///
    /// # Errors
    ///
    /// `RouteError::UnknownLink` if `ingress` is not a registered agent's
    /// link. Such a packet has no one to bounce to.
    pub fn route(&mut self, ingress: LinkId, packet: Packet) -> Result<Dispatch, RouteError> {
        let from_agent = self
            .registry
            .by_link(ingress)
            .is_some_and(|r| r.server_type == ServerType::ROUTE_AGENT);
        if !from_agent {
            return Err(RouteError::UnknownLink(ingress));
        }

        if packet.err_code().is_bounce() {
            return Ok(self.redirect_bounce(packet));
        }

        let class = self.config.band.classify(packet.dst().bus_id);
        Ok(self.dispatch(ingress, packet, class))
    }

    fn redirect_bounce(&self, packet: Packet) -> Dispatch {
        let sender = self.registry.get(packet.src().bus_id);
        let link = sender.and_then(|r| r.link.or_else(|| r.owner_agent.and_then(|a| self.agent_link(a))));
        match link {
            Some(link) => Dispatch::single(None, link, packet),
            None => Dispatch::undeliverable(),
        }
    }

    fn dispatch(&mut self, ingress: LinkId, packet: Packet, class: RoutingClass) -> Dispatch {
        let target = packet.dst().server_type;
        let from = packet.src().bus_id;
        let is_cross = self.config.is_cross_server;
        let own = CrossScope::matching(is_cross);
        let cls = Some(class);

        let (links, real): (Vec<LinkId>, Option<BusId>) = match class {
            RoutingClass::Direct(id) => (self.next_hop(id).into_iter().collect(), None),
            RoutingClass::LocalAny => (self.pick(target, own).into_iter().collect(), None),
            RoutingClass::CrossAny => (self.pick(target, CrossScope::Cross).into_iter().collect(), None),
            RoutingClass::LocalIndexed(index) => match from.sibling(target, index) {
                Ok(real) => (self.next_hop(real).into_iter().collect(), Some(real)),
                Err(_) => (Vec::new(), None),
            },
            RoutingClass::CrossIndexed(_) if !is_cross => {
                return Dispatch::bounce(cls, ingress, packet, RouteCode::NotSupported);
            },
            RoutingClass::CrossIndexed(index) => match self.config.bus_id.sibling(target, index) {
                Ok(real) => (self.next_hop(real).into_iter().collect(), Some(real)),
                Err(_) => (Vec::new(), None),
            },
            RoutingClass::LocalZone(zone) | RoutingClass::CrossZone(zone)
                if !is_cross && zone != u32::from(from.zone()) =>
            {
                return Dispatch::bounce(cls, ingress, packet, RouteCode::NotSupported);
            },
            RoutingClass::LocalZone(zone) | RoutingClass::CrossZone(zone) => {
                (self.owning_agents(target, CrossScope::Any, |agent| u32::from(agent.zone()) == zone), None)
            },
            RoutingClass::LocalBroadcast | RoutingClass::LocalAndCrossBroadcast => {
                (self.owning_agents(target, own, |_| true), None)
            },
            RoutingClass::CrossBroadcast => (self.owning_agents(target, CrossScope::Cross, |_| true), None),
            RoutingClass::GlobalBroadcast => (self.owning_agents(target, CrossScope::Any, |_| true), None),
        };

        if links.is_empty() {
            return Dispatch::bounce(cls, ingress, packet, RouteCode::DestNotExist);
        }

        let packet = match real {
            Some(real) => {
                let src = packet.src();
                let dst = packet.dst().with_bus_id(real);
                packet.readdressed(src, dst)
            },
            None => packet,
        };
        let forwards = links.into_iter().map(|link| Forward { link, packet: packet.clone() }).collect();
        Dispatch::forwarded(cls, forwards)
    }

    /// Link toward a reachable server: its own, or its owner agent's.
    fn next_hop(&self, id: BusId) -> Option<LinkId> {
        let record = self.registry.get(id)?;
        if let Some(link) = record.link {
            return Some(link);
        }
        if record.state != PeerState::Registered {
            return None;
        }
        record.owner_agent.and_then(|agent| self.agent_link(agent))
    }

    fn pick(&mut self, target: ServerType, scope: CrossScope) -> Option<LinkId> {
        let live_agents = self.live_agents();
        let (link, owner) = self
            .registry
            .select_random_by(target, scope, |r| is_reachable(r, &live_agents))
            .map(|r| (r.link, r.owner_agent))?;
        link.or_else(|| owner.and_then(|agent| self.agent_link(agent)))
    }

    /// Distinct links of agents owning a reachable server of `target`, in
    /// agent address order.
    fn owning_agents(
        &self,
        target: ServerType,
        scope: CrossScope,
        agent_filter: impl Fn(BusId) -> bool,
    ) -> Vec<LinkId> {
        let live_agents = self.live_agents();
        let mut agents = BTreeMap::new();
        for record in self.registry.all_by_type(target, scope) {
            if !is_reachable(record, &live_agents) {
                continue;
            }
            let hop = match (record.link, record.owner_agent) {
                (Some(link), _) => Some((record.bus_id, link)),
                (None, Some(agent)) => self.agent_link(agent).map(|link| (agent, link)),
                (None, None) => None,
            };
            if let Some((agent, link)) = hop
                && agent_filter(agent)
            {
                agents.insert(agent, link);
            }
        }
        agents.into_values().collect()
    }

    fn live_agents(&self) -> HashSet<BusId> {
        self.registry
            .all_by_type(ServerType::ROUTE_AGENT, CrossScope::Any)
            .filter(|r| r.is_live())
            .map(|r| r.bus_id)
            .collect()
    }

    fn agent_link(&self, agent: BusId) -> Option<LinkId> {
        self.registry.get_live(agent).and_then(|r| r.link)
    }
}

fn is_reachable(record: &ServerRecord, live_agents: &HashSet<BusId>) -> bool {
    record.is_live()
        || (record.state == PeerState::Registered
            && record.owner_agent.is_some_and(|agent| live_agents.contains(&agent)))
}
