//! Route agent routing.
//!
//! An agent sits in front of the leaf servers of one zone. Packets reach it
//! on two kinds of link:
//!
//! - **Upstream** (from a leaf): deliver locally when the destination is
//!   attached here, otherwise escalate to a route server, which holds the
//!   wider picture. Broadcasts always escalate so the route server can fan
//!   them out to every agent, this one included.
//! - **Downstream** (from a route server): the route server already picked
//!   this agent. Deliver locally or bounce back; broadcasts fan out to every
//!   matching local server.
//!
//! Packets carrying a bounce code are never classified. They go straight
//! back to the sender named in their source field.

use busroute_proto::{BusId, Packet, RouteCode, ServerType};

use crate::{
    classifier::RoutingClass,
    config::NodeConfig,
    registry::{CrossScope, LinkId, ServerRegistry},
    router::{Dispatch, Forward},
};

/// Routing logic of a route agent.
#[derive(Debug)]
pub struct RouteAgentRouter {
    config: NodeConfig,
    registry: ServerRegistry,
}

impl RouteAgentRouter {
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

    /// Known servers.
    #[must_use]
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Known servers, for the registration protocol.
    pub fn registry_mut(&mut self) -> &mut ServerRegistry {
        &mut self.registry
    }

    /// Route a packet that arrived on `ingress`.
    pub fn route(&mut self, ingress: LinkId, packet: Packet) -> Dispatch {
        if packet.err_code().is_bounce() {
            return self.redirect_bounce(packet);
        }

        let class = self.config.band.classify(packet.dst().bus_id);
        let from_route_server = self
            .registry
            .by_link(ingress)
            .is_some_and(|r| r.server_type == ServerType::ROUTE_SERVER);

        if from_route_server {
            self.route_downstream(ingress, packet, class)
        } else {
            self.route_upstream(ingress, packet, class)
        }
    }

    fn redirect_bounce(&self, packet: Packet) -> Dispatch {
        match self.live_link(packet.src().bus_id) {
            Some(link) => Dispatch::single(None, link, packet),
            None => Dispatch::undeliverable(),
        }
    }

    fn route_upstream(&mut self, ingress: LinkId, packet: Packet, class: RoutingClass) -> Dispatch {
        let target = packet.dst().server_type;
        let own = self.own_scope();
        let is_cross = self.config.is_cross_server;
        let cls = Some(class);

        match class {
            RoutingClass::Direct(id) => match self.live_link(id) {
                Some(link) => Dispatch::single(cls, link, packet),
                None => self.escalate(cls, ingress, packet, own),
            },
            RoutingClass::LocalAny => match self.pick(target, own) {
                Some(link) => Dispatch::single(cls, link, packet),
                None => self.escalate(cls, ingress, packet, own),
            },
            RoutingClass::CrossAny => match self.pick(target, CrossScope::Cross) {
                Some(link) => Dispatch::single(cls, link, packet),
                None => self.escalate(cls, ingress, packet, CrossScope::Cross),
            },
            RoutingClass::LocalIndexed(index) => match self.resolve_indexed(target, index) {
                Some((real, link)) => Dispatch::single(cls, link, retarget(packet, real)),
                None => self.escalate(cls, ingress, packet, own),
            },
            RoutingClass::CrossIndexed(_) if !is_cross => {
                Dispatch::bounce(cls, ingress, packet, RouteCode::NotSupported)
            },
            RoutingClass::CrossIndexed(index) => match self.resolve_indexed(target, index) {
                Some((real, link)) => Dispatch::single(cls, link, retarget(packet, real)),
                None => self.escalate(cls, ingress, packet, CrossScope::Cross),
            },
            RoutingClass::LocalZone(zone) | RoutingClass::CrossZone(zone) => {
                if zone == u32::from(self.config.zone()) {
                    match self.pick(target, own) {
                        Some(link) => Dispatch::single(cls, link, packet),
                        None => self.escalate(cls, ingress, packet, own),
                    }
                } else if is_cross {
                    self.escalate(cls, ingress, packet, CrossScope::Cross)
                } else {
                    Dispatch::bounce(cls, ingress, packet, RouteCode::NotSupported)
                }
            },
            RoutingClass::LocalBroadcast => self.escalate(cls, ingress, packet, own),
            RoutingClass::CrossBroadcast => self.escalate(cls, ingress, packet, CrossScope::Cross),
            RoutingClass::LocalAndCrossBroadcast => {
                // One route server per domain: the local one only when this
                // agent is not itself in the cross domain.
                let mut links = Vec::with_capacity(2);
                if !is_cross && let Some(link) = self.pick(ServerType::ROUTE_SERVER, CrossScope::Local) {
                    links.push(link);
                }
                if let Some(link) = self.pick(ServerType::ROUTE_SERVER, CrossScope::Cross) {
                    links.push(link);
                }
                if links.is_empty() {
                    return Dispatch::bounce(cls, ingress, packet, RouteCode::DestNotExist);
                }
                let forwards =
                    links.into_iter().map(|link| Forward { link, packet: packet.clone() }).collect();
                Dispatch::forwarded(cls, forwards)
            },
            RoutingClass::GlobalBroadcast => {
                let link = self
                    .pick(ServerType::ROUTE_SERVER, CrossScope::Cross)
                    .or_else(|| self.pick(ServerType::ROUTE_SERVER, own));
                match link {
                    Some(link) => Dispatch::single(cls, link, packet),
                    None => Dispatch::bounce(cls, ingress, packet, RouteCode::DestNotExist),
                }
            },
        }
    }

    fn route_downstream(&mut self, ingress: LinkId, packet: Packet, class: RoutingClass) -> Dispatch {
        let target = packet.dst().server_type;
        let own = self.own_scope();
        let own_zone = u32::from(self.config.zone());
        let cls = Some(class);

        let hit = match class {
            RoutingClass::LocalBroadcast | RoutingClass::LocalAndCrossBroadcast => {
                return self.fan_out(cls, &packet, target, own);
            },
            RoutingClass::CrossBroadcast => return self.fan_out(cls, &packet, target, CrossScope::Cross),
            RoutingClass::GlobalBroadcast => return self.fan_out(cls, &packet, target, CrossScope::Any),
            RoutingClass::CrossZone(zone) if zone == own_zone => {
                return self.fan_out(cls, &packet, target, own);
            },
            RoutingClass::CrossIndexed(_) if !self.config.is_cross_server => {
                return Dispatch::bounce(cls, ingress, packet, RouteCode::NotSupported);
            },
            RoutingClass::Direct(id) => self.live_link(id).map(|link| (link, None)),
            RoutingClass::LocalAny => self.pick(target, own).map(|link| (link, None)),
            RoutingClass::CrossAny => self.pick(target, CrossScope::Cross).map(|link| (link, None)),
            RoutingClass::LocalIndexed(index) | RoutingClass::CrossIndexed(index) => {
                self.resolve_indexed(target, index).map(|(real, link)| (link, Some(real)))
            },
            RoutingClass::LocalZone(zone) if zone == own_zone => {
                self.pick(target, own).map(|link| (link, None))
            },
            RoutingClass::LocalZone(_) | RoutingClass::CrossZone(_) => None,
        };

        match hit {
            Some((link, None)) => Dispatch::single(cls, link, packet),
            Some((link, Some(real))) => Dispatch::single(cls, link, retarget(packet, real)),
            None => Dispatch::bounce(cls, ingress, packet, RouteCode::DestNotExist),
        }
    }

    /// Forward to a route server in `scope`, or bounce to the sender.
    fn escalate(
        &mut self,
        class: Option<RoutingClass>,
        ingress: LinkId,
        packet: Packet,
        scope: CrossScope,
    ) -> Dispatch {
        match self.pick(ServerType::ROUTE_SERVER, scope) {
            Some(link) => Dispatch::single(class, link, packet),
            None => Dispatch::bounce(class, ingress, packet, RouteCode::DestNotExist),
        }
    }

    fn fan_out(
        &self,
        class: Option<RoutingClass>,
        packet: &Packet,
        target: ServerType,
        scope: CrossScope,
    ) -> Dispatch {
        let forwards = self
            .registry
            .all_by_type(target, scope)
            .filter_map(|r| r.link)
            .map(|link| Forward { link, packet: packet.clone() })
            .collect();
        Dispatch::forwarded(class, forwards)
    }

    fn resolve_indexed(&self, target: ServerType, index: u32) -> Option<(BusId, LinkId)> {
        let real = self.config.bus_id.sibling(target, index).ok()?;
        self.live_link(real).map(|link| (real, link))
    }

    fn pick(&mut self, target: ServerType, scope: CrossScope) -> Option<LinkId> {
        self.registry.select_random(target, scope).and_then(|r| r.link)
    }

    fn live_link(&self, id: BusId) -> Option<LinkId> {
        self.registry.get_live(id).and_then(|r| r.link)
    }

    fn own_scope(&self) -> CrossScope {
        CrossScope::matching(self.config.is_cross_server)
    }
}

/// Point a packet at a resolved address, keeping its target type.
fn retarget(packet: Packet, real: BusId) -> Packet {
    let src = packet.src();
    let dst = packet.dst().with_bus_id(real);
    packet.readdressed(src, dst)
}

#[cfg(test)]
mod tests {
    use busroute_proto::{Endpoint, ServerInfo};

    use super::*;
    use crate::router::RouteOutcome;

    const SENDER_LINK: LinkId = 1;
    const LOCAL_RS_LINK: LinkId = 50;
    const CROSS_RS_LINK: LinkId = 51;

    fn id(addr: &str) -> BusId {
        BusId::parse(addr).unwrap()
    }

    fn agent(is_cross: bool) -> RouteAgentRouter {
        let config = NodeConfig::new(id("1.1.3.1"), "agent").cross_server(is_cross);
        let mut router = RouteAgentRouter::new(config, ServerRegistry::new());
        attach(&mut router, ServerInfo::new(id("1.1.5.1"), "game-1").cross_server(is_cross), SENDER_LINK);
        router
    }

    fn attach(router: &mut RouteAgentRouter, info: ServerInfo, link: LinkId) {
        let bus_id = info.bus_id;
        router.registry_mut().upsert(info);
        router.registry_mut().attach(bus_id, link).unwrap();
    }

    fn with_route_servers(router: &mut RouteAgentRouter) {
        attach(router, ServerInfo::new(id("1.0.2.1"), "rs-local"), LOCAL_RS_LINK);
        attach(router, ServerInfo::new(id("1.0.2.2"), "rs-cross").cross_server(true), CROSS_RS_LINK);
    }

    fn to(target: ServerType, raw_dst: u32) -> Packet {
        Packet::application(
            9,
            1,
            Endpoint::of(id("1.1.5.1")),
            Endpoint::new(target, BusId::from_raw(raw_dst)),
            &b"payload"[..],
        )
    }

    fn links(dispatch: &Dispatch) -> Vec<LinkId> {
        dispatch.forwards.iter().map(|f| f.link).collect()
    }

    #[test]
    fn direct_hit_forwards_on_target_link() {
        let mut router = agent(false);
        attach(&mut router, ServerInfo::new(id("1.1.7.2"), "logic-2"), 20);

        let packet = to(ServerType::LOGIC, id("1.1.7.2").raw());
        let dispatch = router.route(SENDER_LINK, packet.clone());

        assert_eq!(dispatch.outcome, RouteOutcome::Dispatched { copies: 1 });
        assert_eq!(dispatch.forwards, vec![Forward { link: 20, packet }]);
    }

    #[test]
    fn direct_miss_escalates_to_matching_route_server() {
        let mut router = agent(false);
        with_route_servers(&mut router);

        let dispatch = router.route(SENDER_LINK, to(ServerType::LOGIC, id("1.2.7.2").raw()));

        assert_eq!(links(&dispatch), vec![LOCAL_RS_LINK]);
        assert_eq!(dispatch.forwards[0].packet.err_code(), RouteCode::None);
    }

    #[test]
    fn direct_miss_without_route_server_bounces_once() {
        let mut router = agent(false);

        let dispatch = router.route(SENDER_LINK, to(ServerType::LOGIC, id("1.2.7.2").raw()));

        assert_eq!(dispatch.outcome, RouteOutcome::Bounced(RouteCode::DestNotExist));
        assert_eq!(links(&dispatch), vec![SENDER_LINK]);
        assert_eq!(dispatch.forwards[0].packet.err_code(), RouteCode::DestNotExist);
    }

    #[test]
    fn crashed_target_is_treated_as_missing() {
        let mut router = agent(false);
        with_route_servers(&mut router);
        attach(&mut router, ServerInfo::new(id("1.1.7.2"), "logic-2"), 20);
        router.registry_mut().detach(20);

        let dispatch = router.route(SENDER_LINK, to(ServerType::LOGIC, id("1.1.7.2").raw()));

        assert_eq!(links(&dispatch), vec![LOCAL_RS_LINK]);
    }

    #[test]
    fn cross_indexed_on_local_agent_is_not_supported() {
        let mut router = agent(false);
        with_route_servers(&mut router);
        attach(&mut router, ServerInfo::new(id("1.1.7.2"), "logic-2"), 20);

        let dispatch = router.route(SENDER_LINK, to(ServerType::LOGIC, 10_002));

        assert_eq!(dispatch.class, Some(RoutingClass::CrossIndexed(2)));
        assert_eq!(dispatch.outcome, RouteOutcome::Bounced(RouteCode::NotSupported));
        assert_eq!(links(&dispatch), vec![SENDER_LINK]);
    }

    #[test]
    fn local_indexed_resolves_in_own_zone_and_rewrites() {
        let mut router = agent(false);
        attach(&mut router, ServerInfo::new(id("1.1.7.3"), "logic-3"), 30);

        let dispatch = router.route(SENDER_LINK, to(ServerType::LOGIC, 3));

        assert_eq!(links(&dispatch), vec![30]);
        assert_eq!(dispatch.forwards[0].packet.dst(), Endpoint::of(id("1.1.7.3")));
        assert_eq!(dispatch.forwards[0].packet.src(), Endpoint::of(id("1.1.5.1")));
    }

    #[test]
    fn local_any_rotates_between_servers() {
        let mut router = agent(false);
        attach(&mut router, ServerInfo::new(id("1.1.7.1"), "logic-1"), 21);
        attach(&mut router, ServerInfo::new(id("1.1.7.2"), "logic-2"), 22);

        let picks: Vec<_> =
            (0..4).map(|_| links(&router.route(SENDER_LINK, to(ServerType::LOGIC, 0)))[0]).collect();

        assert_eq!(picks, vec![21, 22, 21, 22]);
    }

    #[test]
    fn upstream_broadcast_goes_to_one_route_server() {
        let mut router = agent(false);
        with_route_servers(&mut router);
        attach(&mut router, ServerInfo::new(id("1.1.7.1"), "logic-1"), 21);

        let dispatch = router.route(SENDER_LINK, to(ServerType::LOGIC, 40_000));

        assert_eq!(links(&dispatch), vec![LOCAL_RS_LINK]);
        assert_eq!(dispatch.forwards[0].packet.dst().bus_id.raw(), 40_000);
    }

    #[test]
    fn local_and_cross_broadcast_sends_once_per_domain() {
        let mut local = agent(false);
        with_route_servers(&mut local);
        let dispatch = local.route(SENDER_LINK, to(ServerType::LOGIC, 40_002));
        assert_eq!(links(&dispatch), vec![LOCAL_RS_LINK, CROSS_RS_LINK]);

        let mut cross = agent(true);
        with_route_servers(&mut cross);
        let dispatch = cross.route(SENDER_LINK, to(ServerType::LOGIC, 40_002));
        assert_eq!(links(&dispatch), vec![CROSS_RS_LINK]);
    }

    #[test]
    fn global_broadcast_prefers_cross_route_server() {
        let mut router = agent(false);
        with_route_servers(&mut router);
        assert_eq!(links(&router.route(SENDER_LINK, to(ServerType::LOGIC, 40_003))), vec![CROSS_RS_LINK]);

        let mut router = agent(false);
        attach(&mut router, ServerInfo::new(id("1.0.2.1"), "rs-local"), LOCAL_RS_LINK);
        assert_eq!(links(&router.route(SENDER_LINK, to(ServerType::LOGIC, 40_003))), vec![LOCAL_RS_LINK]);
    }

    #[test]
    fn broadcast_without_route_server_bounces() {
        let mut router = agent(false);
        let dispatch = router.route(SENDER_LINK, to(ServerType::LOGIC, 40_001));
        assert_eq!(dispatch.outcome, RouteOutcome::Bounced(RouteCode::DestNotExist));
    }

    #[test]
    fn foreign_zone_needs_cross_capability() {
        let mut local = agent(false);
        with_route_servers(&mut local);
        let dispatch = local.route(SENDER_LINK, to(ServerType::LOGIC, 20_002));
        assert_eq!(dispatch.outcome, RouteOutcome::Bounced(RouteCode::NotSupported));

        let mut cross = agent(true);
        with_route_servers(&mut cross);
        let dispatch = cross.route(SENDER_LINK, to(ServerType::LOGIC, 30_002));
        assert_eq!(links(&dispatch), vec![CROSS_RS_LINK]);
    }

    #[test]
    fn own_zone_selects_one_local_server() {
        let mut router = agent(false);
        attach(&mut router, ServerInfo::new(id("1.1.7.1"), "logic-1"), 21);

        let dispatch = router.route(SENDER_LINK, to(ServerType::LOGIC, 20_001));

        assert_eq!(links(&dispatch), vec![21]);
        assert_eq!(dispatch.forwards[0].packet.dst().bus_id.raw(), 20_001);
    }

    #[test]
    fn downstream_broadcast_fans_out_keeping_sentinel() {
        let mut router = agent(false);
        with_route_servers(&mut router);
        attach(&mut router, ServerInfo::new(id("1.1.7.1"), "logic-1"), 21);
        attach(&mut router, ServerInfo::new(id("1.1.7.2"), "logic-2"), 22);
        attach(&mut router, ServerInfo::new(id("1.1.7.3"), "logic-3"), 23);

        let packet = to(ServerType::LOGIC, 40_000);
        let dispatch = router.route(LOCAL_RS_LINK, packet.clone());

        assert_eq!(dispatch.outcome, RouteOutcome::Dispatched { copies: 3 });
        assert_eq!(links(&dispatch), vec![21, 22, 23]);
        for forward in &dispatch.forwards {
            assert_eq!(forward.packet, packet);
        }
    }

    #[test]
    fn downstream_fan_out_with_no_recipient_is_empty() {
        let mut router = agent(false);
        with_route_servers(&mut router);

        let dispatch = router.route(LOCAL_RS_LINK, to(ServerType::WORLD, 40_000));

        assert_eq!(dispatch.outcome, RouteOutcome::Dispatched { copies: 0 });
        assert!(dispatch.forwards.is_empty());
    }

    #[test]
    fn downstream_miss_bounces_to_route_server() {
        let mut router = agent(false);
        with_route_servers(&mut router);

        let dispatch = router.route(LOCAL_RS_LINK, to(ServerType::LOGIC, id("1.1.7.9").raw()));

        assert_eq!(dispatch.outcome, RouteOutcome::Bounced(RouteCode::DestNotExist));
        assert_eq!(links(&dispatch), vec![LOCAL_RS_LINK]);
    }

    #[test]
    fn downstream_foreign_zone_bounces() {
        let mut router = agent(false);
        with_route_servers(&mut router);
        attach(&mut router, ServerInfo::new(id("1.1.7.1"), "logic-1"), 21);

        let dispatch = router.route(LOCAL_RS_LINK, to(ServerType::LOGIC, 30_004));

        assert_eq!(links(&dispatch), vec![LOCAL_RS_LINK]);
        assert!(dispatch.is_bounce());
    }

    #[test]
    fn bounce_notice_returns_to_sender() {
        let mut router = agent(false);
        with_route_servers(&mut router);

        let notice = to(ServerType::LOGIC, id("1.2.7.2").raw()).with_err_code(RouteCode::DestNotExist);
        let dispatch = router.route(LOCAL_RS_LINK, notice.clone());

        assert_eq!(dispatch.class, None);
        assert_eq!(dispatch.forwards, vec![Forward { link: SENDER_LINK, packet: notice }]);
    }

    #[test]
    fn not_supported_notice_is_not_rerouted() {
        let mut router = agent(false);
        with_route_servers(&mut router);

        let notice = to(ServerType::LOGIC, 40_000).with_err_code(RouteCode::NotSupported);
        let dispatch = router.route(LOCAL_RS_LINK, notice);

        assert_eq!(links(&dispatch), vec![SENDER_LINK]);
    }

    #[test]
    fn bounce_notice_for_gone_sender_is_undeliverable() {
        let mut router = agent(false);
        with_route_servers(&mut router);
        router.registry_mut().detach(SENDER_LINK);

        let notice = to(ServerType::LOGIC, 5).with_err_code(RouteCode::DestNotExist);
        let dispatch = router.route(LOCAL_RS_LINK, notice);

        assert_eq!(dispatch.outcome, RouteOutcome::Undeliverable);
        assert!(dispatch.forwards.is_empty());
    }
}
