//! Result types shared by both routers.

use busroute_proto::{Packet, RouteCode};

use crate::{classifier::RoutingClass, registry::LinkId};

/// One packet to put on one link, unmodified apart from its addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    /// Outgoing link
    pub link: LinkId,
    /// Packet to send
    pub packet: Packet,
}

/// What became of a routed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Sent on toward its destination. A fan-out that found no recipient
    /// reports zero copies.
    Dispatched {
        /// Number of forwards produced
        copies: usize,
    },
    /// Sent back toward its sender carrying an error code.
    Bounced(RouteCode),
    /// A bounce notice whose sender is gone. Nothing was sent.
    Undeliverable,
}

/// Full routing decision for one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Class the destination resolved to. `None` for bounce notices, which
    /// are never classified.
    pub class: Option<RoutingClass>,
    /// Outcome
    pub outcome: RouteOutcome,
    /// Packets to send
    pub forwards: Vec<Forward>,
}

impl Dispatch {
    pub(crate) fn forwarded(class: Option<RoutingClass>, forwards: Vec<Forward>) -> Self {
        Self { class, outcome: RouteOutcome::Dispatched { copies: forwards.len() }, forwards }
    }

    pub(crate) fn single(class: Option<RoutingClass>, link: LinkId, packet: Packet) -> Self {
        Self::forwarded(class, vec![Forward { link, packet }])
    }

    /// Return `packet` on the link it came from with `code` set.
    pub(crate) fn bounce(class: Option<RoutingClass>, ingress: LinkId, packet: Packet, code: RouteCode) -> Self {
        Self {
            class,
            outcome: RouteOutcome::Bounced(code),
            forwards: vec![Forward { link: ingress, packet: packet.with_err_code(code) }],
        }
    }

    pub(crate) fn undeliverable() -> Self {
        Self { class: None, outcome: RouteOutcome::Undeliverable, forwards: Vec::new() }
    }

    /// Whether the packet went back toward its sender.
    #[must_use]
    pub fn is_bounce(&self) -> bool {
        matches!(self.outcome, RouteOutcome::Bounced(_))
    }
}
