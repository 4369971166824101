//! Registration protocol.
//!
//! Registry updates behind the three control messages. Drivers decode the
//! packet, call into here, and turn the result into replies and logs.
//!
//! ```text
//!  leaf ──ServerRegister──▶ agent ──RouteAnnounce──▶ route server
//!  leaf ◀─RegisterReply─── agent ──ServerRegister──▶ route server (self)
//! ```
//!
//! A link carries exactly one registered peer. A `ServerRegister` batch
//! binds its first acceptable entry to the link and rejects the rest;
//! batches of many servers travel as `RouteAnnounce`.

use std::fmt;

use busroute_core::{LinkId, PeerState, RegistryError, ServerRecord, ServerRegistry};
use busroute_proto::{BusId, ServerInfo, ServerState, ServerType};

/// Why a registration entry was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Infrastructure types never register as leaves
    Infrastructure,
    /// Leaf cross flag differs from the agent's
    CrossMismatch,
    /// Route servers only accept agents
    NotAnAgent,
    /// The link already carries an entry from this batch
    ExtraEntry,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => f.write_str("infrastructure type cannot register as a leaf"),
            Self::CrossMismatch => f.write_str("cross-server flag does not match the agent"),
            Self::NotAnAgent => f.write_str("only route agents register with a route server"),
            Self::ExtraEntry => f.write_str("link already bound to an earlier entry"),
        }
    }
}

/// Outcome of a `ServerRegister`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Admission {
    /// Entries now bound to the link (at most one)
    pub accepted: Vec<ServerInfo>,
    /// Entries refused, with the reason
    pub rejected: Vec<(ServerInfo, Rejection)>,
    /// Links the accepted entry held before this one, to be closed
    pub superseded: Vec<LinkId>,
}

/// Server announced under a new owner agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerConflict {
    /// Announced server
    pub server: BusId,
    /// Agent that announced it before
    pub previous: BusId,
    /// Agent that announced it now (and owns it from here on)
    pub current: BusId,
}

/// Outcome of a `RouteAnnounce`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Announcement {
    /// Entries applied
    pub applied: usize,
    /// Ownership changes
    pub conflicts: Vec<OwnerConflict>,
    /// Infrastructure entries ignored
    pub ignored: Vec<ServerInfo>,
}

/// Agent side: bind a leaf registering on `link`.
///
/// # Errors
///
/// `RegistryError` only if the registry loses a record between upsert and
/// attach, which cannot happen on a single owner task.
pub fn admit_leaves(
    registry: &mut ServerRegistry,
    agent_is_cross: bool,
    link: LinkId,
    servers: Vec<ServerInfo>,
) -> Result<Admission, RegistryError> {
    admit(registry, link, servers, |info| {
        if info.server_type.is_infrastructure() {
            Some(Rejection::Infrastructure)
        } else if info.is_cross_server != agent_is_cross {
            Some(Rejection::CrossMismatch)
        } else {
            None
        }
    })
}

/// Route server side: bind an agent registering on `link`.
///
/// # Errors
///
/// See [`admit_leaves`].
pub fn admit_agent(
    registry: &mut ServerRegistry,
    link: LinkId,
    servers: Vec<ServerInfo>,
) -> Result<Admission, RegistryError> {
    admit(registry, link, servers, |info| {
        (info.server_type != ServerType::ROUTE_AGENT).then_some(Rejection::NotAnAgent)
    })
}

fn admit(
    registry: &mut ServerRegistry,
    link: LinkId,
    servers: Vec<ServerInfo>,
    check: impl Fn(&ServerInfo) -> Option<Rejection>,
) -> Result<Admission, RegistryError> {
    let mut admission = Admission::default();
    for info in servers {
        let verdict = check(&info).or_else(|| (!admission.accepted.is_empty()).then_some(Rejection::ExtraEntry));
        if let Some(rejection) = verdict {
            admission.rejected.push((info, rejection));
            continue;
        }

        let id = info.bus_id;
        registry.upsert(info.clone());
        admission.superseded.extend(registry.attach(id, link)?);
        admission.accepted.push(info);
    }
    Ok(admission)
}

/// Route server side: record the leaf set announced by `owner`.
///
/// Each entry is upserted, owned by `owner` (last announcer wins) and takes
/// the state carried in the entry.
///
/// # Errors
///
/// See [`admit_leaves`].
pub fn apply_announce(
    registry: &mut ServerRegistry,
    owner: BusId,
    servers: Vec<ServerInfo>,
) -> Result<Announcement, RegistryError> {
    let mut announcement = Announcement::default();
    for info in servers {
        if info.server_type.is_infrastructure() {
            announcement.ignored.push(info);
            continue;
        }

        let id = info.bus_id;
        let state = match info.state {
            ServerState::Normal => PeerState::Registered,
            ServerState::Crash => PeerState::Crashed,
        };
        registry.upsert(info);
        if let Some(previous) = registry.set_owner(id, owner)?
            && previous != owner
        {
            announcement.conflicts.push(OwnerConflict { server: id, previous, current: owner });
        }
        registry.set_state(id, state)?;
        announcement.applied += 1;
    }
    Ok(announcement)
}

/// Agent side: every known leaf with its current liveness.
pub fn leaf_snapshot(registry: &ServerRegistry) -> Vec<ServerInfo> {
    registry
        .all_servers()
        .into_iter()
        .filter(|r| !r.server_type.is_infrastructure())
        .map(ServerRecord::to_info)
        .collect()
}

/// Live peers of a type with their links, in bus id order.
pub fn live_peers(registry: &ServerRegistry, server_type: ServerType) -> Vec<(BusId, LinkId)> {
    registry
        .all_servers()
        .into_iter()
        .filter(|r| r.server_type == server_type)
        .filter_map(|r| r.link.map(|link| (r.bus_id, link)))
        .collect()
}
