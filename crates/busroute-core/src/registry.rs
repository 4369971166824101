//! Server registry.
//!
//! One per router. Maps bus ids to [`ServerRecord`]s and links back to bus
//! ids, and keeps per-type buckets (split by cross-server flag) for
//! selection and fan-out.
//!
//! Records are never dropped on disconnect: [`ServerRegistry::detach`] only
//! clears the link and marks the record crashed, so a late re-registration
//! finds its previous state. Only [`ServerRegistry::unregister`] removes a
//! record.
//!
//! # Invariants
//!
//! - Every bus id in a bucket has a record in the primary map.
//! - A link id maps to at most one record, and that record's `link` is that
//!   id.

use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
};

use busroute_proto::{BusId, ServerInfo, ServerState, ServerType};

use crate::error::RegistryError;

/// Transport handle of one connection.
pub type LinkId = u64;

/// Registration state of a remote peer.
///
/// ```text
///  Unregistered ──register──▶ Registered ──disconnect──▶ Crashed
///                                  ▲                        │
///                                  └────── re-register ─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Known (e.g. from discovery) but never registered
    Unregistered,
    /// Registered and reachable
    Registered,
    /// Was registered, connection lost
    Crashed,
}

/// Which half of a type bucket to consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrossScope {
    /// Both cross and non-cross servers
    Any,
    /// Cross servers only
    Cross,
    /// Non-cross servers only
    Local,
}

impl CrossScope {
    /// Scope containing servers with the given flag.
    #[must_use]
    pub const fn matching(is_cross_server: bool) -> Self {
        if is_cross_server { Self::Cross } else { Self::Local }
    }

    /// Whether a server with `is_cross_server` falls in this scope.
    #[must_use]
    pub const fn admits(self, is_cross_server: bool) -> bool {
        match self {
            Self::Any => true,
            Self::Cross => is_cross_server,
            Self::Local => !is_cross_server,
        }
    }
}

/// A known remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// Address
    pub bus_id: BusId,
    /// Kind of server
    pub server_type: ServerType,
    /// Live connection, if any
    pub link: Option<LinkId>,
    /// Last self-description received
    pub info: ServerInfo,
    /// Agent this server is reachable through (route server side)
    pub owner_agent: Option<BusId>,
    /// Registration state
    pub state: PeerState,
}

impl ServerRecord {
    /// Has a live connection.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.link.is_some()
    }

    /// Cross-server flag from the latest registration.
    #[must_use]
    pub fn is_cross_server(&self) -> bool {
        self.info.is_cross_server
    }

    /// Description to pass on to other nodes, carrying current liveness.
    #[must_use]
    pub fn to_info(&self) -> ServerInfo {
        let state =
            if self.state == PeerState::Registered { ServerState::Normal } else { ServerState::Crash };
        ServerInfo { state, ..self.info.clone() }
    }
}

/// Result of [`ServerRegistry::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// New record
    Created,
    /// Existing record, same URL
    Unchanged,
    /// Existing record whose URL moved. The caller owns reconnecting.
    UrlChanged {
        /// URL before this update
        previous_url: String,
    },
}

/// Ids in insertion order. Removal leaves a hole that compaction reclaims
/// once holes outnumber members, so each operation is O(1) amortized.
#[derive(Debug, Default)]
struct Members {
    slots: Vec<Option<BusId>>,
    index: HashMap<BusId, usize>,
}

impl Members {
    fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Slot count including holes; the round-robin cursor ranges over it.
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, slot: usize) -> Option<BusId> {
        self.slots.get(slot).copied().flatten()
    }

    fn ids(&self) -> impl Iterator<Item = &BusId> + '_ {
        self.slots.iter().flatten()
    }

    fn insert(&mut self, id: BusId) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }
        self.index.insert(id, self.slots.len());
        self.slots.push(Some(id));
        true
    }

    fn remove(&mut self, id: BusId) {
        let Some(slot) = self.index.remove(&id) else {
            return;
        };
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = None;
        }
        if self.slots.len() > 2 * self.index.len() {
            self.slots.retain(Option::is_some);
            for (slot, id) in self.slots.iter().flatten().enumerate() {
                self.index.insert(*id, slot);
            }
        }
    }
}

/// Members of one server type, split by cross flag.
#[derive(Debug, Default)]
struct Bucket {
    all: Members,
    cross: Members,
    local: Members,
}

impl Bucket {
    fn members(&self, scope: CrossScope) -> &Members {
        match scope {
            CrossScope::Any => &self.all,
            CrossScope::Cross => &self.cross,
            CrossScope::Local => &self.local,
        }
    }

    fn insert(&mut self, id: BusId, is_cross_server: bool) {
        self.all.insert(id);
        let (half, other) =
            if is_cross_server { (&mut self.cross, &mut self.local) } else { (&mut self.local, &mut self.cross) };
        if half.insert(id) {
            other.remove(id);
        }
    }

    fn remove(&mut self, id: BusId) {
        self.all.remove(id);
        self.cross.remove(id);
        self.local.remove(id);
    }
}

/// Process-local table of known servers.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    /// Bus id → record (owning)
    records: HashMap<BusId, ServerRecord>,
    /// Link → bus id
    by_link: HashMap<LinkId, BusId>,
    /// Server type → members in insertion order
    buckets: HashMap<ServerType, Bucket>,
    /// Rotating selection cursors
    cursors: HashMap<(ServerType, CrossScope), usize>,
}

impl ServerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known servers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// No known servers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record for a bus id, in any state.
    #[must_use]
    pub fn get(&self, id: BusId) -> Option<&ServerRecord> {
        self.records.get(&id)
    }

    /// Record for a bus id, only if it has a live link.
    #[must_use]
    pub fn get_live(&self, id: BusId) -> Option<&ServerRecord> {
        self.records.get(&id).filter(|r| r.is_live())
    }

    /// Record attached to a link.
    #[must_use]
    pub fn by_link(&self, link: LinkId) -> Option<&ServerRecord> {
        self.by_link.get(&link).and_then(|id| self.records.get(id))
    }

    /// Create or refresh a record from a self-description.
    ///
    /// Link, owner and state of an existing record are left alone; bucket
    /// membership follows the (possibly changed) type and cross flag.
    pub fn upsert(&mut self, info: ServerInfo) -> Upsert {
        let id = info.bus_id;

        let Some(record) = self.records.get_mut(&id) else {
            self.buckets.entry(info.server_type).or_default().insert(id, info.is_cross_server);
            self.records.insert(
                id,
                ServerRecord {
                    bus_id: id,
                    server_type: info.server_type,
                    link: None,
                    info,
                    owner_agent: None,
                    state: PeerState::Unregistered,
                },
            );
            return Upsert::Created;
        };

        if record.server_type != info.server_type {
            if let Some(bucket) = self.buckets.get_mut(&record.server_type) {
                bucket.remove(id);
            }
            record.server_type = info.server_type;
        }
        self.buckets.entry(info.server_type).or_default().insert(id, info.is_cross_server);

        let outcome = if record.info.url == info.url {
            Upsert::Unchanged
        } else {
            Upsert::UrlChanged { previous_url: record.info.url.clone() }
        };
        record.info = info;
        outcome
    }

    /// Bind a live link to a record and mark it registered.
    ///
    /// A link already bound to another record is taken from it (that record
    /// becomes crashed). Returns the link this record held before, if it
    /// was a different one.
    ///
    /// # Errors
    ///
    /// `RegistryError::UnknownServer` if no record exists for `id`.
    pub fn attach(&mut self, id: BusId, link: LinkId) -> Result<Option<LinkId>, RegistryError> {
        if !self.records.contains_key(&id) {
            return Err(RegistryError::UnknownServer(id));
        }

        if let Some(holder) = self.by_link.get(&link).copied()
            && holder != id
            && let Some(other) = self.records.get_mut(&holder)
        {
            other.link = None;
            other.state = PeerState::Crashed;
        }

        let record = self.records.get_mut(&id).ok_or(RegistryError::UnknownServer(id))?;
        let previous = record.link.replace(link).filter(|old| *old != link);
        record.state = PeerState::Registered;

        if let Some(old) = previous {
            self.by_link.remove(&old);
        }
        self.by_link.insert(link, id);
        self.buckets.entry(record.server_type).or_default().insert(id, record.info.is_cross_server);

        Ok(previous)
    }

    /// Drop a link. Its record stays, crashed. Returns the record's bus id.
    pub fn detach(&mut self, link: LinkId) -> Option<BusId> {
        let id = self.by_link.remove(&link)?;
        if let Some(record) = self.records.get_mut(&id) {
            record.link = None;
            record.state = PeerState::Crashed;
        }
        Some(id)
    }

    /// Set the agent a server is reachable through. Returns the previous one.
    ///
    /// # Errors
    ///
    /// `RegistryError::UnknownServer` if no record exists for `id`.
    pub fn set_owner(&mut self, id: BusId, owner: BusId) -> Result<Option<BusId>, RegistryError> {
        let record = self.records.get_mut(&id).ok_or(RegistryError::UnknownServer(id))?;
        Ok(record.owner_agent.replace(owner))
    }

    /// Overwrite a record's state.
    ///
    /// # Errors
    ///
    /// `RegistryError::UnknownServer` if no record exists for `id`.
    pub fn set_state(&mut self, id: BusId, state: PeerState) -> Result<(), RegistryError> {
        let record = self.records.get_mut(&id).ok_or(RegistryError::UnknownServer(id))?;
        record.state = state;
        Ok(())
    }

    /// Remove a record from every index.
    pub fn unregister(&mut self, id: BusId) -> Option<ServerRecord> {
        let record = self.records.remove(&id)?;
        if let Some(link) = record.link {
            self.by_link.remove(&link);
        }
        if let Some(bucket) = self.buckets.get_mut(&record.server_type) {
            bucket.remove(id);
        }
        Some(record)
    }

    /// Next live server of a type, round-robin.
    ///
    /// Repeated calls over a stable bucket visit every live member once per
    /// cycle.
    pub fn select_random(&mut self, server_type: ServerType, scope: CrossScope) -> Option<&ServerRecord> {
        self.select_random_by(server_type, scope, ServerRecord::is_live)
    }

    /// Round-robin selection with a caller-supplied liveness test.
    ///
    /// Route servers use this to select servers that have no link of their
    /// own but are reachable through their owner agent.
    pub fn select_random_by(
        &mut self,
        server_type: ServerType,
        scope: CrossScope,
        is_live: impl Fn(&ServerRecord) -> bool,
    ) -> Option<&ServerRecord> {
        let members = self.buckets.get(&server_type)?.members(scope);
        if members.is_empty() {
            return None;
        }
        let len = members.slot_count();

        let cursor = self.cursors.entry((server_type, scope)).or_insert(0);
        let start = *cursor % len;
        for step in 0..len {
            let slot = (start + step) % len;
            let Some(record) = members.slot(slot).and_then(|id| self.records.get(&id)) else {
                continue;
            };
            if is_live(record) {
                *cursor = slot + 1;
                return Some(record);
            }
        }
        None
    }

    /// Live server of a type chosen by a stable key.
    ///
    /// Rendezvous hashing: each live member scores `hash(key, bus_id)` and the
    /// highest wins. A key keeps its server while membership is stable, and
    /// losing a member only moves the keys that were on it.
    pub fn select_by_key<K: Hash + ?Sized>(
        &self,
        server_type: ServerType,
        key: &K,
        scope: CrossScope,
    ) -> Option<&ServerRecord> {
        self.members(server_type, scope)
            .filter(|r| r.is_live())
            .max_by_key(|r| {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                r.bus_id.hash(&mut hasher);
                (hasher.finish(), r.bus_id)
            })
    }

    /// First live server of a type in insertion order.
    #[must_use]
    pub fn select_first(&self, server_type: ServerType, scope: CrossScope) -> Option<&ServerRecord> {
        self.members(server_type, scope).find(|r| r.is_live())
    }

    /// Every server of a type in insertion order, live or not.
    pub fn all_by_type(
        &self,
        server_type: ServerType,
        scope: CrossScope,
    ) -> impl Iterator<Item = &ServerRecord> + '_ {
        self.members(server_type, scope)
    }

    /// Every known server, ordered by bus id.
    #[must_use]
    pub fn all_servers(&self) -> Vec<&ServerRecord> {
        let mut all: Vec<_> = self.records.values().collect();
        all.sort_by_key(|r| r.bus_id);
        all
    }

    fn members(&self, server_type: ServerType, scope: CrossScope) -> impl Iterator<Item = &ServerRecord> + '_ {
        self.buckets
            .get(&server_type)
            .map(|b| b.members(scope))
            .into_iter()
            .flat_map(Members::ids)
            .filter_map(|id| self.records.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(addr: &str) -> ServerInfo {
        ServerInfo::new(BusId::parse(addr).unwrap(), addr).with_url(format!("tcp://{addr}"))
    }

    fn id(addr: &str) -> BusId {
        BusId::parse(addr).unwrap()
    }

    fn registered(addrs: &[(&str, LinkId)]) -> ServerRegistry {
        let mut registry = ServerRegistry::new();
        for (addr, link) in addrs {
            registry.upsert(info(addr));
            registry.attach(id(addr), *link).unwrap();
        }
        registry
    }

    #[test]
    fn upsert_creates_unregistered_record() {
        let mut registry = ServerRegistry::new();
        assert_eq!(registry.upsert(info("1.1.7.1")), Upsert::Created);

        let record = registry.get(id("1.1.7.1")).unwrap();
        assert_eq!(record.state, PeerState::Unregistered);
        assert_eq!(record.server_type, ServerType::LOGIC);
        assert!(!record.is_live());
        assert!(registry.get_live(id("1.1.7.1")).is_none());
    }

    #[test]
    fn upsert_reports_url_change() {
        let mut registry = ServerRegistry::new();
        registry.upsert(info("1.1.7.1"));
        assert_eq!(registry.upsert(info("1.1.7.1")), Upsert::Unchanged);

        let moved = info("1.1.7.1").with_url("tcp://elsewhere");
        assert_eq!(
            registry.upsert(moved),
            Upsert::UrlChanged { previous_url: "tcp://1.1.7.1".into() }
        );
        assert_eq!(registry.get(id("1.1.7.1")).unwrap().info.url, "tcp://elsewhere");
    }

    #[test]
    fn attach_and_lookup_by_link() {
        let registry = registered(&[("1.1.7.1", 10)]);

        let record = registry.by_link(10).unwrap();
        assert_eq!(record.bus_id, id("1.1.7.1"));
        assert_eq!(record.state, PeerState::Registered);
    }

    #[test]
    fn attach_unknown_server_fails() {
        let mut registry = ServerRegistry::new();
        assert_eq!(registry.attach(id("1.1.7.1"), 1), Err(RegistryError::UnknownServer(id("1.1.7.1"))));
    }

    #[test]
    fn reattach_replaces_old_link() {
        let mut registry = registered(&[("1.1.7.1", 10)]);

        assert_eq!(registry.attach(id("1.1.7.1"), 11), Ok(Some(10)));
        assert!(registry.by_link(10).is_none());
        assert_eq!(registry.by_link(11).unwrap().bus_id, id("1.1.7.1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn link_moves_between_records() {
        let mut registry = registered(&[("1.1.7.1", 10)]);
        registry.upsert(info("1.1.7.2"));

        registry.attach(id("1.1.7.2"), 10).unwrap();

        let first = registry.get(id("1.1.7.1")).unwrap();
        assert_eq!(first.link, None);
        assert_eq!(first.state, PeerState::Crashed);
        assert_eq!(registry.by_link(10).unwrap().bus_id, id("1.1.7.2"));
    }

    #[test]
    fn detach_keeps_record_as_crashed() {
        let mut registry = registered(&[("1.1.7.1", 10)]);

        assert_eq!(registry.detach(10), Some(id("1.1.7.1")));
        assert!(registry.by_link(10).is_none());

        let record = registry.get(id("1.1.7.1")).unwrap();
        assert_eq!(record.state, PeerState::Crashed);
        assert_eq!(record.to_info().state, ServerState::Crash);
        assert_eq!(registry.detach(10), None);
    }

    #[test]
    fn select_random_cycles_and_skips_dead() {
        let mut registry = registered(&[("1.1.7.1", 1), ("1.1.7.2", 2), ("1.1.7.3", 3)]);
        registry.detach(2);

        let picks: Vec<_> = (0..4)
            .map(|_| registry.select_random(ServerType::LOGIC, CrossScope::Any).unwrap().bus_id)
            .collect();

        assert_eq!(picks, vec![id("1.1.7.1"), id("1.1.7.3"), id("1.1.7.1"), id("1.1.7.3")]);
    }

    #[test]
    fn select_random_respects_scope() {
        let mut registry = ServerRegistry::new();
        registry.upsert(info("1.1.7.1"));
        registry.upsert(info("1.1.7.2").cross_server(true));
        registry.attach(id("1.1.7.1"), 1).unwrap();
        registry.attach(id("1.1.7.2"), 2).unwrap();

        for _ in 0..3 {
            let cross = registry.select_random(ServerType::LOGIC, CrossScope::Cross).unwrap();
            assert_eq!(cross.bus_id, id("1.1.7.2"));
            let local = registry.select_random(ServerType::LOGIC, CrossScope::Local).unwrap();
            assert_eq!(local.bus_id, id("1.1.7.1"));
        }
        assert!(registry.select_random(ServerType::GAME, CrossScope::Any).is_none());
    }

    #[test]
    fn cross_flag_change_moves_bucket_half() {
        let mut registry = registered(&[("1.1.7.1", 1)]);
        registry.upsert(info("1.1.7.1").cross_server(true));

        assert!(registry.select_first(ServerType::LOGIC, CrossScope::Local).is_none());
        assert!(registry.select_first(ServerType::LOGIC, CrossScope::Cross).is_some());
        assert_eq!(registry.all_by_type(ServerType::LOGIC, CrossScope::Any).count(), 1);
    }

    #[test]
    fn refresh_keeps_bucket_order_without_duplicates() {
        let mut registry = registered(&[("1.1.7.1", 1), ("1.1.7.2", 2), ("1.1.7.3", 3)]);
        let order = |r: &ServerRegistry, scope| -> Vec<BusId> {
            r.all_by_type(ServerType::LOGIC, scope).map(|r| r.bus_id).collect()
        };

        registry.upsert(info("1.1.7.1"));
        registry.attach(id("1.1.7.2"), 2).unwrap();
        registry.detach(3);
        registry.attach(id("1.1.7.3"), 4).unwrap();
        assert_eq!(order(&registry, CrossScope::Any), vec![id("1.1.7.1"), id("1.1.7.2"), id("1.1.7.3")]);

        registry.upsert(info("1.1.7.2").cross_server(true));
        registry.upsert(info("1.1.7.2").cross_server(true));
        assert_eq!(order(&registry, CrossScope::Any), vec![id("1.1.7.1"), id("1.1.7.2"), id("1.1.7.3")]);
        assert_eq!(order(&registry, CrossScope::Cross), vec![id("1.1.7.2")]);
        assert_eq!(order(&registry, CrossScope::Local), vec![id("1.1.7.1"), id("1.1.7.3")]);

        registry.upsert(info("1.1.7.2"));
        assert!(order(&registry, CrossScope::Cross).is_empty());
        assert_eq!(order(&registry, CrossScope::Local), vec![id("1.1.7.1"), id("1.1.7.3"), id("1.1.7.2")]);
        assert_eq!(registry.select_first(ServerType::LOGIC, CrossScope::Any).unwrap().bus_id, id("1.1.7.1"));
    }

    #[test]
    fn unregister_compacts_without_reordering() {
        let addrs = ["1.1.7.1", "1.1.7.2", "1.1.7.3", "1.1.7.4", "1.1.7.5", "1.1.7.6"];
        let links: Vec<(&str, LinkId)> = addrs.iter().copied().zip(1..).collect();
        let mut registry = registered(&links);

        for addr in ["1.1.7.1", "1.1.7.3", "1.1.7.4", "1.1.7.5"] {
            assert!(registry.unregister(id(addr)).is_some());
        }
        registry.upsert(info("1.1.7.1"));
        registry.attach(id("1.1.7.1"), 7).unwrap();

        let order: Vec<_> = registry.all_by_type(ServerType::LOGIC, CrossScope::Any).map(|r| r.bus_id).collect();
        assert_eq!(order, vec![id("1.1.7.2"), id("1.1.7.6"), id("1.1.7.1")]);
        assert_eq!(registry.select_first(ServerType::LOGIC, CrossScope::Any).unwrap().bus_id, id("1.1.7.2"));

        let picked: Vec<_> = (0..3)
            .map(|_| registry.select_random(ServerType::LOGIC, CrossScope::Any).unwrap().bus_id)
            .collect();
        assert_eq!(picked.len(), 3);
        for bus_id in &order {
            assert!(picked.contains(bus_id));
        }
    }

    #[test]
    fn select_by_key_is_stable() {
        let registry = registered(&[("1.1.9.1", 1), ("1.1.9.2", 2), ("1.1.9.3", 3)]);

        let first = registry.select_by_key(ServerType::STORE, &42u64, CrossScope::Any).unwrap().bus_id;
        for _ in 0..5 {
            let again = registry.select_by_key(ServerType::STORE, &42u64, CrossScope::Any).unwrap();
            assert_eq!(again.bus_id, first);
        }
        assert!(registry.select_by_key(ServerType::STORE, "player:7", CrossScope::Any).is_some());
    }

    #[test]
    fn select_first_skips_dead() {
        let mut registry = registered(&[("1.1.7.1", 1), ("1.1.7.2", 2)]);
        assert_eq!(registry.select_first(ServerType::LOGIC, CrossScope::Any).unwrap().bus_id, id("1.1.7.1"));

        registry.detach(1);
        assert_eq!(registry.select_first(ServerType::LOGIC, CrossScope::Any).unwrap().bus_id, id("1.1.7.2"));
    }

    #[test]
    fn unregister_removes_everywhere() {
        let mut registry = registered(&[("1.1.7.1", 1)]);

        let removed = registry.unregister(id("1.1.7.1")).unwrap();
        assert_eq!(removed.link, Some(1));
        assert!(registry.get(id("1.1.7.1")).is_none());
        assert!(registry.by_link(1).is_none());
        assert_eq!(registry.all_by_type(ServerType::LOGIC, CrossScope::Any).count(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn owner_replacement_returns_previous() {
        let mut registry = ServerRegistry::new();
        registry.upsert(info("1.1.7.1"));

        assert_eq!(registry.set_owner(id("1.1.7.1"), id("1.1.3.1")), Ok(None));
        assert_eq!(registry.set_owner(id("1.1.7.1"), id("1.2.3.1")), Ok(Some(id("1.1.3.1"))));
        assert_eq!(registry.get(id("1.1.7.1")).unwrap().owner_agent, Some(id("1.2.3.1")));
    }

    #[test]
    fn all_servers_sorted_by_bus_id() {
        let registry = registered(&[("1.2.7.1", 1), ("1.1.5.1", 2), ("1.1.7.1", 3)]);
        let ids: Vec<_> = registry.all_servers().iter().map(|r| r.bus_id).collect();
        assert_eq!(ids, vec![id("1.1.5.1"), id("1.1.7.1"), id("1.2.7.1")]);
    }
}
