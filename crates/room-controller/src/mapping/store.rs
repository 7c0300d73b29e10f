//! `MappingStore` - write-through mapping of tenants and owners to rooms.
//!
//! The store is owned by the serializer task. It needs no locking: every
//! mutation happens on that one task. Other tasks read a `RoutingSnapshot`
//! that is republished after each mutation and may lag behind by one item.

use crate::errors::RcError;
use crate::observability::metrics;
use async_trait::async_trait;
use common::types::{GroupId, MemberId, RoomId, TenantId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Key of a mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MappingKey {
    /// Managed group of a tenant.
    Group(TenantId),
    /// Trigger room of a tenant.
    Trigger(TenantId),
    /// Room created for a member of a tenant.
    Owner(TenantId, MemberId),
}

impl MappingKey {
    /// Tenant this entry belongs to.
    #[must_use]
    pub const fn tenant(&self) -> TenantId {
        match self {
            MappingKey::Group(t) | MappingKey::Trigger(t) | MappingKey::Owner(t, _) => *t,
        }
    }
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingKey::Group(t) => write!(f, "group:{t}"),
            MappingKey::Trigger(t) => write!(f, "trigger:{t}"),
            MappingKey::Owner(t, m) => write!(f, "owner:{t}:{m}"),
        }
    }
}

impl FromStr for MappingKey {
    type Err = RcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RcError::Persistence(format!("invalid mapping key: {s:?}"));
        let mut parts = s.split(':');
        let kind = parts.next().ok_or_else(bad)?;
        let tenant: TenantId = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let key = match kind {
            "group" => MappingKey::Group(tenant),
            "trigger" => MappingKey::Trigger(tenant),
            "owner" => {
                let member: MemberId =
                    parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
                MappingKey::Owner(tenant, member)
            }
            _ => return Err(bad()),
        };
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(key)
    }
}

/// Persistence seam for the mapping.
///
/// `put` and `remove` must be durable when they return `Ok`.
#[async_trait]
pub trait MappingBackend: Send + Sync {
    /// Load every committed entry. A missing backing store is an empty map.
    async fn load_all(&self) -> Result<HashMap<MappingKey, u64>, RcError>;

    /// Durably record an entry.
    async fn put(&self, key: MappingKey, value: u64) -> Result<(), RcError>;

    /// Durably remove an entry. Removing an absent entry is not an error.
    async fn remove(&self, key: MappingKey) -> Result<(), RcError>;
}

/// Read-only routing view used by the event reactor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingSnapshot {
    triggers: HashMap<TenantId, RoomId>,
    managed_rooms: HashSet<RoomId>,
}

impl RoutingSnapshot {
    /// Trigger room of a tenant, if known.
    #[must_use]
    pub fn trigger_room(&self, tenant: TenantId) -> Option<RoomId> {
        self.triggers.get(&tenant).copied()
    }

    /// Whether the room was created by RC for some owner.
    #[must_use]
    pub fn is_managed(&self, room: RoomId) -> bool {
        self.managed_rooms.contains(&room)
    }

    fn from_entries(entries: &HashMap<MappingKey, u64>) -> Self {
        let mut snapshot = Self::default();
        for (key, value) in entries {
            match key {
                MappingKey::Trigger(t) => {
                    snapshot.triggers.insert(*t, RoomId(*value));
                }
                MappingKey::Owner(..) => {
                    snapshot.managed_rooms.insert(RoomId(*value));
                }
                MappingKey::Group(_) => {}
            }
        }
        snapshot
    }
}

/// Write-through mapping store.
pub struct MappingStore {
    entries: HashMap<MappingKey, u64>,
    backend: Arc<dyn MappingBackend>,
    snapshot_tx: watch::Sender<Arc<RoutingSnapshot>>,
}

impl MappingStore {
    /// Open the store, loading every committed entry from the backend.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Persistence` if the backend exists but cannot be read.
    #[instrument(skip_all)]
    pub async fn open(backend: Arc<dyn MappingBackend>) -> Result<Self, RcError> {
        let entries = backend.load_all().await?;
        let snapshot = Arc::new(RoutingSnapshot::from_entries(&entries));
        let (snapshot_tx, _) = watch::channel(snapshot);

        info!(
            target: "rc.mapping",
            entries = entries.len(),
            "Mapping store loaded"
        );

        Ok(Self {
            entries,
            backend,
            snapshot_tx,
        })
    }

    /// Subscribe to routing snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<RoutingSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Current routing snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        Arc::clone(&self.snapshot_tx.borrow())
    }

    /// Raw value of an entry.
    #[must_use]
    pub fn get(&self, key: &MappingKey) -> Option<u64> {
        self.entries.get(key).copied()
    }

    /// Managed group of a tenant.
    #[must_use]
    pub fn group(&self, tenant: TenantId) -> Option<GroupId> {
        self.get(&MappingKey::Group(tenant)).map(GroupId)
    }

    /// Trigger room of a tenant.
    #[must_use]
    pub fn trigger_room(&self, tenant: TenantId) -> Option<RoomId> {
        self.get(&MappingKey::Trigger(tenant)).map(RoomId)
    }

    /// Room owned by a member.
    #[must_use]
    pub fn owner_room(&self, tenant: TenantId, member: MemberId) -> Option<RoomId> {
        self.get(&MappingKey::Owner(tenant, member)).map(RoomId)
    }

    /// Reverse lookup: which owner entry points at this room.
    #[must_use]
    pub fn owner_of(&self, room: RoomId) -> Option<MappingKey> {
        self.entries.iter().find_map(|(key, value)| match key {
            MappingKey::Owner(..) if *value == room.get() => Some(*key),
            _ => None,
        })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record an entry and persist it before returning.
    ///
    /// The in-memory mapping is updated even when persistence fails.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Persistence` if the backend write failed.
    #[instrument(skip_all, fields(key = %key, value = value))]
    pub async fn set(&mut self, key: MappingKey, value: u64) -> Result<(), RcError> {
        self.entries.insert(key, value);
        self.publish();

        self.backend.put(key, value).await.map_err(|e| {
            warn!(target: "rc.mapping", key = %key, error = %e, "Failed to persist mapping entry");
            metrics::record_persistence_failure("put");
            e
        })?;

        debug!(target: "rc.mapping", key = %key, value = value, "Mapping entry stored");
        Ok(())
    }

    /// Remove an entry and persist the removal before returning.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Persistence` if the backend write failed.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn delete(&mut self, key: MappingKey) -> Result<(), RcError> {
        if self.entries.remove(&key).is_some() {
            self.publish();
        }

        self.backend.remove(key).await.map_err(|e| {
            warn!(target: "rc.mapping", key = %key, error = %e, "Failed to persist mapping removal");
            metrics::record_persistence_failure("remove");
            e
        })?;

        debug!(target: "rc.mapping", key = %key, "Mapping entry removed");
        Ok(())
    }

    fn publish(&self) {
        // send_replace never fails, even with no receivers
        self.snapshot_tx
            .send_replace(Arc::new(RoutingSnapshot::from_entries(&self.entries)));
    }
}
