//! Provisioning engine.
//!
//! Executes work items against the gateway and the mapping store. The engine
//! is owned by the serializer, so it mutates its caches and the store without
//! locks.
//!
//! # State
//!
//! Trigger room per tenant: `Absent -> Creating -> Present`.
//!
//! Rooms created by the engine: `Created -> Occupied -> ReclaimPending ->
//! Deleted`. A reclaim that finds the room occupied moves it back to
//! `Occupied`. The create call itself completes inside a single item, so a
//! room is first observable once it exists.
//!
//! # Error Policy
//!
//! Every gateway call goes through [`retry::with_rate_limit_retry`] with the
//! engine's [`RetryBudget`], which is reset at the start of each item: one
//! rate limit per item is waited out, a second one abandons the item. Mapping
//! persistence failures are logged and do not fail the item; the in-memory
//! mapping is already updated.
//!
//! Room creation and deletion are logged on the `rc.audit` target with the
//! tenant, owner, room id, room name and timestamp.

pub mod retry;

use crate::config::{
    Config, DEFAULT_FALLBACK_ROOM_NAME, DEFAULT_GROUP_NAME, DEFAULT_RECLAIM_SETTLE_MS,
    DEFAULT_TRIGGER_ROOM_NAME,
};
use crate::errors::RcError;
use crate::gateway::{CreateRoom, GatewayClient, GroupInfo, RoomInfo};
use crate::mapping::{MappingKey, MappingStore};
use crate::observability::metrics;
use crate::queue::{WorkExecutor, WorkItem};
use crate::sanitize::sanitize;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{GroupId, MemberId, RoomId, TenantId};
use retry::{with_rate_limit_retry, RetryBudget};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How long deleted rooms stay visible through [`ProvisioningEngine::room_phase`].
const DELETED_RETENTION_SECS: i64 = 600;

/// Names and delays the engine works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePolicy {
    /// Managed group (category) name.
    pub group_name: String,
    /// Trigger room name.
    pub trigger_room_name: String,
    /// Room name used when a display name sanitizes to nothing.
    pub fallback_room_name: String,
    /// Delay before re-checking occupancy for reclaim.
    pub reclaim_settle_delay: Duration,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            group_name: DEFAULT_GROUP_NAME.to_string(),
            trigger_room_name: DEFAULT_TRIGGER_ROOM_NAME.to_string(),
            fallback_room_name: DEFAULT_FALLBACK_ROOM_NAME.to_string(),
            reclaim_settle_delay: Duration::from_millis(DEFAULT_RECLAIM_SETTLE_MS),
        }
    }
}

impl From<&Config> for EnginePolicy {
    fn from(config: &Config) -> Self {
        Self {
            group_name: config.group_name.clone(),
            trigger_room_name: config.trigger_room_name.clone(),
            fallback_room_name: config.fallback_room_name.clone(),
            reclaim_settle_delay: config.reclaim_settle_delay,
        }
    }
}

/// Lifecycle of a tenant's trigger room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Absent,
    Creating,
    Present,
}

/// Lifecycle of a room created for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Exists, owner not (yet) moved in.
    Created,
    /// Owner moved in, or occupants seen on a reclaim check.
    Occupied,
    /// Waiting out the settle delay before the occupancy re-check.
    ReclaimPending,
    Deleted,
}

#[derive(Debug, Clone)]
struct RoomRecord {
    tenant: TenantId,
    owner: MemberId,
    name: String,
    created_at: DateTime<Utc>,
    phase: RoomPhase,
    phase_since: DateTime<Utc>,
}

impl RoomRecord {
    fn transition(&mut self, phase: RoomPhase) {
        self.phase = phase;
        self.phase_since = Utc::now();
    }
}

/// Executes work items. See the module docs.
pub struct ProvisioningEngine {
    gateway: Arc<dyn GatewayClient>,
    store: MappingStore,
    policy: EnginePolicy,
    triggers: HashMap<TenantId, TriggerState>,
    rooms: HashMap<RoomId, RoomRecord>,
    retry_budget: RetryBudget,
}

impl ProvisioningEngine {
    #[must_use]
    pub fn new(gateway: Arc<dyn GatewayClient>, store: MappingStore, policy: EnginePolicy) -> Self {
        Self {
            gateway,
            store,
            policy,
            triggers: HashMap::new(),
            rooms: HashMap::new(),
            retry_budget: RetryBudget::new(),
        }
    }

    /// The mapping store owned by this engine.
    #[must_use]
    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    /// Trigger room state of a tenant. A trigger loaded from the mapping at
    /// startup counts as present.
    #[must_use]
    pub fn trigger_state(&self, tenant: TenantId) -> TriggerState {
        match self.triggers.get(&tenant) {
            Some(state) => *state,
            None if self.store.trigger_room(tenant).is_some() => TriggerState::Present,
            None => TriggerState::Absent,
        }
    }

    /// Phase of a room created by this engine instance.
    #[must_use]
    pub fn room_phase(&self, room: RoomId) -> Option<RoomPhase> {
        self.rooms.get(&room).map(|r| r.phase)
    }

    // ========================================================================
    // EnsureTrigger
    // ========================================================================

    #[instrument(skip_all, fields(tenant_id = %tenant))]
    async fn ensure_trigger(&mut self, tenant: TenantId) -> Result<RoomId, RcError> {
        let previous = self.trigger_state(tenant);
        let result = self.ensure_trigger_inner(tenant).await;
        let state = match (&result, previous) {
            (Ok(_), _) => TriggerState::Present,
            (Err(_), TriggerState::Present) if self.store.trigger_room(tenant).is_some() => {
                TriggerState::Present
            }
            (Err(_), _) => TriggerState::Absent,
        };
        self.triggers.insert(tenant, state);
        result
    }

    async fn ensure_trigger_inner(&mut self, tenant: TenantId) -> Result<RoomId, RcError> {
        let rooms = self.list_rooms(tenant).await?;

        if let Some(cached) = self.store.trigger_room(tenant) {
            if rooms.iter().any(|r| r.id == cached) {
                debug!(target: "rc.engine", room_id = %cached, "Trigger room present");
                return Ok(cached);
            }
            warn!(
                target: "rc.engine",
                room_id = %cached,
                "Trigger room missing from tenant, recreating"
            );
            self.forget(MappingKey::Trigger(tenant)).await;
        }

        self.triggers.insert(tenant, TriggerState::Creating);

        let group = self.ensure_group(tenant).await?;

        let existing = rooms
            .into_iter()
            .find(|r| r.name == self.policy.trigger_room_name && r.group == Some(group));
        let trigger = match existing {
            Some(room) => {
                info!(target: "rc.engine", room_id = %room.id, "Adopting existing trigger room");
                room.id
            }
            None => {
                let request = CreateRoom {
                    tenant,
                    group: Some(group),
                    name: self.policy.trigger_room_name.clone(),
                    owner: None,
                };
                let room = self.create_or_adopt_room(&request).await?;
                info!(target: "rc.engine", room_id = %room.id, "Trigger room created");
                room.id
            }
        };

        self.record(MappingKey::Trigger(tenant), trigger.get()).await;
        Ok(trigger)
    }

    async fn ensure_group(&mut self, tenant: TenantId) -> Result<GroupId, RcError> {
        let groups = self.list_groups(tenant).await?;

        if let Some(cached) = self.store.group(tenant) {
            if groups.iter().any(|g| g.id == cached) {
                return Ok(cached);
            }
            warn!(target: "rc.engine", group_id = %cached, "Managed group missing from tenant");
        }

        let group = match find_group(&groups, &self.policy.group_name) {
            Some(group) => group,
            None => {
                let gateway = Arc::clone(&self.gateway);
                let name = self.policy.group_name.clone();
                match with_rate_limit_retry("create_group", &self.retry_budget, || {
                    gateway.create_group(tenant, &name)
                })
                .await
                {
                    Ok(group) => {
                        info!(target: "rc.engine", group_id = %group.id, "Managed group created");
                        group.id
                    }
                    Err(RcError::Conflict(msg)) => {
                        let groups = self.list_groups(tenant).await?;
                        find_group(&groups, &self.policy.group_name)
                            .ok_or(RcError::Conflict(msg))?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.record(MappingKey::Group(tenant), group.get()).await;
        Ok(group)
    }

    // ========================================================================
    // ProvisionAndMove
    // ========================================================================

    #[instrument(skip_all, fields(tenant_id = %tenant, member_id = %member))]
    async fn provision_and_move(
        &mut self,
        tenant: TenantId,
        member: MemberId,
        display_name: &str,
    ) -> Result<(), RcError> {
        let mut name = sanitize(display_name);
        if name.is_empty() {
            debug!(target: "rc.engine", "Display name sanitized to nothing, using fallback");
            name.clone_from(&self.policy.fallback_room_name);
        }

        if let Some(room) = self.store.owner_room(tenant, member) {
            match self.move_member(tenant, member, room).await {
                Ok(()) => {
                    debug!(target: "rc.engine", room_id = %room, "Member re-entered existing room");
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {
                    if self.room_exists(tenant, room).await? {
                        return Err(e);
                    }
                    warn!(
                        target: "rc.engine",
                        room_id = %room,
                        "Owned room no longer exists, dropping stale mapping"
                    );
                    self.forget(MappingKey::Owner(tenant, member)).await;
                    self.rooms.remove(&room);
                }
                Err(e) => return Err(e),
            }
        }

        let group = match self.store.group(tenant) {
            Some(group) => group,
            None => {
                self.ensure_trigger(tenant).await?;
                self.store
                    .group(tenant)
                    .ok_or_else(|| RcError::Internal("managed group not recorded".to_string()))?
            }
        };

        let room = match self.find_unowned_room(tenant, group, &name).await? {
            Some(room) => {
                info!(target: "rc.engine", room_id = %room.id, "Adopting unmapped room by name");
                room
            }
            None => {
                let request = CreateRoom {
                    tenant,
                    group: Some(group),
                    name: name.clone(),
                    owner: Some(member),
                };
                let room = self.create_or_adopt_room(&request).await?;
                metrics::record_room_created();
                audit("room_created", tenant, member, room.id, &room.name);
                room
            }
        };

        let now = Utc::now();
        self.rooms.insert(
            room.id,
            RoomRecord {
                tenant,
                owner: member,
                name: room.name,
                created_at: now,
                phase: RoomPhase::Created,
                phase_since: now,
            },
        );
        self.record(MappingKey::Owner(tenant, member), room.id.get())
            .await;

        // Nobody has entered the room yet, so no leave event will ever queue
        // its reclaim; check it here instead.
        if let Err(e) = self.move_member(tenant, member, room.id).await {
            warn!(
                target: "rc.engine",
                room_id = %room.id,
                error = %e,
                "Failed to move member into new room, checking it for reclaim"
            );
            if let Err(reclaim_error) = self.reclaim_if_empty(tenant, room.id).await {
                warn!(
                    target: "rc.engine",
                    room_id = %room.id,
                    error = %reclaim_error,
                    "Reclaim of unentered room failed, room kept"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    async fn move_member(
        &mut self,
        tenant: TenantId,
        member: MemberId,
        room: RoomId,
    ) -> Result<(), RcError> {
        let gateway = Arc::clone(&self.gateway);
        with_rate_limit_retry("move_member", &self.retry_budget, || {
            gateway.move_member(tenant, member, room)
        })
        .await?;
        if let Some(record) = self.rooms.get_mut(&room) {
            record.transition(RoomPhase::Occupied);
        }
        Ok(())
    }

    /// A room in the group with this name that no owner mapping points at.
    async fn find_unowned_room(
        &self,
        tenant: TenantId,
        group: GroupId,
        name: &str,
    ) -> Result<Option<RoomInfo>, RcError> {
        let trigger = self.store.trigger_room(tenant);
        Ok(self.list_rooms(tenant).await?.into_iter().find(|r| {
            r.name == name
                && r.group == Some(group)
                && Some(r.id) != trigger
                && self.store.owner_of(r.id).is_none()
        }))
    }

    // ========================================================================
    // ReclaimIfEmpty
    // ========================================================================

    #[instrument(skip_all, fields(tenant_id = %tenant, room_id = %room))]
    async fn reclaim_if_empty(&mut self, tenant: TenantId, room: RoomId) -> Result<(), RcError> {
        let Some(owner_key) = self.store.owner_of(room) else {
            debug!(target: "rc.engine", "Room is not managed, skipping reclaim");
            return Ok(());
        };

        self.set_phase(room, RoomPhase::ReclaimPending);
        tokio::time::sleep(self.policy.reclaim_settle_delay).await;

        let gateway = Arc::clone(&self.gateway);
        let occupants = with_rate_limit_retry("list_occupants", &self.retry_budget, || {
            gateway.list_occupants(tenant, room)
        })
        .await?;
        if !occupants.is_empty() {
            debug!(
                target: "rc.engine",
                occupants = occupants.len(),
                "Room occupied after settle delay, keeping it"
            );
            self.set_phase(room, RoomPhase::Occupied);
            return Ok(());
        }

        let deleted =
            with_rate_limit_retry("delete_room", &self.retry_budget, || gateway.delete_room(room))
                .await;
        match deleted {
            Ok(()) => {
                let name = self.rooms.get(&room).map_or("", |r| r.name.as_str());
                if let MappingKey::Owner(_, owner) = owner_key {
                    audit("room_deleted", tenant, owner, room, name);
                }
            }
            Err(e) if e.is_not_found() => {
                info!(target: "rc.engine", "Room already deleted externally");
            }
            Err(e) => {
                self.set_phase(room, RoomPhase::Created);
                return Err(e);
            }
        }

        self.forget(owner_key).await;
        self.set_phase(room, RoomPhase::Deleted);
        self.prune_deleted();
        metrics::record_room_reclaimed();
        Ok(())
    }

    fn set_phase(&mut self, room: RoomId, phase: RoomPhase) {
        if let Some(record) = self.rooms.get_mut(&room) {
            debug!(
                target: "rc.engine",
                room_id = %room,
                tenant_id = %record.tenant,
                owner_id = %record.owner,
                room_name = %record.name,
                age_secs = (Utc::now() - record.created_at).num_seconds(),
                from = ?record.phase,
                to = ?phase,
                "Room phase transition"
            );
            record.transition(phase);
        }
    }

    fn prune_deleted(&mut self) {
        let cutoff = Utc::now() - chrono::Duration::seconds(DELETED_RETENTION_SECS);
        self.rooms
            .retain(|_, r| r.phase != RoomPhase::Deleted || r.phase_since > cutoff);
    }

    // ========================================================================
    // Gateway and mapping helpers
    // ========================================================================

    async fn list_rooms(&self, tenant: TenantId) -> Result<Vec<RoomInfo>, RcError> {
        let gateway = &self.gateway;
        with_rate_limit_retry("list_rooms", &self.retry_budget, || gateway.list_rooms(tenant)).await
    }

    async fn list_groups(&self, tenant: TenantId) -> Result<Vec<GroupInfo>, RcError> {
        let gateway = &self.gateway;
        with_rate_limit_retry("list_groups", &self.retry_budget, || {
            gateway.list_groups(tenant)
        })
        .await
    }

    async fn room_exists(&self, tenant: TenantId, room: RoomId) -> Result<bool, RcError> {
        Ok(self.list_rooms(tenant).await?.iter().any(|r| r.id == room))
    }

    /// Create a room; if one with the same name already exists in the group,
    /// adopt it instead.
    async fn create_or_adopt_room(&self, request: &CreateRoom) -> Result<RoomInfo, RcError> {
        let gateway = &self.gateway;
        let created =
            with_rate_limit_retry("create_room", &self.retry_budget, || gateway.create_room(request))
                .await;
        match created {
            Err(RcError::Conflict(msg)) => self
                .list_rooms(request.tenant)
                .await?
                .into_iter()
                .find(|r| r.name == request.name && r.group == request.group)
                .ok_or(RcError::Conflict(msg)),
            other => other,
        }
    }

    async fn record(&mut self, key: MappingKey, value: u64) {
        if let Err(e) = self.store.set(key, value).await {
            warn!(
                target: "rc.engine",
                key = %key,
                error = %e,
                "Mapping entry kept in memory only"
            );
        }
    }

    async fn forget(&mut self, key: MappingKey) {
        if let Err(e) = self.store.delete(key).await {
            warn!(
                target: "rc.engine",
                key = %key,
                error = %e,
                "Mapping removal kept in memory only"
            );
        }
    }
}

/// Room lifecycle audit record.
fn audit(event: &'static str, tenant: TenantId, owner: MemberId, room: RoomId, name: &str) {
    info!(
        target: "rc.audit",
        event,
        tenant_id = %tenant,
        owner_id = %owner,
        room_id = %room,
        room_name = %name,
        at = %Utc::now().to_rfc3339(),
        "Room lifecycle event"
    );
}

fn find_group(groups: &[GroupInfo], name: &str) -> Option<GroupId> {
    groups.iter().find(|g| g.name == name).map(|g| g.id)
}

#[async_trait]
impl WorkExecutor for ProvisioningEngine {
    async fn execute(&mut self, item: WorkItem) -> Result<(), RcError> {
        self.retry_budget.reset();
        match item {
            WorkItem::EnsureTrigger { tenant } => self.ensure_trigger(tenant).await.map(|_| ()),
            WorkItem::ProvisionAndMove {
                tenant,
                member,
                display_name,
            } => self.provision_and_move(tenant, member, &display_name).await,
            WorkItem::ReclaimIfEmpty { tenant, room } => self.reclaim_if_empty(tenant, room).await,
        }
    }
}
