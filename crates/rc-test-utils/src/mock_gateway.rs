//! In-memory gateway for RC testing.
//!
//! Keeps groups, rooms and occupancy per tenant, records every call, and can
//! be scripted to fail or stall specific operations.
//!
//! # Example
//!
//! ```rust,ignore
//! use rc_test_utils::{MockGateway, Operation, ScriptedError};
//!
//! let gateway = MockGateway::new();
//! let group = gateway.with_group(TENANT, "VOICES");
//! let room = gateway.with_room(TENANT, Some(group), "alice");
//! gateway.fail_next(Operation::DeleteRoom, ScriptedError::PermissionDenied);
//! ```

use async_trait::async_trait;
use common::types::{GroupId, MemberId, RoomId, TenantId};
use room_controller::errors::RcError;
use room_controller::gateway::{CreateRoom, GatewayClient, GroupInfo, RoomInfo};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// First id handed out by the mock.
const FIRST_ID: u64 = 1000;

/// Gateway operation, for scripting and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListGroups,
    ListRooms,
    CreateGroup,
    CreateRoom,
    DeleteRoom,
    MoveMember,
    ListOccupants,
}

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    ListGroups(TenantId),
    ListRooms(TenantId),
    CreateGroup(TenantId, String),
    CreateRoom(CreateRoom),
    DeleteRoom(RoomId),
    MoveMember(TenantId, MemberId, RoomId),
    ListOccupants(TenantId, RoomId),
}

impl GatewayCall {
    /// Operation this call belongs to.
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            GatewayCall::ListGroups(_) => Operation::ListGroups,
            GatewayCall::ListRooms(_) => Operation::ListRooms,
            GatewayCall::CreateGroup(..) => Operation::CreateGroup,
            GatewayCall::CreateRoom(_) => Operation::CreateRoom,
            GatewayCall::DeleteRoom(_) => Operation::DeleteRoom,
            GatewayCall::MoveMember(..) => Operation::MoveMember,
            GatewayCall::ListOccupants(..) => Operation::ListOccupants,
        }
    }
}

/// Failure to inject into the next call of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedError {
    RateLimited(Duration),
    PermissionDenied,
    NotFound,
    Conflict,
    Transient,
}

impl ScriptedError {
    fn into_error(self, operation: Operation) -> RcError {
        let context = format!("{operation:?} (scripted)");
        match self {
            ScriptedError::RateLimited(retry_after) => RcError::RateLimited { retry_after },
            ScriptedError::PermissionDenied => RcError::PermissionDenied(context),
            ScriptedError::NotFound => RcError::NotFound(context),
            ScriptedError::Conflict => RcError::Conflict(context),
            ScriptedError::Transient => RcError::Transient(context),
        }
    }
}

#[derive(Debug)]
struct MockGatewayInner {
    next_id: u64,
    groups: BTreeMap<GroupId, (TenantId, String)>,
    rooms: BTreeMap<RoomId, RoomInfo>,
    occupants: HashMap<RoomId, BTreeSet<MemberId>>,
    calls: Vec<GatewayCall>,
    failures: HashMap<Operation, VecDeque<ScriptedError>>,
    delays: HashMap<Operation, Duration>,
}

impl Default for MockGatewayInner {
    fn default() -> Self {
        Self {
            next_id: FIRST_ID,
            groups: BTreeMap::new(),
            rooms: BTreeMap::new(),
            occupants: HashMap::new(),
            calls: Vec::new(),
            failures: HashMap::new(),
            delays: HashMap::new(),
        }
    }
}

impl MockGatewayInner {
    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_room(&mut self, tenant: TenantId, group: Option<GroupId>, name: &str) -> RoomInfo {
        let room = RoomInfo {
            id: RoomId(self.allocate()),
            tenant,
            name: name.to_string(),
            group,
        };
        self.rooms.insert(room.id, room.clone());
        room
    }

    fn place(&mut self, member: MemberId, room: Option<RoomId>) {
        for members in self.occupants.values_mut() {
            members.remove(&member);
        }
        if let Some(room) = room {
            self.occupants.entry(room).or_default().insert(member);
        }
    }
}

/// In-memory [`GatewayClient`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    inner: Arc<Mutex<MockGatewayInner>>,
}

impl MockGateway {
    /// Create an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockGatewayInner> {
        self.inner.lock().unwrap()
    }

    /// Add an existing group.
    pub fn with_group(&self, tenant: TenantId, name: &str) -> GroupId {
        let mut inner = self.lock();
        let id = GroupId(inner.allocate());
        inner.groups.insert(id, (tenant, name.to_string()));
        id
    }

    /// Add an existing room.
    pub fn with_room(&self, tenant: TenantId, group: Option<GroupId>, name: &str) -> RoomId {
        self.lock().insert_room(tenant, group, name).id
    }

    /// Delete a room behind the controller's back.
    pub fn remove_room_externally(&self, room: RoomId) {
        let mut inner = self.lock();
        inner.rooms.remove(&room);
        inner.occupants.remove(&room);
    }

    /// Put a member in a room (`None` = disconnect).
    pub fn place_member(&self, member: MemberId, room: Option<RoomId>) {
        self.lock().place(member, room);
    }

    /// Fail the next call of `operation` with `error`. Calls queue up.
    pub fn fail_next(&self, operation: Operation, error: ScriptedError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Make every call of `operation` take `delay` before answering.
    pub fn delay(&self, operation: Operation, delay: Duration) {
        self.lock().delays.insert(operation, delay);
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    /// Number of calls made for `operation`.
    #[must_use]
    pub fn count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    /// Rooms currently existing in a tenant.
    #[must_use]
    pub fn rooms(&self, tenant: TenantId) -> Vec<RoomInfo> {
        self.lock()
            .rooms
            .values()
            .filter(|r| r.tenant == tenant)
            .cloned()
            .collect()
    }

    /// A room by id, if it exists.
    #[must_use]
    pub fn room(&self, room: RoomId) -> Option<RoomInfo> {
        self.lock().rooms.get(&room).cloned()
    }

    /// Rooms in a tenant with the given name.
    #[must_use]
    pub fn rooms_named(&self, tenant: TenantId, name: &str) -> Vec<RoomInfo> {
        self.rooms(tenant)
            .into_iter()
            .filter(|r| r.name == name)
            .collect()
    }

    /// Groups in a tenant.
    #[must_use]
    pub fn groups(&self, tenant: TenantId) -> Vec<GroupInfo> {
        self.lock()
            .groups
            .iter()
            .filter(|(_, (t, _))| *t == tenant)
            .map(|(id, (_, name))| GroupInfo {
                id: *id,
                name: name.clone(),
            })
            .collect()
    }

    /// Room a member is in.
    #[must_use]
    pub fn room_of(&self, member: MemberId) -> Option<RoomId> {
        self.lock()
            .occupants
            .iter()
            .find(|(_, members)| members.contains(&member))
            .map(|(room, _)| *room)
    }

    /// Record the call, wait out any delay, then apply a scripted failure.
    async fn enter(&self, call: GatewayCall) -> Result<(), RcError> {
        let operation = call.operation();
        let (delay, failure) = {
            let mut inner = self.lock();
            inner.calls.push(call);
            let delay = inner.delays.get(&operation).copied();
            let failure = inner
                .failures
                .get_mut(&operation)
                .and_then(VecDeque::pop_front);
            (delay, failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(error) => Err(error.into_error(operation)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn list_groups(&self, tenant: TenantId) -> Result<Vec<GroupInfo>, RcError> {
        self.enter(GatewayCall::ListGroups(tenant)).await?;
        Ok(self.groups(tenant))
    }

    async fn list_rooms(&self, tenant: TenantId) -> Result<Vec<RoomInfo>, RcError> {
        self.enter(GatewayCall::ListRooms(tenant)).await?;
        Ok(self.rooms(tenant))
    }

    async fn create_group(&self, tenant: TenantId, name: &str) -> Result<GroupInfo, RcError> {
        self.enter(GatewayCall::CreateGroup(tenant, name.to_string()))
            .await?;
        let id = self.with_group(tenant, name);
        Ok(GroupInfo {
            id,
            name: name.to_string(),
        })
    }

    async fn create_room(&self, request: &CreateRoom) -> Result<RoomInfo, RcError> {
        self.enter(GatewayCall::CreateRoom(request.clone())).await?;
        Ok(self
            .lock()
            .insert_room(request.tenant, request.group, &request.name))
    }

    async fn delete_room(&self, room: RoomId) -> Result<(), RcError> {
        self.enter(GatewayCall::DeleteRoom(room)).await?;
        let mut inner = self.lock();
        inner.occupants.remove(&room);
        match inner.rooms.remove(&room) {
            Some(_) => Ok(()),
            None => Err(RcError::NotFound(format!("room {room}"))),
        }
    }

    async fn move_member(
        &self,
        tenant: TenantId,
        member: MemberId,
        room: RoomId,
    ) -> Result<(), RcError> {
        self.enter(GatewayCall::MoveMember(tenant, member, room))
            .await?;
        let mut inner = self.lock();
        if !inner.rooms.contains_key(&room) {
            return Err(RcError::NotFound(format!("room {room}")));
        }
        inner.place(member, Some(room));
        Ok(())
    }

    async fn list_occupants(
        &self,
        tenant: TenantId,
        room: RoomId,
    ) -> Result<Vec<MemberId>, RcError> {
        self.enter(GatewayCall::ListOccupants(tenant, room)).await?;
        Ok(self
            .lock()
            .occupants
            .get(&room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default())
    }
}
