//! Gateway client seam.
//!
//! The provisioning engine only talks to the external system through the
//! [`GatewayClient`] trait, which keeps it testable against an in-memory mock.
//! Each call owns its own bounded timeout; the engine adds only the
//! single-retry rate-limit policy on top.
//!
//! # Modules
//!
//! - [`http`] - REST implementation of the trait
//! - [`voice_states`] - occupancy tracker fed by voice-state events

pub mod http;
pub mod voice_states;

pub use http::RestGatewayClient;
pub use voice_states::VoiceStateTracker;

use crate::errors::RcError;
use async_trait::async_trait;
use common::types::{GroupId, MemberId, RoomId, TenantId};

/// A managed group (category) as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: GroupId,
    pub name: String,
}

/// A voice room as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: RoomId,
    pub tenant: TenantId,
    pub name: String,
    pub group: Option<GroupId>,
}

/// Parameters for creating a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoom {
    pub tenant: TenantId,
    pub group: Option<GroupId>,
    pub name: String,
    /// Member granted management rights over the room.
    pub owner: Option<MemberId>,
}

/// Operations the core needs from the gateway.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// List every group in a tenant.
    async fn list_groups(&self, tenant: TenantId) -> Result<Vec<GroupInfo>, RcError>;

    /// List every voice room in a tenant.
    async fn list_rooms(&self, tenant: TenantId) -> Result<Vec<RoomInfo>, RcError>;

    /// Create a group.
    async fn create_group(&self, tenant: TenantId, name: &str) -> Result<GroupInfo, RcError>;

    /// Create a voice room.
    async fn create_room(&self, request: &CreateRoom) -> Result<RoomInfo, RcError>;

    /// Delete a room. Returns `RcError::NotFound` if it no longer exists.
    async fn delete_room(&self, room: RoomId) -> Result<(), RcError>;

    /// Move a member (who must be connected to voice) into a room.
    async fn move_member(
        &self,
        tenant: TenantId,
        member: MemberId,
        room: RoomId,
    ) -> Result<(), RcError>;

    /// Members currently connected to a room.
    async fn list_occupants(&self, tenant: TenantId, room: RoomId)
        -> Result<Vec<MemberId>, RcError>;
}
