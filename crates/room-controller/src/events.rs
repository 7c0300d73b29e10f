//! Event payloads delivered by the gateway relay.
//!
//! Identifiers are accepted as decimal strings or bare integers.

use common::types::{MemberId, RoomId, TenantId};
use serde::{Deserialize, Serialize};

/// The gateway session is ready; carries every tenant the bot is in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantReadyEvent {
    pub tenant_ids: Vec<TenantId>,
}

/// The bot was added to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantJoinedEvent {
    pub tenant_id: TenantId,
}

/// A member's voice connection changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateEvent {
    pub tenant_id: TenantId,
    pub member_id: MemberId,
    /// Account name.
    pub username: String,
    /// Tenant-specific nickname, if set.
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub before_room_id: Option<RoomId>,
    #[serde(default)]
    pub after_room_id: Option<RoomId>,
}

impl VoiceStateEvent {
    /// Name used for the member's room: the nickname when present.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

/// A voice-state change as the reactor consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStateChange {
    pub tenant: TenantId,
    pub member: MemberId,
    pub display_name: String,
    pub before: Option<RoomId>,
    pub after: Option<RoomId>,
}

impl From<VoiceStateEvent> for VoiceStateChange {
    fn from(event: VoiceStateEvent) -> Self {
        Self {
            display_name: event.display_name().to_string(),
            tenant: event.tenant_id,
            member: event.member_id,
            before: event.before_room_id,
            after: event.after_room_id,
        }
    }
}
