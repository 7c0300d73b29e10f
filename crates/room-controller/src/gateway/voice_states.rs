//! Voice-state occupancy tracker.
//!
//! The gateway pushes voice-state changes; there is no REST query for who is
//! in a room. Every voice-state event updates this tracker synchronously
//! before it is routed, so an occupancy check made later on the serializer
//! sees every event delivered up to that point.

use common::types::{MemberId, RoomId, TenantId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Tracks which room each member is connected to.
#[derive(Debug, Default)]
pub struct VoiceStateTracker {
    states: RwLock<HashMap<(TenantId, MemberId), RoomId>>,
}

impl VoiceStateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a member's current room (`None` = disconnected).
    ///
    /// Returns the room the member was in before this update.
    pub fn update(&self, tenant: TenantId, member: MemberId, room: Option<RoomId>) -> Option<RoomId> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        match room {
            Some(room) => states.insert((tenant, member), room),
            None => states.remove(&(tenant, member)),
        }
    }

    /// Room a member is connected to.
    #[must_use]
    pub fn room_of(&self, tenant: TenantId, member: MemberId) -> Option<RoomId> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states.get(&(tenant, member)).copied()
    }

    /// Members connected to a room.
    #[must_use]
    pub fn occupants(&self, tenant: TenantId, room: RoomId) -> Vec<MemberId> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        let mut members: Vec<MemberId> = states
            .iter()
            .filter(|((t, _), r)| *t == tenant && **r == room)
            .map(|((_, m), _)| *m)
            .collect();
        members.sort_unstable();
        members
    }
}
