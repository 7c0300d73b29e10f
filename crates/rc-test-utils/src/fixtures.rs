//! Pre-configured test data fixtures for RC testing.

use crate::{MemoryBackend, MockGateway};
use common::types::{MemberId, RoomId, TenantId};
use room_controller::engine::{EnginePolicy, ProvisioningEngine};
use room_controller::events::VoiceStateChange;
use room_controller::mapping::MappingStore;
use std::sync::Arc;

/// Primary test tenant.
pub const TENANT: TenantId = TenantId(1);

/// Second tenant, for isolation tests.
pub const OTHER_TENANT: TenantId = TenantId(2);

pub const ALICE: MemberId = MemberId(42);
pub const BOB: MemberId = MemberId(43);

/// Engine policy with default names and delays.
#[must_use]
pub fn test_policy() -> EnginePolicy {
    EnginePolicy::default()
}

/// Open a store on `backend` and build an engine against `gateway`.
pub async fn engine_with(gateway: &MockGateway, backend: &MemoryBackend) -> ProvisioningEngine {
    let store = MappingStore::open(Arc::new(backend.clone()))
        .await
        .expect("memory backend always loads");
    ProvisioningEngine::new(Arc::new(gateway.clone()), store, test_policy())
}

/// A voice-state change in [`TENANT`].
#[must_use]
pub fn voice_change(
    member: MemberId,
    display_name: &str,
    before: Option<RoomId>,
    after: Option<RoomId>,
) -> VoiceStateChange {
    VoiceStateChange {
        tenant: TENANT,
        member,
        display_name: display_name.to_string(),
        before,
        after,
    }
}
