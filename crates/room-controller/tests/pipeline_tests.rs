//! End-to-end tests: reactor -> work queue -> serializer -> engine.
//!
//! Time is paused, so the serializer's item spacing and the reclaim settle
//! delay auto-advance whenever every task is idle.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use common::types::RoomId;
use rc_test_utils::{
    test_policy, voice_change, GatewayCall, MemoryBackend, MockGateway, Operation, ScriptedError,
    ALICE, OTHER_TENANT, TENANT,
};
use room_controller::engine::ProvisioningEngine;
use room_controller::gateway::VoiceStateTracker;
use room_controller::mapping::{JsonFileBackend, MappingBackend, MappingStore, RoutingSnapshot};
use room_controller::queue::{Serializer, WorkExecutor, WorkItem, WorkQueue, WorkQueueHandle};
use room_controller::reactor::EventReactor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Long enough for every queued item to drain under paused time.
const DRAIN: Duration = Duration::from_secs(60);

struct Pipeline {
    reactor: EventReactor,
    queue: WorkQueueHandle,
    routing: watch::Receiver<Arc<RoutingSnapshot>>,
    cancel: CancellationToken,
    task: JoinHandle<ProvisioningEngine>,
}

impl Pipeline {
    async fn start(gateway: &MockGateway, backend: Arc<dyn MappingBackend>) -> Self {
        let store = MappingStore::open(backend).await.unwrap();
        let routing = store.subscribe();
        let engine = ProvisioningEngine::new(Arc::new(gateway.clone()), store, test_policy());
        let (queue, receiver) = WorkQueue::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Serializer::new(receiver, engine, Duration::from_secs(1)).run(cancel.clone()),
        );
        let reactor = EventReactor::new(
            queue.clone(),
            routing.clone(),
            Arc::new(VoiceStateTracker::new()),
        );
        Self {
            reactor,
            queue,
            routing,
            cancel,
            task,
        }
    }

    fn snapshot(&self) -> Arc<RoutingSnapshot> {
        Arc::clone(&self.routing.borrow())
    }

    async fn stop(self) -> ProvisioningEngine {
        self.cancel.cancel();
        self.task.await.unwrap()
    }
}

async fn drain() {
    tokio::time::sleep(DRAIN).await;
}

async fn ready_pipeline(gateway: &MockGateway, backend: Arc<dyn MappingBackend>) -> (Pipeline, RoomId) {
    let pipeline = Pipeline::start(gateway, backend).await;
    pipeline.reactor.on_tenant_ready(TENANT);
    drain().await;
    let trigger = pipeline.snapshot().trigger_room(TENANT).unwrap();
    (pipeline, trigger)
}

#[tokio::test(start_paused = true)]
async fn test_joining_trigger_provisions_room_and_moves_member() {
    let gateway = MockGateway::new();
    let (pipeline, trigger) = ready_pipeline(&gateway, Arc::new(MemoryBackend::new())).await;

    let items = pipeline
        .reactor
        .on_voice_state_changed(voice_change(ALICE, "alice", None, Some(trigger)));
    assert_eq!(items.len(), 1);
    drain().await;

    let rooms = gateway.rooms_named(TENANT, "alice");
    assert_eq!(rooms.len(), 1);
    let room = rooms.first().unwrap().id;
    assert_eq!(gateway.room_of(ALICE), Some(room));
    assert!(pipeline.snapshot().is_managed(room));

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_rapid_leave_and_rejoin_creates_one_room() {
    let gateway = MockGateway::new();
    let (pipeline, trigger) = ready_pipeline(&gateway, Arc::new(MemoryBackend::new())).await;

    // Joined, left and rejoined before the first item ran
    pipeline
        .reactor
        .on_voice_state_changed(voice_change(ALICE, "alice", None, Some(trigger)));
    pipeline
        .reactor
        .on_voice_state_changed(voice_change(ALICE, "alice", Some(trigger), None));
    pipeline
        .reactor
        .on_voice_state_changed(voice_change(ALICE, "alice", None, Some(trigger)));
    assert_eq!(pipeline.queue.depth(), 2);
    drain().await;

    let creates = gateway
        .calls()
        .iter()
        .filter(|c| matches!(c, GatewayCall::CreateRoom(r) if r.owner == Some(ALICE)))
        .count();
    assert_eq!(creates, 1);
    assert_eq!(gateway.rooms_named(TENANT, "alice").len(), 1);

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_items_execute_in_submission_order_when_first_is_slow() {
    let gateway = MockGateway::new();
    gateway.delay(Operation::CreateGroup, Duration::from_secs(5));
    let pipeline = Pipeline::start(&gateway, Arc::new(MemoryBackend::new())).await;

    pipeline.reactor.on_tenant_ready(TENANT);
    pipeline.reactor.on_tenant_joined(OTHER_TENANT);
    drain().await;

    let tenants: Vec<_> = gateway
        .calls()
        .iter()
        .filter_map(|c| match c {
            GatewayCall::CreateGroup(tenant, _) => Some(*tenant),
            GatewayCall::CreateRoom(r) => Some(r.tenant),
            _ => None,
        })
        .collect();
    assert_eq!(tenants, vec![TENANT, TENANT, OTHER_TENANT, OTHER_TENANT]);

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_leaving_managed_room_reclaims_it() {
    let gateway = MockGateway::new();
    let (pipeline, trigger) = ready_pipeline(&gateway, Arc::new(MemoryBackend::new())).await;
    pipeline
        .reactor
        .on_voice_state_changed(voice_change(ALICE, "alice", None, Some(trigger)));
    drain().await;
    let room = gateway.room_of(ALICE).unwrap();

    gateway.place_member(ALICE, None);
    let items = pipeline
        .reactor
        .on_voice_state_changed(voice_change(ALICE, "alice", Some(room), None));
    assert_eq!(
        items,
        vec![WorkItem::ReclaimIfEmpty {
            tenant: TENANT,
            room
        }]
    );
    drain().await;

    assert!(gateway.room(room).is_none());
    assert!(!pipeline.snapshot().is_managed(room));

    let engine = pipeline.stop().await;
    assert_eq!(engine.store().owner_room(TENANT, ALICE), None);
}

#[tokio::test(start_paused = true)]
async fn test_room_never_entered_after_failed_move_is_reclaimed() {
    let gateway = MockGateway::new();
    let (pipeline, trigger) = ready_pipeline(&gateway, Arc::new(MemoryBackend::new())).await;
    gateway.fail_next(Operation::MoveMember, ScriptedError::Transient);

    pipeline
        .reactor
        .on_voice_state_changed(voice_change(ALICE, "alice", None, Some(trigger)));
    drain().await;

    assert!(gateway.rooms_named(TENANT, "alice").is_empty());
    let engine = pipeline.stop().await;
    assert_eq!(engine.store().owner_room(TENANT, ALICE), None);
}

// File I/O runs on blocking threads, so this one runs on real time and drives
// the engine directly.
#[tokio::test]
async fn test_mapping_survives_restart_with_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mappings.json");
    let gateway = MockGateway::new();

    let (trigger, room) = {
        let store = MappingStore::open(Arc::new(JsonFileBackend::new(path.clone())))
            .await
            .unwrap();
        let mut engine = ProvisioningEngine::new(Arc::new(gateway.clone()), store, test_policy());
        engine
            .execute(WorkItem::EnsureTrigger { tenant: TENANT })
            .await
            .unwrap();
        engine
            .execute(WorkItem::ProvisionAndMove {
                tenant: TENANT,
                member: ALICE,
                display_name: "alice".to_string(),
            })
            .await
            .unwrap();
        (
            engine.store().trigger_room(TENANT).unwrap(),
            gateway.room_of(ALICE).unwrap(),
        )
    };

    // Fresh process: new backend instance on the same file
    let store = MappingStore::open(Arc::new(JsonFileBackend::new(path)))
        .await
        .unwrap();
    assert_eq!(store.trigger_room(TENANT), Some(trigger));
    assert_eq!(store.owner_room(TENANT, ALICE), Some(room));
    assert!(store.snapshot().is_managed(room));
}

#[tokio::test(start_paused = true)]
async fn test_serializer_stops_on_cancel_and_drops_later_items() {
    let gateway = MockGateway::new();
    let pipeline = Pipeline::start(&gateway, Arc::new(MemoryBackend::new())).await;
    let reactor = pipeline.reactor.clone();

    pipeline.stop().await;

    assert!(reactor.on_tenant_joined(TENANT).is_empty());
    assert!(gateway.calls().is_empty());
}
