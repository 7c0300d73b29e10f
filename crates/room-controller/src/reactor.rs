//! Event reactor.
//!
//! Translates gateway events into work items. Every entry point is synchronous
//! and non-blocking: routing reads the latest [`RoutingSnapshot`] published by
//! the mapping store, which may lag the serializer by an item. A stale
//! snapshot only causes a missed match.

use crate::events::VoiceStateChange;
use crate::gateway::VoiceStateTracker;
use crate::mapping::RoutingSnapshot;
use crate::observability::metrics;
use crate::queue::{WorkItem, WorkQueueHandle};
use common::types::TenantId;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Event to work item translation layer.
#[derive(Clone)]
pub struct EventReactor {
    queue: WorkQueueHandle,
    routing: watch::Receiver<Arc<RoutingSnapshot>>,
    voice_states: Arc<VoiceStateTracker>,
}

impl EventReactor {
    #[must_use]
    pub fn new(
        queue: WorkQueueHandle,
        routing: watch::Receiver<Arc<RoutingSnapshot>>,
        voice_states: Arc<VoiceStateTracker>,
    ) -> Self {
        Self {
            queue,
            routing,
            voice_states,
        }
    }

    /// The gateway session is ready and the bot is in `tenant`.
    pub fn on_tenant_ready(&self, tenant: TenantId) -> Vec<WorkItem> {
        metrics::record_event_received("tenant_ready");
        self.submit_all(vec![WorkItem::EnsureTrigger { tenant }])
    }

    /// The bot was added to `tenant`.
    pub fn on_tenant_joined(&self, tenant: TenantId) -> Vec<WorkItem> {
        metrics::record_event_received("tenant_joined");
        self.submit_all(vec![WorkItem::EnsureTrigger { tenant }])
    }

    /// A member's voice connection changed.
    ///
    /// Updates the occupancy tracker, then enqueues `ProvisionAndMove` when
    /// the member entered the trigger room and `ReclaimIfEmpty` when they left
    /// a managed room. Returns the submitted items.
    pub fn on_voice_state_changed(&self, change: VoiceStateChange) -> Vec<WorkItem> {
        metrics::record_event_received("voice_state");

        let VoiceStateChange {
            tenant,
            member,
            display_name,
            before,
            after,
        } = change;

        self.voice_states.update(tenant, member, after);

        let snapshot = Arc::clone(&self.routing.borrow());
        let trigger = snapshot.trigger_room(tenant);
        let mut items = Vec::new();

        if after.is_some() && after == trigger {
            items.push(WorkItem::ProvisionAndMove {
                tenant,
                member,
                display_name,
            });
        }

        if let Some(left) = before {
            if Some(left) != after && Some(left) != trigger && snapshot.is_managed(left) {
                items.push(WorkItem::ReclaimIfEmpty { tenant, room: left });
            }
        }

        if items.is_empty() {
            debug!(
                target: "rc.reactor",
                tenant_id = %tenant,
                member_id = %member,
                "Voice state change needs no action"
            );
        }

        self.submit_all(items)
    }

    fn submit_all(&self, items: Vec<WorkItem>) -> Vec<WorkItem> {
        items
            .into_iter()
            .filter(|item| match self.queue.submit(item.clone()) {
                Ok(_) => true,
                Err(e) => {
                    warn!(
                        target: "rc.reactor",
                        kind = item.kind(),
                        tenant_id = %item.tenant(),
                        error = %e,
                        "Dropping work item"
                    );
                    false
                }
            })
            .collect()
    }
}
