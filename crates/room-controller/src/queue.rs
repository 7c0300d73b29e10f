//! Work queue and serializer.
//!
//! Producers (the event reactor, on any task) submit [`WorkItem`]s through a
//! cloneable [`WorkQueueHandle`]. Exactly one [`Serializer`] drains the queue
//! and runs each item to completion on its [`WorkExecutor`] before taking the
//! next one, so mutating operations are totally ordered by submission.
//!
//! The queue is unbounded. There is no priority and no coalescing.
//!
//! A failing or panicking item is logged and counted; the loop moves on to the
//! next item. The loop ends when cancelled (checked between items only) or
//! when every handle has been dropped.

use crate::errors::RcError;
use crate::observability::metrics;
use async_trait::async_trait;
use common::types::{MemberId, RoomId, TenantId};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A deferred action against the gateway. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Make sure the tenant's managed group and trigger room exist.
    EnsureTrigger { tenant: TenantId },

    /// Make sure the member has a room and move them into it.
    ProvisionAndMove {
        tenant: TenantId,
        member: MemberId,
        display_name: String,
    },

    /// Delete a managed room if it is still empty after the settle delay.
    ReclaimIfEmpty { tenant: TenantId, room: RoomId },
}

impl WorkItem {
    /// Bounded label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            WorkItem::EnsureTrigger { .. } => "ensure_trigger",
            WorkItem::ProvisionAndMove { .. } => "provision_and_move",
            WorkItem::ReclaimIfEmpty { .. } => "reclaim_if_empty",
        }
    }

    #[must_use]
    pub const fn tenant(&self) -> TenantId {
        match self {
            WorkItem::EnsureTrigger { tenant }
            | WorkItem::ProvisionAndMove { tenant, .. }
            | WorkItem::ReclaimIfEmpty { tenant, .. } => *tenant,
        }
    }
}

/// A submitted item with its correlation id.
#[derive(Debug)]
struct Envelope {
    id: Uuid,
    item: WorkItem,
}

/// Executes work items one at a time.
///
/// Only the serializer calls this, so implementations may hold `&mut` state
/// without locking.
#[async_trait]
pub trait WorkExecutor: Send {
    /// Run one item to completion, including its own retries.
    async fn execute(&mut self, item: WorkItem) -> Result<(), RcError>;
}

/// Factory for the queue's two ends.
pub struct WorkQueue;

impl WorkQueue {
    /// Create an unbounded queue.
    #[must_use]
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (WorkQueueHandle, WorkQueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            WorkQueueHandle {
                sender,
                depth: Arc::clone(&depth),
            },
            WorkQueueReceiver { receiver, depth },
        )
    }
}

/// Producer side of the queue. Cheap to clone, safe from any task.
#[derive(Debug, Clone)]
pub struct WorkQueueHandle {
    sender: mpsc::UnboundedSender<Envelope>,
    depth: Arc<AtomicUsize>,
}

impl WorkQueueHandle {
    /// Submit an item. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Internal` if the serializer has shut down.
    pub fn submit(&self, item: WorkItem) -> Result<Uuid, RcError> {
        let id = Uuid::new_v4();
        let kind = item.kind();
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;

        if self.sender.send(Envelope { id, item }).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            warn!(target: "rc.queue", item_id = %id, kind, "Work queue closed, item dropped");
            return Err(RcError::Internal("work queue closed".to_string()));
        }

        metrics::set_queue_depth(depth);
        debug!(target: "rc.queue", item_id = %id, kind, depth, "Work item submitted");
        Ok(id)
    }

    /// Number of items submitted but not yet taken by the serializer.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// Consumer side of the queue, owned by the [`Serializer`].
#[derive(Debug)]
pub struct WorkQueueReceiver {
    receiver: mpsc::UnboundedReceiver<Envelope>,
    depth: Arc<AtomicUsize>,
}

impl WorkQueueReceiver {
    async fn recv(&mut self) -> Option<Envelope> {
        let envelope = self.receiver.recv().await?;
        let depth = self.depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_queue_depth(depth);
        Some(envelope)
    }
}

/// The single consumer loop.
pub struct Serializer<E> {
    receiver: WorkQueueReceiver,
    executor: E,
    /// Pause between items to stay under gateway rate limits.
    spacing: Duration,
}

impl<E: WorkExecutor> Serializer<E> {
    #[must_use]
    pub fn new(receiver: WorkQueueReceiver, executor: E, spacing: Duration) -> Self {
        Self {
            receiver,
            executor,
            spacing,
        }
    }

    /// Drain the queue until cancelled or every handle is dropped.
    ///
    /// Returns the executor so its final state can be inspected.
    pub async fn run(mut self, cancel: CancellationToken) -> E {
        info!(target: "rc.queue", spacing_ms = self.spacing.as_millis(), "Serializer started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(target: "rc.queue", "Serializer received cancellation signal");
                    break;
                }

                envelope = self.receiver.recv() => {
                    let Some(envelope) = envelope else {
                        info!(target: "rc.queue", "Work queue closed, serializer exiting");
                        break;
                    };
                    self.run_item(envelope).await;
                }
            }

            if !self.spacing.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        info!(target: "rc.queue", "Serializer received cancellation signal");
                        break;
                    }
                    () = tokio::time::sleep(self.spacing) => {}
                }
            }
        }

        info!(target: "rc.queue", "Serializer stopped");
        self.executor
    }

    async fn run_item(&mut self, envelope: Envelope) {
        let Envelope { id, item } = envelope;
        let kind = item.kind();
        let tenant = item.tenant();
        let start = Instant::now();

        debug!(target: "rc.queue", item_id = %id, kind, tenant_id = %tenant, "Executing work item");

        let result = AssertUnwindSafe(self.executor.execute(item))
            .catch_unwind()
            .await;
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(Ok(())) => {
                debug!(
                    target: "rc.queue",
                    item_id = %id,
                    kind,
                    duration_ms = elapsed.as_millis(),
                    "Work item completed"
                );
                "success"
            }
            Ok(Err(e @ RcError::PermissionDenied(_))) => {
                error!(
                    target: "rc.queue",
                    item_id = %id,
                    kind,
                    tenant_id = %tenant,
                    error = %e,
                    "Work item abandoned: missing gateway permissions"
                );
                e.kind()
            }
            Ok(Err(e)) => {
                warn!(
                    target: "rc.queue",
                    item_id = %id,
                    kind,
                    tenant_id = %tenant,
                    error = %e,
                    "Work item abandoned"
                );
                e.kind()
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    target: "rc.queue",
                    item_id = %id,
                    kind,
                    tenant_id = %tenant,
                    panic = %message,
                    "Work item panicked"
                );
                "panic"
            }
        };

        metrics::record_work_item(kind, outcome, elapsed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const PANIC_TENANT: TenantId = TenantId(13);
    const SLOW_TENANT: TenantId = TenantId(99);

    /// Records start/end of every item; tenant 99 is slow, tenant 13 panics.
    #[derive(Clone, Default)]
    struct RecordingExecutor {
        log: Arc<Mutex<Vec<String>>>,
        started_at: Arc<Mutex<Vec<tokio::time::Instant>>>,
    }

    #[async_trait]
    impl WorkExecutor for RecordingExecutor {
        async fn execute(&mut self, item: WorkItem) -> Result<(), RcError> {
            let tenant = item.tenant();
            self.started_at
                .lock()
                .unwrap()
                .push(tokio::time::Instant::now());
            self.log.lock().unwrap().push(format!("start {tenant}"));
            if tenant == SLOW_TENANT {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if tenant == PANIC_TENANT {
                panic!("boom");
            }
            self.log.lock().unwrap().push(format!("end {tenant}"));
            if tenant == TenantId(0) {
                return Err(RcError::Transient("flaky".to_string()));
            }
            Ok(())
        }
    }

    fn ensure(tenant: u64) -> WorkItem {
        WorkItem::EnsureTrigger {
            tenant: TenantId(tenant),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_run_in_submission_order_even_when_first_is_slow() {
        let (handle, receiver) = WorkQueue::new();
        let executor = RecordingExecutor::default();
        let log = Arc::clone(&executor.log);
        let cancel = CancellationToken::new();

        handle.submit(ensure(SLOW_TENANT.get())).unwrap();
        handle.submit(ensure(2)).unwrap();
        handle.submit(ensure(3)).unwrap();

        let task = tokio::spawn(Serializer::new(receiver, executor, Duration::ZERO).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start 99", "end 99", "start 2", "end 2", "start 3", "end 3"]
        );
        assert_eq!(handle.depth(), 0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_and_failing_items_do_not_stop_the_loop() {
        let (handle, receiver) = WorkQueue::new();
        let executor = RecordingExecutor::default();
        let log = Arc::clone(&executor.log);
        let cancel = CancellationToken::new();

        handle.submit(ensure(PANIC_TENANT.get())).unwrap();
        handle.submit(ensure(0)).unwrap();
        handle.submit(ensure(4)).unwrap();

        let task = tokio::spawn(Serializer::new(receiver, executor, Duration::ZERO).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start 13", "start 0", "end 0", "start 4", "end 4"]
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_items() {
        let (handle, receiver) = WorkQueue::new();
        let executor = RecordingExecutor::default();
        let started_at = Arc::clone(&executor.started_at);
        let cancel = CancellationToken::new();

        for tenant in 1..=3 {
            handle.submit(ensure(tenant)).unwrap();
        }

        let task = tokio::spawn(
            Serializer::new(receiver, executor, Duration::from_secs(1)).run(cancel.clone()),
        );
        tokio::time::sleep(Duration::from_secs(10)).await;

        let started_at = started_at.lock().unwrap().clone();
        assert_eq!(started_at.len(), 3);
        for (earlier, later) in started_at.iter().zip(started_at.iter().skip(1)) {
            assert!(*later - *earlier >= Duration::from_secs(1));
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_serializer_exits_when_handles_dropped() {
        let (handle, receiver) = WorkQueue::new();
        let executor = RecordingExecutor::default();
        let log = Arc::clone(&executor.log);

        handle.submit(ensure(1)).unwrap();
        drop(handle);

        Serializer::new(receiver, executor, Duration::ZERO)
            .run(CancellationToken::new())
            .await;

        assert_eq!(*log.lock().unwrap(), vec!["start 1", "end 1"]);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let (handle, receiver) = WorkQueue::new();
        drop(receiver);

        let result = handle.submit(ensure(1));

        assert!(matches!(result, Err(RcError::Internal(_))));
        assert_eq!(handle.depth(), 0);
    }

    #[test]
    fn test_item_kind_and_tenant() {
        let item = WorkItem::ReclaimIfEmpty {
            tenant: TenantId(5),
            room: RoomId(6),
        };
        assert_eq!(item.kind(), "reclaim_if_empty");
        assert_eq!(item.tenant(), TenantId(5));
        assert_eq!(ensure(1).kind(), "ensure_trigger");
    }
}
