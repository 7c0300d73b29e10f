//! Observability module for the Room Controller
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rc_work_items_total` | Counter | `kind`, `outcome` | Work item results |
//! | `rc_work_item_duration_seconds` | Histogram | `kind` | Work item latency incl. backoff |
//! | `rc_queue_depth` | Gauge | none | Backlog waiting for the serializer |
//! | `rc_rate_limited_total` | Counter | `operation` | Gateway rate-limit responses |
//! | `rc_rooms_created_total` | Counter | none | Rooms provisioned |
//! | `rc_rooms_reclaimed_total` | Counter | none | Rooms deleted after going empty |
//! | `rc_persistence_failures_total` | Counter | `operation` | Failed mapping writes |
//! | `rc_events_received_total` | Counter | `event` | Gateway events ingested |

pub mod health;
pub mod metrics;

// Re-exports for convenience
pub use health::{health_router, while_serializer_runs, HealthState};
pub use metrics::init_metrics_recorder;
