//! Room Controller (RC) Service Library
//!
//! The Room Controller reacts to membership and voice-state events from the
//! real-time gateway and manages ephemeral per-member voice rooms:
//!
//! - A member joins the tenant's trigger room
//! - RC provisions a dedicated room for them and moves them into it
//! - Once the room is observed empty after a settle delay, RC deletes it
//!
//! # Architecture
//!
//! ```text
//! gateway relay ──> routes ──> EventReactor ──> WorkQueue (unbounded FIFO)
//!                                   │                 │
//!                          RoutingSnapshot      Serializer (single task)
//!                          (watch, read-only)         │
//!                                   ▲          ProvisioningEngine
//!                                   │            │            │
//!                                   └──── MappingStore   GatewayClient
//! ```
//!
//! # Key Design Decisions
//!
//! - **One serializer**: every mutating operation runs on the single
//!   `Serializer` task, strictly in submission order. This is what prevents
//!   duplicate rooms when events for the same member arrive back-to-back.
//! - **Snapshots for routing**: the `EventReactor` never blocks; it routes
//!   against a `watch` snapshot of the mapping that may be slightly stale.
//! - **Bounded retry**: a rate-limited call is retried exactly once after the
//!   server-specified delay.
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error taxonomy shared by all components
//! - [`sanitize`] - Display name to room name normalization
//! - [`mapping`] - Durable trigger/owner to room mapping
//! - [`gateway`] - Gateway client seam and the REST implementation
//! - [`events`] - Event payloads delivered by the gateway relay
//! - [`reactor`] - Event to work item translation
//! - [`queue`] - Work queue and serializer loop
//! - [`engine`] - Provisioning engine executing work items
//! - [`observability`] - Metrics and health endpoints
//! - [`routes`] - HTTP ingest router

pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod mapping;
pub mod observability;
pub mod queue;
pub mod reactor;
pub mod routes;
pub mod sanitize;
