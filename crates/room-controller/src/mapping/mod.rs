//! Durable mapping from tenants and owners to the rooms RC created.
//!
//! This module provides:
//! - `MappingStore` - in-memory mapping with write-through persistence,
//!   owned and mutated only by the serializer
//! - `RoutingSnapshot` - read-only view published over a `watch` channel for
//!   the event reactor
//! - `MappingBackend` - persistence seam with a JSON file and a Redis
//!   implementation
//!
//! # Key Patterns
//!
//! - `group:{tenant}` - managed group (category) of the tenant
//! - `trigger:{tenant}` - trigger room of the tenant
//! - `owner:{tenant}:{member}` - room created for a member
//!
//! Values are snowflakes encoded as decimal strings.

pub mod file;
pub mod redis;
pub mod store;

pub use file::JsonFileBackend;
pub use redis::RedisBackend;
pub use store::{MappingBackend, MappingKey, MappingStore, RoutingSnapshot};
