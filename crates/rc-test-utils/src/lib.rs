//! # RC Test Utilities
//!
//! Shared test utilities for the Room Controller (RC) service.
//!
//! This crate provides mock implementations and test fixtures for
//! isolated RC testing without a real gateway or persistence store.
//!
//! ## Modules
//!
//! - `mock_gateway` - In-memory gateway with scripted failures and delays
//! - `memory_backend` - In-memory mapping backend that survives a simulated restart
//! - `fixtures` - Pre-configured tenants, members and engine wiring
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let gateway = MockGateway::new();
//!     gateway.fail_next(Operation::CreateRoom, ScriptedError::RateLimited(Duration::from_secs(2)));
//!
//!     let backend = MemoryBackend::new();
//!     let mut engine = engine_with(&gateway, &backend).await;
//!
//!     engine.execute(WorkItem::EnsureTrigger { tenant: TENANT }).await.unwrap();
//!     assert_eq!(gateway.count(Operation::CreateRoom), 2);
//! }
//! ```

pub mod fixtures;
pub mod memory_backend;
pub mod mock_gateway;

// Re-export commonly used items
pub use fixtures::*;
pub use memory_backend::*;
pub use mock_gateway::*;
