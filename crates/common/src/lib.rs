//! Common utilities and types shared across Room Controller components.

#![warn(clippy::pedantic)]

/// Module for tenant, member and room identifier types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
