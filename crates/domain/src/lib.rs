//! # FlagSync Domain
//!
//! Domain types for the feature-flag sync subsystem.
//!
//! This crate contains:
//! - Flag and segment definitions plus their change sets
//! - Stream notifications, actions and streaming statuses
//! - Configuration structures
//! - Domain error types and Result definitions
//!
//! ## Architecture
//! - No dependencies on other FlagSync crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
