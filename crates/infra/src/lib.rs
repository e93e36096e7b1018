//! # FlagSync Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - HTTP client with retry ([`http`])
//! - Definitions and auth API clients ([`api`])
//! - Server-sent-events stream transport ([`streaming`])
//! - Runtime telemetry recorder ([`observability`])
//! - Configuration loading ([`config`])
//! - The subsystem factory ([`factory`])
//!
//! ## Architecture
//! - Implements traits defined in `flagsync-core`
//! - Contains all "impure" code (network I/O, environment, files)

pub mod api;
pub mod config;
pub mod errors;
pub mod factory;
pub mod http;
pub mod observability;
pub mod streaming;

// Re-export commonly used items
pub use api::{ApiError, AuthApiClient, DefinitionsApiClient};
pub use errors::InfraError;
pub use factory::SyncSubsystem;
pub use http::HttpClient;
pub use observability::RuntimeTelemetry;
pub use streaming::SseClient;
