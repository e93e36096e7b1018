//! Observability adapters
//!
//! [`RuntimeTelemetry`] is the in-process recorder behind the core's
//! `TelemetryRuntimeProducer` port. Logging goes through `tracing`; the
//! embedding process installs the subscriber.

pub mod telemetry;

pub use telemetry::{ResourceSnapshot, RuntimeTelemetry, TelemetrySnapshot};
