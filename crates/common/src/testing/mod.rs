//! Testing utilities and helpers
//!
//! - **[`async_utils`]**: convergence assertions for background tasks
//!
//! Macros exported with `#[macro_export]` live at the crate root.

pub mod async_utils;

pub use async_utils::{poll_until, recv_until, recv_within, timeout_ok};
