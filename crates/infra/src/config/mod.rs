//! Configuration loading and management
//!
//! This module provides utilities for loading the sync configuration from
//! environment variables, `.env` files and TOML/JSON files.

pub mod loader;

// Re-export commonly used items
pub use loader::{apply_env_overrides, find_config_path, load, load_from_env, load_from_file};
