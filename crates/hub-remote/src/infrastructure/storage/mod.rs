//! Storage infrastructure: configuration file loading.
//!
//! The `config` sub-module reads the TOML configuration file from the
//! platform-appropriate directory (or an explicit path), supplies defaults
//! for anything missing, and validates the hub identifiers once at startup.

pub mod config;
