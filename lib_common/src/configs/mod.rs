//! # Configuration Modules
//!
//! This module aggregates the configuration providers: the layered
//! environment / secrets file / config file / defaults hierarchy, and the
//! execution environment switch.

/// Layered provider hierarchy backed by `more-config` JSON files and the process environment.
pub mod config_sys;

/// Local versus deployed execution.
pub mod environment;

pub use config_sys::{
    env_vars_layer, get_runtime_config, load_runtime_config, normalize_key, ConfigError, ProviderKind,
    ProviderLayer, RuntimeConfig,
};
pub use environment::Environment;
