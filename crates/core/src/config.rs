//! Registry configuration
//!
//! Connecting and disconnecting can leave behind records whose receiver or
//! sender expired before its cleanup callback ran. Those are harmless but
//! take memory; [`RegistryConfig::auto_prune_interval`] lets a registry sweep
//! them on its own after a number of removals.

use parking_lot::RwLock;
use std::sync::OnceLock;

/// Configuration applied to each new signal registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Run a stale-record sweep after this many removals. `None` disables
    /// automatic sweeps; `prune_stale` can still be called by hand.
    pub auto_prune_interval: Option<usize>,
}

impl RegistryConfig {
    /// Configuration that sweeps after every `interval` removals
    pub fn with_auto_prune(interval: usize) -> Self {
        Self {
            auto_prune_interval: Some(interval.max(1)),
        }
    }
}

/// Process-wide default used by signals built without an explicit config
static REGISTRY_CONFIG: OnceLock<RwLock<RegistryConfig>> = OnceLock::new();

/// Set the default registry configuration
///
/// Only signals created afterwards pick up the new value.
///
/// # Examples
///
/// ```rust
/// use relay_core::config::{set_registry_config, RegistryConfig};
///
/// set_registry_config(RegistryConfig::with_auto_prune(256));
/// ```
pub fn set_registry_config(config: RegistryConfig) {
    let config_lock = REGISTRY_CONFIG.get_or_init(|| RwLock::new(RegistryConfig::default()));
    *config_lock.write() = config;
}

/// Get the current default registry configuration
pub fn registry_config() -> RegistryConfig {
    let config_lock = REGISTRY_CONFIG.get_or_init(|| RwLock::new(RegistryConfig::default()));
    config_lock.read().clone()
}
