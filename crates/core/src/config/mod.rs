//! Engine configuration
//!
//! [`EngineConfig`] is plain serde data; [`loader`] reads it from the
//! environment or from a TOML/JSON file.

pub mod loader;

use serde::{Deserialize, Serialize};
use shipyard_common::resilience::DEFAULT_LEARNING_RATE;

use crate::fallback::FallbackChain;
use crate::history::DEFAULT_MAX_HISTORY;
use crate::policy::RetryPolicy;

pub use loader::{load, load_from_env, load_from_file, probe_config_paths};

/// Settings for one [`ResilienceEngine`](crate::ResilienceEngine)
///
/// Every field is optional in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempt records kept per operation; 0 selects the default
    pub max_history_size: usize,
    pub learning_enabled: bool,
    pub learning_rate: f64,
    /// Register the `standard`, `aggressive` and `conservative` policies
    pub default_policies: bool,
    /// Register the `docker_pull` and `default` fallback chains
    pub default_fallbacks: bool,
    /// Registered after the built-ins; a matching name replaces one
    pub policies: Vec<RetryPolicy>,
    pub fallback_chains: Vec<FallbackChain>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_history_size: DEFAULT_MAX_HISTORY,
            learning_enabled: true,
            learning_rate: DEFAULT_LEARNING_RATE,
            default_policies: true,
            default_fallbacks: true,
            policies: Vec::new(),
            fallback_chains: Vec::new(),
        }
    }
}
