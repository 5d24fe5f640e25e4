//! Process-wide runtime configuration.
//!
//! The active configuration is fixed on first use: either the value passed to
//! [`set_runtime_config`] or [`RuntimeConfig::from_env`].

use std::path::Path;
use std::sync::OnceLock;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::{C2Error, C2Result};

static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads for parallel nets that do not set `num_workers`.
    pub net_workers: usize,
    /// Engines tried, in order, after an operator's own engine list and before the default.
    pub engine_preference: Vec<String>,
    /// Executor for nets whose `type` is empty.
    pub default_net_type: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            net_workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            engine_preference: Vec::new(),
            default_net_type: "simple".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults with `C2RS_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = RuntimeConfig::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        if let Some(workers) = env::net_workers() {
            self.net_workers = workers;
        }
        if let Some(engines) = env::engine_preference() {
            self.engine_preference = engines;
        }
        if let Some(net_type) = env::net_type() {
            self.default_net_type = net_type;
        }
    }

    pub fn from_json_str(src: &str) -> C2Result<Self> {
        serde_json::from_str(src)
            .map_err(|err| C2Error::configuration(format!("invalid runtime config: {err}")))
    }

    /// Reads a JSON config file; environment overrides still apply on top.
    pub fn load(path: impl AsRef<Path>) -> C2Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| {
            C2Error::configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        let mut config = RuntimeConfig::from_json_str(&contents)?;
        config.apply_env();
        Ok(config)
    }
}

/// Active configuration.
pub fn runtime_config() -> &'static RuntimeConfig {
    RUNTIME_CONFIG.get_or_init(RuntimeConfig::from_env)
}

/// Installs `config` as the process configuration. Fails once the configuration has been read
/// or installed.
pub fn set_runtime_config(config: RuntimeConfig) -> C2Result<()> {
    RUNTIME_CONFIG
        .set(config)
        .map_err(|_| C2Error::configuration("runtime configuration is already initialized"))
}
