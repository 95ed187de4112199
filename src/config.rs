//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - built-in defaults
//! - dav.toml (project configuration)
//! - Environment variables (DAV_* prefix)
//! - CLI flags (applied by the binary on top of the loaded config)
//!
//! ## Example
//!
//! ```toml
//! # dav.toml
//! kb_dir = "compiled"
//! enumerator = "astar"
//! converter = "weighted"
//!
//! [params]
//! max-distance = "4.0"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! DAV_ENUMERATOR=depth
//! DAV_TIMEOUT_SECS=30
//! ```
//!
//! Besides the typed fields, a free-form `params` map carries the
//! `key=value` engine parameters that components look up by name
//! (`default-axiom-weight`, `max-depth`, ...), so custom components can be
//! configured without touching the schema.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration-time failures; all fatal before any inference starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("negative weight for {0}")]
    NegativeWeight(String),

    #[error("invalid cost-provider parameter: {0}")]
    InvalidCostProvider(String),

    #[error("unknown {kind} \"{name}\"")]
    UnknownComponent { kind: String, name: String },

    #[error("invalid value for {key}: {value}")]
    InvalidParam { key: String, value: String },

    #[error("configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Free-form engine parameters (`key=value`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(pub HashMap<String, String>);

impl Params {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidParam {
                key: key.to_string(),
                value: v.to_string(),
            }),
        }
    }

    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidParam {
                key: key.to_string(),
                value: v.to_string(),
            }),
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "1" | "yes"))
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Knowledge-base directory (written by `compile`, read by `infer`).
    pub kb_dir: PathBuf,

    /// Per-problem timeout in seconds (0 = none).
    pub timeout_secs: u64,

    /// Worker pool size (0 = one per CPU core).
    pub threads: usize,

    /// LHS enumeration strategy: `depth`, `astar`, or a registered name.
    pub enumerator: String,

    /// ILP conversion strategy: `null`, `weighted`, `costed`, or a
    /// registered name.
    pub converter: String,

    /// Free-form component parameters.
    pub params: Params,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            kb_dir: PathBuf::from("compiled"),
            timeout_secs: 0,
            threads: 1,
            enumerator: "depth".to_string(),
            converter: "weighted".to_string(),
            params: Params::default(),
        }
    }
}

impl Config {
    /// Load configuration: defaults < dav.toml < DAV_* environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Toml::file("dav.toml"))
    }

    fn load_from(toml: figment::providers::Data<figment::providers::Toml>) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(toml)
            .merge(Env::prefixed("DAV_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_secs > 0).then(|| std::time::Duration::from_secs(self.timeout_secs))
    }

    pub fn worker_count(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}
