//! # Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - cuboid.toml (default configuration)
//! - cuboid.local.toml (git-ignored local overrides)
//! - Environment variables (CUBOID_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # cuboid.toml
//! [cache]
//! enabled = true
//! capacity = 100000
//!
//! [limits]
//! max_area_cells = 1000000
//!
//! [persistence]
//! enabled = true
//! data_dir = "/var/lib/cuboid/data"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! CUBOID_CACHE__CAPACITY=50000
//! CUBOID_PERSISTENCE__DATA_DIR=/custom/path
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the result cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached cell results per cube (LRU eviction)
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

/// Guardrails for expensive operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of base cells a full area expansion may produce
    #[serde(default = "default_max_area_cells")]
    pub max_area_cells: u64,

    /// Maximum number of dimensions per cube
    #[serde(default = "default_max_dimensions")]
    pub max_dimensions: usize,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable the file-backed journal/snapshot backend
    #[serde(default)]
    pub enabled: bool,

    /// Base directory for snapshot and journal files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Whether to flush the journal on each batch commit
    #[serde(default = "default_true")]
    pub immediate_sync: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_cache_capacity() -> usize {
    100_000
}
fn default_max_area_cells() -> u64 {
    1_000_000
}
fn default_max_dimensions() -> usize {
    32
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. cuboid.toml (base configuration)
    /// 2. cuboid.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (CUBOID_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("cuboid.toml"))
            .merge(Toml::file("cuboid.local.toml"))
            .merge(Env::prefixed("CUBOID_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CUBOID_").split("__"))
            .extract()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_area_cells: default_max_area_cells(),
            max_dimensions: default_max_dimensions(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            enabled: false,
            data_dir: default_data_dir(),
            immediate_sync: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}
