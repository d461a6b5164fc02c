//! Cache configuration

use crate::error::{ResourceError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default cost budget: 512 MiB worth of cost units
pub const DEFAULT_MAX_COST: u64 = 512 * 1024 * 1024;

/// Tunables for a [`crate::context::ResourceContext`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Budget the cache evicts down to
    pub max_cost: u64,
    /// Worker threads for load processes, 0 lets rayon decide
    pub worker_threads: usize,
    /// Prefix for worker thread names
    pub thread_name: String,
    /// Pretty-print JSON snapshots
    pub pretty_snapshots: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cost: DEFAULT_MAX_COST,
            worker_threads: 0,
            thread_name: "resource-loader".to_string(),
            pretty_snapshots: true,
        }
    }
}

impl CacheConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ResourceError::Deserialization(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            ResourceError::Io(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn with_max_cost(mut self, max_cost: u64) -> Self {
        self.max_cost = max_cost;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }
}
