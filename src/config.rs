//! Index configuration and durability levels
//!
//! Provides options for balancing write latency against crash safety.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Durability level for block writes
///
/// Every node and header write reaches the file before the call returns;
/// the level only decides when the file is fsynced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityLevel {
    /// fsync after every block write (safest, slowest)
    Synchronous,

    /// Leave blocks in the OS page cache and fsync once on close
    #[default]
    OnClose,
}

impl DurabilityLevel {
    /// Whether every block write is followed by an fsync
    pub fn requires_immediate_sync(&self) -> bool {
        matches!(self, Self::Synchronous)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Synchronous => "fsync after every block write",
            Self::OnClose => "fsync on close",
        }
    }
}

/// Index configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// When the index file is fsynced
    pub durability: DurabilityLevel,

    /// Create missing parent directories on `create`
    pub create_parent_dirs: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            durability: DurabilityLevel::default(),
            create_parent_dirs: false,
        }
    }
}

impl IndexConfig {
    /// Sync every block write
    pub fn for_durability() -> Self {
        Self {
            durability: DurabilityLevel::Synchronous,
            ..Default::default()
        }
    }

    /// Fastest settings, for tests and benchmarks
    pub fn for_testing() -> Self {
        Self {
            durability: DurabilityLevel::OnClose,
            create_parent_dirs: true,
        }
    }

    /// Load a configuration from a JSON file. Missing fields keep their
    /// defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
