//! Runtime configuration consumed by the core.
//!
//! Values only; where they come from (flags, environment, a file) is the
//! caller's concern. [`load_config`] reads a TOML file when present and
//! falls back to defaults otherwise, so a missing config file is never an
//! error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Above this total-record cap, bulk fetches fall back to a single worker
/// to avoid overloading the upstream API.
const LARGE_FETCH_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Entity types to track; one mirror table each.
    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<String>,

    /// Grace period events spend in the reorder buffer, compensating for
    /// delivery latency skew. The upstream documents up to ~2 s.
    #[serde(default = "default_buffer_delay_ms")]
    pub buffer_delay_ms: u64,

    /// Page size for bulk fetches.
    #[serde(default = "default_fetch_page_size")]
    pub fetch_page_size: usize,

    /// Total-record cap per entity type during bulk load.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Whether to run the bulk loader at startup. Without it no entity
    /// type ever becomes ready, so the mirror accepts nothing.
    #[serde(default = "default_true")]
    pub refresh_on_start: bool,

    /// Fetch-stage worker cap; collapses to 1 for large fetch limits.
    #[serde(default = "default_fetch_workers")]
    pub max_fetch_workers: usize,

    /// Directory holding the per-entity mirror database files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            entity_types: default_entity_types(),
            buffer_delay_ms: default_buffer_delay_ms(),
            fetch_page_size: default_fetch_page_size(),
            fetch_limit: default_fetch_limit(),
            refresh_on_start: default_true(),
            max_fetch_workers: default_fetch_workers(),
            data_dir: default_data_dir(),
        }
    }
}

impl MirrorConfig {
    #[must_use]
    pub const fn buffer_delay(&self) -> Duration {
        Duration::from_millis(self.buffer_delay_ms)
    }

    /// Fetch-stage parallelism, never zero.
    #[must_use]
    pub fn effective_fetch_workers(&self) -> usize {
        if self.fetch_limit > LARGE_FETCH_LIMIT {
            1
        } else {
            self.max_fetch_workers.max(1)
        }
    }
}

/// Load configuration from a TOML file; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<MirrorConfig> {
    if !path.exists() {
        return Ok(MirrorConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    toml::from_str::<MirrorConfig>(&content)
        .with_context(|| format!("failed to parse {}", path.display()))
}

fn default_entity_types() -> Vec<String> {
    ["Defect", "DefectSuite", "HierarchicalRequirement"]
        .map(str::to_owned)
        .to_vec()
}

const fn default_buffer_delay_ms() -> u64 {
    2_000
}

const fn default_fetch_page_size() -> usize {
    150
}

const fn default_fetch_limit() -> usize {
    75
}

const fn default_true() -> bool {
    true
}

const fn default_fetch_workers() -> usize {
    4
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("mirror_data")
}
