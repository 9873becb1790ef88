//! File-backed record fetcher.
//!
//! The production deployment fetches bulk datasets from the work-tracking
//! API; this stand-in reads one `<Entity>.json` array per entity type
//! instead, which is enough for seeding demos, replaying captured dumps,
//! and tests. Page size is meaningless for local files and is ignored.

use std::path::PathBuf;

use anyhow::{Context, Result};
use mynah_core::loader::RecordFetcher;
use mynah_core::schema::Record;

pub struct JsonDirFetcher {
    dir: PathBuf,
}

impl JsonDirFetcher {
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl RecordFetcher for JsonDirFetcher {
    fn fetch_all(
        &self,
        entity_type: &str,
        _page_size: usize,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let path = self.dir.join(format!("{entity_type}.json"));
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let mut records: Vec<Record> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        records.truncate(limit);

        tracing::info!(entity_type, records = records.len(), "loaded record dump");
        Ok(records)
    }
}
