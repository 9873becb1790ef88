use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use mynah_core::buffer::ReorderBuffer;
use mynah_core::config::MirrorConfig;
use mynah_core::event::ChangeEvent;
use mynah_core::loader::BulkLoader;
use mynah_core::pipeline::IngestPipeline;
use mynah_core::state::MirrorState;
use mynah_core::store::SqliteMirrorStore;

use crate::fetch::JsonDirFetcher;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON-lines file of change events.
    #[arg(long, value_name = "FILE")]
    pub events: PathBuf,

    /// Directory of `<Entity>.json` record dumps for the seed load.
    /// Required when `refresh_on_start` is enabled.
    #[arg(long, value_name = "DIR")]
    pub from: Option<PathBuf>,
}

/// Run `mynah ingest`: optionally seed the mirror, then drain a file of
/// change events through the reorder buffer in creation-time order.
///
/// This is the one-shot equivalent of the long-running service: the same
/// bulk load, buffer, and pipeline, with the buffer closed after the last
/// event so the drain terminates.
///
/// # Errors
///
/// Returns an error if the store cannot be opened, the events file cannot
/// be read, or no entity type is loaded (buffered events would wait
/// forever).
pub fn run_ingest(config: &MirrorConfig, args: &IngestArgs) -> Result<()> {
    let store = Arc::new(SqliteMirrorStore::open(&config.data_dir, &config.entity_types)?);
    let state = Arc::new(MirrorState::new());

    if config.refresh_on_start {
        let from = args
            .from
            .as_ref()
            .context("refresh_on_start is enabled; --from <DIR> is required to seed the mirror")?;
        let fetcher = JsonDirFetcher::new(from.clone());
        let report = BulkLoader::new(config, &fetcher, store.as_ref(), &state).run();
        println!(
            "load: entities={} failed={} rows={}",
            report.loaded.len(),
            report.failed.len(),
            report.total_rows()
        );
    }

    if state.ready_entity_types().is_empty() {
        anyhow::bail!(
            "no entity types are loaded; events would wait forever \
             (enable refresh_on_start and pass --from)"
        );
    }

    let buffer = Arc::new(ReorderBuffer::new(config.buffer_delay()));
    let pipeline = IngestPipeline::new(
        Arc::clone(&buffer),
        Arc::clone(&state),
        Arc::clone(&store),
    );
    let handle = pipeline.spawn().context("spawn ingestion thread")?;

    let file = File::open(&args.events)
        .with_context(|| format!("failed to open {}", args.events.display()))?;

    let mut enqueued = 0_usize;
    let mut rejected = 0_usize;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // The CLI is the producer here; malformed payloads and events for
        // unloaded entity types are rejected at this boundary, before they
        // reach the core.
        match serde_json::from_str::<ChangeEvent>(&line) {
            Ok(event) => {
                if state.is_ready(&event.entity_type) {
                    buffer.enqueue(event);
                    enqueued += 1;
                } else {
                    tracing::warn!(
                        entity_type = %event.entity_type,
                        line = line_no + 1,
                        "entity type not loaded; event rejected"
                    );
                    rejected += 1;
                }
            }
            Err(error) => {
                tracing::warn!(line = line_no + 1, %error, "malformed event line rejected");
                rejected += 1;
            }
        }
    }

    buffer.close();
    let stats = handle
        .join()
        .map_err(|_| anyhow::anyhow!("ingestion thread panicked"))?;

    println!(
        "ingest: enqueued={enqueued} rejected={rejected} applied={} ignored={} failed={}",
        stats.applied, stats.ignored, stats.failed
    );

    Ok(())
}
