use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use mynah_core::config::MirrorConfig;
use mynah_core::loader::BulkLoader;
use mynah_core::state::MirrorState;
use mynah_core::store::SqliteMirrorStore;

use crate::fetch::JsonDirFetcher;

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Directory of `<Entity>.json` record dumps.
    #[arg(long, value_name = "DIR")]
    pub from: PathBuf,
}

/// Run `mynah load`: seed the mirror tables from record dumps.
///
/// # Errors
///
/// Returns an error if the mirror store cannot be opened. Per-entity load
/// failures are reported, not fatal.
pub fn run_load(config: &MirrorConfig, args: &LoadArgs) -> Result<()> {
    let store = SqliteMirrorStore::open(&config.data_dir, &config.entity_types)?;
    let state = MirrorState::new();
    let fetcher = JsonDirFetcher::new(args.from.clone());

    let report = BulkLoader::new(config, &fetcher, &store, &state).run();

    for load in &report.loaded {
        println!(
            "loaded: {} rows={} columns={}",
            load.entity_type, load.rows, load.columns
        );
    }
    for failure in &report.failed {
        println!(
            "failed: {} stage={} error={}",
            failure.entity_type, failure.stage, failure.error
        );
    }
    println!(
        "load: entities={} failed={} rows={} elapsed_ms={}",
        report.loaded.len(),
        report.failed.len(),
        report.total_rows(),
        report.elapsed.as_millis()
    );

    Ok(())
}
