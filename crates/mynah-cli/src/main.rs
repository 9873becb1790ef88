#![forbid(unsafe_code)]

mod cmd;
mod fetch;

use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "mynah: live relational mirror of a work-tracking service",
    long_about = None
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "mynah.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Seed the mirror with a one-time bulk load",
        long_about = "Fetch full entity datasets, infer schemas, create the mirror tables, \
                      and insert the seed rows.",
        after_help = "EXAMPLES:\n    # Seed from a directory of <Entity>.json record dumps\n    mynah load --from ./dumps"
    )]
    Load(cmd::load::LoadArgs),

    #[command(
        about = "Apply change events to the mirror",
        long_about = "Optionally seed the mirror, then drain a file of JSON-line change \
                      events through the reorder buffer in creation-time order.",
        after_help = "EXAMPLES:\n    # Seed, then drain a file of change events\n    mynah ingest --from ./dumps --events ./events.jsonl"
    )]
    Ingest(cmd::ingest::IngestArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MYNAH_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "mynah_core=debug,debug"
        } else {
            "mynah_core=info,warn"
        })
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = mynah_core::config::load_config(&cli.config)?;

    match cli.command {
        Commands::Load(args) => cmd::load::run_load(&config, &args),
        Commands::Ingest(args) => cmd::ingest::run_ingest(&config, &args),
    }
}
