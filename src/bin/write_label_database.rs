//! write-label-database: JSON 标签数组 -> LMDB 标签库

use anyhow::{Context, Result};
use clap::Parser;
use kvforge::{logging, BuildConfig, DatabaseBuilder, LabelSource, RecordSource};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "write-label-database", version, about = "Write a JSON array of labels into an LMDB database")]
struct Args {
    #[arg(long = "src_labels")]
    src_labels: PathBuf,

    #[arg(long = "dst_database")]
    dst_database: PathBuf,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    logging::init();

    let config = BuildConfig::from_env().context("Invalid configuration")?;
    let records = LabelSource::new(&args.src_labels).records()?;
    info!("Loaded {} labels from {}", records.len(), args.src_labels.display());

    let report = DatabaseBuilder::new(config)
        .build(&records, &args.dst_database)
        .with_context(|| format!("Failed to write {}", args.dst_database.display()))?;
    info!("Build complete\n{}", report);
    Ok(())
}
