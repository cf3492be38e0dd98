//! write-array-database: `.npz`（keys/values）-> LMDB 数组库

use anyhow::{Context, Result};
use clap::Parser;
use kvforge::{logging, ArraySource, BuildConfig, DatabaseBuilder, RecordSource};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "write-array-database", version, about = "Write an .npz archive of arrays into an LMDB database")]
struct Args {
    /// 含 keys.npy / values.npy 的归档
    #[arg(long = "src_npz")]
    src_npz: PathBuf,

    /// 目标数据库目录（已存在则整体替换）
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
    let source = ArraySource::new(&args.src_npz).with_strict_schema(config.strict_schema);
    let records = source.records()?;
    info!("Loaded {} arrays from {}", records.len(), source.path().display());

    let report = DatabaseBuilder::new(config)
        .build(&records, &args.dst_database)
        .with_context(|| format!("Failed to write {}", args.dst_database.display()))?;
    info!("Build complete\n{}", report);
    Ok(())
}
