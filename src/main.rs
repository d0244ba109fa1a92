//! `addrval` - command-line entry point for the address validation pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use address_validation::streaming::ParquetSink;
use address_validation::transport::SpoolTransport;
use address_validation::validation::build_adapter;
use address_validation::{run_consume, run_direct, run_produce, PipelineConfig, PipelineError, RunSummary};

/// Command-line arguments for addrval
#[derive(Parser, Debug)]
#[command(name = "addrval")]
#[command(about = "Batch address normalization and validation")]
#[command(version)]
struct Args {
    /// JSON configuration document
    #[arg(short, long, env = "ADDRVAL_CONFIG")]
    config: PathBuf,

    /// Local root standing in for the object store
    #[arg(short, long, default_value = ".", env = "ADDRVAL_OUTPUT_ROOT")]
    output_root: PathBuf,

    /// Overrides `batch_mode` from the configuration
    #[arg(long, env = "ADDRVAL_BATCH_MODE")]
    batch_mode: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a source file end to end
    Validate {
        #[arg(short, long)]
        source: PathBuf,
    },
    /// Size a source file into queue messages
    Produce {
        #[arg(short, long)]
        source: PathBuf,
        #[arg(long, env = "ADDRVAL_SPOOL")]
        spool: PathBuf,
    },
    /// Validate pending queue messages
    Consume {
        #[arg(long, env = "ADDRVAL_SPOOL")]
        spool: PathBuf,
        #[arg(long, default_value_t = 10)]
        max_messages: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(summary) => {
            info!(
                "Batches {} written, {} skipped; {} records, {} invalid",
                summary.batches_written,
                summary.skipped_batches.len(),
                summary.records,
                summary.invalid_records
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            let code = match err.downcast_ref::<PipelineError>() {
                Some(pipeline_err) => {
                    error!("{}", pipeline_err.redacted_message());
                    pipeline_err.exit_code()
                }
                None => {
                    error!("{:#}", err);
                    1
                }
            };
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<RunSummary> {
    let config = PipelineConfig::load(&args.config, args.batch_mode.as_deref())?;

    info!("Loaded configuration from {}", args.config.display());

    let sink = ParquetSink::new(&args.output_root, &config.s3_bucket, &config.s3_key);

    let summary = match args.command {
        Command::Validate { source } => {
            let adapter = build_adapter(&config.validator, &config.reader.id_field)?;
            run_direct(&config, &source, adapter.as_ref(), &sink).await?
        }
        Command::Produce { source, spool } => {
            let transport = SpoolTransport::open(&spool, config.size_ceiling)
                .with_context(|| format!("Failed to open spool {}", spool.display()))?;
            run_produce(&config, &source, &transport)?
        }
        Command::Consume { spool, max_messages } => {
            let transport = SpoolTransport::open(&spool, config.size_ceiling)
                .with_context(|| format!("Failed to open spool {}", spool.display()))?;
            let adapter = build_adapter(&config.validator, &config.reader.id_field)?;
            run_consume(&config, &transport, adapter.as_ref(), &sink, max_messages).await?
        }
    };

    Ok(summary)
}
