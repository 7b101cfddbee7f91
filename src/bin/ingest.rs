//! Bulk ingestion CLI
//!
//! Drives the six-pass pipeline over a directory of PDFs. Exit codes:
//! 0 = all sources succeeded, 1 = at least one source failed,
//! 2 = preflight / dependency error.

use anyhow::Context;
use clap::Parser;
use loreforge::config::{EnvName, IngestConfig};
use loreforge::context::PipelineContext;
use loreforge::driver::{run_bulk_ingest, BulkIngestOptions, PROD_RESET_CONFIRMATION};
use loreforge::orchestrator::IngestionPipeline;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "loreforge-ingest")]
#[command(version)]
#[command(about = "6-pass bulk ingestion for TTRPG knowledge bases")]
struct Cli {
    /// Target environment
    #[arg(long, default_value = "dev")]
    env: String,

    /// Concurrent processing threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Directory containing PDFs to process
    #[arg(long, value_name = "PATH")]
    upload_dir: Option<PathBuf>,

    /// Reset database collections before ingestion (DESTRUCTIVE)
    #[arg(long)]
    reset_db: bool,

    /// Resume from existing manifests
    #[arg(long)]
    resume: bool,

    /// Re-run Pass A even if marked complete
    #[arg(long)]
    force_dict_init: bool,

    /// Days to keep artifacts
    #[arg(long, default_value_t = 7)]
    cleanup_days: u64,

    /// Skip artifact cleanup
    #[arg(long)]
    no_cleanup: bool,

    /// No log file, console only
    #[arg(long)]
    no_logfile: bool,

    /// Skip preflight dependency checks (for debugging only)
    #[arg(long)]
    skip_preflight: bool,

    /// Run only dependency verification checks and exit
    #[arg(long)]
    verify_deps: bool,
}

fn init_logging(env: &str, no_logfile: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    if no_logfile {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        return Ok(());
    }

    let logs_dir = PathBuf::from("env").join(env).join("logs");
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("creating log directory {}", logs_dir.display()))?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let log_path = logs_dir.join(format!("bulk_ingest_{}.log", timestamp));
    let log_file = std::fs::File::create(&log_path)
        .with_context(|| format!("creating log file {}", log_path.display()))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(std::sync::Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Interactive typed confirmation for prod resets
fn confirm_prod_reset() -> anyhow::Result<Option<String>> {
    print!(
        "Reset production database? This will DELETE ALL DATA. Type '{}' to confirm: ",
        PROD_RESET_CONFIRMATION
    );
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(Some(line.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.env, cli.no_logfile)?;

    let env: EnvName = cli.env.parse().context("invalid --env value")?;
    let mut config = IngestConfig::from_env(env).context("loading configuration")?;
    config.threads = cli.threads;
    config.validate().context("validating configuration")?;

    let prod_reset_confirmation = if cli.reset_db && env == EnvName::Prod {
        confirm_prod_reset()?
    } else {
        None
    };

    let ctx = PipelineContext::from_config(config)
        .await
        .context("constructing pipeline context")?;
    let pipeline = Arc::new(IngestionPipeline::new(Arc::new(ctx)));

    let options = BulkIngestOptions {
        upload_dir: cli.upload_dir,
        reset_db: cli.reset_db,
        resume: cli.resume,
        force_dict_init: cli.force_dict_init,
        cleanup_days: cli.cleanup_days,
        no_cleanup: cli.no_cleanup,
        skip_preflight: cli.skip_preflight,
        verify_deps: cli.verify_deps,
        prod_reset_confirmation,
    };

    let exit_code = run_bulk_ingest(pipeline, &options).await;
    std::process::exit(exit_code);
}
