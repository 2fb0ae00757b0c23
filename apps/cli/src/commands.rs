//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use paperlink_core::{
    BatchReport, IngestSummary, ProgressReporter, PublishSummary, RunContext, run_ingest,
    run_publish,
};
use paperlink_graph::WikibaseWriter;
use paperlink_search::SearchClient;
use paperlink_shared::{
    AppConfig, GraphConfig, IngestSettings, PublishSettings, init_config,
    load_config, load_config_from, validate_credentials,
};
use paperlink_storage::Ledger;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// paperlink: link code repositories to publications in a knowledge graph.
#[derive(Parser)]
#[command(
    name = "paperlink",
    version,
    about = "Resolve paper/repository links against a knowledge graph and publish the matches.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.paperlink/paperlink.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Options shared by the ingesting subcommands.
#[derive(Args, Debug, Clone)]
pub(crate) struct IngestArgs {
    /// Path to the links dump (a JSON array).
    #[arg(long)]
    pub dump: PathBuf,

    /// Ledger file (defaults to <data_dir>/<db_file> from config).
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Records per batch.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Concurrent search requests.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Skip the counting pass (no ETA).
    #[arg(long)]
    pub no_estimate: bool,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Resolve dump entries not yet in the ledger.
    Ingest(IngestArgs),

    /// Publish resolved, unpublished ledger rows to the knowledge graph.
    Publish {
        /// Ledger file (defaults to <data_dir>/<db_file> from config).
        #[arg(long)]
        db: Option<PathBuf>,

        /// Concurrent graph writes.
        #[arg(long)]
        workers: Option<usize>,

        /// Abort on the first failed write.
        #[arg(long)]
        fail_fast: bool,
    },

    /// Ingest, then publish.
    Run {
        #[command(flatten)]
        ingest: IngestArgs,

        /// Concurrent graph writes.
        #[arg(long)]
        publish_workers: Option<usize>,

        /// Abort on the first failed write.
        #[arg(long)]
        fail_fast: bool,
    },

    /// Show ledger counts.
    Stats {
        /// Ledger file (defaults to <data_dir>/<db_file> from config).
        #[arg(long)]
        db: Option<PathBuf>,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "paperlink=info",
        1 => "paperlink=debug",
        _ => "paperlink=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    let load = || -> Result<AppConfig> {
        Ok(match &config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        })
    };

    match cli.command {
        Command::Ingest(args) => cmd_ingest(load()?, &args).await,
        Command::Publish {
            db,
            workers,
            fail_fast,
        } => cmd_publish(load()?, db.as_deref(), workers, fail_fast).await,
        Command::Run {
            ingest,
            publish_workers,
            fail_fast,
        } => cmd_run(load()?, &ingest, publish_workers, fail_fast).await,
        Command::Stats { db, json } => cmd_stats(load()?, db.as_deref(), json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(load()?).await,
        },
    }
}

/// Fold CLI flags over the loaded config.
fn apply_ingest_overrides(config: &mut AppConfig, args: &IngestArgs) {
    if let Some(batch_size) = args.batch_size {
        config.defaults.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        config.defaults.workers = workers;
    }
}

fn apply_publish_overrides(config: &mut AppConfig, workers: Option<usize>, fail_fast: bool) {
    if let Some(workers) = workers {
        config.publish.workers = workers;
    }
    if fail_fast {
        config.publish.fail_fast = true;
    }
}

fn ledger_path(config: &AppConfig, db: Option<&Path>) -> PathBuf {
    db.map(Path::to_path_buf).unwrap_or_else(|| config.db_path())
}

fn ingest_settings(config: &AppConfig, args: &IngestArgs) -> IngestSettings {
    let mut settings = IngestSettings::from_config(config, &args.dump);
    settings.estimate_total = !args.no_estimate;
    settings
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ingest(mut config: AppConfig, args: &IngestArgs) -> Result<()> {
    apply_ingest_overrides(&mut config, args);
    let settings = ingest_settings(&config, args);
    settings.validate()?;

    let db_path = ledger_path(&config, args.db.as_deref());
    let ledger = Ledger::open(&db_path)
        .await
        .wrap_err_with(|| format!("opening ledger {}", db_path.display()))?;
    let client = SearchClient::new(config.search.clone())?;

    info!(
        dump = %args.dump.display(),
        db = %db_path.display(),
        batch_size = settings.batch_size,
        workers = settings.workers,
        "ingesting dump"
    );

    let ctx = RunContext::new();
    let reporter = CliProgress::new();
    let summary = run_ingest(&settings, &client, &ledger, &ctx, &reporter).await?;
    print_ingest_summary(&summary);
    Ok(())
}

async fn cmd_publish(
    mut config: AppConfig,
    db: Option<&Path>,
    workers: Option<usize>,
    fail_fast: bool,
) -> Result<()> {
    // Validate credentials before doing anything
    let credentials = validate_credentials(&config)?;
    apply_publish_overrides(&mut config, workers, fail_fast);

    let db_path = ledger_path(&config, db);
    let ledger = Arc::new(
        Ledger::open(&db_path)
            .await
            .wrap_err_with(|| format!("opening ledger {}", db_path.display()))?,
    );
    let writer = Arc::new(WikibaseWriter::connect(&GraphConfig::from(&config), &credentials).await?);

    let ctx = RunContext::new();
    let reporter = CliProgress::new();
    let summary = run_publish(
        &PublishSettings::from(&config),
        ledger,
        writer,
        &ctx,
        &reporter,
    )
    .await?;
    print_publish_summary(&summary);
    Ok(())
}

async fn cmd_run(
    mut config: AppConfig,
    args: &IngestArgs,
    publish_workers: Option<usize>,
    fail_fast: bool,
) -> Result<()> {
    // Validate credentials before doing anything
    let credentials = validate_credentials(&config)?;
    apply_ingest_overrides(&mut config, args);
    apply_publish_overrides(&mut config, publish_workers, fail_fast);

    let settings = ingest_settings(&config, args);
    settings.validate()?;

    let db_path = ledger_path(&config, args.db.as_deref());
    let ledger = Arc::new(
        Ledger::open(&db_path)
            .await
            .wrap_err_with(|| format!("opening ledger {}", db_path.display()))?,
    );
    let client = SearchClient::new(config.search.clone())?;

    let ctx = RunContext::new();
    info!(run_id = %ctx.run_id(), dump = %args.dump.display(), "starting run");

    let reporter = CliProgress::new();
    let ingest = run_ingest(&settings, &client, &ledger, &ctx, &reporter).await?;
    print_ingest_summary(&ingest);

    let writer = Arc::new(WikibaseWriter::connect(&GraphConfig::from(&config), &credentials).await?);
    let reporter = CliProgress::new();
    let publish = run_publish(
        &PublishSettings::from(&config),
        ledger,
        writer,
        &ctx,
        &reporter,
    )
    .await?;
    print_publish_summary(&publish);
    Ok(())
}

async fn cmd_stats(config: AppConfig, db: Option<&Path>, json: bool) -> Result<()> {
    let db_path = ledger_path(&config, db);
    let ledger = Ledger::open_readonly(&db_path).await?;
    let stats = ledger.stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("  Ledger:    {}", db_path.display());
    println!("  Rows:      {}", stats.total);
    println!("  Resolved:  {}", stats.resolved);
    println!("  Published: {}", stats.published);
    println!("  Pending:   {}", stats.pending);
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn print_ingest_summary(summary: &IngestSummary) {
    println!();
    println!("  Ingestion complete.");
    println!("  Run:        {}", summary.run_id);
    println!("  Batches:    {}", summary.batches);
    println!("  Records:    {}", summary.records);
    println!("  Resolved:   {}", summary.resolved);
    println!("  Skipped:    {} already in ledger", summary.cursor.skipped_existing);
    println!("  Duplicates: {}", summary.cursor.duplicates);
    println!("  No key:     {}", summary.cursor.missing_key);
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

fn print_publish_summary(summary: &PublishSummary) {
    println!();
    println!("  Publishing complete.");
    println!("  Run:       {}", summary.run_id);
    println!("  Attempted: {}", summary.attempted);
    println!("  Published: {}", summary.published);
    println!("  Failed:    {}", summary.failed);
    println!("  Skipped:   {}", summary.skipped);
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    for (arxiv_id, reason) in &summary.failures {
        println!("    ! {arxiv_id}: {reason}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner that turns into a bar
/// once the amount of work is known.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    fn switch_to_bar(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn ingest_started(&self, total: Option<u64>) {
        if let Some(total) = total {
            self.switch_to_bar(total);
        }
    }

    fn batch_done(&self, report: &BatchReport) {
        self.bar.set_position(report.processed);
        let eta = report
            .remaining
            .map(|d| format!(", eta {}s", d.as_secs()))
            .unwrap_or_default();
        self.bar.set_message(format!(
            "batch {} ({} resolved{eta})",
            report.index, report.resolved
        ));
    }

    fn ingest_done(&self, _summary: &IngestSummary) {
        self.bar.finish_and_clear();
    }

    fn publish_started(&self, total: usize) {
        self.switch_to_bar(total as u64);
    }

    fn row_finished(&self, arxiv_id: &str, current: usize, _total: usize) {
        self.bar.set_position(current as u64);
        self.bar.set_message(arxiv_id.to_string());
    }

    fn publish_done(&self, _summary: &PublishSummary) {
        self.bar.finish_and_clear();
    }
}
