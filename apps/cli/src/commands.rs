//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use roadmend_checker::LinkChecker;
use roadmend_core::{
    DatabaseLease, FileLease, OpenRouterGenerator, Pipeline, ProgressReporter, ReplacementFinder,
    RunLease, RunOutcome, RunSummary,
};
use roadmend_shared::{
    AppConfig, CheckConfig, LockBackend, ReplacementConfig, api_key, expand_home, init_config,
    load_config, load_config_from,
};
use roadmend_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Roadmend: find and repair dead study links in stored learning roadmaps.
#[derive(Parser)]
#[command(
    name = "roadmend",
    version,
    about = "Check every roadmap study link, log dead ones, and patch in replacements.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.roadmend/roadmend.toml).
    #[arg(long, global = true, env = "ROADMEND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Defaults to `run` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    /// Run one link validation and repair pass.
    Run {
        /// Record dead links without asking for replacements.
        #[arg(long)]
        no_replace: bool,
    },

    /// List invalid-link audit records, newest first.
    Audit {
        /// Include resolved records.
        #[arg(long)]
        all: bool,

        /// Maximum number of records to show.
        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Load the config named by `--config`, or the default one.
pub(crate) fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags, teeing into `[logging] file` if set.
pub(crate) fn init_tracing(cli: &Cli, config: &AppConfig) -> Result<()> {
    use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "roadmend=info",
        1 => "roadmend=debug",
        _ => "roadmend=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let log_file = match &config.logging.file {
        Some(path) => {
            let path = expand_home(path)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| eyre!("cannot open log file {}: {e}", path.display()))?;
            Some(file)
        }
        None => None,
    };
    let ansi = log_file.is_none();
    let writer = match log_file {
        Some(file) => BoxMakeWriter::new(std::io::stdout.and(Mutex::new(file))),
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let result = match cli.log_format {
        LogFormat::Text => fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .try_init(),
    };
    result.map_err(|e| eyre!("failed to initialize logging: {e}"))
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        None => cmd_run(&config, false).await,
        Some(Command::Run { no_replace }) => cmd_run(&config, no_replace).await,
        Some(Command::Audit { all, limit }) => cmd_audit(&config, all, limit).await,
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

async fn cmd_run(config: &AppConfig, no_replace: bool) -> Result<()> {
    let storage = Storage::connect(&config.database).await?;
    storage.ping().await?;

    let checker = LinkChecker::new(CheckConfig::from(config))?;
    let finder = build_finder(config, no_replace)?;

    let lease: Box<dyn RunLease + '_> = match config.lock.backend {
        LockBackend::File => Box::new(FileLease::new(expand_home(&config.lock.path)?)),
        LockBackend::Database => Box::new(DatabaseLease::new(
            &storage,
            config.lock.name.clone(),
            Duration::from_secs(config.lock.stale_after_secs),
        )),
    };

    let progress = CliProgress::new();
    let outcome = Pipeline::new(&storage, &checker, &finder)
        .run(lease.as_ref(), &progress)
        .await;
    progress.clear();

    match outcome? {
        RunOutcome::Busy => {
            println!("Another link validation run is in progress. Nothing to do.");
        }
        RunOutcome::Completed(summary) => print_summary(&summary),
    }
    Ok(())
}

/// Replacement is on only when enabled in config, not suppressed by flag,
/// and an API key is available.
fn build_finder(config: &AppConfig, no_replace: bool) -> Result<ReplacementFinder> {
    let replacement = ReplacementConfig::from(config);
    if no_replace || !replacement.enabled {
        info!("link replacement disabled");
        return Ok(ReplacementFinder::disabled());
    }

    let Some(key) = api_key(config) else {
        warn!(
            env = %config.openrouter.api_key_env,
            "API key not set, link replacement disabled for this run"
        );
        return Ok(ReplacementFinder::disabled());
    };

    let generator = OpenRouterGenerator::new(
        config.openrouter.base_url.clone(),
        key,
        replacement.model,
        replacement.timeout,
    )?;
    info!(model = %generator.model(), "link replacement enabled");
    Ok(ReplacementFinder::new(Arc::new(generator), replacement.delay))
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  Link validation finished");
    println!("  Checked:        {}", summary.checked);
    println!("  Valid:          {}", summary.valid);
    println!("  Invalid:        {}", summary.invalid);
    if summary.blocked > 0 {
        println!("  Blocked:        {}", summary.blocked);
    }
    println!("  Replaced:       {}", summary.replaced);
    println!("  AI failed:      {}", summary.ai_failed);
    println!("  Drift skipped:  {}", summary.skipped_drift);
    println!("  Already logged: {}", summary.already_logged);
    println!("  Now valid:      {}", summary.now_valid);
    if summary.documents_skipped > 0 {
        println!("  Bad documents:  {}", summary.documents_skipped);
    }
    if summary.errors > 0 {
        println!("  Errors:         {}", summary.errors);
    }
    println!();
}

async fn cmd_audit(config: &AppConfig, all: bool, limit: u32) -> Result<()> {
    let storage = Storage::connect(&config.database).await?;
    let records = storage.list_invalid_links(all, limit).await?;

    if records.is_empty() {
        println!("No invalid links on record.");
        return Ok(());
    }

    for record in &records {
        println!(
            "#{:<5} {}  stage {} step {}  [{}]",
            record.id, record.roadmap_id, record.stage_index, record.step_index, record.status_code
        );
        println!("       {}", record.original_url);
        if let Some(new_url) = &record.new_url {
            println!("    -> {new_url}");
        }
        match record.resolved_at {
            Some(at) => println!(
                "       checked {}  resolved {}",
                record.checked_at.to_rfc3339(),
                at.to_rfc3339()
            ),
            None => println!("       checked {}  unresolved", record.checked_at.to_rfc3339()),
        }
    }
    println!();
    println!("  {} record(s)", records.len());
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn clear(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn link_checked(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Checked [{current}/{total}] {url}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }

    fn aborted(&self, summary: &RunSummary) {
        self.spinner
            .abandon_with_message(format!("Aborted after {} links", summary.checked));
    }
}
