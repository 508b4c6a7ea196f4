// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Gallerist: forum art gallery reconciliation and intake
//!
//! Operator CLI for the gallery batches, art submissions, the catalog and
//! package self-updates. `serve` keeps one session running so batches and
//! installs share their guards and the loaded packages.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use gallerist::catalog::{CatalogField, CatalogItem, SqliteCatalog};
use gallerist::config::AppConfig;
use gallerist::gallery::RestGateway;
use gallerist::guard::ConcurrencyGuard;
use gallerist::host::{CommandRegistry, PackageHost};
use gallerist::installer::{GitHubSource, InstallSettings, UpdateInstaller};
use gallerist::intake::{IntakeSettings, SubmissionIntake};
use gallerist::reconcile::{BatchSettings, ReconciliationEngine};
use gallerist::report::{ConsoleReporter, MemoryReporter, ReportEvent, ReportFormat, Reporter};
use gallerist::session::{Job, JobOutcome, ReporterFactory, Session};
use gallerist::storage::StorageLayout;
use gallerist::{GalleristError, Result};

/// Gallerist CLI - forum art gallery manager
#[derive(Parser, Debug)]
#[command(name = "gallerist")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Keeps a forum art gallery in sync with its catalog", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Job(Job),

    /// Keep running and take operator commands from stdin
    Serve,

    /// Catalog operations
    Catalog {
        #[command(subcommand)]
        action: CatalogCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CatalogCommands {
    /// List collectibles
    List {
        /// Include disabled collectibles
        #[arg(short, long)]
        all: bool,
    },

    /// Add a collectible, or overwrite the one with that name
    Add {
        name: String,

        /// Primary art path, as served (e.g. /static/uploads/fox.png)
        #[arg(long)]
        primary: String,

        /// Detail art path
        #[arg(long, default_value = "")]
        detail: String,

        /// Add it disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Enable a collectible
    Enable { name: String },

    /// Disable a collectible
    Disable { name: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

/// Reporter chosen by `--format`
enum Output {
    Stream(ConsoleReporter),
    /// `json` prints everything as one document at the end
    Collect(MemoryReporter),
}

impl Output {
    fn new(format: &str, quiet: bool) -> Self {
        match format {
            "json" => Output::Collect(MemoryReporter::new()),
            "jsonl" => Output::Stream(ConsoleReporter::new(ReportFormat::JsonLines, quiet)),
            _ => Output::Stream(ConsoleReporter::new(ReportFormat::Text, quiet)),
        }
    }

    /// Print the final result; text output prints `text` instead
    fn finish<T: Serialize>(self, format: &str, result: &T, text: Option<String>) -> Result<()> {
        match self {
            Output::Collect(memory) => {
                let document = serde_json::json!({
                    "events": memory.into_events(),
                    "result": result,
                });
                println!("{}", serde_json::to_string_pretty(&document)?);
            }
            Output::Stream(_) if format == "jsonl" => {
                println!("{}", serde_json::to_string(&serde_json::json!({ "result": result }))?);
            }
            Output::Stream(_) => {
                if let Some(text) = text {
                    println!("{}", text);
                }
            }
        }
        Ok(())
    }
}

impl Reporter for Output {
    fn emit(&mut self, event: ReportEvent) {
        match self {
            Output::Stream(console) => console.emit(event),
            Output::Collect(memory) => memory.emit(event),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Job(job) => run_job(&config, job, &cli.format, cli.quiet).await,
        Commands::Serve => run_serve(&config, &cli.format, cli.quiet).await,
        Commands::Catalog { action } => run_catalog_command(&config, action, &cli.format),
        Commands::Config { action } => run_config_command(config, action, &cli.config),
    }
}

fn connect_gallery(config: &AppConfig) -> Result<Arc<RestGateway>> {
    let token = config.gateway_token()?;
    let gateway = RestGateway::new(
        &config.gallery.api_url,
        &token,
        Duration::from_secs(config.gallery.timeout_secs),
        config.gallery.retries,
    )?;
    Ok(Arc::new(gateway))
}

fn open_catalog(config: &AppConfig) -> Result<Arc<SqliteCatalog>> {
    let catalog = SqliteCatalog::open(&config.database.path)?;
    info!("Catalog opened: {}", config.database.path);
    Ok(Arc::new(catalog))
}

async fn boot_host(config: &AppConfig, gallery: &Arc<RestGateway>) -> Result<Arc<PackageHost>> {
    let mut host = PackageHost::new(".", &config.installer.package_list);
    if let Some(application_id) = config.gallery.application_id {
        host = host.with_registry(CommandRegistry {
            gateway: gallery.clone(),
            application_id,
        });
    }
    let booted = host.boot().await?;
    info!("{} package(s) loaded from {:?}", booted, config.installer.package_list);
    Ok(Arc::new(host))
}

/// Everything a job needs, built once per process
async fn build_session(config: &AppConfig) -> Result<Session> {
    let catalog = open_catalog(config)?;
    let gallery = connect_gallery(config)?;
    let layout = StorageLayout::probe(&config.storage);

    let engine = ReconciliationEngine::new(
        catalog.clone(),
        gallery.clone(),
        layout.clone(),
        ConcurrencyGuard::new(),
        BatchSettings::from(&config.batch),
    );
    let intake = SubmissionIntake::new(catalog, gallery.clone(), layout, IntakeSettings::from(&config.intake));
    let installer = UpdateInstaller::new(
        Arc::new(GitHubSource::from_config(&config.installer)?),
        boot_host(config, &gallery).await?,
        InstallSettings::from(&config.installer),
    );

    Ok(Session::new(engine, intake, installer, config.installer.manifest()))
}

/// Run a single job and exit
async fn run_job(config: &AppConfig, job: Job, format: &str, quiet: bool) -> Result<()> {
    let session = build_session(config).await?;
    let prepared = session.prepare(job)?;
    info!("Running {}", prepared.job());

    let mut output = Output::new(format, quiet);
    let outcome = prepared.run(&mut output).await?;
    output.finish(format, &outcome, outcome.confirmation())?;

    match outcome {
        JobOutcome::Installed(report) => match report.aborted {
            Some(abort) => Err(GalleristError::ExternalService(format!(
                "Failed to fetch {} ({})",
                abort.file, abort.reason
            ))),
            None => Ok(()),
        },
        _ => Ok(()),
    }
}

/// Keep one session alive and feed it commands from stdin
async fn run_serve(config: &AppConfig, format: &str, quiet: bool) -> Result<()> {
    let session = build_session(config).await?;

    // Setup graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = terminate => info!("Received SIGTERM, shutting down..."),
        }

        let _ = shutdown_tx.send(true);
    });

    let report_format = match format {
        "text" => ReportFormat::Text,
        _ => ReportFormat::JsonLines,
    };
    let reporters: ReporterFactory =
        Arc::new(move || Box::new(ConsoleReporter::new(report_format, quiet)) as Box<dyn Reporter>);

    info!("Session ready. Type `help` for commands, `quit` to leave.");
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let stats = session.serve(input, shutdown_rx, reporters, report_format).await?;
    info!(
        "Session ended: {} completed, {} failed, {} refused",
        stats.completed, stats.failed, stats.refused
    );
    Ok(())
}

/// Run catalog commands
fn run_catalog_command(config: &AppConfig, action: CatalogCommands, format: &str) -> Result<()> {
    let catalog = SqliteCatalog::open(&config.database.path)?;

    match action {
        CatalogCommands::List { all } => {
            let items = catalog.list(!all)?;
            if format == "text" {
                println!("Collectibles ({}):", items.len());
                for item in &items {
                    let status = if item.enabled { "" } else { " [DISABLED]" };
                    println!("  {}{} - {} | {}", item.name, status, item.primary_art, item.detail_art);
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&items)?);
            }
        }
        CatalogCommands::Add { name, primary, detail, disabled } => {
            let mut item = CatalogItem::new(name, primary);
            item.detail_art = detail;
            item.enabled = !disabled;
            let id = catalog.upsert(&item)?;
            println!("Saved {} (#{})", item.name, id);
        }
        CatalogCommands::Enable { name } => set_enabled(&catalog, &name, true)?,
        CatalogCommands::Disable { name } => set_enabled(&catalog, &name, false)?,
    }

    Ok(())
}

fn set_enabled(catalog: &SqliteCatalog, name: &str, enabled: bool) -> Result<()> {
    let mut item = catalog
        .find(name)?
        .ok_or_else(|| GalleristError::NotFound(format!("collectible {}", name)))?;
    item.enabled = enabled;
    catalog.update_fields(&item, &[CatalogField::Enabled])?;
    println!("{} {}", if enabled { "Enabled" } else { "Disabled" }, item.name);
    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            let default_config = AppConfig::default();
            default_config.save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            let layout = StorageLayout::probe(&config.storage);
            println!("Configuration at {:?} is valid", config_path);
            println!("  Uploads: {:?} (served as {})", layout.uploads_root(), layout.serving_prefix());
            println!("  Database: {}", config.database.path);
            println!("  Package: {} from {}", config.installer.package_name(), config.installer.source);
            match config.gateway_token() {
                Ok(_) => println!("  Token: set"),
                Err(e) => println!("  Token: {}", e),
            }
        }
    }

    Ok(())
}
