//! oxide-sequencer CLI
//!
//! Command-line tool for running timestamped migrations.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use oxide_sequencer::config::{DEFAULT_EXTENSION, DEFAULT_MIGRATIONS_DIR};
use oxide_sequencer::prelude::*;

/// Timestamped, ledger-tracked database migrations.
#[derive(Parser)]
#[command(name = "oxide-sequencer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database URL (`sqlite://path` or `sqlite::memory:`).
    #[arg(short, long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Database file path.
    #[arg(long)]
    database_file: Option<PathBuf>,

    /// Migrations directory. May be repeated.
    #[arg(short, long = "migrations-dir")]
    migrations_dir: Vec<PathBuf>,

    /// Base directory for migration directories and ledger paths.
    #[arg(long)]
    relative_to: Option<PathBuf>,

    /// Ledger table name.
    #[arg(long)]
    table: Option<String>,

    /// Migration file extension.
    #[arg(long)]
    extension: Option<String>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations.
    Up {
        /// Stop after this migration (inclusive).
        #[arg(long)]
        to: Option<String>,

        /// Apply every migration on disk, not only those newer than the latest applied.
        #[arg(long)]
        ignore_timestamp: bool,

        /// Show the plan without executing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert applied migrations.
    Down {
        /// Stop after reverting this migration (inclusive).
        #[arg(long)]
        to: Option<String>,

        /// Show the plan without executing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show applied and pending migrations.
    Status,

    /// Create a new, empty migration file.
    Create {
        /// Migration name.
        name: String,

        /// Directory to write into (defaults to the first migrations directory).
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

impl Cli {
    /// Loads the config file, if any, and layers the flags over it.
    fn raw_config(&self) -> Result<RawConfig> {
        let base = match &self.config {
            Some(path) => RawConfig::from_file(path)?,
            None => RawConfig::default(),
        };

        let flags = RawConfig {
            database_url: self.database_url.clone(),
            database_file: self.database_file.clone(),
            migrations_directories: (!self.migrations_dir.is_empty())
                .then(|| self.migrations_dir.clone()),
            relative_to: self.relative_to.clone(),
            migrations_table: self.table.clone(),
            extension: self.extension.clone(),
            ..RawConfig::default()
        };
        Ok(base.merge(flags))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let raw = cli.raw_config()?;
    let orchestrator =
        Orchestrator::new(SqliteProvider::new()).with_observer(Arc::new(TracingObserver));

    match cli.command {
        Commands::Up {
            to,
            ignore_timestamp,
            dry_run,
        } => {
            let raw = RawConfig {
                to: to.or(raw.to),
                ignore_timestamp: if ignore_timestamp {
                    Some(true)
                } else {
                    raw.ignore_timestamp
                },
                ..raw
            };
            migrate(&orchestrator, raw, Direction::Up, dry_run).await?;
        }

        Commands::Down { to, dry_run } => {
            let raw = RawConfig {
                to: to.or(raw.to),
                ..raw
            };
            migrate(&orchestrator, raw, Direction::Down, dry_run).await?;
        }

        Commands::Status => {
            let config = MigrateConfig::from_raw(raw)?;
            let preview = orchestrator.preview(&config, Direction::Up).await?;

            if preview.applied.is_empty() {
                info!("No migrations have been applied yet.");
            } else {
                println!("\nApplied migrations:");
                println!("{:-<60}", "");
                for record in &preview.applied {
                    println!(
                        " [X] {}/{} ({})",
                        record.directory,
                        record.filename,
                        record.timestamp.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                println!();
            }

            print_plan("Pending migrations", &preview.planned);
        }

        Commands::Create { name, dir } => {
            let relative_to = raw.relative_to.unwrap_or_else(|| PathBuf::from("."));
            let directory = dir
                .or_else(|| raw.migrations_directories.and_then(|dirs| dirs.into_iter().next()))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MIGRATIONS_DIR));
            let extension = raw
                .extension
                .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

            MigrationWriter::new(name).write(
                &relative_to.join(directory),
                Utc::now(),
                &extension,
            )?;
        }
    }

    Ok(())
}

async fn migrate(
    orchestrator: &Orchestrator,
    raw: RawConfig,
    direction: Direction,
    dry_run: bool,
) -> Result<()> {
    if !dry_run {
        let outcome = orchestrator.run(raw, direction).await?;
        if outcome.executed.is_empty() {
            info!("No migrations to run.");
        }
        return Ok(());
    }

    info!("Dry run mode - migrations will be listed but not executed.");
    let config = MigrateConfig::from_raw(raw)?;
    let preview = orchestrator.preview(&config, direction).await?;
    print_plan(&format!("Would migrate {direction}"), &preview.planned);
    Ok(())
}

fn print_plan(title: &str, plan: &[MigrationDescriptor]) {
    if plan.is_empty() {
        info!("{title}: none.");
        return;
    }
    println!("\n{title}:");
    println!("{:-<60}", "");
    for migration in plan {
        println!(" [ ] {}", migration.path().display());
    }
    println!();
}
