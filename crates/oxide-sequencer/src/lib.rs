//! Timestamped, ledger-tracked database migrations for Rust.
//!
//! `oxide-sequencer` runs migration files named `YYYYMMDDHHMMSS-name.sql`
//! against a SQLite database and records what has been applied in a ledger
//! table:
//! - Migrations are discovered from one or more directories
//! - Up runs everything newer than the latest applied migration, oldest first
//! - Down reverts applied migrations, newest first
//! - Both directions accept an inclusive `to` target
//!
//! # Architecture
//!
//! - **Discovery** - Scans directories and parses filenames into descriptors
//! - **History** - The ledger table of applied migrations
//! - **Plan** - Decides which migrations run and in which order
//! - **Executor** - Runs a batch one migration at a time
//! - **Engine** - Discovery, planning, execution and ledger updates for one run
//! - **Orchestrator** - Config validation, connection lifecycle and the engine
//! - **Writer** - Generates new migration files
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_sequencer::prelude::*;
//!
//! let raw = RawConfig {
//!     database_url: Some("sqlite://app.db".to_string()),
//!     migrations_directories: Some(vec!["migrations".into()]),
//!     ..RawConfig::default()
//! };
//!
//! let outcome = Orchestrator::new(SqliteProvider::new())
//!     .with_observer(Arc::new(TracingObserver))
//!     .run(raw, Direction::Up)
//!     .await?;
//! println!("applied {} migration(s)", outcome.executed.len());
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Create a new migration file
//! oxide-sequencer create create_users
//!
//! # Apply pending migrations
//! oxide-sequencer -d sqlite://app.db up
//!
//! # Revert down to (and including) a named migration
//! oxide-sequencer -d sqlite://app.db down --to create_users
//!
//! # Show applied and pending migrations
//! oxide-sequencer -d sqlite://app.db status
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod body;
pub mod config;
pub mod connection;
pub mod descriptor;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod writer;

/// Boxed future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::body::{
        MigrationBody, MigrationLoader, MigrationRegistry, PlannedMigration, SqlFileLoader,
        SqlMigration,
    };
    pub use crate::config::{MigrateConfig, RawConfig};
    pub use crate::connection::{Connection, ConnectionProvider, DatabaseLocation, SqliteProvider};
    pub use crate::descriptor::{Direction, MigrationDescriptor};
    pub use crate::discovery::{FileReader, FsReader};
    pub use crate::engine::{MigrateRequest, MigrationEngine};
    pub use crate::error::{BoxError, MigrateError, Result};
    pub use crate::history::{AppliedRecord, Ledger};
    pub use crate::orchestrator::{Orchestrator, Preview, RunOutcome};
    pub use crate::progress::{
        ChannelObserver, NoopObserver, ProgressEvent, ProgressObserver, TracingObserver,
    };
    pub use crate::writer::MigrationWriter;
    pub use crate::BoxFuture;
}
