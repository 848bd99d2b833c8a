//! The migration engine.
//!
//! Ties discovery, the ledger, the execution set builder and batch
//! execution together for one direction:
//!
//! 1. discover migration files under every root,
//! 2. read the ledger,
//! 3. compute the ordered plan,
//! 4. load bodies for the planned migrations only,
//! 5. run the batch,
//! 6. persist (up) or clear (down) ledger records once the whole batch succeeded.
//!
//! A failed batch leaves the ledger untouched, including for the steps that
//! did run before the failure. A retry will run those steps again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::body::{MigrationLoader, PlannedMigration, SqlFileLoader, load_all};
use crate::config::{DEFAULT_EXTENSION, MigrateConfig};
use crate::connection::Connection;
use crate::descriptor::{Direction, MigrationDescriptor, epoch_sentinel};
use crate::discovery::{FileReader, FsReader, discover};
use crate::error::Result;
use crate::executor::Batch;
use crate::history::{AppliedRecord, Ledger};
use crate::plan::{match_applied, plan_down, plan_up, to_record};
use crate::progress::{NoopObserver, ProgressEvent, ProgressObserver};

/// What to migrate, and how far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateRequest {
    /// Direction of the run.
    pub direction: Direction,
    /// Name of the migration to stop at (inclusive).
    pub to: Option<String>,
    /// Consider every discovered migration when migrating up.
    pub ignore_timestamp: bool,
    /// Directories to scan, in order.
    pub roots: Vec<PathBuf>,
    /// Migration file extension.
    pub extension: String,
}

impl MigrateRequest {
    /// Migrates up through every pending migration under `roots`.
    pub fn up(roots: Vec<PathBuf>) -> Self {
        Self {
            direction: Direction::Up,
            to: None,
            ignore_timestamp: false,
            roots,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    /// Reverts every applied migration found under `roots`.
    pub fn down(roots: Vec<PathBuf>) -> Self {
        Self {
            direction: Direction::Down,
            ..Self::up(roots)
        }
    }

    /// Builds a request from a validated config.
    pub fn from_config(config: &MigrateConfig, direction: Direction) -> Self {
        Self {
            direction,
            to: config.to.clone(),
            ignore_timestamp: config.ignore_timestamp,
            roots: config.migrations_directories.clone(),
            extension: config.extension.clone(),
        }
    }

    /// Stops at the named migration.
    #[must_use]
    pub fn to(mut self, name: impl Into<String>) -> Self {
        self.to = Some(name.into());
        self
    }

    /// Sets whether to ignore the ledger's latest timestamp when migrating up.
    #[must_use]
    pub fn ignore_timestamp(mut self, enabled: bool) -> Self {
        self.ignore_timestamp = enabled;
        self
    }

    /// Uses a different file extension.
    #[must_use]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

/// Computes the plan for `request` against ledger records read by the caller.
///
/// `applied` must be newest first, as the ledger returns it. Nothing is
/// written anywhere, so this also serves dry runs against a database that
/// does not exist yet.
pub async fn plan_request(
    reader: &dyn FileReader,
    relative_to: &Path,
    request: &MigrateRequest,
    applied: &[AppliedRecord],
) -> Result<Vec<MigrationDescriptor>> {
    let discovered = discover(reader, &request.roots, &request.extension).await?;
    debug!(count = discovered.len(), "Discovered migrations");

    let to = request.to.as_deref();
    match request.direction {
        Direction::Up => {
            let latest = applied
                .first()
                .map_or_else(epoch_sentinel, |record| record.timestamp);
            debug!(latest = %latest, "Latest applied migration");
            Ok(plan_up(discovered, latest, request.ignore_timestamp, to))
        }
        Direction::Down => {
            let applied = match_applied(&discovered, applied, relative_to)?;
            Ok(plan_down(applied, to))
        }
    }
}

/// Runs migrations over a borrowed connection.
pub struct MigrationEngine<'c> {
    connection: &'c Connection,
    ledger: Ledger,
    relative_to: PathBuf,
    reader: Arc<dyn FileReader>,
    loader: Arc<dyn MigrationLoader>,
    observer: Arc<dyn ProgressObserver>,
}

impl<'c> MigrationEngine<'c> {
    /// Creates an engine that reads `.sql` files from disk and reports nothing.
    pub fn new(
        connection: &'c Connection,
        table: impl Into<String>,
        relative_to: impl Into<PathBuf>,
    ) -> Self {
        let reader: Arc<dyn FileReader> = Arc::new(FsReader);
        Self {
            connection,
            ledger: Ledger::new(connection.pool().clone(), table),
            relative_to: relative_to.into(),
            loader: Arc::new(SqlFileLoader::new(Arc::clone(&reader))),
            reader,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Uses a different file reader for discovery.
    ///
    /// The loader is left alone; pass a matching one with [`Self::with_loader`].
    #[must_use]
    pub fn with_reader(mut self, reader: Arc<dyn FileReader>) -> Self {
        self.reader = reader;
        self
    }

    /// Uses a different body loader.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn MigrationLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Reports progress to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Computes what `request` would run, without loading or running anything.
    pub async fn plan(&self, request: &MigrateRequest) -> Result<Vec<MigrationDescriptor>> {
        let applied = self.ledger.list_applied().await?;
        plan_request(self.reader.as_ref(), &self.relative_to, request, &applied).await
    }

    /// Runs `request` and returns the migrations that were executed.
    pub async fn run(&self, request: &MigrateRequest) -> Result<Vec<MigrationDescriptor>> {
        let planned = self.plan(request).await?;
        if planned.is_empty() {
            info!(direction = %request.direction, "No migrations to run");
            return Ok(Vec::new());
        }

        let steps = load_all(self.loader.as_ref(), planned).await?;
        self.execute(request.direction, steps).await
    }

    async fn execute(
        &self,
        direction: Direction,
        steps: Vec<PlannedMigration>,
    ) -> Result<Vec<MigrationDescriptor>> {
        self.observer.on_event(&ProgressEvent::MigrationsStarting {
            direction,
            count: steps.len(),
        });

        let mut batch = Batch::new(direction, steps);
        batch
            .execute(self.connection, self.observer.as_ref())
            .await?;

        let executed: Vec<MigrationDescriptor> = batch
            .steps()
            .iter()
            .map(|step| step.descriptor.clone())
            .collect();
        let records: Vec<AppliedRecord> = executed
            .iter()
            .map(|m| to_record(m, &self.relative_to))
            .collect();

        match direction {
            Direction::Up => {
                self.ledger.insert(&records).await?;
                self.observer.on_event(&ProgressEvent::LedgerSaved {
                    count: records.len(),
                });
            }
            Direction::Down => {
                self.ledger.delete(&records).await?;
                self.observer.on_event(&ProgressEvent::LedgerCleared {
                    count: records.len(),
                });
            }
        }

        info!(
            direction = %direction,
            count = executed.len(),
            "Migrations completed successfully"
        );
        Ok(executed)
    }
}
