//! End-to-end migration runs.
//!
//! The orchestrator turns a raw configuration into a finished run: it
//! validates the config, opens the connection, makes sure the database
//! exists and accepts writes, runs the engine and closes the connection.

use std::sync::Arc;

use tracing::{debug, info};

use crate::body::MigrationLoader;
use crate::config::{MigrateConfig, RawConfig};
use crate::connection::{Connection, ConnectionProvider, SqliteProvider};
use crate::descriptor::{Direction, MigrationDescriptor};
use crate::discovery::{FileReader, FsReader};
use crate::engine::{MigrateRequest, MigrationEngine, plan_request};
use crate::error::Result;
use crate::history::{AppliedRecord, Ledger};
use crate::progress::{NoopObserver, ProgressEvent, ProgressObserver};

/// Result of an orchestrated run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Migrations that were executed, in execution order.
    pub executed: Vec<MigrationDescriptor>,
    /// The still-open connection when `leave_open` was set.
    pub connection: Option<Connection>,
}

/// What a run would do, computed without touching the database.
#[derive(Debug, Clone, Default)]
pub struct Preview {
    /// Ledger records, newest first. Empty when there is no database yet.
    pub applied: Vec<AppliedRecord>,
    /// Migrations the run would execute, in execution order.
    pub planned: Vec<MigrationDescriptor>,
}

/// Drives a complete migration run through a [`ConnectionProvider`].
pub struct Orchestrator<P = SqliteProvider> {
    provider: P,
    observer: Arc<dyn ProgressObserver>,
    reader: Option<Arc<dyn FileReader>>,
    loader: Option<Arc<dyn MigrationLoader>>,
}

impl Default for Orchestrator<SqliteProvider> {
    fn default() -> Self {
        Self::new(SqliteProvider::new())
    }
}

impl<P: ConnectionProvider> Orchestrator<P> {
    /// Creates an orchestrator over `provider`.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            observer: Arc::new(NoopObserver),
            reader: None,
            loader: None,
        }
    }

    /// Reports progress to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Discovers migrations through `reader`.
    #[must_use]
    pub fn with_reader(mut self, reader: Arc<dyn FileReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Loads migration bodies through `loader`.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn MigrationLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Returns the connection provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Validates `raw` and migrates in `direction`.
    pub async fn run(&self, raw: RawConfig, direction: Direction) -> Result<RunOutcome> {
        let config = MigrateConfig::from_raw(raw)?;
        self.observer.on_event(&ProgressEvent::ConfigValidated);
        self.run_with_config(&config, direction).await
    }

    /// Migrates in `direction` with an already validated config.
    ///
    /// On error the connection is dropped, which closes it even when
    /// `leave_open` is set. Callers that need the connection after a failure
    /// should [`open`](Self::open) it themselves and use [`run_on`](Self::run_on).
    pub async fn run_with_config(
        &self,
        config: &MigrateConfig,
        direction: Direction,
    ) -> Result<RunOutcome> {
        let connection = self.open(config).await?;
        let executed = self.run_on(&connection, config, direction).await?;

        if config.leave_open {
            debug!(database = %config.database, "Leaving connection open");
            return Ok(RunOutcome {
                executed,
                connection: Some(connection),
            });
        }

        self.provider.close(connection).await;
        self.observer.on_event(&ProgressEvent::ConnectionClosed);
        Ok(RunOutcome {
            executed,
            connection: None,
        })
    }

    /// Migrates in `direction` over a connection the caller owns.
    ///
    /// The connection is never closed here, whether the run succeeds or not.
    pub async fn run_on(
        &self,
        connection: &Connection,
        config: &MigrateConfig,
        direction: Direction,
    ) -> Result<Vec<MigrationDescriptor>> {
        connection.ensure_writable(&self.provider).await?;
        let request = MigrateRequest::from_config(config, direction);
        self.engine(connection, config).run(&request).await
    }

    /// Reads the ledger and plans `direction` without changing anything.
    ///
    /// The database file and the ledger table are never created and no
    /// progress events are emitted. A missing database reads as an empty
    /// ledger.
    pub async fn preview(&self, config: &MigrateConfig, direction: Direction) -> Result<Preview> {
        let applied = match self.provider.open_existing(config).await? {
            Some(connection) => {
                let ledger =
                    Ledger::new(connection.pool().clone(), config.migrations_table.clone());
                let applied = ledger.read_applied().await;
                self.provider.close(connection).await;
                applied?
            }
            None => Vec::new(),
        };

        let reader: Arc<dyn FileReader> = match &self.reader {
            Some(reader) => Arc::clone(reader),
            None => Arc::new(FsReader),
        };
        let request = MigrateRequest::from_config(config, direction);
        let planned =
            plan_request(reader.as_ref(), &config.relative_to, &request, &applied).await?;
        Ok(Preview { applied, planned })
    }

    /// Connects and prepares the database for writes.
    pub async fn open(&self, config: &MigrateConfig) -> Result<Connection> {
        let connection = self.provider.connect(config).await?;
        let database = config.database.to_string();
        self.observer.on_event(&ProgressEvent::Connected {
            database: database.clone(),
        });

        if self.provider.ensure_database_exists(&connection).await? {
            self.observer
                .on_event(&ProgressEvent::DatabaseCreated { database });
        }

        connection.ensure_writable(&self.provider).await?;
        info!(database = %config.database, "Database ready");
        Ok(connection)
    }

    /// Builds an engine over `connection` using this orchestrator's collaborators.
    pub fn engine<'c>(
        &self,
        connection: &'c Connection,
        config: &MigrateConfig,
    ) -> MigrationEngine<'c> {
        let mut engine = MigrationEngine::new(
            connection,
            config.migrations_table.clone(),
            config.relative_to.clone(),
        )
        .with_observer(Arc::clone(&self.observer));
        if let Some(reader) = &self.reader {
            engine = engine.with_reader(Arc::clone(reader));
        }
        if let Some(loader) = &self.loader {
            engine = engine.with_loader(Arc::clone(loader));
        }
        engine
    }
}
