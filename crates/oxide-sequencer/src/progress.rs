//! Progress reporting.
//!
//! The engine and orchestrator report milestones as [`ProgressEvent`]s to a
//! [`ProgressObserver`] handed to them explicitly. Having nobody listening is
//! fine; [`NoopObserver`] is the default.

use std::fmt;
use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::descriptor::Direction;

/// A milestone in a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Configuration passed validation.
    ConfigValidated,
    /// A connection to the database is open.
    Connected {
        /// Database the connection targets.
        database: String,
    },
    /// The database did not exist and was created.
    DatabaseCreated {
        /// Database that was created.
        database: String,
    },
    /// A batch is about to run.
    MigrationsStarting {
        /// Direction of the batch.
        direction: Direction,
        /// Number of migrations in the batch.
        count: usize,
    },
    /// One migration finished.
    MigrationCompleted {
        /// Direction it ran in.
        direction: Direction,
        /// Migration name.
        name: String,
        /// Source file.
        path: PathBuf,
    },
    /// Ledger records were written after an up batch.
    LedgerSaved {
        /// Number of records written.
        count: usize,
    },
    /// Ledger records were removed after a down batch.
    LedgerCleared {
        /// Number of records removed.
        count: usize,
    },
    /// The connection was closed.
    ConnectionClosed,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigValidated => f.write_str("Configuration validated"),
            Self::Connected { database } => write!(f, "Connected to {database}"),
            Self::DatabaseCreated { database } => write!(f, "Created database {database}"),
            Self::MigrationsStarting { direction, count } => {
                write!(f, "Running {count} migration(s) {direction}")
            }
            Self::MigrationCompleted {
                direction,
                name,
                path,
            } => write!(f, "Migrated {direction}: {name} ({})", path.display()),
            Self::LedgerSaved { count } => write!(f, "Saved metadata for {count} migration(s)"),
            Self::LedgerCleared { count } => {
                write!(f, "Cleared metadata for {count} migration(s)")
            }
            Self::ConnectionClosed => f.write_str("Connection closed"),
        }
    }
}

/// Receives progress events.
pub trait ProgressObserver: Send + Sync {
    /// Called once per event, in pipeline order.
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Logs every event at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        info!("{event}");
    }
}

/// Forwards events into a channel. A closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    /// Creates an observer sending into `sender`.
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, event: &ProgressEvent) {
        let _ = self.sender.send(event.clone());
    }
}
