//! Error types for the migration system.

use std::path::PathBuf;
use std::time::Duration;

use crate::descriptor::Direction;

/// Boxed error returned by migration bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A required option was not provided.
    #[error("Missing required option '{0}'")]
    MissingOption(&'static str),

    /// Two options that cannot be combined were both set.
    #[error("Options '{first}' and '{second}' are mutually exclusive")]
    MutuallyExclusive {
        /// The first option.
        first: &'static str,
        /// The second option.
        second: &'static str,
    },

    /// The database could not be reached or created.
    #[error("Cannot connect to database '{database}': {source}")]
    Connection {
        /// Database the connection targeted.
        database: String,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The database never became writable within the wait window.
    #[error("Database '{database}' did not accept writes within {waited:?}")]
    WriteUnavailable {
        /// Database that stayed locked.
        database: String,
        /// How long we waited.
        waited: Duration,
    },

    /// A migrations directory could not be read.
    #[error("Cannot read migrations directory '{path}': {source}")]
    Discovery {
        /// The unreadable directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The ledger references a migration that is no longer on disk.
    #[error("Applied migration '{directory}/{filename}' was not found on disk")]
    MissingMigration {
        /// Filename recorded in the ledger.
        filename: String,
        /// Directory recorded in the ledger.
        directory: String,
    },

    /// The ledger table or its index could not be created.
    #[error("Failed to initialize ledger table '{table}': {source}")]
    LedgerInit {
        /// Ledger table name.
        table: String,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Reading or writing ledger records failed.
    #[error("Ledger table '{table}' access failed: {source}")]
    Ledger {
        /// Ledger table name.
        table: String,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A ledger row holds a timestamp we cannot parse.
    #[error("Ledger record '{filename}' has an invalid timestamp '{value}'")]
    CorruptLedger {
        /// Filename of the offending record.
        filename: String,
        /// The stored value.
        value: String,
    },

    /// A migration body failed.
    #[error("Migration '{migration}' failed while running {direction}: {source}")]
    Execution {
        /// Filename of the failing migration.
        migration: String,
        /// Direction being executed.
        direction: Direction,
        /// Error raised by the migration body.
        #[source]
        source: BoxError,
    },

    /// No body is registered for a migration.
    #[error("No migration body registered for '{0}'")]
    BodyNotFound(String),

    /// A migration file could not be interpreted.
    #[error("Invalid migration file '{path}': {message}")]
    InvalidMigration {
        /// Path to the migration file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// A migration has no down section.
    #[error("Migration '{0}' is not reversible")]
    NotReversible(String),

    /// Invalid engine state.
    #[error("Invalid migration state: {0}")]
    InvalidState(String),

    /// Migration file already exists.
    #[error("Migration file already exists: {0}")]
    MigrationExists(PathBuf),

    /// IO error (reading config or writing migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
