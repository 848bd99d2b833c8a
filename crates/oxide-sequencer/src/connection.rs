//! Database connections.
//!
//! The engine borrows a single [`Connection`] for a whole run. Establishing
//! it, creating the database and waiting until it accepts writes are the
//! job of a [`ConnectionProvider`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Connection as _};
use tracing::{debug, info};

use crate::BoxFuture;
use crate::config::MigrateConfig;
use crate::error::{MigrateError, Result};

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database.
    Memory,
    /// Database file on disk.
    File(PathBuf),
}

impl DatabaseLocation {
    /// Parses a `sqlite:` URL.
    ///
    /// Accepts `sqlite::memory:`, `sqlite://path` and `sqlite:path`. Query
    /// parameters are ignored.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .ok_or_else(|| {
                MigrateError::Config(format!("unsupported database URL '{url}', expected sqlite:"))
            })?;
        let path = rest.split('?').next().unwrap_or_default();

        match path {
            "" => Err(MigrateError::Config(format!(
                "database URL '{url}' has no path"
            ))),
            ":memory:" => Ok(Self::Memory),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }
}

impl fmt::Display for DatabaseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str(":memory:"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A live database handle shared by the whole pipeline.
#[derive(Debug)]
pub struct Connection {
    pool: SqlitePool,
    location: DatabaseLocation,
    write_ready: AtomicBool,
    write_wait_timeout: Duration,
}

impl Connection {
    /// Wraps an existing pool.
    pub fn new(pool: SqlitePool, location: DatabaseLocation) -> Self {
        Self {
            pool,
            location,
            write_ready: AtomicBool::new(false),
            write_wait_timeout: Duration::from_secs(30),
        }
    }

    /// Sets how long providers may wait for the database to accept writes.
    #[must_use]
    pub fn with_write_wait_timeout(mut self, timeout: Duration) -> Self {
        self.write_wait_timeout = timeout;
        self
    }

    /// Upper bound for the write-availability wait.
    #[must_use]
    pub fn write_wait_timeout(&self) -> Duration {
        self.write_wait_timeout
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns where the database lives.
    #[must_use]
    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    /// Whether the write-availability wait already passed for this connection.
    #[must_use]
    pub fn is_write_ready(&self) -> bool {
        self.write_ready.load(Ordering::Acquire)
    }

    fn mark_write_ready(&self) {
        self.write_ready.store(true, Ordering::Release);
    }

    /// Waits for write availability once per connection.
    ///
    /// Later calls return immediately without touching the provider.
    pub async fn ensure_writable(&self, provider: &dyn ConnectionProvider) -> Result<()> {
        if self.is_write_ready() {
            return Ok(());
        }
        provider.wait_for_write_availability(self).await?;
        self.mark_write_ready();
        Ok(())
    }

    /// Closes every pooled connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Establishes and prepares database connections.
pub trait ConnectionProvider: Send + Sync {
    /// Opens a connection for the configured database.
    fn connect<'a>(&'a self, config: &'a MigrateConfig) -> BoxFuture<'a, Result<Connection>>;

    /// Opens the configured database only if it already exists.
    ///
    /// Nothing is created and no write probe runs. `None` means there is no
    /// database yet, so nothing has been applied.
    fn open_existing<'a>(
        &'a self,
        config: &'a MigrateConfig,
    ) -> BoxFuture<'a, Result<Option<Connection>>> {
        Box::pin(async move { self.connect(config).await.map(Some) })
    }

    /// Creates the database if it does not exist. Returns `true` if it was created.
    fn ensure_database_exists<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Blocks until the database accepts writes.
    fn wait_for_write_availability<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> BoxFuture<'a, Result<()>>;

    /// Closes a connection.
    fn close(&self, connection: Connection) -> BoxFuture<'static, ()>;
}

/// SQLite provider built on `sqlx`.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    retry_interval: Duration,
}

impl SqliteProvider {
    /// Creates a provider with the default retry interval.
    #[must_use]
    pub fn new() -> Self {
        Self {
            retry_interval: Duration::from_millis(100),
        }
    }

    /// Sets how long to sleep between write probes.
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    fn connect_options(location: &DatabaseLocation) -> Result<SqliteConnectOptions> {
        match location {
            DatabaseLocation::Memory => {
                SqliteConnectOptions::from_str("sqlite::memory:").map_err(|source| {
                    MigrateError::Connection {
                        database: location.to_string(),
                        source,
                    }
                })
            }
            DatabaseLocation::File(path) => Ok(SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(false)),
        }
    }

    /// Runs one `BEGIN IMMEDIATE`/`ROLLBACK` probe. `Ok(false)` means busy.
    async fn probe_writes(connection: &Connection) -> std::result::Result<bool, sqlx::Error> {
        let mut conn = connection.pool().acquire().await?;
        match sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await {
            Ok(_) => {
                sqlx::query("ROLLBACK").execute(&mut *conn).await?;
                Ok(true)
            }
            Err(e) if is_busy(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Default for SqliteProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), including extended codes.
fn is_busy(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|e| e.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

impl ConnectionProvider for SqliteProvider {
    fn connect<'a>(&'a self, config: &'a MigrateConfig) -> BoxFuture<'a, Result<Connection>> {
        Box::pin(async move {
            let options = Self::connect_options(&config.database)?;
            let mut pool_options =
                SqlitePoolOptions::new().max_connections(config.max_connections);
            if config.database == DatabaseLocation::Memory {
                // Every connection to :memory: is a separate database.
                pool_options = pool_options
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None);
            }

            debug!(database = %config.database, "Opening connection pool");
            let pool = pool_options.connect_lazy_with(options);
            Ok(Connection::new(pool, config.database.clone())
                .with_write_wait_timeout(config.write_wait_timeout))
        })
    }

    fn open_existing<'a>(
        &'a self,
        config: &'a MigrateConfig,
    ) -> BoxFuture<'a, Result<Option<Connection>>> {
        Box::pin(async move {
            // A fresh in-memory database is always empty.
            let DatabaseLocation::File(path) = &config.database else {
                return Ok(None);
            };
            if !tokio::fs::try_exists(path).await.map_err(MigrateError::Io)? {
                debug!(database = %path.display(), "Database does not exist yet");
                return Ok(None);
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(false);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_lazy_with(options);
            Ok(Some(Connection::new(pool, config.database.clone())))
        })
    }

    fn ensure_database_exists<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let DatabaseLocation::File(path) = connection.location() else {
                return Ok(false);
            };

            let exists = tokio::fs::try_exists(path)
                .await
                .map_err(MigrateError::Io)?;
            if exists {
                return Ok(false);
            }

            let conn = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .connect()
                .await
                .map_err(|source| MigrateError::Connection {
                    database: connection.location().to_string(),
                    source,
                })?;
            conn.close().await.map_err(|source| MigrateError::Connection {
                database: connection.location().to_string(),
                source,
            })?;

            info!(database = %path.display(), "Created database");
            Ok(true)
        })
    }

    fn wait_for_write_availability<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let started = Instant::now();
            let database = connection.location().to_string();
            let timeout = connection.write_wait_timeout();

            loop {
                let ready = Self::probe_writes(connection)
                    .await
                    .map_err(|source| MigrateError::Connection {
                        database: database.clone(),
                        source,
                    })?;
                if ready {
                    debug!(database = %database, "Database accepts writes");
                    return Ok(());
                }

                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(MigrateError::WriteUnavailable { database, waited });
                }
                debug!(database = %database, "Database busy, waiting for writes");
                tokio::time::sleep(self.retry_interval).await;
            }
        })
    }

    fn close(&self, connection: Connection) -> BoxFuture<'static, ()> {
        Box::pin(connection.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingProvider {
        waits: Arc<AtomicUsize>,
    }

    impl ConnectionProvider for CountingProvider {
        fn connect<'a>(&'a self, config: &'a MigrateConfig) -> BoxFuture<'a, Result<Connection>> {
            Box::pin(async move { SqliteProvider::new().connect(config).await })
        }

        fn ensure_database_exists<'a>(
            &'a self,
            _connection: &'a Connection,
        ) -> BoxFuture<'a, Result<bool>> {
            Box::pin(async { Ok(false) })
        }

        fn wait_for_write_availability<'a>(
            &'a self,
            _connection: &'a Connection,
        ) -> BoxFuture<'a, Result<()>> {
            self.waits.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn close(&self, connection: Connection) -> BoxFuture<'static, ()> {
            Box::pin(connection.close())
        }
    }

    fn memory_connection() -> Connection {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(SqliteConnectOptions::from_str("sqlite::memory:").unwrap());
        Connection::new(pool, DatabaseLocation::Memory)
    }

    #[test]
    fn test_location_from_url() {
        assert_eq!(
            DatabaseLocation::from_url("sqlite::memory:").unwrap(),
            DatabaseLocation::Memory
        );
        assert_eq!(
            DatabaseLocation::from_url("sqlite://data/app.db").unwrap(),
            DatabaseLocation::File(PathBuf::from("data/app.db"))
        );
        assert_eq!(
            DatabaseLocation::from_url("sqlite:app.db?mode=rwc").unwrap(),
            DatabaseLocation::File(PathBuf::from("app.db"))
        );
        assert!(matches!(
            DatabaseLocation::from_url("postgres://localhost/app"),
            Err(MigrateError::Config(_))
        ));
        assert!(matches!(
            DatabaseLocation::from_url("sqlite:"),
            Err(MigrateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_write_wait_is_memoized_per_connection() {
        let waits = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            waits: Arc::clone(&waits),
        };

        let first = memory_connection();
        first.ensure_writable(&provider).await.unwrap();
        first.ensure_writable(&provider).await.unwrap();
        assert_eq!(waits.load(Ordering::SeqCst), 1);
        assert!(first.is_write_ready());

        // A fresh connection starts unflagged.
        let second = memory_connection();
        assert!(!second.is_write_ready());
        second.ensure_writable(&provider).await.unwrap();
        assert_eq!(waits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sqlite_write_probe() {
        let connection = memory_connection();
        SqliteProvider::new()
            .wait_for_write_availability(&connection)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ensure_database_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let pool = SqlitePoolOptions::new()
            .connect_lazy_with(SqliteConnectOptions::new().filename(&path));
        let connection = Connection::new(pool, DatabaseLocation::File(path.clone()));
        let provider = SqliteProvider::new();

        assert!(provider.ensure_database_exists(&connection).await.unwrap());
        assert!(path.exists());
        assert!(!provider.ensure_database_exists(&connection).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_existing_never_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let config = MigrateConfig::from_raw(crate::config::RawConfig {
            database_file: Some(path.clone()),
            ..crate::config::RawConfig::default()
        })
        .unwrap();
        let provider = SqliteProvider::new();

        assert!(provider.open_existing(&config).await.unwrap().is_none());
        assert!(!path.exists());

        let writable = provider.connect(&config).await.unwrap();
        provider.ensure_database_exists(&writable).await.unwrap();
        writable.close().await;

        let connection = provider.open_existing(&config).await.unwrap().unwrap();
        assert!(!connection.is_write_ready());
        let row: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(connection.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 1);
        connection.close().await;
    }
}
