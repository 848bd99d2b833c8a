//! Migration bodies and loaders.
//!
//! A [`MigrationBody`] is the code behind a migration file: a pair of
//! directional entry points run against the live [`Connection`]. Bodies are
//! resolved by a [`MigrationLoader`], and only for the migrations that were
//! selected to run.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::BoxFuture;
use crate::connection::Connection;
use crate::descriptor::{Direction, MigrationDescriptor};
use crate::discovery::{FileReader, FsReader};
use crate::error::{BoxError, MigrateError, Result};

/// Marker line that opens the up section of a SQL migration.
pub const UP_MARKER: &str = "-- +migrate Up";

/// Marker line that opens the down section of a SQL migration.
pub const DOWN_MARKER: &str = "-- +migrate Down";

/// The directional entry points of a migration.
///
/// # Example
///
/// ```ignore
/// struct CreateUsers;
///
/// impl MigrationBody for CreateUsers {
///     fn up<'a>(&'a self, conn: &'a Connection) -> BoxFuture<'a, Result<(), BoxError>> {
///         Box::pin(async move {
///             sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY)")
///                 .execute(conn.pool())
///                 .await?;
///             Ok(())
///         })
///     }
///
///     fn down<'a>(&'a self, conn: &'a Connection) -> BoxFuture<'a, Result<(), BoxError>> {
///         Box::pin(async move {
///             sqlx::query("DROP TABLE users").execute(conn.pool()).await?;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait MigrationBody: Send + Sync {
    /// Applies the migration.
    fn up<'a>(
        &'a self,
        conn: &'a Connection,
    ) -> BoxFuture<'a, std::result::Result<(), BoxError>>;

    /// Reverts the migration.
    fn down<'a>(
        &'a self,
        conn: &'a Connection,
    ) -> BoxFuture<'a, std::result::Result<(), BoxError>>;

    /// Runs the entry point for `direction`.
    fn run<'a>(
        &'a self,
        direction: Direction,
        conn: &'a Connection,
    ) -> BoxFuture<'a, std::result::Result<(), BoxError>> {
        match direction {
            Direction::Up => self.up(conn),
            Direction::Down => self.down(conn),
        }
    }
}

/// Resolves the body of a discovered migration.
pub trait MigrationLoader: Send + Sync {
    /// Loads the body for `descriptor`.
    fn load<'a>(
        &'a self,
        descriptor: &'a MigrationDescriptor,
    ) -> BoxFuture<'a, Result<Arc<dyn MigrationBody>>>;
}

/// A migration selected for execution, with its body loaded.
#[derive(Clone)]
pub struct PlannedMigration {
    /// Where the migration came from.
    pub descriptor: MigrationDescriptor,
    /// Its code.
    pub body: Arc<dyn MigrationBody>,
}

impl fmt::Debug for PlannedMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannedMigration")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Loads bodies for every descriptor, in order.
pub async fn load_all(
    loader: &dyn MigrationLoader,
    descriptors: Vec<MigrationDescriptor>,
) -> Result<Vec<PlannedMigration>> {
    let mut planned = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let body = loader.load(&descriptor).await?;
        planned.push(PlannedMigration { descriptor, body });
    }
    Ok(planned)
}

/// Code-defined migrations keyed by filename.
#[derive(Default, Clone)]
pub struct MigrationRegistry {
    bodies: HashMap<String, Arc<dyn MigrationBody>>,
}

impl MigrationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a body for `filename`.
    #[must_use]
    pub fn register(
        mut self,
        filename: impl Into<String>,
        body: impl MigrationBody + 'static,
    ) -> Self {
        self.bodies.insert(filename.into(), Arc::new(body));
        self
    }

    /// Returns the number of registered bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Returns whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("filenames", &self.bodies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MigrationLoader for MigrationRegistry {
    fn load<'a>(
        &'a self,
        descriptor: &'a MigrationDescriptor,
    ) -> BoxFuture<'a, Result<Arc<dyn MigrationBody>>> {
        Box::pin(async move {
            self.bodies
                .get(&descriptor.filename)
                .cloned()
                .ok_or_else(|| MigrateError::BodyNotFound(descriptor.filename.clone()))
        })
    }
}

/// A migration written as plain SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    /// Filename, used in errors.
    pub filename: String,
    /// Statements run on the way up.
    pub up_sql: String,
    /// Statements run on the way down, if any.
    pub down_sql: Option<String>,
}

impl SqlMigration {
    /// Splits file contents on the `-- +migrate Up` / `-- +migrate Down` markers.
    pub fn parse(path: &Path, contents: &str) -> Result<Self> {
        enum Section {
            Preamble,
            Up,
            Down,
        }

        let mut section = Section::Preamble;
        let mut saw_up = false;
        let mut saw_down = false;
        let mut up = String::new();
        let mut down = String::new();

        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.eq_ignore_ascii_case(UP_MARKER) {
                if saw_up {
                    return Err(invalid(path, "duplicate up marker"));
                }
                saw_up = true;
                section = Section::Up;
                continue;
            }
            if trimmed.eq_ignore_ascii_case(DOWN_MARKER) {
                if saw_down {
                    return Err(invalid(path, "duplicate down marker"));
                }
                saw_down = true;
                section = Section::Down;
                continue;
            }

            let buffer = match section {
                Section::Preamble => continue,
                Section::Up => &mut up,
                Section::Down => &mut down,
            };
            buffer.push_str(line);
            buffer.push('\n');
        }

        if !saw_up {
            return Err(invalid(path, &format!("missing '{UP_MARKER}' marker")));
        }

        let down = down.trim();
        Ok(Self {
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            up_sql: up.trim().to_string(),
            down_sql: (!down.is_empty()).then(|| down.to_string()),
        })
    }
}

fn invalid(path: &Path, message: &str) -> MigrateError {
    MigrateError::InvalidMigration {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

async fn execute_sql(conn: &Connection, sql: &str) -> std::result::Result<(), BoxError> {
    if sql.is_empty() {
        return Ok(());
    }
    debug!(sql = %sql, "Executing SQL");
    sqlx::raw_sql(sql).execute(conn.pool()).await?;
    Ok(())
}

impl MigrationBody for SqlMigration {
    fn up<'a>(
        &'a self,
        conn: &'a Connection,
    ) -> BoxFuture<'a, std::result::Result<(), BoxError>> {
        Box::pin(execute_sql(conn, &self.up_sql))
    }

    fn down<'a>(
        &'a self,
        conn: &'a Connection,
    ) -> BoxFuture<'a, std::result::Result<(), BoxError>> {
        Box::pin(async move {
            let sql = self
                .down_sql
                .as_deref()
                .ok_or_else(|| MigrateError::NotReversible(self.filename.clone()))?;
            execute_sql(conn, sql).await
        })
    }
}

/// Loads `.sql` migrations from disk through a [`FileReader`].
#[derive(Clone)]
pub struct SqlFileLoader {
    reader: Arc<dyn FileReader>,
}

impl SqlFileLoader {
    /// Creates a loader reading through `reader`.
    pub fn new(reader: Arc<dyn FileReader>) -> Self {
        Self { reader }
    }
}

impl Default for SqlFileLoader {
    fn default() -> Self {
        Self::new(Arc::new(FsReader))
    }
}

impl fmt::Debug for SqlFileLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlFileLoader").finish_non_exhaustive()
    }
}

impl MigrationLoader for SqlFileLoader {
    fn load<'a>(
        &'a self,
        descriptor: &'a MigrationDescriptor,
    ) -> BoxFuture<'a, Result<Arc<dyn MigrationBody>>> {
        Box::pin(async move {
            let path: PathBuf = descriptor.path();
            let contents = self.reader.read_to_string(&path).await?;
            let migration = SqlMigration::parse(&path, &contents)?;
            Ok(Arc::new(migration) as Arc<dyn MigrationBody>)
        })
    }
}
