//! Configuration loading and validation.
//!
//! [`RawConfig`] mirrors what users write (JSON file or CLI flags) with
//! every field optional. [`MigrateConfig::from_raw`] validates it and fills
//! in defaults, so the rest of the crate only ever sees a complete config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::DatabaseLocation;
use crate::descriptor::normalize_path;
use crate::error::{MigrateError, Result};

/// Default ledger table name.
pub const DEFAULT_TABLE: &str = "_migrations";

/// Default migrations directory.
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Default migration file extension.
pub const DEFAULT_EXTENSION: &str = "sql";

/// Unvalidated configuration, as read from a file or the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    /// `sqlite:` URL of the database.
    pub database_url: Option<String>,
    /// Path of the database file.
    pub database_file: Option<PathBuf>,
    /// Directories holding migration files.
    pub migrations_directories: Option<Vec<PathBuf>>,
    /// Base that migration directories (and ledger paths) are relative to.
    pub relative_to: Option<PathBuf>,
    /// Ledger table name.
    pub migrations_table: Option<String>,
    /// Migration file extension.
    pub extension: Option<String>,
    /// Name of the migration to stop at.
    pub to: Option<String>,
    /// Consider every discovered migration when migrating up.
    pub ignore_timestamp: Option<bool>,
    /// Keep the connection open after the run.
    pub leave_open: Option<bool>,
    /// Maximum pooled connections.
    pub max_connections: Option<u32>,
    /// Milliseconds to wait for the database to accept writes.
    pub write_wait_timeout_ms: Option<u64>,
}

impl RawConfig {
    /// Reads a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Overlays `other` on top of `self`; set fields in `other` win.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            database_url: other.database_url.or(self.database_url),
            database_file: other.database_file.or(self.database_file),
            migrations_directories: other
                .migrations_directories
                .or(self.migrations_directories),
            relative_to: other.relative_to.or(self.relative_to),
            migrations_table: other.migrations_table.or(self.migrations_table),
            extension: other.extension.or(self.extension),
            to: other.to.or(self.to),
            ignore_timestamp: other.ignore_timestamp.or(self.ignore_timestamp),
            leave_open: other.leave_open.or(self.leave_open),
            max_connections: other.max_connections.or(self.max_connections),
            write_wait_timeout_ms: other.write_wait_timeout_ms.or(self.write_wait_timeout_ms),
        }
    }
}

/// Validated, fully defaulted configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateConfig {
    /// Target database.
    pub database: DatabaseLocation,
    /// Migration roots, already resolved against `relative_to`.
    pub migrations_directories: Vec<PathBuf>,
    /// Base for resolving roots and storing ledger directories.
    pub relative_to: PathBuf,
    /// Ledger table name.
    pub migrations_table: String,
    /// Migration file extension (without the dot).
    pub extension: String,
    /// Name of the migration to stop at.
    pub to: Option<String>,
    /// Consider every discovered migration when migrating up.
    pub ignore_timestamp: bool,
    /// Keep the connection open after the run.
    pub leave_open: bool,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long to wait for the database to accept writes.
    pub write_wait_timeout: Duration,
}

impl MigrateConfig {
    /// Validates a raw config and applies defaults.
    pub fn from_raw(raw: RawConfig) -> Result<Self> {
        let database = match (raw.database_url, raw.database_file) {
            (Some(_), Some(_)) => {
                return Err(MigrateError::MutuallyExclusive {
                    first: "database_url",
                    second: "database_file",
                });
            }
            (Some(url), None) => DatabaseLocation::from_url(&url)?,
            (None, Some(file)) if file.as_os_str().is_empty() => {
                return Err(MigrateError::Config("database_file is empty".to_string()));
            }
            (None, Some(file)) => DatabaseLocation::File(file),
            (None, None) => return Err(MigrateError::MissingOption("database_url")),
        };

        let relative_to = normalize_path(&raw.relative_to.unwrap_or_else(|| PathBuf::from(".")));

        let directories = raw
            .migrations_directories
            .unwrap_or_else(|| vec![PathBuf::from(DEFAULT_MIGRATIONS_DIR)]);
        if directories.is_empty() {
            return Err(MigrateError::Config(
                "at least one migrations directory is required".to_string(),
            ));
        }
        // `migrations` and `./migrations` name the same root.
        let mut migrations_directories: Vec<PathBuf> = Vec::with_capacity(directories.len());
        for dir in &directories {
            let resolved = normalize_path(&relative_to.join(dir));
            if !migrations_directories.contains(&resolved) {
                migrations_directories.push(resolved);
            }
        }

        let migrations_table = raw
            .migrations_table
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());
        validate_identifier(&migrations_table)?;

        let extension = raw
            .extension
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
            .trim_start_matches('.')
            .to_string();
        if extension.is_empty() {
            return Err(MigrateError::Config("extension is empty".to_string()));
        }

        let max_connections = raw.max_connections.unwrap_or(5);
        if max_connections == 0 {
            return Err(MigrateError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let to = match raw.to {
            Some(name) if name.trim().is_empty() => {
                return Err(MigrateError::Config("'to' must not be empty".to_string()));
            }
            other => other,
        };

        Ok(Self {
            database,
            migrations_directories,
            relative_to,
            migrations_table,
            extension,
            to,
            ignore_timestamp: raw.ignore_timestamp.unwrap_or(false),
            leave_open: raw.leave_open.unwrap_or(false),
            max_connections,
            write_wait_timeout: Duration::from_millis(raw.write_wait_timeout_ms.unwrap_or(30_000)),
        })
    }
}

/// Ledger table names are interpolated into SQL, so keep them plain.
fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(MigrateError::Config(format!(
            "invalid migrations table name '{name}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_url() -> RawConfig {
        RawConfig {
            database_url: Some("sqlite::memory:".to_string()),
            ..RawConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = MigrateConfig::from_raw(raw_with_url()).unwrap();

        assert_eq!(config.database, DatabaseLocation::Memory);
        assert_eq!(config.migrations_directories, vec![PathBuf::from("migrations")]);
        assert_eq!(config.relative_to, PathBuf::from("."));
        assert_eq!(config.migrations_table, "_migrations");
        assert_eq!(config.extension, "sql");
        assert_eq!(config.to, None);
        assert!(!config.ignore_timestamp);
        assert!(!config.leave_open);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.write_wait_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_database() {
        let result = MigrateConfig::from_raw(RawConfig::default());
        assert!(matches!(result, Err(MigrateError::MissingOption("database_url"))));
    }

    #[test]
    fn test_url_and_file_are_mutually_exclusive() {
        let raw = RawConfig {
            database_file: Some(PathBuf::from("app.db")),
            ..raw_with_url()
        };
        assert!(matches!(
            MigrateConfig::from_raw(raw),
            Err(MigrateError::MutuallyExclusive { .. })
        ));
    }

    #[test]
    fn test_directories_resolve_against_relative_to() {
        let raw = RawConfig {
            relative_to: Some(PathBuf::from("/srv/app")),
            migrations_directories: Some(vec![
                PathBuf::from("db/migrations"),
                PathBuf::from("/opt/shared"),
            ]),
            ..raw_with_url()
        };
        let config = MigrateConfig::from_raw(raw).unwrap();
        assert_eq!(
            config.migrations_directories,
            vec![
                PathBuf::from("/srv/app/db/migrations"),
                PathBuf::from("/opt/shared"),
            ]
        );
    }

    #[test]
    fn test_equivalent_directories_collapse() {
        let raw = RawConfig {
            relative_to: Some(PathBuf::from("/srv/app/")),
            migrations_directories: Some(vec![
                PathBuf::from("migrations"),
                PathBuf::from("./migrations"),
                PathBuf::from("shared/../migrations/"),
                PathBuf::from("/srv/app/migrations"),
                PathBuf::from("seeds"),
            ]),
            ..raw_with_url()
        };
        let config = MigrateConfig::from_raw(raw).unwrap();
        assert_eq!(config.relative_to, PathBuf::from("/srv/app"));
        assert_eq!(
            config.migrations_directories,
            vec![PathBuf::from("/srv/app/migrations"), PathBuf::from("/srv/app/seeds")]
        );
    }

    #[test]
    fn test_rejects_bad_table_name() {
        for name in ["", "1table", "bad-name", "x; DROP TABLE y"] {
            let raw = RawConfig {
                migrations_table: Some(name.to_string()),
                ..raw_with_url()
            };
            assert!(
                matches!(MigrateConfig::from_raw(raw), Err(MigrateError::Config(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_empty_directories_and_zero_connections() {
        let raw = RawConfig {
            migrations_directories: Some(Vec::new()),
            ..raw_with_url()
        };
        assert!(matches!(MigrateConfig::from_raw(raw), Err(MigrateError::Config(_))));

        let raw = RawConfig {
            max_connections: Some(0),
            ..raw_with_url()
        };
        assert!(matches!(MigrateConfig::from_raw(raw), Err(MigrateError::Config(_))));
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let file = RawConfig {
            database_url: Some("sqlite:file.db".to_string()),
            migrations_table: Some("from_file".to_string()),
            ..RawConfig::default()
        };
        let cli = RawConfig {
            migrations_table: Some("from_cli".to_string()),
            ..RawConfig::default()
        };

        let merged = file.merge(cli);
        assert_eq!(merged.database_url.as_deref(), Some("sqlite:file.db"));
        assert_eq!(merged.migrations_table.as_deref(), Some("from_cli"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.json");
        std::fs::write(
            &path,
            r#"{"database_file": "app.db", "migrations_table": "ledger", "leave_open": true}"#,
        )
        .unwrap();

        let raw = RawConfig::from_file(&path).unwrap();
        let config = MigrateConfig::from_raw(raw).unwrap();
        assert_eq!(config.database, DatabaseLocation::File(PathBuf::from("app.db")));
        assert_eq!(config.migrations_table, "ledger");
        assert!(config.leave_open);
    }

    #[test]
    fn test_from_file_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.json");
        std::fs::write(&path, r#"{"database_file": "app.db", "colour": "blue"}"#).unwrap();

        assert!(matches!(
            RawConfig::from_file(&path),
            Err(MigrateError::Serialization(_))
        ));
    }
}
