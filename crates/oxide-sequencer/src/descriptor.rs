//! Migration descriptors parsed from filenames.
//!
//! A migration file is named `YYYYMMDDHHmmss-<name>.<ext>`, where the
//! 14-digit prefix is a UTC timestamp. Anything else in a migrations
//! directory is ignored.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use tracing::warn;

use crate::error::{MigrateError, Result};

/// Format of the timestamp prefix.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Direction of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Apply pending migrations.
    Up,
    /// Revert applied migrations.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// A migration file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDescriptor {
    /// Point in time encoded in the filename.
    pub timestamp: DateTime<Utc>,
    /// Human-readable name (the part after the hyphen).
    pub name: String,
    /// Bare filename including extension.
    pub filename: String,
    /// Directory the file was discovered in.
    pub directory: PathBuf,
}

impl MigrationDescriptor {
    /// Full path of the migration file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    /// Directory as stored in the ledger, relative to `root` when possible.
    #[must_use]
    pub fn ledger_directory(&self, root: &Path) -> String {
        relative_directory(&self.directory, root)
    }
}

/// Renders `directory` relative to `root`, or verbatim if it lies outside it.
#[must_use]
pub fn relative_directory(directory: &Path, root: &Path) -> String {
    let directory = normalize_path(directory);
    let root = normalize_path(root);
    let relative = if root == Path::new(".") && directory.is_relative() {
        directory.as_path()
    } else {
        directory.strip_prefix(&root).unwrap_or(&directory)
    };
    if relative.as_os_str().is_empty() {
        ".".to_string()
    } else {
        relative.to_string_lossy().replace('\\', "/")
    }
}

/// Lexically normalizes a path: `.` components are dropped and `..` folds
/// into the component before it. Symlinks are not resolved. An empty result
/// is `.`.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

/// Timestamp treated as "latest applied" when the ledger is empty.
#[must_use]
pub fn epoch_sentinel() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Matches migration filenames for one extension.
#[derive(Debug, Clone)]
pub struct FilenamePattern {
    regex: Regex,
}

impl FilenamePattern {
    /// Builds the pattern `^(\d{14})-(.*)\.<extension>$`.
    pub fn new(extension: &str) -> Result<Self> {
        let extension = extension.trim_start_matches('.');
        let pattern = format!(r"^(\d{{14}})-(.*)\.{}$", regex::escape(extension));
        let regex = Regex::new(&pattern)
            .map_err(|e| MigrateError::Config(format!("bad extension '{extension}': {e}")))?;
        Ok(Self { regex })
    }

    /// Parses a filename into a descriptor, or `None` if it is not a migration.
    #[must_use]
    pub fn parse(&self, filename: &str, directory: &Path) -> Option<MigrationDescriptor> {
        let captures = self.regex.captures(filename)?;
        let digits = captures.get(1)?.as_str();
        let name = captures.get(2)?.as_str();

        let timestamp = match NaiveDateTime::parse_from_str(digits, TIMESTAMP_FORMAT) {
            Ok(naive) => naive.and_utc(),
            Err(e) => {
                warn!(
                    filename = %filename,
                    error = %e,
                    "Ignoring migration with invalid timestamp"
                );
                return None;
            }
        };

        Some(MigrationDescriptor {
            timestamp,
            name: name.to_string(),
            filename: filename.to_string(),
            directory: directory.to_path_buf(),
        })
    }
}
