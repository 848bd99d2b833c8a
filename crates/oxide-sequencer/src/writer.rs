//! Migration file generation.
//!
//! Creates new, empty migration files named `YYYYMMDDHHMMSS-name.ext` with
//! both section markers in place.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::body::{DOWN_MARKER, UP_MARKER};
use crate::descriptor::TIMESTAMP_FORMAT;
use crate::error::{MigrateError, Result};

/// Builds the filename for a migration created at `now`.
#[must_use]
pub fn migration_filename(now: DateTime<Utc>, name: &str, extension: &str) -> String {
    format!(
        "{}-{}.{}",
        now.format(TIMESTAMP_FORMAT),
        name,
        extension.trim_start_matches('.')
    )
}

/// Writes a new migration file.
#[derive(Debug, Clone)]
pub struct MigrationWriter {
    name: String,
}

impl MigrationWriter {
    /// Creates a writer for a migration called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the migration name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the template contents of a new migration file.
    #[must_use]
    pub fn generate(&self) -> String {
        format!(
            "-- Migration: {}\n\n{UP_MARKER}\n\n\n{DOWN_MARKER}\n\n",
            self.name
        )
    }

    /// Writes the migration into `directory`, creating it if needed.
    ///
    /// Fails if a file with the same name is already there. The existence
    /// check and the creation are one `create_new` open.
    pub fn write(
        &self,
        directory: &Path,
        now: DateTime<Utc>,
        extension: &str,
    ) -> Result<PathBuf> {
        self.validate_name()?;

        std::fs::create_dir_all(directory)?;
        let path = directory.join(migration_filename(now, &self.name, extension));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MigrateError::MigrationExists(path));
            }
            Err(e) => return Err(e.into()),
        };

        file.write_all(self.generate().as_bytes())?;
        info!(path = %path.display(), "Created migration");
        Ok(path)
    }

    fn validate_name(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(MigrateError::Config("migration name is empty".to_string()));
        }
        let valid = self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(MigrateError::Config(format!(
                "invalid migration name '{}': use letters, digits, '_' or '-'",
                self.name
            )));
        }
        Ok(())
    }
}
