//! Applied-migration ledger.
//!
//! This module manages the table that records which migrations have been
//! applied. The ledger is the only source of truth for that question; the
//! engine never inspects the actual schema.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::try_join_all;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, warn};

use crate::descriptor::epoch_sentinel;
use crate::error::{MigrateError, Result};

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRecord {
    /// Timestamp of the migration itself.
    pub timestamp: DateTime<Utc>,
    /// Migration name.
    pub name: String,
    /// Migration filename.
    pub filename: String,
    /// Directory relative to the configured root.
    pub directory: String,
}

impl AppliedRecord {
    /// Timestamp rendered the way it is stored.
    #[must_use]
    pub fn iso_timestamp(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

/// ISO-8601 with millisecond precision, so stored values sort lexically.
#[must_use]
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Reads and writes the ledger table.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
    table: String,
}

impl Ledger {
    /// Creates a ledger over `table`.
    ///
    /// The table name is interpolated into SQL and must already be a valid
    /// identifier (see [`crate::config::MigrateConfig`]).
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn ledger_error(&self, source: sqlx::Error) -> MigrateError {
        MigrateError::Ledger {
            table: self.table.clone(),
            source,
        }
    }

    /// Ensures the ledger table and its timestamp index exist.
    pub async fn ensure_table(&self) -> Result<()> {
        let create_table = format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (
    timestamp TEXT NOT NULL,
    name TEXT NOT NULL,
    filename TEXT NOT NULL,
    directory TEXT NOT NULL,
    PRIMARY KEY (filename, directory)
)"#,
            table = self.table
        );
        let create_index = format!(
            r#"CREATE INDEX IF NOT EXISTS "{table}_timestamp" ON "{table}" (timestamp)"#,
            table = self.table
        );

        for sql in [create_table, create_index] {
            debug!(sql = %sql, "Ensuring ledger schema");
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|source| MigrateError::LedgerInit {
                    table: self.table.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Gets all applied migrations, newest first.
    ///
    /// Ties on timestamp put the most recently inserted record first.
    pub async fn list_applied(&self) -> Result<Vec<AppliedRecord>> {
        self.ensure_table().await?;
        self.fetch_applied().await
    }

    /// Like [`Self::list_applied`], but never creates anything.
    ///
    /// A missing ledger table reads as an empty ledger.
    pub async fn read_applied(&self) -> Result<Vec<AppliedRecord>> {
        if !self.table_exists().await? {
            debug!(table = %self.table, "Ledger table does not exist yet");
            return Ok(Vec::new());
        }
        self.fetch_applied().await
    }

    /// Returns whether the ledger table exists.
    pub async fn table_exists(&self) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(&self.table)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| self.ledger_error(e))?;
        Ok(row.is_some())
    }

    async fn fetch_applied(&self) -> Result<Vec<AppliedRecord>> {
        let sql = format!(
            r#"SELECT timestamp, name, filename, directory FROM "{}"
ORDER BY timestamp DESC, rowid DESC"#,
            self.table
        );
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.ledger_error(e))?;

        rows.into_iter()
            .map(|(timestamp, name, filename, directory)| {
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| MigrateError::CorruptLedger {
                        filename: filename.clone(),
                        value: timestamp.clone(),
                    })?;
                Ok(AppliedRecord {
                    timestamp,
                    name,
                    filename,
                    directory,
                })
            })
            .collect()
    }

    /// Gets the most recent applied migration.
    pub async fn latest_applied(&self) -> Result<Option<AppliedRecord>> {
        Ok(self.list_applied().await?.into_iter().next())
    }

    /// Timestamp of the latest applied migration, or the 1900 sentinel.
    pub async fn latest_timestamp(&self) -> Result<DateTime<Utc>> {
        Ok(self
            .latest_applied()
            .await?
            .map_or_else(epoch_sentinel, |record| record.timestamp))
    }

    /// Records migrations as applied, one statement at a time.
    ///
    /// Not atomic: a failure part-way leaves earlier records in place.
    pub async fn insert(&self, records: &[AppliedRecord]) -> Result<()> {
        self.ensure_table().await?;
        let sql = format!(
            r#"INSERT INTO "{}" (timestamp, name, filename, directory) VALUES (?, ?, ?, ?)
ON CONFLICT (filename, directory)
DO UPDATE SET timestamp = excluded.timestamp, name = excluded.name"#,
            self.table
        );

        for record in records {
            debug!(
                filename = %record.filename,
                directory = %record.directory,
                "Recording migration"
            );
            sqlx::query(&sql)
                .bind(record.iso_timestamp())
                .bind(&record.name)
                .bind(&record.filename)
                .bind(&record.directory)
                .execute(&self.pool)
                .await
                .map_err(|e| self.ledger_error(e))?;
        }
        Ok(())
    }

    /// Removes migration records, issuing the deletions concurrently.
    pub async fn delete(&self, records: &[AppliedRecord]) -> Result<()> {
        let sql = format!(
            r#"DELETE FROM "{}" WHERE filename = ? AND directory = ?"#,
            self.table
        );

        let deletions = records.iter().map(|record| {
            let sql = &sql;
            async move {
                let result = sqlx::query(sql)
                    .bind(&record.filename)
                    .bind(&record.directory)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| self.ledger_error(e))?;

                if result.rows_affected() == 0 {
                    warn!(
                        filename = %record.filename,
                        directory = %record.directory,
                        "Ledger record already gone"
                    );
                }
                Ok::<_, MigrateError>(())
            }
        });

        try_join_all(deletions).await?;
        Ok(())
    }
}
