//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use oxide_sequencer::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tempfile::TempDir;

/// A project directory with a `migrations/` folder and a database file.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("migrations")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn database(&self) -> PathBuf {
        self.root().join("app.db")
    }

    /// Writes `migrations/<filename>` with the given sections.
    pub fn migration(&self, filename: &str, up: &str, down: &str) -> &Self {
        self.migration_in("migrations", filename, up, down)
    }

    pub fn migration_in(&self, directory: &str, filename: &str, up: &str, down: &str) -> &Self {
        let directory = self.root().join(directory);
        std::fs::create_dir_all(&directory).unwrap();
        std::fs::write(
            directory.join(filename),
            format!("-- +migrate Up\n{up}\n-- +migrate Down\n{down}\n"),
        )
        .unwrap();
        self
    }

    /// A config pointing at this project's database and `migrations/`.
    pub fn config(&self) -> RawConfig {
        RawConfig {
            database_file: Some(self.database()),
            relative_to: Some(self.root().to_path_buf()),
            ..RawConfig::default()
        }
    }

    pub async fn pool(&self) -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().filename(self.database()))
            .await
            .expect("Failed to open project database")
    }

    /// Ledger records, newest first.
    pub async fn applied(&self) -> Vec<AppliedRecord> {
        let pool = self.pool().await;
        let records = Ledger::new(pool.clone(), "_migrations")
            .list_applied()
            .await
            .unwrap();
        pool.close().await;
        records
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        let pool = self.pool().await;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(name)
                .fetch_optional(&pool)
                .await
                .unwrap();
        pool.close().await;
        row.is_some()
    }
}

pub fn names(migrations: &[MigrationDescriptor]) -> Vec<&str> {
    migrations.iter().map(|m| m.name.as_str()).collect()
}

/// Collects every event into a shared vector.
pub fn recording_observer() -> (Arc<dyn ProgressObserver>, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let observer: Arc<dyn ProgressObserver> =
        Arc::new(move |event: &ProgressEvent| sink.lock().unwrap().push(event.clone()));
    (observer, events)
}

pub fn orchestrator() -> Orchestrator {
    Orchestrator::new(SqliteProvider::new())
}
