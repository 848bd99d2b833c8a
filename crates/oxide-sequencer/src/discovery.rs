//! Migration discovery.
//!
//! Scans migration roots through a [`FileReader`] and turns matching
//! filenames into [`MigrationDescriptor`]s.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::BoxFuture;
use crate::descriptor::{FilenamePattern, MigrationDescriptor, normalize_path};
use crate::error::{MigrateError, Result};

/// File-system access used by discovery and the SQL loader.
pub trait FileReader: Send + Sync {
    /// Lists entry names in a directory.
    fn list_directory<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<String>>>;

    /// Reads a whole file as UTF-8.
    fn read_to_string<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<String>>;
}

/// [`FileReader`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReader;

impl FileReader for FsReader {
    fn list_directory<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<String>>> {
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(path).await?;
            let mut names = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    continue;
                }
                match entry.file_name().into_string() {
                    Ok(name) => names.push(name),
                    Err(raw) => {
                        warn!(
                            directory = %path.display(),
                            name = ?raw,
                            "Skipping file with a non UTF-8 name"
                        );
                    }
                }
            }
            Ok(names)
        })
    }

    fn read_to_string<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<String>> {
        Box::pin(tokio::fs::read_to_string(path))
    }
}

/// Discovers migrations across all roots.
///
/// Results keep root order, then listing order within each root. Roots that
/// normalize to one already scanned are skipped. Nothing is returned if any
/// root fails to list.
pub async fn discover(
    reader: &dyn FileReader,
    roots: &[PathBuf],
    extension: &str,
) -> Result<Vec<MigrationDescriptor>> {
    let pattern = FilenamePattern::new(extension)?;
    let mut migrations = Vec::new();
    let mut scanned: Vec<PathBuf> = Vec::with_capacity(roots.len());

    for root in roots {
        let normalized = normalize_path(root);
        if scanned.contains(&normalized) {
            warn!(root = %root.display(), "Skipping duplicate migrations directory");
            continue;
        }
        scanned.push(normalized);

        let names = reader
            .list_directory(root)
            .await
            .map_err(|source| MigrateError::Discovery {
                path: root.clone(),
                source,
            })?;

        let before = migrations.len();
        migrations.extend(names.iter().filter_map(|name| pattern.parse(name, root)));
        debug!(
            root = %root.display(),
            found = migrations.len() - before,
            "Scanned migrations directory"
        );
    }

    Ok(migrations)
}
