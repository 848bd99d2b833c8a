//! Execution set builder.
//!
//! Given what is on disk and what the ledger says, decides which migrations
//! run and in which order. Everything here is pure; I/O happens in the
//! engine.

use std::cmp::Reverse;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::descriptor::{Direction, MigrationDescriptor};
use crate::error::{MigrateError, Result};
use crate::history::AppliedRecord;

/// Stable sort by timestamp: ascending for up, descending for down.
///
/// Migrations sharing a timestamp keep their relative order.
pub fn sort_migrations(migrations: &mut [MigrationDescriptor], direction: Direction) {
    match direction {
        Direction::Up => migrations.sort_by_key(|m| m.timestamp),
        Direction::Down => migrations.sort_by_key(|m| Reverse(m.timestamp)),
    }
}

/// Computes the ordered set of migrations to apply.
///
/// Candidates are migrations newer than `latest_applied` (or everything when
/// `ignore_timestamp` is set). With a target, the newest candidate named `to`
/// bounds the set inclusively; an unknown target yields nothing.
#[must_use]
pub fn plan_up(
    discovered: Vec<MigrationDescriptor>,
    latest_applied: DateTime<Utc>,
    ignore_timestamp: bool,
    to: Option<&str>,
) -> Vec<MigrationDescriptor> {
    let mut candidates: Vec<_> = discovered
        .into_iter()
        .filter(|m| ignore_timestamp || m.timestamp > latest_applied)
        .collect();
    sort_migrations(&mut candidates, Direction::Up);

    let Some(to) = to else {
        return candidates;
    };
    let Some(bound) = candidates.iter().rev().find(|m| m.name == to).map(|m| m.timestamp) else {
        return Vec::new();
    };

    candidates.retain(|m| m.timestamp <= bound);
    candidates
}

/// Computes the ordered set of migrations to revert.
///
/// `applied` holds descriptors for every ledger record. With a target, the
/// oldest candidate named `to` bounds the set inclusively; an unknown target
/// yields nothing.
#[must_use]
pub fn plan_down(applied: Vec<MigrationDescriptor>, to: Option<&str>) -> Vec<MigrationDescriptor> {
    let mut candidates = applied;
    sort_migrations(&mut candidates, Direction::Down);

    let Some(to) = to else {
        return candidates;
    };
    let Some(bound) = candidates.iter().rev().find(|m| m.name == to).map(|m| m.timestamp) else {
        return Vec::new();
    };

    candidates.retain(|m| m.timestamp >= bound);
    candidates
}

/// Pairs every ledger record with its file on disk.
///
/// Records are matched on filename and directory, with discovered
/// directories made relative to `relative_to`. The result keeps ledger order.
pub fn match_applied(
    discovered: &[MigrationDescriptor],
    applied: &[AppliedRecord],
    relative_to: &Path,
) -> Result<Vec<MigrationDescriptor>> {
    applied
        .iter()
        .map(|record| {
            discovered
                .iter()
                .find(|m| {
                    m.filename == record.filename
                        && m.ledger_directory(relative_to) == record.directory
                })
                .cloned()
                .ok_or_else(|| MigrateError::MissingMigration {
                    filename: record.filename.clone(),
                    directory: record.directory.clone(),
                })
        })
        .collect()
}

/// Builds the ledger record for an executed migration.
#[must_use]
pub fn to_record(migration: &MigrationDescriptor, relative_to: &Path) -> AppliedRecord {
    AppliedRecord {
        timestamp: migration.timestamp,
        name: migration.name.clone(),
        filename: migration.filename.clone(),
        directory: migration.ledger_directory(relative_to),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::epoch_sentinel;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, day, 0, 0, 0).unwrap()
    }

    fn migration(day: u32, name: &str) -> MigrationDescriptor {
        MigrationDescriptor {
            timestamp: at(day),
            name: name.to_string(),
            filename: format!("202301{day:02}000000-{name}.sql"),
            directory: PathBuf::from("/app/migrations"),
        }
    }

    fn names(migrations: &[MigrationDescriptor]) -> Vec<&str> {
        migrations.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn test_sort_is_stable_and_idempotent() {
        let mut migrations = vec![
            migration(3, "c"),
            migration(1, "a"),
            migration(2, "tie_first"),
            migration(2, "tie_second"),
        ];

        sort_migrations(&mut migrations, Direction::Up);
        let once = migrations.clone();
        sort_migrations(&mut migrations, Direction::Up);

        assert_eq!(migrations, once);
        assert_eq!(names(&migrations), ["a", "tie_first", "tie_second", "c"]);

        sort_migrations(&mut migrations, Direction::Down);
        assert_eq!(names(&migrations), ["c", "tie_first", "tie_second", "a"]);
    }

    #[test]
    fn test_up_takes_only_newer_than_latest() {
        let discovered = vec![migration(1, "a"), migration(3, "c"), migration(2, "b")];

        let plan = plan_up(discovered.clone(), at(1), false, None);
        assert_eq!(names(&plan), ["b", "c"]);

        // A migration at exactly the latest timestamp is not re-run.
        let plan = plan_up(discovered.clone(), at(2), false, None);
        assert_eq!(names(&plan), ["c"]);

        let plan = plan_up(discovered, epoch_sentinel(), false, None);
        assert_eq!(names(&plan), ["a", "b", "c"]);
    }

    #[test]
    fn test_up_ignore_timestamp_takes_everything() {
        let discovered = vec![migration(2, "b"), migration(1, "a")];
        let plan = plan_up(discovered, at(5), true, None);
        assert_eq!(names(&plan), ["a", "b"]);
    }

    #[test]
    fn test_up_to_target_is_inclusive() {
        let discovered = vec![
            migration(1, "a"),
            migration(2, "create_users"),
            migration(3, "c"),
        ];
        let plan = plan_up(discovered, epoch_sentinel(), false, Some("create_users"));
        assert_eq!(names(&plan), ["a", "create_users"]);
    }

    #[test]
    fn test_up_to_resolves_newest_duplicate() {
        let discovered = vec![
            migration(1, "seed"),
            migration(2, "b"),
            migration(3, "seed"),
            migration(4, "d"),
        ];
        let plan = plan_up(discovered, epoch_sentinel(), false, Some("seed"));
        assert_eq!(names(&plan), ["seed", "b", "seed"]);
    }

    #[test]
    fn test_up_to_unknown_or_already_applied_is_empty() {
        let discovered = vec![migration(1, "a"), migration(2, "b")];

        assert!(plan_up(discovered.clone(), epoch_sentinel(), false, Some("nope")).is_empty());
        // "a" exists on disk but is not a candidate any more.
        assert!(plan_up(discovered, at(1), false, Some("a")).is_empty());
    }

    #[test]
    fn test_down_reverts_everything_newest_first() {
        let applied = vec![migration(1, "a"), migration(3, "c"), migration(2, "b")];
        let plan = plan_down(applied, None);
        assert_eq!(names(&plan), ["c", "b", "a"]);
    }

    #[test]
    fn test_down_to_target_is_inclusive() {
        let applied = vec![
            migration(1, "a"),
            migration(2, "create_users"),
            migration(3, "c"),
        ];
        let plan = plan_down(applied, Some("create_users"));
        assert_eq!(names(&plan), ["c", "create_users"]);
    }

    #[test]
    fn test_down_to_resolves_oldest_duplicate() {
        let applied = vec![
            migration(1, "a"),
            migration(2, "seed"),
            migration(3, "c"),
            migration(4, "seed"),
        ];
        let plan = plan_down(applied, Some("seed"));
        assert_eq!(names(&plan), ["seed", "c", "seed"]);
    }

    #[test]
    fn test_down_to_unknown_is_empty() {
        let applied = vec![migration(1, "a")];
        assert!(plan_down(applied, Some("zzz")).is_empty());
    }

    #[test]
    fn test_match_applied() {
        let discovered = vec![migration(1, "a"), migration(2, "b")];
        let root = Path::new("/app");
        let records = vec![to_record(&discovered[1], root), to_record(&discovered[0], root)];
        assert_eq!(records[0].directory, "migrations");

        let matched = match_applied(&discovered, &records, root).unwrap();
        assert_eq!(names(&matched), ["b", "a"]);
    }

    #[test]
    fn test_match_applied_missing_file() {
        let discovered = vec![migration(1, "a")];
        let root = Path::new("/app");
        let mut record = to_record(&migration(2, "gone"), root);
        record.directory = "migrations".to_string();

        let result = match_applied(&discovered, &[record], root);
        assert!(matches!(result, Err(MigrateError::MissingMigration { .. })));
    }

    #[test]
    fn test_match_applied_requires_same_directory() {
        let discovered = vec![migration(1, "a")];
        let mut record = to_record(&discovered[0], Path::new("/app"));
        record.directory = "other".to_string();

        assert!(match_applied(&discovered, &[record], Path::new("/app")).is_err());
    }
}
