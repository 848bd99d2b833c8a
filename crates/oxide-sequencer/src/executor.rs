//! Sequential batch execution.
//!
//! A [`Batch`] runs its migrations strictly one after another. The first
//! failure stops the batch; steps that already ran are not undone.

use tracing::{error, info};

use crate::body::PlannedMigration;
use crate::connection::Connection;
use crate::descriptor::Direction;
use crate::error::{MigrateError, Result};
use crate::progress::{ProgressEvent, ProgressObserver};

/// Where a batch is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Not started.
    Planned,
    /// Executing the step at this index.
    Running(usize),
    /// Every step succeeded.
    Completed,
    /// The step at this index failed.
    Failed(usize),
}

/// An ordered set of migrations executed in one direction.
#[derive(Debug)]
pub struct Batch {
    direction: Direction,
    steps: Vec<PlannedMigration>,
    state: BatchState,
}

impl Batch {
    /// Creates a batch in the [`BatchState::Planned`] state.
    pub fn new(direction: Direction, steps: Vec<PlannedMigration>) -> Self {
        Self {
            direction,
            steps,
            state: BatchState::Planned,
        }
    }

    /// Returns the batch direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the planned steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[PlannedMigration] {
        &self.steps
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Returns whether the batch has nothing to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in order against `conn`.
    pub async fn execute(
        &mut self,
        conn: &Connection,
        observer: &dyn ProgressObserver,
    ) -> Result<()> {
        if self.state != BatchState::Planned {
            return Err(MigrateError::InvalidState(format!(
                "batch already executed ({:?})",
                self.state
            )));
        }

        for (index, step) in self.steps.iter().enumerate() {
            self.state = BatchState::Running(index);
            let descriptor = &step.descriptor;
            info!(
                direction = %self.direction,
                name = %descriptor.name,
                filename = %descriptor.filename,
                "Running migration"
            );

            if let Err(source) = step.body.run(self.direction, conn).await {
                self.state = BatchState::Failed(index);
                error!(
                    direction = %self.direction,
                    filename = %descriptor.filename,
                    error = %source,
                    "Migration failed"
                );
                return Err(MigrateError::Execution {
                    migration: descriptor.filename.clone(),
                    direction: self.direction,
                    source,
                });
            }

            observer.on_event(&ProgressEvent::MigrationCompleted {
                direction: self.direction,
                name: descriptor.name.clone(),
                path: descriptor.path(),
            });
        }

        self.state = BatchState::Completed;
        Ok(())
    }
}
