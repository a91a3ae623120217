//! Reverses a provisioning run from its lifecycle record.
//!
//! Teardown runs as a separate, later invocation whose only input is the
//! record written by provisioning. Its failures are reported as warnings and
//! never as errors: cleanup typically runs after the primary workflow, and a
//! failing cleanup must not replace that workflow's outcome.

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::{Engine, EngineError};
use crate::runner::CommandRunner;
use crate::state::{StateError, StateStore};

/// Result of a teardown attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TeardownOutcome {
    /// No lifecycle record existed.
    NothingToCleanUp,
    /// The engine destroyed the resources and the record was removed.
    Destroyed {
        /// Directory the engine ran in.
        working_directory: Utf8PathBuf,
    },
    /// Teardown failed; the failure was logged as a warning.
    Failed {
        /// Description of the failure.
        message: String,
    },
}

/// Errors raised by [`TeardownDriver::try_teardown`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TeardownError {
    /// Raised when the lifecycle record cannot be read or removed.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when the engine fails to destroy the resources.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Replays `destroy` with the recorded parameters.
#[derive(Clone, Debug)]
pub struct TeardownDriver<R: CommandRunner> {
    engine: Engine<R>,
}

impl<R: CommandRunner> TeardownDriver<R> {
    /// Creates a driver around `engine`.
    #[must_use]
    pub const fn new(engine: Engine<R>) -> Self {
        Self { engine }
    }

    /// Runs teardown, downgrading any failure to a warning.
    #[must_use]
    pub fn teardown(&self, store: &StateStore) -> TeardownOutcome {
        info!("Starting cleanup process...");
        match self.try_teardown(store) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("Cleanup failed: {err}");
                info!("Cleanup failure will not fail the workflow");
                TeardownOutcome::Failed {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Runs teardown and reports failures to the caller.
    ///
    /// The record is only removed after `destroy` succeeds, so a failed
    /// attempt can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError`] when the record is corrupt, the engine
    /// fails, or the record cannot be removed.
    pub fn try_teardown(&self, store: &StateStore) -> Result<TeardownOutcome, TeardownError> {
        let Some(record) = store.load()? else {
            info!(path = %store.path(), "No cleanup state found, skipping cleanup");
            return Ok(TeardownOutcome::NothingToCleanUp);
        };

        info!(dir = %record.working_directory, "Running OpenTofu destroy...");
        self.engine
            .destroy(&record.parameters(), &record.working_directory)?;
        store.clear()?;
        info!("Cleanup completed successfully!");

        Ok(TeardownOutcome::Destroyed {
            working_directory: record.working_directory,
        })
    }
}
