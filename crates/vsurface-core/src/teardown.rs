//! Guarded teardown steps.
//!
//! Shutdown runs a fixed sequence of release steps. Each step is wrapped in
//! `catch_unwind` and its error (or panic) is logged and recorded; the next
//! step always runs.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::video::VideoError;

/// Steps that failed during a teardown, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    failed: Vec<&'static str>,
}

impl TeardownReport {
    /// Runs one teardown step.
    ///
    /// # Safety rationale for `AssertUnwindSafe`
    ///
    /// Shared state touched by teardown steps lives behind
    /// `parking_lot::Mutex` (poison-free) or atomics. A step that panics
    /// leaves its resource half-released, but no later step depends on it.
    pub(crate) fn run<F>(&mut self, step: &'static str, f: F)
    where
        F: FnOnce() -> Result<(), VideoError>,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => tracing::trace!("Teardown step '{}' done", step),
            Ok(Err(e)) => {
                tracing::warn!("Teardown step '{}' failed: {}", step, e);
                self.failed.push(step);
            }
            Err(_panic) => {
                tracing::error!("Teardown step '{}' panicked", step);
                self.failed.push(step);
            }
        }
    }

    /// Returns true if every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Names of the failed steps.
    pub fn failed_steps(&self) -> &[&'static str] {
        &self.failed
    }
}
