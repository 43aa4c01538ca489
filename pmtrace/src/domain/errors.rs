//! Structured error types for pmtrace
//!
//! Using thiserror for automatic Display implementation and error chaining.
//!
//! Only I/O and configuration problems surface as `Err`. Everything wrong with
//! the trace content itself is recovered locally; the two kinds that survive
//! into the output model are [`RunError`] (run-fatal) and [`PhaseFailure`]
//! (the run is kept, but the test did not complete).

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read trace log {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fatal for one run only; other runs in the same log are unaffected
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunError {
    #[error("ftrace start marker is missing")]
    MissingStartMarker,
}

/// Why a parsed run did not complete the full suspend/resume sequence.
///
/// `test` is empty for single-run logs and the 1-based run number otherwise,
/// so the messages read `mem failed in suspend_late phase` or
/// `mem2 failed in suspend_late phase`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseFailure {
    #[error("{mode}{test} failed in {phase} phase")]
    FailedInPhase {
        mode: String,
        test: String,
        phase: String,
    },

    #[error("test{test} did not enter {mode} power mode")]
    DidNotEnter { test: String, mode: String },

    #[error("test{test} failed to enter {mode} mode: {reason}")]
    EnterFailed {
        test: String,
        mode: String,
        reason: String,
    },
}

impl PhaseFailure {
    /// Number the failure after its run; only multi-run logs do this
    pub fn set_test(&mut self, test: &str) {
        match self {
            Self::FailedInPhase { test: t, .. }
            | Self::DidNotEnter { test: t, .. }
            | Self::EnterFailed { test: t, .. } => *t = test.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write export file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_failure_display() {
        let err = PhaseFailure::FailedInPhase {
            mode: "mem".to_string(),
            test: String::new(),
            phase: "suspend_late".to_string(),
        };
        assert_eq!(err.to_string(), "mem failed in suspend_late phase");

        let err = PhaseFailure::DidNotEnter {
            test: "2".to_string(),
            mode: "freeze".to_string(),
        };
        assert_eq!(err.to_string(), "test2 did not enter freeze power mode");

        let mut err = PhaseFailure::FailedInPhase {
            mode: "mem".to_string(),
            test: String::new(),
            phase: "resume".to_string(),
        };
        err.set_test("3");
        assert_eq!(err.to_string(), "mem3 failed in resume phase");
    }

    #[test]
    fn test_run_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(RunError::MissingStartMarker).unwrap();
        assert_eq!(json["kind"], "missing_start_marker");
        assert_eq!(RunError::MissingStartMarker.to_string(), "ftrace start marker is missing");
    }

    #[test]
    fn test_read_failed_names_path() {
        let err = ParseError::ReadFailed {
            path: PathBuf::from("/tmp/ftrace.txt"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/tmp/ftrace.txt"));
    }
}
