//! Output model: every run reconstructed from one ftrace log
//!
//! This is the whole contract handed to renderers and exporters. Loading goes
//! through [`TraceData::from_file`] or [`TraceData::from_reader`]; both stream
//! the log line by line.

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::analysis::PhaseBand;
use crate::callgraph::AttachStats;
use crate::config::AnalyzerConfig;
use crate::domain::{ParseError, PhaseFailure, RunError};
use crate::parser::RunMetadata;
use crate::processing::EventProcessor;
use crate::timeline::Phase;

/// Kernel/hardware boundaries of one run, in trace seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunTimings {
    pub kernel_suspend_start: f64,
    pub hardware_suspend_start: f64,
    pub hardware_resume_start: f64,
    pub kernel_resume_end: f64,
}

/// One reconstructed suspend/resume cycle
#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    /// Wall-clock stamps carried by the run markers
    pub hw_start: Option<NaiveDateTime>,
    pub hw_end: Option<NaiveDateTime>,
    pub ended_by_marker: bool,
    pub timings: RunTimings,
    /// Canonical order, contiguous
    pub phases: Vec<Phase>,
    pub bands: Vec<PhaseBand>,
    pub failure: Option<PhaseFailure>,
    pub graph_stats: AttachStats,
    pub metadata: RunMetadata,
}

impl TestRun {
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    #[must_use]
    pub fn action_count(&self) -> usize {
        self.phases.iter().map(|p| p.actions.len()).sum()
    }
}

/// A run as it came out of the log
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Complete(Box<TestRun>),
    /// Records that could not be assigned to any run
    Failed {
        index: usize,
        error: RunError,
        start: f64,
        end: f64,
    },
}

impl RunOutcome {
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Complete(run) => run.index,
            Self::Failed { index, .. } => *index,
        }
    }

    #[must_use]
    pub fn run(&self) -> Option<&TestRun> {
        match self {
            Self::Complete(run) => Some(run),
            Self::Failed { .. } => None,
        }
    }
}

/// Every run of one log, in log order
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceData {
    pub runs: Vec<RunOutcome>,
}

impl TraceData {
    /// Parse an ftrace log from disk
    pub fn from_file(path: impl AsRef<Path>, config: &AnalyzerConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ParseError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let data = Self::from_reader(BufReader::new(file), config).map_err(|source| {
            ParseError::ReadFailed {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(data)
    }

    /// Parse an ftrace log from any buffered reader. Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn from_reader<R: BufRead>(mut reader: R, config: &AnalyzerConfig) -> std::io::Result<Self> {
        let mut processor = EventProcessor::new(config);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            processor.process_line(&String::from_utf8_lossy(&buf));
        }
        let mut runs = processor.finish();

        if runs.len() > 1 {
            for outcome in &mut runs {
                if let RunOutcome::Complete(run) = outcome {
                    let test = (run.index + 1).to_string();
                    if let Some(failure) = run.failure.as_mut() {
                        failure.set_test(&test);
                    }
                }
            }
        }
        Ok(Self { runs })
    }

    /// Successfully reconstructed runs
    pub fn complete_runs(&self) -> impl Iterator<Item = &TestRun> {
        self.runs.iter().filter_map(RunOutcome::run)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
