//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::config::{AnalyzerConfig, MarkerMode};

#[derive(Parser, Debug)]
#[command(
    name = "pmtrace",
    about = "Reconstruct suspend/resume timelines from kernel ftrace logs",
    after_help = "\
EXAMPLES:
    pmtrace ftrace.txt                              Print a per-run summary
    pmtrace ftrace.txt --json runs.json             Dump the full timeline model
    pmtrace ftrace.txt --chrome trace.json          Open in chrome://tracing or Perfetto
    pmtrace ftrace.txt --device-filter usb,i2c -q   Only USB and I2C devices, no summary"
)]
pub struct Args {
    /// ftrace log captured during suspend/resume
    #[arg(value_name = "FTRACE_LOG")]
    pub log: PathBuf,

    /// JSON file with analyzer settings (any subset of fields)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Fold call-graph subtrees nested deeper than N
    #[arg(long, value_name = "N")]
    pub max_depth: Option<u32>,

    /// Keep only devices whose name or driver contains one of these
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    pub device_filter: Vec<String>,

    /// How runs are delimited in the log
    #[arg(long, value_enum)]
    pub markers: Option<MarkerMode>,

    /// Write the reconstructed runs as JSON
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Write a Chrome Trace Event file
    #[arg(long, value_name = "FILE")]
    pub chrome: Option<PathBuf>,

    /// Suppress the run summary
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Layer the command-line overrides on top of `config`
    pub fn apply_overrides(&self, config: &mut AnalyzerConfig) {
        if let Some(depth) = self.max_depth {
            config.max_graph_depth = Some(depth);
        }
        if !self.device_filter.is_empty() {
            config.device_filter.clone_from(&self.device_filter);
        }
        if let Some(markers) = self.markers {
            config.trace_markers = markers;
        }
    }
}
