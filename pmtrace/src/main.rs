//! # pmtrace - Main Entry Point
//!
//! Parses one ftrace log, prints a per-run summary and optionally writes the
//! reconstructed model as JSON and/or a Chrome trace.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::BufWriter;

use pmtrace::cli::Args;
use pmtrace::config::AnalyzerConfig;
use pmtrace::domain::ExportError;
use pmtrace::export::{export_json_file, ChromeTraceExporter};
use pmtrace::processing::display_summary;
use pmtrace::trace_data::TraceData;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(EXIT_USAGE);
        }
        Err(e) => {
            // --help / --version
            let _ = e.print();
            std::process::exit(EXIT_SUCCESS);
        }
    };
    std::process::exit(match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run(args: &Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AnalyzerConfig::from_file(path)?,
        None => AnalyzerConfig::default(),
    };
    args.apply_overrides(&mut config);

    let data = TraceData::from_file(&args.log, &config)
        .with_context(|| format!("Failed to parse {}", args.log.display()))?;
    info!(
        "{}: {} runs, {} complete",
        args.log.display(),
        data.runs.len(),
        data.complete_runs().count()
    );

    if !args.quiet {
        display_summary(&data);
    }

    if let Some(path) = &args.json {
        export_json_file(&data, path)?;
        info!("Wrote {}", path.display());
    }

    if let Some(path) = &args.chrome {
        let exporter = ChromeTraceExporter::from_trace(&data);
        let file = File::create(path).map_err(|source| ExportError::WriteFailed {
            path: path.clone(),
            source,
        })?;
        exporter
            .export(BufWriter::new(file))
            .context("Failed to write Chrome trace")?;
        info!("Wrote {} events to {}", exporter.event_count(), path.display());
    }

    Ok(())
}
