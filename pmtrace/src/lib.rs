//! # pmtrace - Suspend/Resume Timeline Reconstruction
//!
//! pmtrace reads the ftrace log captured while a machine suspends and
//! resumes, and rebuilds what happened: the power-management phases in
//! their canonical order, every device callback inside them, the kernel call
//! graphs behind those callbacks, and a deterministic row layout ready for
//! rendering.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         ftrace log                              │
//! │       (function_graph or nop tracer, one or more runs)          │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ lines
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  parser: LineParser ─▶ TimestampReorderer      LogHeader (#)   │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ TraceRecord
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  processing: EventProcessor ─▶ RunContext (one per run)         │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  callgraph   │   │   timeline   │   │   kprobes    │         │
//! │  │  (builder)   │   │ router/phases│   │  (pairing)   │         │
//! │  └──────┬───────┘   └──────┬───────┘   └──────┬───────┘         │
//! │         └──────── end of run: attach ─────────┘                 │
//! │                            │                                    │
//! │                            ▼                                    │
//! │                  analysis: row layout / bands                   │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ TraceData { runs }
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        export: JSON model │ Chrome Trace Event Format           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`parser`]: line classification for both tracer dialects, metadata
//!   comments, equal-timestamp reordering
//! - [`callgraph`]: per-thread call-graph state machine with depth repair,
//!   and matching finished graphs to device actions
//! - [`timeline`]: phases, device actions, event routing, kprobe placement
//! - [`analysis`]: interval row layout and phase bands
//! - [`processing`]: the single pass over the log and per-run finalization
//! - [`trace_data`]: the output model
//! - [`export`]: JSON and Chrome trace writers
//! - [`config`]: analyzer thresholds and function lists
//! - [`cli`]: command-line arguments
//! - [`domain`]: newtypes and error enums
//!
//! ## Typical Usage
//!
//! ```no_run
//! use pmtrace::config::AnalyzerConfig;
//! use pmtrace::trace_data::TraceData;
//!
//! # fn example() -> anyhow::Result<()> {
//! let data = TraceData::from_file("ftrace.txt", &AnalyzerConfig::default())?;
//! for run in data.complete_runs() {
//!     println!("run {}: {} phases", run.index, run.phases.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! - **Phase**: a stage of suspend/resume (`suspend_prepare` .. `resume_complete`)
//! - **Device action**: one device callback, or a synthesized thread/global span
//! - **Call graph**: nested calls of one thread between a depth-0 call and its return
//! - **Run**: everything between one `SUSPEND START` and `RESUME COMPLETE`

pub mod analysis;
pub mod callgraph;
pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod parser;
pub mod processing;
pub mod timeline;
pub mod trace_data;
