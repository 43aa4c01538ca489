//! Single-pass processing of an ftrace log
//!
//! - Run state and end-of-run finalization (`run_context`)
//! - The line-by-line driver (`event_processor`)
//! - Console summary of the result (`event_display`)

pub mod event_display;
pub mod event_processor;
pub mod run_context;

pub use event_display::{display_failed, display_run, display_summary};
pub use event_processor::EventProcessor;
pub use run_context::{RunContext, RunEnd};
