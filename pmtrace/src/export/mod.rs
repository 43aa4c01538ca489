//! Trace export functionality
//!
//! Writes the reconstructed runs to disk:
//! - pretty JSON of the full output model
//! - Chrome Trace Event Format for chrome://tracing or Perfetto

pub mod chrome_trace;
pub mod json;

pub use chrome_trace::ChromeTraceExporter;
pub use json::{export_json_file, write_json};
