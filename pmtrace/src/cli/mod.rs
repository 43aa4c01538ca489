//! Command-line interface for pmtrace

pub mod args;

pub use args::Args;
