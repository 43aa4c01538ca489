//! Function-graph call tree reconstruction
//!
//! - [`graph`] - the per-graph state machine with depth repair
//! - [`builder`] - per-thread accumulation and validation
//! - [`attach`] - matching graphs to device actions

pub mod attach;
pub mod builder;
pub mod graph;

pub use attach::{attach_graphs, AttachStats};
pub use builder::CallGraphBuilder;
pub use graph::{AddOutcome, CallGraph, GraphLimits, GraphLine, LineShape};
