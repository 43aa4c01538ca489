//! Layout analysis of a finished run
//!
//! Pure computations over the timeline, independent of any output format.

pub mod bands;
pub mod row_layout;

pub use bands::{compute_bands, PhaseBand};
pub use row_layout::{layout, Interval, RowLayout};
