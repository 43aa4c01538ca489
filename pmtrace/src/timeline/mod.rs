//! Phase/device timeline model of one test run
//!
//! - [`phase`] - ordered phases and the actions they own
//! - [`action`] - device actions and sub-call annotations
//! - [`router`] - trace event classification
//! - [`kprobe`] - kprobe pairing and placement

pub mod action;
pub mod kprobe;
pub mod phase;
pub mod router;

pub use action::{collapse_loops, ActionKind, DeviceAction, SubCall};
pub use kprobe::{place_kprobes, KprobeSpan, KprobeTracker};
pub use phase::{Phase, PhaseKey, PhaseTimeline, Waking};
pub use router::{RoutedEvent, TraceEventRouter, KPROBE_COVERED_EVENTS};
