//! Domain types providing compile-time safety and self-documentation
//!
//! Trace timestamps stay plain `f64` seconds (that is what the kernel prints),
//! but identifiers get newtypes so a CPU number is never passed where a thread
//! id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Thread ID
///
/// The kernel task id printed after the process name (`kworker/u8:2-123`).
/// Call graphs, kprobe pairs and device callbacks are all keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// CPU ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// Convert a span in seconds to milliseconds for display
#[must_use]
pub fn millis(seconds: f64) -> f64 {
    seconds * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(Tid(42).to_string(), "TID:42");
        assert_eq!(CpuId(3).to_string(), "CPU:3");
    }

    #[test]
    fn test_tid_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Tid(7)).unwrap(), "7");
    }
}
