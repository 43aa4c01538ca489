//! Row layout for overlapping time intervals.
//!
//! Assigns every interval a row so that no two intervals sharing a row
//! overlap in time. Used for device/thread bars inside a phase band and for
//! sub-call annotations inside one device bar.
//!
//! # Algorithm
//!
//! Greedy first-fit over a deterministic order:
//!
//! 1. Stable-sort by `(priority first, length desc, label asc)`
//! 2. Put each interval in the lowest row with no overlap, else open a row
//!
//! Intervals that merely touch (`[0,10)` and `[10,20)`) share a row.
//!
//! ```text
//! [0,10) [10,20) [5,15)
//!
//! row 0: ██████████──────────██████████
//! row 1:      ██████████
//! ```
//!
//! The row count is not guaranteed minimal, only reproducible for identical
//! input.
//!
//! # Performance
//!
//! - Sorting: O(n log n)
//! - Placement: O(n × placed) worst case

use std::cmp::Ordering;

// =============================================================================
// INTERVAL TRAIT
// =============================================================================

/// Anything with a time span that can be stacked in rows
pub trait Interval {
    fn start(&self) -> f64;
    fn end(&self) -> f64;
    fn label(&self) -> &str;

    /// Placed before everything else (call-graph promoted actions)
    fn priority(&self) -> bool {
        false
    }

    fn length(&self) -> f64 {
        self.end() - self.start()
    }
}

impl<T: Interval> Interval for &T {
    fn start(&self) -> f64 {
        (**self).start()
    }
    fn end(&self) -> f64 {
        (**self).end()
    }
    fn label(&self) -> &str {
        (**self).label()
    }
    fn priority(&self) -> bool {
        (**self).priority()
    }
}

// =============================================================================
// LAYOUT
// =============================================================================

/// Row assignment for a slice of intervals
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowLayout {
    /// `rows[i]` is the row of the i-th input interval
    pub rows: Vec<usize>,
    pub row_count: usize,
}

impl RowLayout {
    /// Indices of the input intervals placed in `row`
    #[must_use]
    pub fn members(&self, row: usize) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == row)
            .map(|(i, _)| i)
            .collect()
    }
}

/// `true` if the half-open spans overlap; touching spans do not
fn overlaps(a: (f64, f64), b: (f64, f64)) -> bool {
    let (s, e) = a;
    let (rs, re) = b;
    !((s <= rs && e <= rs) || (s >= re && e >= re))
}

fn layout_order<T: Interval>(a: &T, b: &T) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| b.length().total_cmp(&a.length()))
        .then_with(|| a.label().cmp(b.label()))
}

/// Pack `items` into rows
#[must_use]
pub fn layout<T: Interval>(items: &[T]) -> RowLayout {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| layout_order(&items[a], &items[b]));

    let mut rows = vec![0; items.len()];
    let mut placed: Vec<Vec<(f64, f64)>> = Vec::new();
    for idx in order {
        let span = (items[idx].start(), items[idx].end());
        let row = placed
            .iter()
            .position(|row| row.iter().all(|other| !overlaps(span, *other)))
            .unwrap_or_else(|| {
                placed.push(Vec::new());
                placed.len() - 1
            });
        placed[row].push(span);
        rows[idx] = row;
    }

    RowLayout {
        rows,
        row_count: placed.len(),
    }
}
