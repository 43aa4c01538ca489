//! Equal-timestamp reordering
//!
//! The kernel can stamp a run marker with exactly the same time as the events
//! around it, and the ring buffer does not promise their relative order. Within
//! one block of consecutive records sharing a timestamp, a lone start-side
//! record (`SUSPEND START`, `timekeeping_freeze ... end`) is moved to the front
//! and a lone end-side record (`RESUME COMPLETE`, `timekeeping_freeze ... begin`)
//! to the back. Only one block is buffered at a time.

use pmtrace_common::{
    EVENT_SUSPEND_RESUME, EVENT_TRACING_MARK, FREEZE_MACHINE_EVENT, RESUME_COMPLETE_MARKER,
    SUSPEND_START_MARKER,
};

use super::line::TraceRecord;

#[derive(Debug, Default)]
pub struct TimestampReorderer {
    block: Vec<TraceRecord>,
}

impl TimestampReorderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `record`; returns the previous block once the timestamp changes
    pub fn push(&mut self, record: TraceRecord) -> Vec<TraceRecord> {
        let released = match self.block.first() {
            Some(first) if first.timestamp.total_cmp(&record.timestamp).is_ne() => self.flush(),
            _ => Vec::new(),
        };
        self.block.push(record);
        released
    }

    /// Release whatever is buffered, reordered
    pub fn flush(&mut self) -> Vec<TraceRecord> {
        let mut block = std::mem::take(&mut self.block);
        reorder_block(&mut block);
        block
    }
}

fn reorder_block(block: &mut Vec<TraceRecord>) {
    if block.len() < 2 || !block.iter().any(is_ordering_event) {
        return;
    }
    let mut first = Vec::new();
    let mut last = Vec::new();
    for (idx, rec) in block.iter().enumerate() {
        match edge(rec) {
            Some(Edge::Front) => first.push(idx),
            Some(Edge::Back) => last.push(idx),
            None => {}
        }
    }
    match (first.as_slice(), last.as_slice()) {
        ([idx], []) => {
            let rec = block.remove(*idx);
            block.insert(0, rec);
        }
        ([], [idx]) => {
            let rec = block.remove(*idx);
            block.push(rec);
        }
        _ => {}
    }
}

enum Edge {
    Front,
    Back,
}

fn is_ordering_event(rec: &TraceRecord) -> bool {
    rec.is_event(EVENT_SUSPEND_RESUME) || rec.is_event(EVENT_TRACING_MARK)
}

fn edge(rec: &TraceRecord) -> Option<Edge> {
    if rec.is_event(EVENT_TRACING_MARK) {
        if rec.name.starts_with(SUSPEND_START_MARKER) {
            return Some(Edge::Front);
        }
        if rec.name.starts_with(RESUME_COMPLETE_MARKER) {
            return Some(Edge::Back);
        }
    }
    if rec.is_event(EVENT_SUSPEND_RESUME) && rec.name.starts_with(FREEZE_MACHINE_EVENT) {
        if rec.name.ends_with(" begin") {
            return Some(Edge::Back);
        }
        if rec.name.ends_with(" end") {
            return Some(Edge::Front);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::LineParser;

    fn rec(line: &str) -> TraceRecord {
        LineParser::default().parse(line).unwrap()
    }

    fn names(records: &[TraceRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_start_marker_moves_first() {
        let mut reorder = TimestampReorderer::new();
        assert!(reorder
            .push(rec("sh-1 [000] .... 5.000: suspend_resume: dpm_prepare[2] begin"))
            .is_empty());
        assert!(reorder
            .push(rec("sh-1 [000] .... 5.000: tracing_mark_write: SUSPEND START"))
            .is_empty());
        let released = reorder.push(rec("sh-1 [000] .... 5.100: suspend_resume: dpm_prepare[2] end"));
        assert_eq!(names(&released), vec!["SUSPEND START", "dpm_prepare[2] begin"]);
        assert_eq!(names(&reorder.flush()), vec!["dpm_prepare[2] end"]);
    }

    #[test]
    fn test_resume_complete_moves_last() {
        let mut reorder = TimestampReorderer::new();
        reorder.push(rec("sh-1 [000] .... 9.000: tracing_mark_write: RESUME COMPLETE"));
        reorder.push(rec("sh-1 [000] .... 9.000: suspend_resume: dpm_complete[2] end"));
        assert_eq!(
            names(&reorder.flush()),
            vec!["dpm_complete[2] end", "RESUME COMPLETE"]
        );
    }

    #[test]
    fn test_ambiguous_block_is_left_alone() {
        let mut reorder = TimestampReorderer::new();
        reorder.push(rec("sh-1 [000] .... 9.000: tracing_mark_write: RESUME COMPLETE"));
        reorder.push(rec("sh-1 [000] .... 9.000: suspend_resume: timekeeping_freeze[0] end"));
        reorder.push(rec("sh-1 [000] .... 9.000: suspend_resume: dpm_complete[2] end"));
        assert_eq!(
            names(&reorder.flush()),
            vec!["RESUME COMPLETE", "timekeeping_freeze[0] end", "dpm_complete[2] end"]
        );
    }
}
