//! # Call Graph State Machine
//!
//! One [`CallGraph`] holds the function-graph records of a single thread from
//! a depth-0 call to its matching depth-0 return.
//!
//! ## Depth Repair
//!
//! When the trace buffer drops entries, the depth printed on a record no
//! longer agrees with the depth tracked so far. Before applying the record the
//! graph reconciles the two with virtual records named
//! [`SENTINEL_FUNCTION`]:
//!
//! ```text
//! tracked 3, record wants 1   ->  last call becomes a leaf, virtual returns follow
//! tracked 1, record wants 3   ->  a return becomes a leaf, virtual calls follow
//! ```
//!
//! Repair is best effort; the lost call sequence cannot be recovered. A graph
//! whose first record is a sentinel is invalid. A graph that ran out of
//! records before returning to depth 0 is closed synthetically and marked
//! `partial`.
//!
//! ## Folding
//!
//! Calls at or beyond `max_depth`, and calls to blacklisted functions, are
//! kept as a single leaf spanning their whole subtree.

use log::{debug, warn};
use pmtrace_common::SENTINEL_FUNCTION;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::AnalyzerConfig;
use crate::domain::Tid;
use crate::parser::{RecordKind, TraceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineShape {
    Call,
    Return,
    Leaf,
}

/// One call-graph record, owned by the graph once added
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphLine {
    pub time: f64,
    pub depth: u32,
    pub name: String,
    /// Seconds; for calls this is set from the matching return
    pub length: f64,
    pub shape: LineShape,
}

impl GraphLine {
    #[must_use]
    pub fn from_record(record: &TraceRecord) -> Option<Self> {
        let shape = match record.kind {
            RecordKind::Call => LineShape::Call,
            RecordKind::Return => LineShape::Return,
            RecordKind::Leaf => LineShape::Leaf,
            _ => return None,
        };
        let length = match shape {
            LineShape::Call => 0.0,
            LineShape::Return | LineShape::Leaf => record.duration_hint.unwrap_or(0.0),
        };
        Some(Self {
            time: record.timestamp,
            depth: record.depth,
            name: record.name.clone(),
            length,
            shape,
        })
    }

    #[must_use]
    pub fn new(time: f64, depth: u32, name: &str, shape: LineShape) -> Self {
        Self {
            time,
            depth,
            name: name.to_string(),
            length: 0.0,
            shape,
        }
    }

    /// A return or a leaf: this record brings the depth back down
    #[must_use]
    pub fn closes(&self) -> bool {
        matches!(self.shape, LineShape::Return | LineShape::Leaf)
    }

    #[must_use]
    pub fn end(&self) -> f64 {
        self.time + self.length
    }
}

/// Result of feeding one record to an open graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Still collecting
    Open,
    /// Returned to depth 0; start a fresh graph for the next record
    Closed,
    /// Repair closed the graph; the same record must be fed to a fresh graph
    ClosedReplay,
}

/// Caps applied while a graph grows
#[derive(Debug, Clone, Default)]
pub struct GraphLimits {
    pub max_depth: Option<u32>,
    pub max_records: usize,
    pub blacklist: Vec<String>,
}

impl GraphLimits {
    #[must_use]
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self {
            max_depth: config.max_graph_depth.filter(|d| *d > 0),
            max_records: config.max_graph_records,
            blacklist: config.callgraph_blacklist.clone(),
        }
    }

    fn blacklisted(&self, name: &str) -> bool {
        self.blacklist.iter().any(|b| b == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallGraph {
    pub tid: Tid,
    /// Root function name, set when the graph is finalized
    pub name: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub lines: Vec<GraphLine>,
    pub invalid: bool,
    pub partial: bool,
    #[serde(skip)]
    depth: i64,
    #[serde(skip)]
    ignoring: bool,
}

fn to_depth(depth: i64) -> u32 {
    u32::try_from(depth.max(0)).unwrap_or(u32::MAX)
}

impl CallGraph {
    #[must_use]
    pub fn new(tid: Tid) -> Self {
        Self {
            tid,
            name: String::new(),
            start: None,
            end: None,
            lines: Vec::new(),
            invalid: false,
            partial: false,
            depth: 0,
            ignoring: false,
        }
    }

    /// Tracked nesting depth
    #[must_use]
    pub fn depth(&self) -> i64 {
        self.depth
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }

    /// `(start, end)` once both are known
    #[must_use]
    pub fn span(&self) -> Option<(f64, f64)> {
        Some((self.start?, self.end?))
    }

    /// Feed the next record of this thread
    #[allow(clippy::too_many_lines)]
    pub fn add_line(&mut self, mut line: GraphLine, limits: &GraphLimits) -> AddOutcome {
        if self.invalid {
            return if line.depth == 0 && line.closes() {
                AddOutcome::Closed
            } else {
                AddOutcome::Open
            };
        }
        if self.depth < 0 || self.lines.len() >= limits.max_records.max(1) {
            self.invalidate(line.time);
            return AddOutcome::Open;
        }

        // Folded subtree: drop children until we are back at the fold depth
        if self.ignoring {
            if i64::from(line.depth) > self.depth {
                return AddOutcome::Open;
            }
            if let Some(last) = self.lines.last_mut() {
                if last.shape == LineShape::Call {
                    last.shape = LineShape::Leaf;
                }
                last.length = line.time - last.time;
            }
            self.ignoring = false;
            if i64::from(line.depth) == self.depth && line.shape == LineShape::Return {
                if line.depth == 0 {
                    self.end = Some(line.time);
                    return AddOutcome::Closed;
                }
                return AddOutcome::Open;
            }
        }

        // Compare the tracked depth with this record's pre-call depth
        let mut pre_depth = i64::from(line.depth) + i64::from(line.shape == LineShape::Return);
        let last_idx = self.lines.len().checked_sub(1);
        let last_time = last_idx.map_or(line.time, |i| {
            let last = &self.lines[i];
            if last.shape == LineShape::Leaf {
                last.end()
            } else {
                last.time
            }
        });
        let mismatch = pre_depth - self.depth;
        if mismatch.abs() > 1 {
            warn!(
                "ftrace data missing for {} at {:.6}: depth {} but record expects {}, corrections made",
                self.tid, line.time, self.depth, pre_depth
            );
        } else if mismatch != 0 {
            debug!(
                "depth realigned by {mismatch} for {} at {:.6}",
                self.tid, line.time
            );
        }

        if mismatch < 0 {
            let mut first = true;
            while pre_depth < self.depth {
                self.depth -= 1;
                let last_is_call =
                    last_idx.is_some_and(|i| self.lines[i].shape == LineShape::Call);
                if first && last_is_call {
                    if let Some(last) = last_idx.and_then(|i| self.lines.get_mut(i)) {
                        last.depth = to_depth(self.depth);
                        last.shape = LineShape::Leaf;
                        last.length = line.time - last.time;
                    }
                } else {
                    self.lines.push(GraphLine::new(
                        last_time,
                        to_depth(self.depth),
                        SENTINEL_FUNCTION,
                        LineShape::Return,
                    ));
                }
                first = false;
            }
        } else if mismatch > 0 {
            let mut first = true;
            while pre_depth > self.depth {
                if first && line.shape == LineShape::Return {
                    line.shape = LineShape::Leaf;
                    pre_depth -= 1;
                } else {
                    self.lines.push(GraphLine::new(
                        last_time,
                        to_depth(self.depth),
                        SENTINEL_FUNCTION,
                        LineShape::Call,
                    ));
                    self.depth += 1;
                    if last_idx.is_none() {
                        self.start = Some(last_time);
                    }
                }
                first = false;
            }
        }

        // Apply the record itself
        let mut skip_add = false;
        match line.shape {
            LineShape::Call => {
                let too_deep = limits
                    .max_depth
                    .is_some_and(|md| self.depth >= i64::from(md) - 1);
                if too_deep || limits.blacklisted(&line.name) {
                    self.ignoring = true;
                } else {
                    self.depth += 1;
                }
            }
            LineShape::Return => {
                self.depth -= 1;
                let last = last_idx.map(|i| &self.lines[i]);
                let empty_call =
                    last.is_some_and(|l| l.shape == LineShape::Call && l.depth == line.depth);
                let too_deep = limits
                    .max_depth
                    .is_some_and(|md| last.is_some_and(|l| l.depth >= md));
                if empty_call || too_deep || limits.blacklisted(&line.name) {
                    while self.lines.last().is_some_and(|l| l.depth > line.depth) {
                        self.lines.pop();
                    }
                    let Some(tail) = self.lines.last_mut() else {
                        self.invalid = true;
                        return AddOutcome::Closed;
                    };
                    if tail.shape == LineShape::Call {
                        tail.shape = LineShape::Leaf;
                    }
                    tail.length = line.time - tail.time;
                    if !line.name.is_empty() {
                        tail.name.clone_from(&line.name);
                    }
                    skip_add = true;
                }
            }
            LineShape::Leaf => {}
        }

        if self.lines.is_empty() {
            self.start = Some(line.time);
        }

        // A shallow mismatch may have closed the whole graph already
        let mut outcome = AddOutcome::Closed;
        let mut closing = (line.depth, line.closes(), line.time, line.shape, line.length);
        if mismatch < 0 {
            if let Some(tail) = self.lines.last() {
                if tail.depth == 0 && tail.closes() {
                    closing = (tail.depth, true, tail.time, tail.shape, tail.length);
                    skip_add = true;
                    outcome = AddOutcome::ClosedReplay;
                }
            }
        }
        if !skip_add {
            self.lines.push(line);
        }

        let (depth, closes, time, shape, length) = closing;
        if depth == 0 && closes {
            if self.start.is_none() {
                self.start = Some(time);
            }
            let end = if shape == LineShape::Leaf { time + length } else { time };
            self.end = Some(end);
            if self.lines.first().is_some_and(|l| l.name == SENTINEL_FUNCTION) {
                self.invalid = true;
            }
            if outcome == AddOutcome::ClosedReplay {
                self.partial = true;
            }
            return outcome;
        }
        AddOutcome::Open
    }

    /// Drop everything but the first record and give up on this graph
    pub fn invalidate(&mut self, time: f64) {
        self.lines.truncate(1);
        self.invalid = true;
        if self.depth < 0 {
            warn!(
                "Data misalignment for task {} (buffer overflow), ignoring this callback",
                self.tid
            );
        } else {
            warn!(
                "Too much data for task {} ({:.6} - {:.6}), ignoring this callback",
                self.tid,
                self.start.unwrap_or(time),
                time
            );
        }
    }

    /// Close a graph that ran out of records: returns from the deepest open
    /// call down to depth 0, all at the last known timestamp
    pub fn repair(&mut self, open_calls: i64, limits: &GraphLimits) -> bool {
        let Some(last_time) = self.lines.last().map(|l| l.time) else {
            return false;
        };
        for depth in (0..open_calls).rev() {
            let ret = GraphLine::new(last_time, to_depth(depth), "", LineShape::Return);
            if self.add_line(ret, limits) != AddOutcome::Open {
                self.end = Some(last_time);
                self.partial = true;
                return true;
            }
        }
        false
    }

    /// Finalize: clip leaves, give every call its length from the matching
    /// return, repair an unterminated tree. `false` rejects the whole graph.
    pub fn post_process(&mut self, limits: &GraphLimits) -> bool {
        let accepted = match self.reconcile() {
            Some(0) => true,
            Some(open) if open > 0 => self.repair(open, limits) && self.reconcile() == Some(0),
            _ => false,
        };
        if let Some(first) = self.lines.first() {
            self.name.clone_from(&first.name);
        }
        accepted
    }

    /// One linear pass pairing returns with calls by depth. Returns the number
    /// of calls left open, or `None` if a return had no call to match.
    fn reconcile(&mut self) -> Option<i64> {
        let mut stack: HashMap<u32, usize> = HashMap::new();
        let mut open = 0i64;
        for i in 0..self.lines.len() {
            // Reported leaf durations are unreliable; clip at the next record
            if i > 0 && self.lines[i - 1].shape == LineShape::Leaf {
                let gap = (self.lines[i].time - self.lines[i - 1].time).max(0.0);
                if self.lines[i - 1].length > gap {
                    self.lines[i - 1].length = gap;
                }
            }
            let depth = self.lines[i].depth;
            match self.lines[i].shape {
                LineShape::Call => {
                    stack.insert(depth, i);
                    open += 1;
                }
                LineShape::Return => {
                    let Some(call) = stack.remove(&depth) else {
                        debug!(
                            "post process for {}: return at depth {depth} has no call",
                            self.tid
                        );
                        return None;
                    };
                    let time = self.lines[i].time;
                    self.lines[call].length = time - self.lines[call].time;
                    if self.lines[call].name == SENTINEL_FUNCTION && !self.lines[i].name.is_empty() {
                        let name = self.lines[i].name.clone();
                        self.lines[call].name = name;
                    }
                    self.lines[i].length = 0.0;
                    open -= 1;
                }
                LineShape::Leaf => {}
            }
        }
        Some(open)
    }

    /// Extract the first complete subtree recorded inside `[start, end]`,
    /// rebased to depth 0. The slice lies within the window.
    #[must_use]
    pub fn slice(&self, start: f64, end: f64, limits: &GraphLimits) -> Option<CallGraph> {
        let mut window = self
            .lines
            .iter()
            .filter(|l| l.time >= start && l.time <= end)
            .skip_while(|l| l.shape == LineShape::Return)
            .peekable();
        let base = window.peek()?.depth;

        let mut mini = CallGraph::new(self.tid);
        for line in window {
            if line.depth < base {
                break;
            }
            let mut line = line.clone();
            line.depth -= base;
            if mini.add_line(line, limits) != AddOutcome::Open {
                break;
            }
        }
        if mini.lines.is_empty() || mini.invalid || !mini.post_process(limits) || mini.invalid {
            return None;
        }
        mini.start = mini.start.map(|s| s.max(start));
        mini.end = mini.end.map(|e| e.min(end));
        Some(mini)
    }
}
