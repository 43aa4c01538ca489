//! Device actions and the sub-call annotations hung off them

use serde::Serialize;

use crate::callgraph::CallGraph;
use crate::domain::{millis, Tid};

/// Where an action came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// `device_pm_callback_start` / `_end`
    Device,
    /// Trace event or kprobe span placed by phase overlap
    Global,
    /// Per-thread bucket for kprobe sub-calls (`<proc>-<tid>`)
    Thread,
    /// Promoted from an unattached call graph
    CallGraph,
}

/// One timed span inside a phase
#[derive(Debug, Clone, Serialize)]
pub struct DeviceAction {
    /// Unique within its phase (`name`, `name[2]`, ...)
    pub name: String,
    pub driver: String,
    pub start: f64,
    /// `None` until the end event arrives (or fixup clips it)
    pub end: Option<f64>,
    pub tid: Tid,
    pub parent: String,
    pub error_code: Option<i32>,
    pub kind: ActionKind,
    /// Overlaps more than one phase; the layout merges those phases
    pub spans_phases: bool,
    pub call_graph: Option<CallGraph>,
    pub sub_calls: Vec<SubCall>,
    /// Row within the phase band, set by layout
    pub row: usize,
    /// Rows taken by the sub-calls (at least 1)
    pub sub_call_rows: usize,
}

impl DeviceAction {
    #[must_use]
    pub fn new(name: &str, tid: Tid, start: f64, kind: ActionKind) -> Self {
        Self {
            name: name.to_string(),
            driver: String::new(),
            start,
            end: None,
            tid,
            parent: String::new(),
            error_code: None,
            kind,
            spans_phases: false,
            call_graph: None,
            sub_calls: Vec::new(),
            row: 0,
            sub_call_rows: 1,
        }
    }

    /// Length in seconds; zero while unterminated
    #[must_use]
    pub fn length(&self) -> f64 {
        self.end.map_or(0.0, |end| end - self.start)
    }

    #[must_use]
    pub fn length_ms(&self) -> f64 {
        millis(self.length())
    }

    /// `[start, end)` with an open end treated as unbounded
    #[must_use]
    pub fn covers(&self, time: f64) -> bool {
        time >= self.start && self.end.map_or(true, |end| time < end)
    }

    /// True if `[start, end]` lies fully inside this action
    #[must_use]
    pub fn contains_span(&self, start: f64, end: f64) -> bool {
        self.end
            .is_some_and(|e| self.start <= start && end <= e)
    }

    /// `name` itself or a disambiguated `name[N]`
    #[must_use]
    pub fn answers_to(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }
        self.name
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix('['))
            .and_then(|rest| rest.strip_suffix(']'))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }
}

/// A short kernel function call (kprobe pair) inside an action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubCall {
    pub name: String,
    pub args: String,
    pub caller: String,
    /// Return value when short enough to be meaningful
    pub ret: Option<String>,
    pub start: f64,
    pub end: f64,
    /// Loop iterations merged into this entry
    pub count: u32,
    pub ubiquitous: bool,
    pub process: String,
    pub tid: Tid,
    pub row: usize,
}

impl SubCall {
    #[must_use]
    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    /// Another iteration of `prev` in a tight loop: every attribute matches,
    /// it starts at most `max_gap` after `prev` ends, and is shorter than
    /// `max_len`
    #[must_use]
    pub fn repeats(&self, prev: &SubCall, max_gap: f64, max_len: f64) -> bool {
        let gap = self.start - prev.end;
        prev.caller == self.caller
            && prev.name == self.name
            && prev.args == self.args
            && prev.process == self.process
            && prev.tid == self.tid
            && prev.ret == self.ret
            && (0.0..=max_gap).contains(&gap)
            && self.length() < max_len
    }

    /// Hover text, e.g. `msleep(time=10) ret=0x0 (x3)(10.120ms)`
    #[must_use]
    pub fn title(&self) -> String {
        let count = if self.count > 1 {
            format!("(x{})", self.count)
        } else {
            String::new()
        };
        let ret = self
            .ret
            .as_ref()
            .map(|r| format!("ret={r} "))
            .unwrap_or_default();
        let length = format!("{:.3}ms", millis(self.length()));
        let title = if self.ubiquitous {
            format!("{}({}){count} <- {}, {ret}({length})", self.name, self.args, self.caller)
        } else {
            format!("{}({}) {ret}{count}({length})", self.name, self.args)
        };
        title.replace('"', "")
    }
}

/// Merge consecutive iterations of the same call into one entry with a count
pub fn collapse_loops(calls: &mut Vec<SubCall>, max_gap: f64, max_len: f64) {
    calls.sort_by(|a, b| a.start.total_cmp(&b.start));
    let mut merged: Vec<SubCall> = Vec::with_capacity(calls.len());
    for call in calls.drain(..) {
        match merged.last_mut() {
            Some(prev) if call.repeats(prev, max_gap, max_len) => {
                prev.end = call.end;
                prev.count += 1;
            }
            _ => merged.push(call),
        }
    }
    *calls = merged;
}
