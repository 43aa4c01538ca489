// Trace seconds become microseconds for the viewer
#![allow(clippy::cast_precision_loss)]

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use crate::callgraph::LineShape;
use crate::domain::ExportError;
use crate::timeline::DeviceAction;
use crate::trace_data::{TestRun, TraceData};

/// Thread id used for the phase track of every run
const PHASE_TRACK: u32 = 0;

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize)]
struct ChromeTraceEvent {
    /// Phase, device or function name
    name: String,
    /// Category for filtering/coloring
    cat: String,
    /// Phase: "X" = complete, "M" = metadata
    ph: String,
    /// Timestamp in microseconds since the run started
    ts: f64,
    /// Duration in microseconds (complete events only)
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    /// One process per run
    pid: u32,
    tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

/// Chrome trace exporter for timeline visualization
#[derive(Debug, Default)]
pub struct ChromeTraceExporter {
    events: Vec<ChromeTraceEvent>,
    /// (pid, tid) -> track name
    threads: BTreeMap<(u32, u32), String>,
    /// pid -> process name
    processes: BTreeMap<u32, String>,
}

impl ChromeTraceExporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every complete run of `data`
    #[must_use]
    pub fn from_trace(data: &TraceData) -> Self {
        let mut exporter = Self::new();
        for run in data.complete_runs() {
            exporter.add_run(run);
        }
        exporter
    }

    /// Add one run: its phases, actions, call graphs and sub-calls
    pub fn add_run(&mut self, run: &TestRun) {
        let pid = u32::try_from(run.index + 1).unwrap_or(u32::MAX);
        let base = run.start;
        let name = match &run.failure {
            Some(failure) => format!("run {} ({}, {failure})", run.index, run.metadata.mode),
            None => format!("run {} ({})", run.index, run.metadata.mode),
        };
        self.processes.insert(pid, name);
        self.threads.insert((pid, PHASE_TRACK), "phases".to_string());

        for phase in &run.phases {
            let mut args = HashMap::new();
            if phase.missing {
                args.insert("missing".to_string(), serde_json::json!(true));
            }
            if let Some(waking) = phase.waking {
                args.insert("wakes".to_string(), serde_json::json!(waking.count));
            }
            self.complete(
                &phase.name,
                "phase",
                (phase.start - base, phase.length()),
                (pid, PHASE_TRACK),
                (!args.is_empty()).then_some(args),
            );

            for action in &phase.actions {
                self.add_action(action, &phase.name, base, pid);
            }
        }
    }

    fn add_action(&mut self, action: &DeviceAction, phase: &str, base: f64, pid: u32) {
        let tid = action.tid.0;
        self.threads
            .entry((pid, tid))
            .or_insert_with(|| format!("tid {tid}"));

        let mut args = HashMap::new();
        args.insert("phase".to_string(), serde_json::json!(phase));
        if !action.driver.is_empty() {
            args.insert("driver".to_string(), serde_json::json!(action.driver));
        }
        if !action.parent.is_empty() {
            args.insert("parent".to_string(), serde_json::json!(action.parent));
        }
        if let Some(code) = action.error_code {
            args.insert("error".to_string(), serde_json::json!(code));
        }
        args.insert("row".to_string(), serde_json::json!(action.row));
        let category = serde_json::to_value(action.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        self.complete(
            &action.name,
            &category,
            (action.start - base, action.length()),
            (pid, tid),
            Some(args),
        );

        if let Some(graph) = &action.call_graph {
            for line in graph.lines.iter().filter(|l| l.shape != LineShape::Return) {
                self.complete(
                    &line.name,
                    "callgraph",
                    (line.time - base, line.length),
                    (pid, tid),
                    None,
                );
            }
        }

        for call in &action.sub_calls {
            let mut args = HashMap::new();
            args.insert("title".to_string(), serde_json::json!(call.title()));
            if call.count > 1 {
                args.insert("count".to_string(), serde_json::json!(call.count));
            }
            self.complete(
                &call.name,
                "subcall",
                (call.start - base, call.length()),
                (pid, tid),
                Some(args),
            );
        }
    }

    /// Push an "X" event; `span` is (offset, length) in seconds
    fn complete(
        &mut self,
        name: &str,
        category: &str,
        span: (f64, f64),
        owner: (u32, u32),
        args: Option<HashMap<String, JsonValue>>,
    ) {
        self.events.push(ChromeTraceEvent {
            name: name.to_string(),
            cat: category.to_string(),
            ph: "X".to_string(),
            ts: span.0 * 1_000_000.0,
            dur: Some(span.1.max(0.0) * 1_000_000.0),
            pid: owner.0,
            tid: owner.1,
            args,
        });
    }

    fn metadata_event(name: &str, pid: u32, tid: u32, value: &str) -> ChromeTraceEvent {
        let mut args = HashMap::new();
        args.insert("name".to_string(), serde_json::json!(value));
        ChromeTraceEvent {
            name: name.to_string(),
            cat: String::new(),
            ph: "M".to_string(),
            ts: 0.0,
            dur: None,
            pid,
            tid,
            args: Some(args),
        }
    }

    /// Export the trace to any writer (file, stdout, buffer, etc.)
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let mut all_events = self.events.clone();
        for (pid, name) in &self.processes {
            all_events.push(Self::metadata_event("process_name", *pid, PHASE_TRACK, name));
        }
        for ((pid, tid), name) in &self.threads {
            all_events.push(Self::metadata_event("thread_name", *pid, *tid, name));
        }

        let trace = ChromeTrace {
            trace_events: all_events,
            display_time_unit: "ms".to_string(),
        };
        serde_json::to_writer_pretty(writer, &trace)?;
        Ok(())
    }

    /// Get the number of events collected
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}
