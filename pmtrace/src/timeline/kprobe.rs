//! # Kprobe Pairing and Placement
//!
//! Kprobe entry and exit records are paired per `(probe, thread)`. At the end
//! of a run the closed pairs become timeline content:
//!
//! - probes in `trace_funcs` become global actions
//! - probes in `dev_trace_funcs` become [`SubCall`] annotations on the device
//!   callback that contains them, or on a per-thread action
//!   (`<proc>-<tid>`, `kthread-<tid>`) that grows to cover them
//!
//! Argument text of an entry looks like `(caller+0x1c/0x40) time=10`; an exit
//! looks like `(caller+0x1c/0x40 <- msleep) arg1=0x0`.

use log::debug;
use std::collections::{BTreeMap, HashSet};

use super::action::{ActionKind, DeviceAction, SubCall};
use super::phase::PhaseTimeline;
use crate::config::AnalyzerConfig;
use crate::domain::Tid;
use crate::parser::TraceRecord;

/// Spans shorter than this (seconds) are not placed
const MIN_SPAN: f64 = 0.000_001;

/// Return values longer than this are not shown
const MAX_RET_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct KprobeSpan {
    pub probe: String,
    pub display: String,
    pub tid: Tid,
    pub process: String,
    pub begin: f64,
    pub end: Option<f64>,
    pub call_data: String,
    pub return_data: String,
}

#[derive(Debug, Default)]
pub struct KprobeTracker {
    spans: BTreeMap<(String, Tid), Vec<KprobeSpan>>,
    /// Any kprobe record seen in this run
    pub seen: bool,
}

impl KprobeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a span for a `_cal` record. Returns `false` if the probe renders
    /// to an empty display name and was skipped.
    pub fn enter(&mut self, record: &TraceRecord, config: &AnalyzerConfig) -> bool {
        self.seen = true;
        let display = config.kprobe_display_name(&record.event_type, &record.name);
        if display.is_empty() {
            return false;
        }
        self.spans
            .entry((record.event_type.clone(), record.tid))
            .or_default()
            .push(KprobeSpan {
                probe: record.event_type.clone(),
                display,
                tid: record.tid,
                process: record.process.clone(),
                begin: record.timestamp,
                end: None,
                call_data: record.name.clone(),
                return_data: String::new(),
            });
        true
    }

    /// Close the newest open span for a `_ret` record. Pairs shorter than
    /// `min_device_ms` are discarded. Returns the closed span.
    pub fn exit(&mut self, record: &TraceRecord, config: &AnalyzerConfig) -> Option<&KprobeSpan> {
        self.seen = true;
        let list = self
            .spans
            .get_mut(&(record.event_type.clone(), record.tid))?;
        let idx = list.iter().rposition(|s| s.end.is_none())?;
        if (record.timestamp - list[idx].begin) * 1000.0 < config.min_device_ms {
            list.remove(idx);
            return None;
        }
        let span = &mut list[idx];
        span.end = Some(record.timestamp);
        span.return_data.clone_from(&record.name);
        Some(span)
    }

    /// Closed spans, ordered by `(probe, tid)` then begin time
    #[must_use]
    pub fn into_spans(self) -> Vec<KprobeSpan> {
        self.spans
            .into_values()
            .flatten()
            .filter(|s| s.end.is_some())
            .collect()
    }
}

/// Put closed kprobe spans on the timeline. `device_tids` holds every thread
/// that ran a device callback; it is extended with the `trace_funcs` threads.
pub fn place_kprobes(
    spans: &[KprobeSpan],
    timeline: &mut PhaseTimeline,
    config: &AnalyzerConfig,
    run: (f64, f64),
    device_tids: &mut HashSet<Tid>,
) {
    let (run_start, run_end) = run;
    let in_run = |s: &KprobeSpan, end: f64| {
        end - s.begin >= MIN_SPAN && s.begin >= run_start && s.begin < run_end
    };

    for span in spans.iter().filter(|s| config.is_trace_func(&s.probe)) {
        device_tids.insert(span.tid);
        let Some(end) = span.end else { continue };
        if in_run(span, end) {
            timeline.new_action_global(&span.display, span.begin, end, span.tid, ActionKind::Global);
        }
    }

    for span in spans
        .iter()
        .filter(|s| !config.is_trace_func(&s.probe) && config.is_dev_trace_func(&s.probe))
    {
        let Some(end) = span.end else { continue };
        if in_run(span, end) && !add_device_function_call(timeline, span, end, config, device_tids) {
            debug!(
                "dropped {} call on {} at {:.6}",
                span.probe, span.tid, span.begin
            );
        }
    }
}

/// Attach one dev-trace kprobe span as a sub-call
fn add_device_function_call(
    timeline: &mut PhaseTimeline,
    span: &KprobeSpan,
    end: f64,
    config: &AnalyzerConfig,
    device_tids: &HashSet<Tid>,
) -> bool {
    let Some(args) = call_args(&span.call_data) else {
        return false;
    };
    let Some((caller, ret)) = return_caller(&span.return_data) else {
        return false;
    };
    let ubiquitous = config.is_ubiquitous(&span.probe);
    if ubiquitous && config.is_ubiquitous(caller) {
        return false;
    }

    let target = match find_device_window(timeline, span.tid, span.begin, end) {
        Some(found) => found,
        // Device threads outside their callbacks are not tracked
        None if device_tids.contains(&span.tid) => return false,
        None => match grow_thread_action(timeline, span.tid, span.begin, end) {
            Some(found) => found,
            None => {
                let Some(key) = timeline.source_phase(span.begin) else {
                    return false;
                };
                let name = if span.process == "<...>" {
                    format!("kthread-{}", span.tid.0)
                } else {
                    format!("{}-{}", span.process, span.tid.0)
                };
                let mut action = DeviceAction::new(&name, span.tid, span.begin, ActionKind::Thread);
                action.end = Some(end);
                if timeline.new_action(key, action).is_none() {
                    return false;
                }
                match find_device_window(timeline, span.tid, span.begin, end) {
                    Some(found) => found,
                    None => return false,
                }
            }
        },
    };

    let (phase_idx, action_idx) = target;
    let Some(action) = timeline
        .phases_mut()
        .get_mut(phase_idx)
        .and_then(|p| p.actions.get_mut(action_idx))
    else {
        return false;
    };
    action.sub_calls.push(SubCall {
        name: span.display.clone(),
        args: args.to_string(),
        caller: caller.to_string(),
        ret: (ret.len() <= MAX_RET_LEN).then(|| ret.to_string()),
        start: span.begin,
        end,
        count: 1,
        ubiquitous,
        process: span.process.clone(),
        tid: span.tid,
        row: 0,
    });
    true
}

/// Action of `tid` fully containing `[start, end]`
fn find_device_window(timeline: &PhaseTimeline, tid: Tid, start: f64, end: f64) -> Option<(usize, usize)> {
    timeline.phases().iter().enumerate().find_map(|(pi, phase)| {
        phase
            .actions
            .iter()
            .position(|a| {
                a.tid == tid
                    && a.end.is_some_and(|e| start >= a.start && start < e && end > a.start && end <= e)
            })
            .map(|ai| (pi, ai))
    })
}

/// Existing thread action of `tid`, stretched to cover `[start, end]`
fn grow_thread_action(timeline: &mut PhaseTimeline, tid: Tid, start: f64, end: f64) -> Option<(usize, usize)> {
    for (pi, phase) in timeline.phases_mut().iter_mut().enumerate() {
        if let Some(ai) = phase
            .actions
            .iter()
            .position(|a| a.tid == tid && a.kind == ActionKind::Thread)
        {
            let action = &mut phase.actions[ai];
            action.start = action.start.min(start);
            action.end = Some(action.end.map_or(end, |e| e.max(end)));
            return Some((pi, ai));
        }
    }
    None
}

/// `(caller+0x1c/0x40) time=10` -> `time=10`
fn call_args(data: &str) -> Option<&str> {
    if !data.starts_with('(') {
        return None;
    }
    let close = data.rfind(')')?;
    Some(data[close + 1..].trim())
}

/// `(i2c_dw_xfer+0x1c/0x40 <- msleep) arg1=0x0` -> (`i2c_dw_xfer`, `0x0`)
fn return_caller(data: &str) -> Option<(&str, &str)> {
    let inner = data.strip_prefix('(')?;
    let caller = inner.split_whitespace().next()?;
    let caller = caller.split('+').next().unwrap_or(caller).trim_end_matches(')');
    let (_, ret) = inner.rsplit_once(" arg1=")?;
    Some((caller, ret.trim()))
}
