//! Matching finalized call graphs to the timeline
//!
//! Each graph is tried against, in order:
//!
//! 1. an action of the same thread whose span contains the whole graph
//! 2. actions of the same thread lying inside the graph; the graph is sliced
//!    to each action's window (the callback event fires inside
//!    `dpm_run_callback`, so the graph usually starts first)
//! 3. promotion to a standalone action when the root function is one of the
//!    configured trace functions
//!
//! Anything left is dropped.

use log::{info, warn};
use pmtrace_common::DEVICE_CALLBACK_ROOTS;
use serde::Serialize;

use super::graph::{CallGraph, GraphLimits};
use crate::config::AnalyzerConfig;
use crate::domain::millis;
use crate::timeline::{ActionKind, PhaseTimeline};

/// What happened to the graphs of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttachStats {
    pub attached: usize,
    pub sliced: usize,
    pub promoted: usize,
    pub discarded: usize,
}

pub fn attach_graphs(
    graphs: Vec<CallGraph>,
    timeline: &mut PhaseTimeline,
    config: &AnalyzerConfig,
    limits: &GraphLimits,
    run: (f64, f64),
) -> AttachStats {
    let mut stats = AttachStats::default();
    for graph in graphs {
        let Some((start, end)) = graph.span() else {
            stats.discarded += 1;
            continue;
        };

        if let Some(action) = timeline.actions_mut().find(|a| {
            a.tid == graph.tid && a.call_graph.is_none() && a.contains_span(start, end)
        }) {
            action.call_graph = Some(graph);
            stats.attached += 1;
            continue;
        }

        let mut sliced = 0;
        for action in timeline.actions_mut().filter(|a| {
            a.tid == graph.tid
                && a.call_graph.is_none()
                && a.end.is_some_and(|e| start <= a.start && e <= end)
        }) {
            let Some(window_end) = action.end else { continue };
            if let Some(slice) = graph.slice(action.start, window_end, limits) {
                action.call_graph = Some(slice);
                sliced += 1;
            }
        }
        if sliced > 0 {
            stats.sliced += sliced;
            continue;
        }

        if promote(&graph, config, run) {
            let name = graph.name.clone();
            info!(
                "Callgraph found for {}: {:.3}ms, {name}",
                graph.tid,
                millis(end - start)
            );
            if let Some((key, action_name)) =
                timeline.new_action_global(&name, start, end, graph.tid, ActionKind::CallGraph)
            {
                if let Some(action) = timeline
                    .phase_mut(key)
                    .and_then(|p| p.actions.iter_mut().find(|a| a.name == action_name))
                {
                    action.call_graph = Some(graph);
                    stats.promoted += 1;
                    continue;
                }
            }
        }

        if graph.lines.len() > config.suspicious_graph_records {
            warn!(
                "discarded call graph for {} has {} records, trace buffer may have overflowed",
                graph.tid,
                graph.lines.len()
            );
        }
        stats.discarded += 1;
    }
    stats
}

/// Root is a configured trace function, not a device callback wrapper, and
/// the graph lies within the run
fn promote(graph: &CallGraph, config: &AnalyzerConfig, run: (f64, f64)) -> bool {
    let Some((start, end)) = graph.span() else {
        return false;
    };
    config.is_trace_func(&graph.name)
        && !DEVICE_CALLBACK_ROOTS.contains(&graph.name.as_str())
        && start >= run.0
        && end <= run.1
}
