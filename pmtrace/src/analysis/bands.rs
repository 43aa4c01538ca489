//! Phase bands: row layout of every device group
//!
//! A band is one or more phases laid out together (phases are merged when a
//! global action crosses their boundary). Actions of the band are packed
//! into rows with [`layout`]; inside each action the sub-calls get their own
//! rows, and a band row is as tall as its tallest action.

use serde::Serialize;

use super::row_layout::{layout, Interval};
use crate::timeline::{ActionKind, DeviceAction, PhaseKey, PhaseTimeline, SubCall};

impl Interval for DeviceAction {
    fn start(&self) -> f64 {
        self.start
    }
    fn end(&self) -> f64 {
        self.end.unwrap_or(self.start)
    }
    fn label(&self) -> &str {
        &self.name
    }
    fn priority(&self) -> bool {
        self.kind == ActionKind::CallGraph
    }
}

impl Interval for SubCall {
    fn start(&self) -> f64 {
        self.start
    }
    fn end(&self) -> f64 {
        self.end
    }
    fn label(&self) -> &str {
        &self.name
    }
}

/// Layout result for one device group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseBand {
    /// Phase names in canonical order
    pub phases: Vec<String>,
    pub row_count: usize,
    /// Lines taken by each row (its tallest sub-call stack)
    pub row_lines: Vec<usize>,
    /// Every row is a single line
    pub uniform: bool,
}

impl PhaseBand {
    #[must_use]
    pub fn total_lines(&self) -> usize {
        self.row_lines.iter().sum()
    }
}

/// Assign rows to all actions and sub-calls of `timeline`, one band per
/// device group
pub fn compute_bands(timeline: &mut PhaseTimeline) -> Vec<PhaseBand> {
    if timeline.device_groups.is_empty() {
        timeline.init_device_groups();
    }

    for action in timeline.actions_mut() {
        let sub_rows = layout(&action.sub_calls);
        for (call, row) in action.sub_calls.iter_mut().zip(&sub_rows.rows) {
            call.row = *row;
        }
        action.sub_call_rows = sub_rows.row_count.max(1);
    }

    let groups = timeline.device_groups.clone();
    groups
        .iter()
        .map(|group| layout_group(timeline, group))
        .collect()
}

fn layout_group(timeline: &mut PhaseTimeline, group: &[PhaseKey]) -> PhaseBand {
    let placement = {
        let members: Vec<&DeviceAction> = timeline
            .phases()
            .iter()
            .filter(|p| group.contains(&p.key()))
            .flat_map(|p| p.actions.iter())
            .collect();
        layout(&members)
    };

    let mut row_lines = vec![1; placement.row_count];
    let mut phases = Vec::new();
    let mut rows = placement.rows.iter();
    for phase in timeline
        .phases_mut()
        .iter_mut()
        .filter(|p| group.contains(&p.key()))
    {
        phases.push(phase.name.clone());
        for action in &mut phase.actions {
            let Some(row) = rows.next() else { break };
            action.row = *row;
            row_lines[*row] = row_lines[*row].max(action.sub_call_rows);
        }
    }

    let uniform = row_lines.iter().sum::<usize>() == placement.row_count;
    PhaseBand {
        phases,
        row_count: placement.row_count,
        row_lines,
        uniform,
    }
}
