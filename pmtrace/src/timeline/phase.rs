//! # Phase Timeline
//!
//! The phases of one test run, kept in the order they began, plus the
//! actions each one owns. Canonical order only decides where a missing phase
//! is inserted.
//!
//! A phase normally appears once. When the kernel re-enters a phase (an
//! aborted suspend retried, hibernation powering off after the image thaw)
//! the second copy gets instance 2 and the display name `<name>2`, and sits
//! after everything that happened before it.
//!
//! ## Lifecycle
//!
//! ```text
//! set_phase(begin) ─▶ open ─▶ set_phase(end) ─▶ closed
//!        │                                         │
//!        └── next begin force-closes (warning) ────┘
//!
//! end of run: close_gaps ─▶ fill_missing_phases ─▶ fixup_initcalls
//! ```
//!
//! After [`PhaseTimeline::close_gaps`] every phase ends exactly where the next
//! one starts.

use log::{debug, warn};
use pmtrace_common::PhaseId;
use serde::Serialize;

use super::action::{ActionKind, DeviceAction};
use crate::domain::Tid;

/// Stable identity of a phase within one run
pub type PhaseKey = (PhaseId, u32);

/// s2idle wake-ups folded into a suspend_machine phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Waking {
    pub count: u32,
    /// Seconds spent awake between attempts
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Phase {
    pub id: PhaseId,
    pub instance: u32,
    pub name: String,
    pub start: f64,
    pub end: Option<f64>,
    /// Never seen in the trace; inserted with zero length
    pub missing: bool,
    pub actions: Vec<DeviceAction>,
    pub waking: Option<Waking>,
}

impl Phase {
    #[must_use]
    pub fn new(id: PhaseId, instance: u32, start: f64) -> Self {
        let name = if instance > 1 {
            format!("{}{instance}", id.name())
        } else {
            id.name().to_string()
        };
        Self {
            id,
            instance,
            name,
            start,
            end: None,
            missing: false,
            actions: Vec::new(),
            waking: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> PhaseKey {
        (self.id, self.instance)
    }

    /// End, or the start while the phase is still open
    #[must_use]
    pub fn end_or_start(&self) -> f64 {
        self.end.unwrap_or(self.start)
    }

    #[must_use]
    pub fn length(&self) -> f64 {
        self.end_or_start() - self.start
    }

    /// Seconds of `[start, end]` falling inside this phase
    #[must_use]
    pub fn overlap(&self, start: f64, end: f64) -> f64 {
        (end.min(self.end_or_start()) - start.max(self.start)).max(0.0)
    }

    #[must_use]
    pub fn find_action(&self, name: &str) -> Option<&DeviceAction> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// `name`, or `name[2]`, `name[3]`, ... if already taken
    fn unique_name(&self, name: &str) -> String {
        if self.find_action(name).is_none() {
            return name.to_string();
        }
        (2..)
            .map(|i| format!("{name}[{i}]"))
            .find(|candidate| self.find_action(candidate).is_none())
            .unwrap_or_else(|| name.to_string())
    }
}

#[derive(Debug, Default)]
pub struct PhaseTimeline {
    phases: Vec<Phase>,
    current: Option<PhaseKey>,
    /// Phases laid out together because an action crosses their boundary
    pub device_groups: Vec<Vec<PhaseKey>>,
}

impl PhaseTimeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phases_mut(&mut self) -> &mut [Phase] {
        &mut self.phases
    }

    #[must_use]
    pub fn into_phases(self) -> Vec<Phase> {
        self.phases
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// The phase opened by the last `begin` and not yet closed
    #[must_use]
    pub fn current(&self) -> Option<PhaseKey> {
        self.current
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    #[must_use]
    pub fn phase(&self, key: PhaseKey) -> Option<&Phase> {
        self.phases.iter().find(|p| p.key() == key)
    }

    pub fn phase_mut(&mut self, key: PhaseKey) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.key() == key)
    }

    /// Newest instance of `id`
    #[must_use]
    pub fn latest(&self, id: PhaseId) -> Option<PhaseKey> {
        self.phases.iter().rev().find(|p| p.id == id).map(Phase::key)
    }

    /// `depth`-th phase from the end (1 = last begun)
    #[must_use]
    pub fn last_phase(&self, depth: usize) -> Option<PhaseKey> {
        let idx = self.phases.len().checked_sub(depth)?;
        self.phases.get(idx).map(Phase::key)
    }

    fn position(&self, key: PhaseKey) -> Option<usize> {
        self.phases.iter().position(|p| p.key() == key)
    }

    /// Phase begun right after `key`
    #[must_use]
    pub fn next_phase(&self, key: PhaseKey) -> Option<&Phase> {
        self.phases.get(self.position(key)? + 1)
    }

    pub fn remove_phase(&mut self, key: PhaseKey) -> Option<Phase> {
        if self.current == Some(key) {
            self.current = None;
        }
        let idx = self.phases.iter().position(|p| p.key() == key)?;
        Some(self.phases.remove(idx))
    }

    /// Apply a phase boundary. A `begin` force-closes whatever is open and
    /// always creates a new phase instance. An `end` that does not match the
    /// open phase is ignored. Returns the phase the boundary applied to.
    pub fn set_phase(&mut self, id: PhaseId, time: f64, begin: bool) -> Option<PhaseKey> {
        if begin {
            if let Some(open) = self.current.take() {
                if open.0 != PhaseId::ResumeMachine {
                    warn!("phase {} failed to end", open.0);
                }
                if let Some(phase) = self.phase_mut(open) {
                    phase.end = Some(time);
                }
            }
            let instance = self.phases.iter().filter(|p| p.id == id).count() + 1;
            let phase = Phase::new(id, u32::try_from(instance).unwrap_or(u32::MAX), time);
            let key = phase.key();
            self.phases.push(phase);
            self.current = Some(key);
            return Some(key);
        }

        match self.current {
            Some(open) if open.0 == id => {
                if let Some(phase) = self.phase_mut(open) {
                    phase.end = Some(time);
                }
                self.current = None;
                Some(open)
            }
            Some(open) => {
                warn!("{id} ended instead of {}, ftrace corruption?", open.0);
                None
            }
            None => {
                warn!("{id} ended without a start, ftrace corruption?");
                None
            }
        }
    }

    /// Add `action` to phase `key` under a unique name; returns that name
    pub fn new_action(&mut self, key: PhaseKey, mut action: DeviceAction) -> Option<String> {
        let phase = self.phase_mut(key)?;
        action.name = phase.unique_name(&action.name);
        let name = action.name.clone();
        phase.actions.push(action);
        Some(name)
    }

    /// Place a span in the phase it overlaps most. A span outside every
    /// phase is pinned to the first phase if it starts before it, otherwise
    /// to the last. A span crossing phases merges their device groups.
    pub fn new_action_global(
        &mut self,
        name: &str,
        start: f64,
        end: f64,
        tid: Tid,
        kind: ActionKind,
    ) -> Option<(PhaseKey, String)> {
        let mut target = None;
        let mut best = 0.0;
        let mut touched = Vec::new();
        for phase in &self.phases {
            let overlap = phase.overlap(start, end);
            if overlap > 0.0 {
                touched.push(phase.key());
            }
            if overlap > best {
                best = overlap;
                target = Some(phase.key());
            }
        }
        let target = match target {
            Some(key) => key,
            None => {
                let first = self.phases.first()?;
                if start <= first.start {
                    first.key()
                } else {
                    self.phases.last()?.key()
                }
            }
        };

        let spans_phases = touched.len() > 1;
        if spans_phases {
            self.phase_overlap(&touched);
        }
        let mut action = DeviceAction::new(name, tid, start, kind);
        action.end = Some(end);
        action.spans_phases = spans_phases;
        let name = self.new_action(target, action)?;
        Some((target, name))
    }

    /// Action named `name` (or `name[N]`) in `key`, preferring one still open
    pub fn find_device(&mut self, key: PhaseKey, name: &str) -> Option<&mut DeviceAction> {
        let phase = self.phase_mut(key)?;
        let idx = phase
            .actions
            .iter()
            .rposition(|a| a.end.is_none() && a.answers_to(name))
            .or_else(|| phase.actions.iter().rposition(|a| a.answers_to(name)))?;
        phase.actions.get_mut(idx)
    }

    /// False if `tid` was inside one of its own finished device callbacks
    #[must_use]
    pub fn is_outside_device_calls(&self, tid: Tid, time: f64) -> bool {
        !self.actions().any(|a| {
            a.tid == tid && a.end.is_some_and(|end| time >= a.start && time < end)
        })
    }

    /// First non-machine phase still running at `start`
    #[must_use]
    pub fn source_phase(&self, start: f64) -> Option<PhaseKey> {
        self.phases
            .iter()
            .filter(|p| !p.id.is_machine())
            .find(|p| start <= p.end_or_start())
            .or_else(|| self.phases.iter().rev().find(|p| p.id == PhaseId::ResumeComplete))
            .or_else(|| self.phases.last())
            .map(Phase::key)
    }

    pub fn actions(&self) -> impl Iterator<Item = &DeviceAction> {
        self.phases.iter().flat_map(|p| p.actions.iter())
    }

    pub fn actions_mut(&mut self) -> impl Iterator<Item = &mut DeviceAction> {
        self.phases.iter_mut().flat_map(|p| p.actions.iter_mut())
    }

    /// Make phases contiguous: each phase ends where the next starts, and
    /// the last one ends at `run_end` if still open
    pub fn close_gaps(&mut self, run_end: f64) {
        for i in 1..self.phases.len() {
            let next_start = self.phases[i].start;
            self.phases[i - 1].end = Some(next_start);
        }
        if let Some(last) = self.phases.last_mut() {
            if last.end.is_none() {
                last.end = Some(run_end.max(last.start));
            }
        }
        self.current = None;
    }

    /// Insert a zero-length phase for every canonical phase never seen,
    /// right before the first phase that canonically follows it (or at the
    /// end). Returns the missing ids in canonical order.
    pub fn fill_missing_phases(&mut self, run_start: f64) -> Vec<PhaseId> {
        let mut missing = Vec::new();
        for id in PhaseId::ALL {
            if self.phases.iter().any(|p| p.id == id) {
                continue;
            }
            warn!("phase \"{id}\" is missing!");
            let (pos, at) = match self.phases.iter().position(|p| p.id > id) {
                Some(pos) => (pos, self.phases[pos].start),
                None => (
                    self.phases.len(),
                    self.phases.last().map_or(run_start, Phase::end_or_start),
                ),
            };
            let mut phase = Phase::new(id, 1, at);
            phase.end = Some(at);
            phase.missing = true;
            self.phases.insert(pos, phase);
            missing.push(id);
        }
        missing
    }

    /// Clip every action that never ended at the end of the first phase
    /// that finishes after it started (or `run_end`)
    pub fn fixup_initcalls(&mut self, run_end: f64) {
        let ends: Vec<f64> = self.phases.iter().filter_map(|p| p.end).collect();
        for phase in &mut self.phases {
            for action in &mut phase.actions {
                if action.end.is_some() {
                    continue;
                }
                let end = ends
                    .iter()
                    .copied()
                    .find(|end| *end > action.start)
                    .unwrap_or(run_end);
                action.end = Some(end.max(action.start));
                warn!("{} ({}): callback didn't return", action.name, phase.name);
            }
        }
    }

    /// Keep only actions whose name or driver contains one of `filters`
    pub fn device_filter(&mut self, filters: &[String]) {
        if filters.is_empty() {
            return;
        }
        for phase in &mut self.phases {
            let before = phase.actions.len();
            phase.actions.retain(|a| {
                filters
                    .iter()
                    .any(|f| a.name.contains(f.as_str()) || a.driver.contains(f.as_str()))
            });
            debug!(
                "device filter removed {} actions from {}",
                before - phase.actions.len(),
                phase.name
            );
        }
    }

    /// One layout group per phase
    pub fn init_device_groups(&mut self) {
        self.device_groups = self.phases.iter().map(|p| vec![p.key()]).collect();
    }

    /// Merge every group containing one of `keys` into a single group
    pub fn phase_overlap(&mut self, keys: &[PhaseKey]) {
        let mut merged: Vec<PhaseKey> = Vec::new();
        self.device_groups.retain(|group| {
            if !group.iter().any(|k| keys.contains(k)) {
                return true;
            }
            for key in group {
                if !merged.contains(key) {
                    merged.push(*key);
                }
            }
            false
        });
        if merged.is_empty() {
            return;
        }
        self.device_groups.push(merged);
        self.sort_device_groups();
    }

    /// Order keys within each group, and the groups, by when their phases began
    pub fn sort_device_groups(&mut self) {
        let order: Vec<PhaseKey> = self.phases.iter().map(Phase::key).collect();
        let rank = |key: &PhaseKey| order.iter().position(|k| k == key).unwrap_or(usize::MAX);
        for group in &mut self.device_groups {
            group.sort_by_key(rank);
        }
        self.device_groups
            .sort_by_key(|g| g.first().map_or(usize::MAX, |k| rank(k)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(bounds: &[(PhaseId, f64, f64)]) -> PhaseTimeline {
        let mut t = PhaseTimeline::new();
        for (id, start, end) in bounds {
            t.set_phase(*id, *start, true);
            t.set_phase(*id, *end, false);
        }
        t
    }

    fn device(name: &str, tid: u32, start: f64, end: Option<f64>) -> DeviceAction {
        let mut a = DeviceAction::new(name, Tid(tid), start, ActionKind::Device);
        a.end = end;
        a
    }

    #[test]
    fn test_begin_force_closes_open_phase() {
        let mut t = PhaseTimeline::new();
        t.set_phase(PhaseId::Suspend, 1.0, true);
        let key = t.set_phase(PhaseId::SuspendLate, 2.0, true);
        assert_eq!(key, Some((PhaseId::SuspendLate, 1)));
        assert_eq!(t.phase((PhaseId::Suspend, 1)).unwrap().end, Some(2.0));
        assert_eq!(t.current(), Some((PhaseId::SuspendLate, 1)));
    }

    #[test]
    fn test_mismatched_end_is_ignored() {
        let mut t = PhaseTimeline::new();
        t.set_phase(PhaseId::Suspend, 1.0, true);
        assert_eq!(t.set_phase(PhaseId::Resume, 2.0, false), None);
        assert_eq!(t.phase((PhaseId::Suspend, 1)).unwrap().end, None);
        assert_eq!(t.set_phase(PhaseId::Suspend, 3.0, false), Some((PhaseId::Suspend, 1)));
        assert_eq!(t.set_phase(PhaseId::Suspend, 4.0, false), None);
    }

    #[test]
    fn test_repeated_phase_gets_instance_name() {
        let t = timeline(&[(PhaseId::Suspend, 1.0, 2.0), (PhaseId::Suspend, 3.0, 4.0)]);
        let names: Vec<_> = t.phases().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["suspend", "suspend2"]);
    }

    #[test]
    fn test_phases_keep_order_of_appearance() {
        let t = timeline(&[(PhaseId::Suspend, 1.0, 2.0), (PhaseId::Resume, 5.0, 6.0)]);
        assert_eq!(t.phases()[0].id, PhaseId::Suspend);
        assert_eq!(t.last_phase(1), Some((PhaseId::Resume, 1)));
        assert_eq!(t.last_phase(2), Some((PhaseId::Suspend, 1)));
        assert_eq!(t.last_phase(3), None);
        assert_eq!(t.next_phase((PhaseId::Suspend, 1)).map(|p| p.id), Some(PhaseId::Resume));
        assert!(t.next_phase((PhaseId::Resume, 1)).is_none());
    }

    #[test]
    fn test_repeated_cycle_never_ends_before_start() {
        // hibernation: image frozen and thawed, then suspend again to power off
        let mut t = timeline(&[
            (PhaseId::Suspend, 1.0, 2.0),
            (PhaseId::Resume, 3.0, 4.0),
            (PhaseId::Suspend, 5.0, 6.0),
            (PhaseId::ResumeComplete, 7.0, 8.0),
        ]);
        t.close_gaps(9.0);
        let names: Vec<_> = t.phases().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["suspend", "resume", "suspend2", "resume_complete"]);
        for phase in t.phases() {
            assert!(phase.end.unwrap() >= phase.start, "{} ends before it starts", phase.name);
        }

        t.fill_missing_phases(1.0);
        for pair in t.phases().windows(2) {
            assert!(pair[0].start <= pair[1].start);
            assert_eq!(pair[0].end, Some(pair[1].start));
        }
    }

    #[test]
    fn test_device_groups_follow_phase_order() {
        let mut t = timeline(&[
            (PhaseId::Suspend, 1.0, 2.0),
            (PhaseId::Resume, 3.0, 4.0),
            (PhaseId::Suspend, 5.0, 6.0),
        ]);
        t.init_device_groups();
        t.phase_overlap(&[(PhaseId::Suspend, 2), (PhaseId::Resume, 1)]);
        assert_eq!(
            t.device_groups,
            vec![
                vec![(PhaseId::Suspend, 1)],
                vec![(PhaseId::Resume, 1), (PhaseId::Suspend, 2)],
            ]
        );
    }

    #[test]
    fn test_new_action_disambiguates_names() {
        let mut t = timeline(&[(PhaseId::Suspend, 1.0, 2.0)]);
        let key = (PhaseId::Suspend, 1);
        assert_eq!(t.new_action(key, device("i2c-0", 1, 1.1, None)).as_deref(), Some("i2c-0"));
        assert_eq!(t.new_action(key, device("i2c-0", 1, 1.2, None)).as_deref(), Some("i2c-0[2]"));
        assert_eq!(t.new_action(key, device("i2c-0", 1, 1.3, None)).as_deref(), Some("i2c-0[3]"));
    }

    #[test]
    fn test_find_device_prefers_open_action() {
        let mut t = timeline(&[(PhaseId::Suspend, 1.0, 2.0)]);
        let key = (PhaseId::Suspend, 1);
        t.new_action(key, device("i2c-0", 1, 1.1, None));
        t.new_action(key, device("i2c-0", 1, 1.2, Some(1.3)));
        let found = t.find_device(key, "i2c-0").unwrap();
        assert_eq!(found.name, "i2c-0");
    }

    #[test]
    fn test_global_action_goes_to_max_overlap_and_merges_groups() {
        let mut t = timeline(&[
            (PhaseId::SuspendPrepare, 0.0, 1.0),
            (PhaseId::Suspend, 1.0, 3.0),
            (PhaseId::SuspendLate, 3.0, 4.0),
        ]);
        t.init_device_groups();
        let (key, name) = t
            .new_action_global("sync_filesystems", 0.5, 2.0, Tid(1), ActionKind::Global)
            .unwrap();
        assert_eq!(key, (PhaseId::Suspend, 1));
        assert_eq!(name, "sync_filesystems");
        assert!(t.phase(key).unwrap().actions[0].spans_phases);
        assert_eq!(
            t.device_groups,
            vec![
                vec![(PhaseId::SuspendPrepare, 1), (PhaseId::Suspend, 1)],
                vec![(PhaseId::SuspendLate, 1)],
            ]
        );
    }

    #[test]
    fn test_global_action_outside_phases_is_pinned() {
        let mut t = timeline(&[(PhaseId::Suspend, 1.0, 2.0), (PhaseId::Resume, 3.0, 4.0)]);
        let (before, _) = t
            .new_action_global("early", 0.1, 0.2, Tid(1), ActionKind::Global)
            .unwrap();
        let (after, _) = t
            .new_action_global("late", 5.0, 6.0, Tid(1), ActionKind::Global)
            .unwrap();
        assert_eq!(before, (PhaseId::Suspend, 1));
        assert_eq!(after, (PhaseId::Resume, 1));
    }

    #[test]
    fn test_close_gaps_makes_phases_contiguous() {
        let mut t = timeline(&[
            (PhaseId::Suspend, 1.0, 1.5),
            (PhaseId::SuspendLate, 2.0, 2.5),
            (PhaseId::Resume, 3.0, 3.5),
        ]);
        t.set_phase(PhaseId::ResumeComplete, 4.0, true);
        t.close_gaps(5.0);
        let phases = t.phases();
        for pair in phases.windows(2) {
            assert_eq!(pair[0].end, Some(pair[1].start));
        }
        assert_eq!(phases.last().unwrap().end, Some(5.0));
    }

    #[test]
    fn test_missing_phases_are_zero_length_and_contiguous() {
        let mut t = timeline(&[
            (PhaseId::SuspendPrepare, 1.0, 2.0),
            (PhaseId::Suspend, 2.0, 3.0),
        ]);
        t.close_gaps(3.0);
        let missing = t.fill_missing_phases(1.0);
        assert_eq!(missing.first(), Some(&PhaseId::SuspendLate));
        assert_eq!(missing.len(), 8);
        assert_eq!(t.phases().len(), 10);
        for pair in t.phases().windows(2) {
            assert_eq!(pair[0].end, Some(pair[1].start));
        }
        assert!(t.phases()[9].missing);
    }

    #[test]
    fn test_unterminated_action_clipped_to_following_phase_end() {
        let mut t = timeline(&[
            (PhaseId::Suspend, 1.0, 2.0),
            (PhaseId::SuspendLate, 2.0, 3.0),
        ]);
        let key = (PhaseId::SuspendLate, 1);
        t.new_action(key, device("hung", 4, 2.5, None));
        t.new_action(key, device("late", 4, 9.0, None));
        t.fixup_initcalls(10.0);
        let phase = t.phase(key).unwrap();
        assert_eq!(phase.actions[0].end, Some(3.0));
        assert_eq!(phase.actions[1].end, Some(10.0));
        assert!(phase.actions.iter().all(|a| a.end.unwrap() >= a.start));
    }

    #[test]
    fn test_outside_device_calls() {
        let mut t = timeline(&[(PhaseId::Suspend, 1.0, 2.0)]);
        t.new_action((PhaseId::Suspend, 1), device("dev", 7, 1.1, Some(1.2)));
        assert!(!t.is_outside_device_calls(Tid(7), 1.15));
        assert!(t.is_outside_device_calls(Tid(8), 1.15));
        assert!(t.is_outside_device_calls(Tid(7), 1.2));
    }

    #[test]
    fn test_device_filter_matches_name_or_driver() {
        let mut t = timeline(&[(PhaseId::Suspend, 1.0, 2.0)]);
        let key = (PhaseId::Suspend, 1);
        let mut usb = device("1-1", 1, 1.1, Some(1.2));
        usb.driver = "usb".to_string();
        t.new_action(key, usb);
        t.new_action(key, device("i2c-0", 1, 1.3, Some(1.4)));
        t.new_action(key, device("sda", 1, 1.5, Some(1.6)));
        t.device_filter(&["usb".to_string(), "i2c".to_string()]);
        let names: Vec<_> = t.actions().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["1-1", "i2c-0"]);
    }
}
