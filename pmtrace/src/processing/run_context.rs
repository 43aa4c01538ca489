//! # Run Context
//!
//! All mutable state of one test run, from its start marker to its end
//! marker. A fresh context is created per run, so nothing leaks from one run
//! into the next.
//!
//! ## Record Flow
//!
//! ```text
//! call/return/leaf ─▶ CallGraphBuilder
//! kprobe _cal/_ret ─▶ KprobeTracker
//! routed events    ─▶ PhaseTimeline (phases, device actions)
//!                  └▶ pending global spans
//! ```
//!
//! ## End of Run
//!
//! [`RunContext::finish`] turns the context into a [`TestRun`]:
//!
//! 1. end-marker fixups, gap closing, unterminated callbacks clipped
//! 2. global spans, kprobes and call graphs placed on the timeline
//! 3. missing phases filled in and the failure (if any) decided
//! 4. device filter, sub-call loops collapsed
//! 5. row layout

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use pmtrace_common::{PhaseId, KERNEL_RESUME_END_EVENT, MACHINE_SUSPEND_EVENT};
use std::collections::{BTreeMap, HashSet};

use crate::analysis::compute_bands;
use crate::callgraph::{attach_graphs, CallGraphBuilder, GraphLimits, GraphLine};
use crate::config::AnalyzerConfig;
use crate::domain::{millis, PhaseFailure, Tid};
use crate::parser::{RecordKind, RunMetadata, TraceRecord};
use crate::timeline::{
    collapse_loops, place_kprobes, ActionKind, DeviceAction, KprobeTracker, PhaseKey,
    PhaseTimeline, RoutedEvent, Waking, KPROBE_COVERED_EVENTS,
};
use crate::trace_data::{RunTimings, TestRun};

/// Kprobes whose entry marks the start of kernel suspend
const KERNEL_SUSPEND_PROBES: [&str; 2] = ["ksys_sync", "pm_prepare_console"];

/// Kprobe whose return marks the end of kernel resume
const KERNEL_RESUME_PROBE: &str = "pm_restore_console";

/// Display name of collapsed s2idle loops
const S2IDLE_SPAN: &str = "s2idle_enter";

/// A begin/end pair of a generic `suspend_resume` event
#[derive(Debug, Clone, PartialEq)]
struct GlobalSpan {
    begin: f64,
    end: Option<f64>,
    tid: Tid,
    /// s2idle loop iterations, for the `machine_suspend` special case
    loops: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
struct PendingTimings {
    kernel_suspend_start: Option<f64>,
    hardware_suspend_start: Option<f64>,
    hardware_resume_start: Option<f64>,
    kernel_resume_end: Option<f64>,
}

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunEnd {
    pub time: f64,
    pub stamp: Option<NaiveDateTime>,
    /// Closed by an end marker (or kernel end event) rather than end of file
    pub by_marker: bool,
    /// The end came from `thaw_processes[..] end`
    pub kernel_event: bool,
}

pub struct RunContext {
    index: usize,
    mode: String,
    start: f64,
    hw_start: Option<NaiveDateTime>,

    timeline: PhaseTimeline,
    /// Phase that device callbacks go to: the last one a boundary touched
    active: Option<PhaseKey>,
    first_suspend_prepare: bool,

    builder: CallGraphBuilder,
    kprobes: KprobeTracker,
    globals: BTreeMap<String, Vec<GlobalSpan>>,
    device_tids: HashSet<Tid>,

    /// Hardware suspend seen through the machine event
    hw_suspended: bool,
    /// Inside an s2idle `machine_suspend` loop
    s2idle_enter: bool,
    timings: PendingTimings,

    /// Records routed into this run
    pub records: u64,
    pub last_time: f64,
}

impl RunContext {
    /// Open run `index` at `start`; suspend_prepare begins with it
    #[must_use]
    pub fn new(
        index: usize,
        start: f64,
        stamp: Option<NaiveDateTime>,
        mode: &str,
        config: &AnalyzerConfig,
    ) -> Self {
        let mut timeline = PhaseTimeline::new();
        let active = timeline.set_phase(PhaseId::SuspendPrepare, start, true);
        info!("run {index}: start at {start:.6}");
        Self {
            index,
            mode: mode.to_string(),
            start,
            hw_start: stamp,
            timeline,
            active,
            first_suspend_prepare: true,
            builder: CallGraphBuilder::new(GraphLimits::from_config(config)),
            kprobes: KprobeTracker::new(),
            globals: BTreeMap::new(),
            device_tids: HashSet::new(),
            hw_suspended: false,
            s2idle_enter: false,
            timings: PendingTimings::default(),
            records: 0,
            last_time: start,
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn start(&self) -> f64 {
        self.start
    }

    #[must_use]
    pub fn timeline(&self) -> &PhaseTimeline {
        &self.timeline
    }

    /// Feed one record. `event` is what the router made of it.
    pub fn process(&mut self, record: &TraceRecord, event: RoutedEvent, config: &AnalyzerConfig) {
        self.records += 1;
        self.last_time = self.last_time.max(record.timestamp);

        match record.kind {
            RecordKind::Call | RecordKind::Return | RecordKind::Leaf => {
                if let Some(line) = GraphLine::from_record(record) {
                    self.builder.push(record.tid, line);
                }
            }
            RecordKind::KprobeEnter => self.kprobe_enter(record, config),
            RecordKind::KprobeExit => self.kprobe_exit(record, config),
            RecordKind::PhaseEvent | RecordKind::DeviceEvent => self.handle_event(record, event),
            RecordKind::Unknown => {}
        }
    }

    fn handle_event(&mut self, record: &TraceRecord, event: RoutedEvent) {
        let t = record.timestamp;
        match event {
            RoutedEvent::CommandComplete => {
                self.timings.kernel_resume_end.get_or_insert(t);
            }
            RoutedEvent::PhaseBoundary { phase, begin } => self.phase_boundary(phase, t, begin),
            RoutedEvent::Machine { begin } => {
                if begin {
                    self.machine_suspend(t);
                } else {
                    self.machine_resume(t);
                }
            }
            RoutedEvent::KernelSuspendEnter { begin } => {
                if begin {
                    self.timings.kernel_suspend_start.get_or_insert(t);
                }
            }
            RoutedEvent::DeviceStart {
                driver,
                device,
                parent,
            } => {
                let Some(key) = self.active else { return };
                let mut action = DeviceAction::new(&device, record.tid, t, ActionKind::Device);
                action.driver = driver;
                action.parent = parent;
                self.timeline.new_action(key, action);
                self.device_tids.insert(record.tid);
            }
            RoutedEvent::DeviceEnd { device, error_code } => self.device_end(&device, error_code, t),
            RoutedEvent::Global { name, begin } => self.global_event(name, record.tid, t, begin),
            RoutedEvent::StartMarker { .. } | RoutedEvent::EndMarker { .. } | RoutedEvent::Ignored => {}
        }
    }

    fn phase_boundary(&mut self, phase: PhaseId, t: f64, begin: bool) {
        // The start marker already opened suspend_prepare
        if phase == PhaseId::SuspendPrepare && begin && self.first_suspend_prepare {
            self.first_suspend_prepare = false;
            self.timings.kernel_suspend_start.get_or_insert(t);
            return;
        }
        if let Some(key) = self.timeline.set_phase(phase, t, begin) {
            self.active = Some(key);
        }
    }

    fn machine_suspend(&mut self, t: f64) {
        let last = self.timeline.last_phase(1);
        if let Some(resume) = last.filter(|k| k.0 == PhaseId::ResumeMachine) {
            // s2idle: the machine went back to sleep without resuming devices
            let resume_start = self.timeline.phase(resume).map_or(t, |p| p.start);
            if let Some(suspend) = self.timeline.last_phase(2) {
                if let Some(phase) = self.timeline.phase_mut(suspend) {
                    let waking = phase.waking.get_or_insert_with(Waking::default);
                    waking.count += 1;
                    waking.total += t - resume_start;
                }
                self.active = Some(suspend);
            }
            self.timeline.clear_current();
            self.timeline.remove_phase(resume);
            return;
        }

        let begin = last
            .and_then(|k| self.timeline.phase(k))
            .and_then(|p| p.end)
            .unwrap_or(t);
        self.active = self.timeline.set_phase(PhaseId::SuspendMachine, begin, true);
        self.timeline.set_phase(PhaseId::SuspendMachine, t, false);
        self.timings.hardware_suspend_start.get_or_insert(t);
        self.hw_suspended = true;
    }

    fn machine_resume(&mut self, t: f64) {
        if let Some(resume) = self
            .timeline
            .last_phase(1)
            .filter(|k| k.0 == PhaseId::ResumeMachine)
        {
            if let Some(phase) = self.timeline.phase_mut(resume) {
                phase.end = Some(t);
            }
            return;
        }

        self.active = self.timeline.set_phase(PhaseId::ResumeMachine, t, true);
        if matches!(self.mode.as_str(), "mem" | "disk") {
            if let Some(suspend) = self.timeline.latest(PhaseId::SuspendMachine) {
                if let Some(phase) = self.timeline.phase_mut(suspend) {
                    phase.end = Some(t);
                }
            }
            self.timings.hardware_suspend_start = Some(t);
        }
        self.timings.hardware_resume_start = Some(t);
    }

    fn device_end(&mut self, device: &str, error_code: Option<i32>, t: f64) {
        let key = self
            .active
            .filter(|&key| self.timeline.find_device(key, device).is_some());
        let action = match key {
            Some(key) => self.timeline.find_device(key, device),
            // The phase changed under a callback still running
            None => self
                .timeline
                .phases_mut()
                .iter_mut()
                .rev()
                .flat_map(|p| p.actions.iter_mut().rev())
                .find(|a| a.end.is_none() && a.answers_to(device)),
        };
        match action {
            Some(action) => {
                action.end = Some(t);
                action.error_code = error_code;
            }
            None => debug!("{device}: callback end without a start at {t:.6}"),
        }
    }

    fn global_event(&mut self, name: String, tid: Tid, t: f64, begin: bool) {
        if name == MACHINE_SUSPEND_EVENT {
            self.s2idle_loop(tid, t, begin);
            return;
        }
        if !self.timeline.is_outside_device_calls(tid, t) {
            return;
        }
        let spans = self.globals.entry(name).or_default();
        if begin {
            spans.push(GlobalSpan {
                begin: t,
                end: None,
                tid,
                loops: None,
            });
        } else if let Some(open) = spans.last_mut() {
            open.end = Some(t);
        }
    }

    /// `machine_suspend` outside mem mode: the s2idle loop of freeze
    fn s2idle_loop(&mut self, tid: Tid, t: f64, begin: bool) {
        if self.hw_suspended {
            self.hw_suspended = false;
            self.s2idle_enter = false;
            return;
        }
        let spans = self.globals.entry(S2IDLE_SPAN.to_string()).or_default();
        if self.s2idle_enter && !begin {
            if let Some(open) = spans.last_mut() {
                open.end = Some(t);
                open.loops = Some(open.loops.unwrap_or(0) + 1);
            }
        } else if !self.s2idle_enter && begin {
            self.s2idle_enter = true;
            spans.push(GlobalSpan {
                begin: t,
                end: None,
                tid,
                loops: Some(0),
            });
        }
    }

    fn active_phase_id(&self) -> Option<PhaseId> {
        self.active.map(|k| k.0)
    }

    fn kprobe_enter(&mut self, record: &TraceRecord, config: &AnalyzerConfig) {
        if !self.kprobes.enter(record, config) {
            return;
        }
        if self.timings.kernel_suspend_start.is_none()
            && self.active_phase_id() == Some(PhaseId::SuspendPrepare)
            && KERNEL_SUSPEND_PROBES.contains(&record.event_type.as_str())
        {
            self.timings.kernel_suspend_start = Some(record.timestamp);
        }
    }

    fn kprobe_exit(&mut self, record: &TraceRecord, config: &AnalyzerConfig) {
        let Some(probe) = self.kprobes.exit(record, config).map(|s| s.probe.clone()) else {
            return;
        };
        if probe == KERNEL_RESUME_PROBE && self.active_phase_id() != Some(PhaseId::SuspendPrepare) {
            let t = record.timestamp;
            if let Some(phase) = self.active.and_then(|key| self.timeline.phase_mut(key)) {
                phase.end = Some(t);
            }
            self.timings.kernel_resume_end = Some(t);
        }
    }

    // =========================================================================
    // END OF RUN
    // =========================================================================

    /// Finalize the run
    #[must_use]
    pub fn finish(mut self, end: RunEnd, metadata: RunMetadata, config: &AnalyzerConfig) -> TestRun {
        let run_end = end.time.max(self.start);
        if !end.by_marker {
            warn!("ftrace end marker is missing");
        }
        self.handle_end_marker(run_end, end.kernel_event);
        self.timeline.close_gaps(run_end);
        self.timeline.fixup_initcalls(run_end);
        self.timeline.init_device_groups();

        self.place_globals();
        let kprobe_spans = std::mem::take(&mut self.kprobes).into_spans();
        place_kprobes(
            &kprobe_spans,
            &mut self.timeline,
            config,
            (self.start, run_end),
            &mut self.device_tids,
        );

        let limits = self.builder.limits().clone();
        let graph_records = self.builder.records;
        let graphs = std::mem::take(&mut self.builder).finish();
        let graph_stats = attach_graphs(
            graphs,
            &mut self.timeline,
            config,
            &limits,
            (self.start, run_end),
        );
        debug!("run {}: {graph_records} call graph records, {graph_stats:?}", self.index);

        let failure = self.phase_failure(metadata.enter_error.as_deref());

        let kernel_resume_end = self.timings.kernel_resume_end.unwrap_or(run_end);
        let hardware_suspend_start = self
            .timings
            .hardware_suspend_start
            .unwrap_or(kernel_resume_end);
        let timings = RunTimings {
            kernel_suspend_start: self.timings.kernel_suspend_start.unwrap_or(run_end),
            hardware_suspend_start,
            hardware_resume_start: self
                .timings
                .hardware_resume_start
                .unwrap_or(hardware_suspend_start),
            kernel_resume_end,
        };

        self.timeline.device_filter(&config.device_filter);
        for action in self.timeline.actions_mut() {
            collapse_loops(
                &mut action.sub_calls,
                config.call_loop_max_gap,
                config.call_loop_max_len,
            );
        }
        let bands = compute_bands(&mut self.timeline);

        info!(
            "run {}: {:.3}ms, {} phases, {} actions",
            self.index,
            millis(run_end - self.start),
            self.timeline.phases().len(),
            self.timeline.actions().count()
        );

        TestRun {
            index: self.index,
            start: self.start,
            end: run_end,
            hw_start: self.hw_start,
            hw_end: end.stamp,
            ended_by_marker: end.by_marker,
            timings,
            phases: self.timeline.into_phases(),
            bands,
            failure,
            graph_stats,
            metadata,
        }
    }

    fn handle_end_marker(&mut self, t: f64, kernel_event: bool) {
        self.timings.kernel_resume_end.get_or_insert(t);

        if kernel_event {
            if let Some(open) = self
                .globals
                .get_mut(KERNEL_RESUME_END_EVENT)
                .and_then(|spans| spans.last_mut())
            {
                open.end = Some(t);
            }
        }

        for id in [PhaseId::SuspendPrepare, PhaseId::ResumeMachine] {
            if let Some(key) = self.timeline.latest(id) {
                let end = self.timeline.next_phase(key).map_or(t, |p| p.start);
                if let Some(phase) = self.timeline.phase_mut(key) {
                    phase.end.get_or_insert(end);
                }
            }
        }
        if let Some(key) = self.timeline.latest(PhaseId::ResumeComplete) {
            if let Some(phase) = self.timeline.phase_mut(key) {
                phase.end = Some(t.max(phase.start));
            }
        }
    }

    fn place_globals(&mut self) {
        let skip_covered = self.kprobes.seen;
        for (name, spans) in &self.globals {
            if skip_covered && KPROBE_COVERED_EVENTS.contains(&name.as_str()) {
                continue;
            }
            for span in spans {
                let Some(end) = span.end else { continue };
                if end - span.begin <= 0.0 {
                    continue;
                }
                let display = match span.loops {
                    Some(loops) => format!("{name}_{loops}x"),
                    None => name.clone(),
                };
                self.timeline
                    .new_action_global(&display, span.begin, end, span.tid, ActionKind::Global);
            }
        }
    }

    /// Fill in missing phases and decide why the run did not complete
    fn phase_failure(&mut self, enter_error: Option<&str>) -> Option<PhaseFailure> {
        let missing = self.timeline.fill_missing_phases(self.start);
        for id in &missing {
            self.timeline.device_groups.push(vec![(*id, 1)]);
        }
        self.timeline.sort_device_groups();

        let failure = missing.first().map(|&id| {
            let previous = PhaseId::ALL
                .iter()
                .position(|p| *p == id)
                .and_then(|i| i.checked_sub(1))
                .map_or(id, |i| PhaseId::ALL[i]);
            if let Some(end) = self
                .timeline
                .latest(previous)
                .and_then(|k| self.timeline.phase(k))
                .and_then(|p| p.end)
            {
                self.timings.hardware_suspend_start.get_or_insert(end);
                self.timings.hardware_resume_start.get_or_insert(end);
            }
            if id == PhaseId::SuspendMachine {
                PhaseFailure::DidNotEnter {
                    test: String::new(),
                    mode: self.mode.clone(),
                }
            } else {
                let phase = if id.is_machine() { id } else { previous };
                PhaseFailure::FailedInPhase {
                    mode: self.mode.clone(),
                    test: String::new(),
                    phase: phase.name().to_string(),
                }
            }
        });

        failure.or_else(|| {
            enter_error.map(|reason| PhaseFailure::EnterFailed {
                test: String::new(),
                mode: self.mode.clone(),
                reason: reason.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarkerMode;
    use crate::parser::LineParser;
    use crate::timeline::TraceEventRouter;

    struct Harness {
        parser: LineParser,
        router: TraceEventRouter,
        config: AnalyzerConfig,
        ctx: RunContext,
    }

    impl Harness {
        fn new(mode: &str) -> Self {
            let config = AnalyzerConfig::default();
            Self {
                parser: LineParser::default(),
                router: TraceEventRouter::new(mode, MarkerMode::Markers),
                ctx: RunContext::new(0, 1.0, None, mode, &config),
                config,
            }
        }

        fn feed(&mut self, time: f64, msg: &str) {
            let line = format!("kworker/0:1-42 [000] .... {time:.6}: {msg}");
            let record = self.parser.parse(&line).unwrap();
            let event = self.router.route(&record);
            self.ctx.process(&record, event, &self.config);
        }

        fn finish(self, end: f64) -> TestRun {
            self.ctx.finish(
                RunEnd {
                    time: end,
                    stamp: None,
                    by_marker: true,
                    kernel_event: false,
                },
                RunMetadata::default(),
                &self.config,
            )
        }
    }

    fn full_cycle(h: &mut Harness) {
        h.feed(1.1, "suspend_resume: dpm_prepare[2] begin");
        h.feed(1.2, "suspend_resume: dpm_prepare[2] end");
        h.feed(1.3, "suspend_resume: dpm_suspend[2] begin");
        h.feed(1.4, "suspend_resume: dpm_suspend[2] end");
        h.feed(1.5, "suspend_resume: dpm_suspend_late[3] begin");
        h.feed(1.6, "suspend_resume: dpm_suspend_late[3] end");
        h.feed(1.7, "suspend_resume: dpm_suspend_noirq[3] begin");
        h.feed(1.8, "suspend_resume: dpm_suspend_noirq[3] end");
        h.feed(1.9, "suspend_resume: machine_suspend[3] begin");
        h.feed(5.0, "suspend_resume: machine_suspend[3] end");
        h.feed(5.1, "suspend_resume: dpm_resume_noirq[16] begin");
        h.feed(5.2, "suspend_resume: dpm_resume_noirq[16] end");
        h.feed(5.3, "suspend_resume: dpm_resume_early[16] begin");
        h.feed(5.4, "suspend_resume: dpm_resume_early[16] end");
        h.feed(5.5, "suspend_resume: dpm_resume[16] begin");
        h.feed(5.6, "suspend_resume: dpm_resume[16] end");
        h.feed(5.7, "suspend_resume: dpm_complete[16] begin");
        h.feed(5.8, "suspend_resume: dpm_complete[16] end");
    }

    #[test]
    fn test_full_cycle_is_contiguous_and_complete() {
        let mut h = Harness::new("mem");
        full_cycle(&mut h);
        let run = h.finish(6.0);
        assert!(run.failure.is_none());
        assert_eq!(run.phases.len(), 10);
        for pair in run.phases.windows(2) {
            assert_eq!(pair[0].end, Some(pair[1].start));
        }
        assert_eq!(run.phases[0].start, 1.0);
        assert_eq!(run.phases[9].end, Some(6.0));
        assert_eq!(run.timings.kernel_suspend_start, 1.1);
        assert_eq!(run.timings.hardware_suspend_start, 5.0);
        assert_eq!(run.timings.hardware_resume_start, 5.0);
    }

    #[test]
    fn test_device_callback_lands_in_open_phase() {
        let mut h = Harness::new("mem");
        h.feed(1.3, "suspend_resume: dpm_suspend[2] begin");
        h.feed(1.31, "device_pm_callback_start: i2c_designware i2c-0, parent: pci0000:00");
        h.feed(1.3104, "device_pm_callback_end: i2c-0, err=0");
        h.feed(1.4, "suspend_resume: dpm_suspend[2] end");
        let run = h.finish(2.0);
        let suspend = run.phases.iter().find(|p| p.id == PhaseId::Suspend).unwrap();
        let dev = &suspend.actions[0];
        assert_eq!(dev.name, "i2c-0");
        assert_eq!(dev.driver, "i2c_designware");
        assert_eq!(dev.parent, "pci0000:00");
        assert_eq!(dev.error_code, Some(0));
        assert!((dev.length_ms() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_missing_phase_reports_failure() {
        let mut h = Harness::new("mem");
        h.feed(1.3, "suspend_resume: dpm_suspend[2] begin");
        h.feed(1.4, "suspend_resume: dpm_suspend[2] end");
        let run = h.finish(2.0);
        assert_eq!(
            run.failure.as_ref().map(ToString::to_string).as_deref(),
            Some("mem failed in suspend phase")
        );
        assert_eq!(run.phases.len(), 10);
        assert!(run.phases.iter().filter(|p| p.missing).count() == 8);
    }

    #[test]
    fn test_missing_machine_phase_did_not_enter() {
        let mut h = Harness::new("mem");
        h.feed(1.3, "suspend_resume: dpm_suspend[2] begin");
        h.feed(1.4, "suspend_resume: dpm_suspend[2] end");
        h.feed(1.5, "suspend_resume: dpm_suspend_late[3] begin");
        h.feed(1.6, "suspend_resume: dpm_suspend_late[3] end");
        h.feed(1.7, "suspend_resume: dpm_suspend_noirq[3] begin");
        h.feed(1.8, "suspend_resume: dpm_suspend_noirq[3] end");
        let run = h.finish(2.0);
        assert!(matches!(run.failure, Some(PhaseFailure::DidNotEnter { .. })));
    }

    #[test]
    fn test_unterminated_callback_is_clipped() {
        let mut h = Harness::new("mem");
        h.feed(1.3, "suspend_resume: dpm_suspend[2] begin");
        h.feed(1.31, "device_pm_callback_start: usb 1-1, parent: usb1");
        h.feed(1.4, "suspend_resume: dpm_suspend[2] end");
        h.feed(1.5, "suspend_resume: dpm_suspend_late[3] begin");
        let run = h.finish(2.0);
        let dev = run.phases.iter().flat_map(|p| &p.actions).next().unwrap();
        let end = dev.end.unwrap();
        assert!(end >= dev.start);
        assert_eq!(end, 1.5);
    }

    #[test]
    fn test_global_events_become_actions() {
        let mut h = Harness::new("mem");
        h.feed(1.05, "suspend_resume: sync_filesystems[0] begin");
        h.feed(1.08, "suspend_resume: sync_filesystems[0] end");
        h.feed(1.3, "suspend_resume: dpm_suspend[2] begin");
        let run = h.finish(2.0);
        let prepare = &run.phases[0];
        assert_eq!(prepare.actions[0].name, "sync_filesystems");
        assert_eq!(prepare.actions[0].kind, ActionKind::Global);
    }

    #[test]
    fn test_s2idle_wakes_fold_into_suspend_machine() {
        let mut h = Harness::new("freeze");
        h.feed(1.7, "suspend_resume: dpm_suspend_noirq[3] begin");
        h.feed(1.8, "suspend_resume: dpm_suspend_noirq[3] end");
        h.feed(2.0, "suspend_resume: timekeeping_freeze[0] begin");
        h.feed(3.0, "suspend_resume: timekeeping_freeze[0] end");
        h.feed(3.5, "suspend_resume: timekeeping_freeze[0] begin");
        h.feed(4.0, "suspend_resume: timekeeping_freeze[0] end");
        h.feed(4.1, "suspend_resume: dpm_resume_noirq[16] begin");
        let run = h.finish(5.0);
        let machine: Vec<_> = run.phases.iter().filter(|p| p.id.is_machine()).collect();
        assert_eq!(machine.len(), 2);
        let waking = machine[0].waking.unwrap();
        assert_eq!(waking.count, 1);
        assert!((waking.total - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_enter_error_reported_when_phases_complete() {
        let mut h = Harness::new("mem");
        full_cycle(&mut h);
        let metadata = RunMetadata {
            mode: "mem".to_string(),
            enter_error: Some("-16".to_string()),
            ..RunMetadata::default()
        };
        let run = h.ctx.finish(
            RunEnd {
                time: 6.0,
                stamp: None,
                by_marker: true,
                kernel_event: false,
            },
            metadata,
            &h.config,
        );
        assert_eq!(
            run.failure.map(|f| f.to_string()).as_deref(),
            Some("test failed to enter mem mode: -16")
        );
    }
}
