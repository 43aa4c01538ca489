//! # Event Processing
//!
//! Drives the single pass over an ftrace log: every line is classified, run
//! metadata comments are folded into the [`LogHeader`], records go through
//! the equal-timestamp reorderer and are routed to the open run.
//!
//! ## Run Boundaries
//!
//! - `StartMarker` → close any open run (end marker missing), open a new one
//! - `EndMarker` → finish the open run at the marker time
//! - EOF → finish the open run at its last record
//!
//! Events arriving while no run is open are collected into a window. If the
//! window holds phase boundaries, device callbacks or an end marker it was a
//! suspend cycle whose start marker got lost, and it becomes a failed outcome
//! carrying [`RunError::MissingStartMarker`]. Anything else is trace noise
//! and is dropped. The next valid run is parsed normally either way.
//!
//! In `auto` marker mode runs are delimited by kernel events until the first
//! `SUSPEND START` shows the log carries markers. Runs delimited by events
//! before that point lost their start marker and are failed the same way.

use chrono::NaiveDateTime;
use log::{debug, warn};

use super::run_context::{RunContext, RunEnd};
use crate::config::AnalyzerConfig;
use crate::domain::RunError;
use crate::parser::{parse_comment, LineClass, LineParser, LogHeader, TimestampReorderer, TraceRecord};
use crate::timeline::{RoutedEvent, TraceEventRouter};
use crate::trace_data::RunOutcome;

/// Events seen while no run was open
#[derive(Debug, Clone, Copy)]
struct OrphanWindow {
    start: f64,
    end: f64,
    records: usize,
    /// Holds evidence of a suspend cycle
    cycle: bool,
}

/// Encapsulates the parse state of one log
pub struct EventProcessor<'a> {
    // Configuration
    config: &'a AnalyzerConfig,

    // Parse state
    parser: LineParser,
    header: LogHeader,
    reorderer: TimestampReorderer,
    router: TraceEventRouter,
    current: Option<RunContext>,
    orphan: Option<OrphanWindow>,
    outcomes: Vec<RunOutcome>,

    // Counters
    pub line_count: usize,
    pub record_count: usize,
    pub comment_count: usize,
    /// Lines without a record header
    pub unparseable_count: usize,
}

impl<'a> EventProcessor<'a> {
    /// Create a new event processor
    #[must_use]
    pub fn new(config: &'a AnalyzerConfig) -> Self {
        let header = LogHeader::default();
        let router = TraceEventRouter::new(header.mode(), config.trace_markers);
        Self {
            config,
            parser: LineParser::default(),
            header,
            reorderer: TimestampReorderer::new(),
            router,
            current: None,
            orphan: None,
            outcomes: Vec::new(),
            line_count: 0,
            record_count: 0,
            comment_count: 0,
            unparseable_count: 0,
        }
    }

    /// Process a single line of the log
    pub fn process_line(&mut self, line: &str) {
        self.line_count += 1;
        match self.parser.classify(line) {
            LineClass::Comment => {
                self.comment_count += 1;
                if let Some(dialect) = self.header.apply(parse_comment(line)) {
                    debug!("tracer dialect switched to {dialect:?}");
                    self.parser.set_dialect(dialect);
                }
                self.router.set_suspend_mode(self.header.mode());
            }
            LineClass::Unparseable => self.unparseable_count += 1,
            LineClass::Record(record) => {
                self.record_count += 1;
                for record in self.reorderer.push(record) {
                    self.dispatch(&record);
                }
            }
        }
    }

    /// Flush buffered records and close the last run
    #[must_use]
    pub fn finish(mut self) -> Vec<RunOutcome> {
        for record in self.reorderer.flush() {
            self.dispatch(&record);
        }
        self.flush_orphan();
        if let Some(ctx) = self.current.take() {
            let time = ctx.last_time;
            self.close_run(ctx, time, None, false, false);
        }
        if self.outcomes.iter().all(|o| o.run().is_none()) {
            warn!("ftrace start marker is missing");
        }
        self.outcomes
    }

    // Private event handlers

    fn dispatch(&mut self, record: &TraceRecord) {
        let used_markers = self.router.uses_markers();
        let event = self.router.route(record);
        match event {
            RoutedEvent::StartMarker { stamp } => {
                if let Some(ctx) = self.current.take() {
                    let time = ctx.last_time;
                    self.close_run(ctx, time, None, false, false);
                }
                self.flush_orphan();
                if !used_markers && self.router.uses_markers() {
                    self.fail_event_delimited_runs();
                }
                let index = self.outcomes.len();
                self.current = Some(RunContext::new(
                    index,
                    record.timestamp,
                    stamp,
                    self.header.mode(),
                    self.config,
                ));
            }
            RoutedEvent::EndMarker {
                stamp,
                kernel_event,
            } => match self.current.take() {
                Some(mut ctx) => {
                    ctx.process(record, RoutedEvent::Ignored, self.config);
                    self.close_run(ctx, record.timestamp, stamp, true, kernel_event);
                }
                None => self.note_orphan(record.timestamp, true),
            },
            event => match self.current.as_mut() {
                Some(ctx) => ctx.process(record, event, self.config),
                None if event != RoutedEvent::Ignored && event != RoutedEvent::CommandComplete => {
                    self.note_orphan(record.timestamp, is_cycle_evidence(&event));
                }
                None => {}
            },
        }
    }

    fn close_run(
        &mut self,
        ctx: RunContext,
        time: f64,
        stamp: Option<NaiveDateTime>,
        by_marker: bool,
        kernel_event: bool,
    ) {
        let metadata = self.header.for_run(ctx.index());
        let run = ctx.finish(
            RunEnd {
                time,
                stamp,
                by_marker,
                kernel_event,
            },
            metadata,
            self.config,
        );
        self.outcomes.push(RunOutcome::Complete(Box::new(run)));
    }

    fn note_orphan(&mut self, time: f64, cycle: bool) {
        let window = self.orphan.get_or_insert(OrphanWindow {
            start: time,
            end: time,
            records: 0,
            cycle: false,
        });
        window.start = window.start.min(time);
        window.end = window.end.max(time);
        window.records += 1;
        window.cycle |= cycle;
    }

    fn flush_orphan(&mut self) {
        let Some(OrphanWindow {
            start,
            end,
            records,
            cycle,
        }) = self.orphan.take()
        else {
            return;
        };
        if !cycle {
            debug!("dropping {records} records outside any run ({start:.6} - {end:.6})");
            return;
        }
        let index = self.outcomes.len();
        warn!("run {index}: ftrace start marker is missing ({start:.6} - {end:.6})");
        self.outcomes.push(RunOutcome::Failed {
            index,
            error: RunError::MissingStartMarker,
            start,
            end,
        });
    }

    /// The log turned out to carry markers: runs delimited by kernel events
    /// so far lost their start marker
    fn fail_event_delimited_runs(&mut self) {
        for outcome in &mut self.outcomes {
            if let RunOutcome::Complete(run) = outcome {
                let (index, start, end) = (run.index, run.start, run.end);
                warn!("run {index}: ftrace start marker is missing ({start:.6} - {end:.6})");
                *outcome = RunOutcome::Failed {
                    index,
                    error: RunError::MissingStartMarker,
                    start,
                    end,
                };
            }
        }
    }
}

/// Events that only occur inside a suspend cycle
fn is_cycle_evidence(event: &RoutedEvent) -> bool {
    matches!(
        event,
        RoutedEvent::PhaseBoundary { .. }
            | RoutedEvent::Machine { .. }
            | RoutedEvent::KernelSuspendEnter { .. }
            | RoutedEvent::DeviceStart { .. }
            | RoutedEvent::DeviceEnd { .. }
            | RoutedEvent::EndMarker { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_lines(lines: &[&str]) -> Vec<RunOutcome> {
        let config = AnalyzerConfig::default();
        let mut processor = EventProcessor::new(&config);
        for line in lines {
            processor.process_line(line);
        }
        processor.finish()
    }

    #[test]
    fn test_counts_lines() {
        let config = AnalyzerConfig::default();
        let mut processor = EventProcessor::new(&config);
        processor.process_line("# tracer: nop");
        processor.process_line("garbage");
        processor.process_line(" kworker/0:1-42 [000] .... 1.000000: tracing_mark_write: hello");
        assert_eq!(processor.line_count, 3);
        assert_eq!(processor.comment_count, 1);
        assert_eq!(processor.unparseable_count, 1);
        assert_eq!(processor.record_count, 1);
    }

    #[test]
    fn test_events_mode_run_boundaries() {
        let runs = run_lines(&[
            " kworker/0:1-42 [000] .... 1.000000: suspend_resume: suspend_enter[3] begin",
            " kworker/0:1-42 [000] .... 1.500000: suspend_resume: thaw_processes[0] begin",
            " kworker/0:1-42 [000] .... 1.600000: suspend_resume: thaw_processes[0] end",
        ]);
        assert_eq!(runs.len(), 1);
        let run = runs[0].run().unwrap();
        assert_eq!(run.start, 1.0);
        assert_eq!(run.end, 1.6);
        assert!(run.ended_by_marker);
    }

    #[test]
    fn test_missing_end_marker_closes_at_last_record() {
        let runs = run_lines(&[
            " kworker/0:1-42 [000] .... 1.000000: tracing_mark_write: SUSPEND START",
            " kworker/0:1-42 [000] .... 1.300000: suspend_resume: dpm_suspend[2] begin",
        ]);
        let run = runs[0].run().unwrap();
        assert!(!run.ended_by_marker);
        assert_eq!(run.end, 1.3);
    }

    #[test]
    fn test_stray_events_become_failed_run() {
        let runs = run_lines(&[
            " kworker/0:1-42 [000] .... 0.300000: suspend_resume: dpm_suspend[2] begin",
            " kworker/0:1-42 [000] .... 0.400000: suspend_resume: dpm_suspend[2] end",
            " kworker/0:1-42 [000] .... 1.000000: tracing_mark_write: SUSPEND START",
            " kworker/0:1-42 [000] .... 2.000000: tracing_mark_write: RESUME COMPLETE",
        ]);
        assert_eq!(runs.len(), 2);
        assert!(matches!(
            runs[0],
            RunOutcome::Failed {
                index: 0,
                error: RunError::MissingStartMarker,
                ..
            }
        ));
        assert_eq!(runs[1].index(), 1);
        assert!(runs[1].run().is_some());
    }

    #[test]
    fn test_trailing_noise_is_not_a_run() {
        let runs = run_lines(&[
            " kworker/0:1-42 [000] .... 1.000000: tracing_mark_write: SUSPEND START",
            " kworker/0:1-42 [000] .... 1.300000: suspend_resume: dpm_suspend[2] begin",
            " kworker/0:1-42 [000] .... 1.400000: suspend_resume: dpm_suspend[2] end",
            " kworker/0:1-42 [000] .... 1.500000: tracing_mark_write: RESUME COMPLETE",
            " kworker/0:1-42 [000] .... 1.600000: suspend_resume: sync_filesystems[0] begin",
            " kworker/0:1-42 [000] .... 1.700000: suspend_resume: sync_filesystems[0] end",
        ]);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run().map(|r| r.end), Some(1.5));
    }

    #[test]
    fn test_event_delimited_run_before_first_marker_fails() {
        let runs = run_lines(&[
            " kworker/0:1-42 [000] .... 0.010000: suspend_resume: suspend_enter[3] begin",
            " kworker/0:1-42 [000] .... 0.030000: suspend_resume: dpm_suspend[2] begin",
            " kworker/0:1-42 [000] .... 0.040000: suspend_resume: dpm_suspend[2] end",
            " kworker/0:1-42 [000] .... 0.080000: suspend_resume: thaw_processes[0] end",
            " kworker/0:1-42 [000] .... 0.090000: tracing_mark_write: RESUME COMPLETE",
            " kworker/0:1-42 [000] .... 1.000000: tracing_mark_write: SUSPEND START",
            " kworker/0:1-42 [000] .... 1.100000: suspend_resume: suspend_enter[3] begin",
            " kworker/0:1-42 [000] .... 1.900000: suspend_resume: thaw_processes[0] end",
            " kworker/0:1-42 [000] .... 2.000000: tracing_mark_write: RESUME COMPLETE",
        ]);
        assert_eq!(runs.len(), 2);
        assert!(matches!(
            runs[0],
            RunOutcome::Failed {
                index: 0,
                error: RunError::MissingStartMarker,
                start,
                end,
            } if start == 0.01 && end == 0.08
        ));
        let run = runs[1].run().unwrap();
        assert_eq!(run.index, 1);
        assert_eq!((run.start, run.end), (1.0, 2.0));
    }

    #[test]
    fn test_markers_found_later_switch_modes() {
        let runs = run_lines(&[
            " kworker/0:1-42 [000] .... 1.000000: tracing_mark_write: SUSPEND START",
            " kworker/0:1-42 [000] .... 1.100000: suspend_resume: suspend_enter[3] begin",
            " kworker/0:1-42 [000] .... 1.900000: suspend_resume: thaw_processes[0] end",
            " kworker/0:1-42 [000] .... 2.000000: tracing_mark_write: RESUME COMPLETE",
        ]);
        assert_eq!(runs.len(), 1);
        let run = runs[0].run().unwrap();
        assert_eq!(run.end, 2.0);
        assert_eq!(run.timings.kernel_suspend_start, 1.1);
    }
}
