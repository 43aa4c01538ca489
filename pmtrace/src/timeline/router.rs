//! # Trace Event Router
//!
//! Turns one non-call-graph record into the timeline mutation it stands for.
//! The router only classifies; [`RunContext`](crate::processing::RunContext)
//! applies the result.
//!
//! ## Event Text
//!
//! ```text
//! tracing_mark_write: SUSPEND START 20230815-10:11:12.250000   run start
//! suspend_resume: dpm_suspend[2] begin                         phase boundary
//! suspend_resume: machine_suspend[3] end                       low-level resume
//! suspend_resume: sync_filesystems[0] begin                    global action
//! device_pm_callback_start: i2c_designware i2c-0, parent: pci0000:00, type=bus [1]
//! device_pm_callback_end: i2c_designware i2c-0, err=0
//! ```

use chrono::NaiveDateTime;
use pmtrace_common::{
    PhaseId, CMD_COMPLETE_MARKER, EVENT_DEVICE_CALLBACK_END, EVENT_DEVICE_CALLBACK_START,
    EVENT_SUSPEND_RESUME, EVENT_TRACING_MARK, FREEZE_MACHINE_EVENT, KERNEL_RESUME_END_EVENT,
    KERNEL_SUSPEND_EVENT, MACHINE_SUSPEND_EVENT, RESUME_COMPLETE_MARKER, SUSPEND_START_MARKER,
};

use crate::config::MarkerMode;
use crate::parser::{parse_marker_time, RecordKind, TraceRecord};

/// suspend_resume events that are never graphed
const IGNORED_EVENTS: &[&str] = &["irq_wakeup"];

/// suspend_resume events duplicated by the default kprobes; dropped from the
/// global actions of a run that recorded kprobes
pub const KPROBE_COVERED_EVENTS: &[&str] = &[
    "sync_filesystems",
    "freeze_processes",
    "syscore_suspend",
    "syscore_resume",
    "resume_console",
    "thaw_processes",
    "CPU_ON",
    "CPU_OFF",
    "acpi_suspend",
];

#[derive(Debug, Clone, PartialEq)]
pub enum RoutedEvent {
    /// A run begins here
    StartMarker { stamp: Option<NaiveDateTime> },
    /// The run ends here. `kernel_event` is set when the end was taken from
    /// `thaw_processes[..] end` rather than a trace marker.
    EndMarker {
        stamp: Option<NaiveDateTime>,
        kernel_event: bool,
    },
    CommandComplete,
    PhaseBoundary { phase: PhaseId, begin: bool },
    /// `machine_suspend` (or `timekeeping_freeze` in freeze mode)
    Machine { begin: bool },
    KernelSuspendEnter { begin: bool },
    DeviceStart {
        driver: String,
        device: String,
        parent: String,
    },
    DeviceEnd {
        device: String,
        error_code: Option<i32>,
    },
    /// Any other suspend_resume begin/end pair
    Global { name: String, begin: bool },
    Ignored,
}

#[derive(Debug, Clone)]
pub struct TraceEventRouter {
    machine_event: &'static str,
    markers: MarkerMode,
    markers_seen: bool,
}

impl TraceEventRouter {
    #[must_use]
    pub fn new(suspend_mode: &str, markers: MarkerMode) -> Self {
        let mut router = Self {
            machine_event: MACHINE_SUSPEND_EVENT,
            markers,
            markers_seen: false,
        };
        router.set_suspend_mode(suspend_mode);
        router
    }

    /// The low-level suspend event depends on the mode
    pub fn set_suspend_mode(&mut self, mode: &str) {
        self.machine_event = if mode == "freeze" {
            FREEZE_MACHINE_EVENT
        } else {
            MACHINE_SUSPEND_EVENT
        };
    }

    #[must_use]
    pub fn machine_event(&self) -> &'static str {
        self.machine_event
    }

    /// Runs delimited by trace markers rather than kernel events
    #[must_use]
    pub fn uses_markers(&self) -> bool {
        match self.markers {
            MarkerMode::Markers => true,
            MarkerMode::Events => false,
            MarkerMode::Auto => self.markers_seen,
        }
    }

    pub fn route(&mut self, record: &TraceRecord) -> RoutedEvent {
        match record.kind {
            RecordKind::DeviceEvent => route_device(record),
            RecordKind::PhaseEvent if record.event_type == EVENT_TRACING_MARK => {
                self.route_marker(&record.name)
            }
            RecordKind::PhaseEvent if record.event_type == EVENT_SUSPEND_RESUME => {
                self.route_suspend_resume(&record.name)
            }
            _ => RoutedEvent::Ignored,
        }
    }

    fn route_marker(&mut self, text: &str) -> RoutedEvent {
        if text.starts_with(SUSPEND_START_MARKER) {
            if self.markers == MarkerMode::Auto {
                self.markers_seen = true;
            }
            if self.uses_markers() {
                return RoutedEvent::StartMarker {
                    stamp: parse_marker_time(SUSPEND_START_MARKER, text),
                };
            }
        } else if text.starts_with(RESUME_COMPLETE_MARKER) {
            if self.uses_markers() {
                return RoutedEvent::EndMarker {
                    stamp: parse_marker_time(RESUME_COMPLETE_MARKER, text),
                    kernel_event: false,
                };
            }
        } else if text.starts_with(CMD_COMPLETE_MARKER) {
            return RoutedEvent::CommandComplete;
        }
        RoutedEvent::Ignored
    }

    fn route_suspend_resume(&self, body: &str) -> RoutedEvent {
        let Some((name, begin)) = split_begin_end(body) else {
            return RoutedEvent::Ignored;
        };

        if !self.uses_markers() {
            if begin && name == KERNEL_SUSPEND_EVENT {
                return RoutedEvent::StartMarker { stamp: None };
            }
            if !begin && name == KERNEL_RESUME_END_EVENT {
                return RoutedEvent::EndMarker {
                    stamp: None,
                    kernel_event: true,
                };
            }
        }
        if IGNORED_EVENTS.contains(&name) {
            return RoutedEvent::Ignored;
        }
        if name == KERNEL_SUSPEND_EVENT {
            return RoutedEvent::KernelSuspendEnter { begin };
        }
        if name == self.machine_event {
            return RoutedEvent::Machine { begin };
        }
        if let Some(phase) = PhaseId::from_trace_event(name) {
            return RoutedEvent::PhaseBoundary { phase, begin };
        }
        RoutedEvent::Global {
            name: name.to_string(),
            begin,
        }
    }
}

/// `dpm_suspend[2] begin` -> (`dpm_suspend`, true)
fn split_begin_end(body: &str) -> Option<(&str, bool)> {
    let body = body.trim();
    let (head, begin) = if let Some(head) = body.strip_suffix(" begin") {
        (head, true)
    } else {
        (body.strip_suffix(" end")?, false)
    };
    let name = match head.split_once('[') {
        Some((name, _)) => name,
        None => head.split_whitespace().next().unwrap_or(head),
    };
    (!name.is_empty()).then_some((name, begin))
}

fn route_device(record: &TraceRecord) -> RoutedEvent {
    if record.event_type == EVENT_DEVICE_CALLBACK_START {
        parse_callback_start(&record.name).map_or(RoutedEvent::Ignored, |(driver, device, parent)| {
            RoutedEvent::DeviceStart {
                driver,
                device,
                parent,
            }
        })
    } else if record.event_type == EVENT_DEVICE_CALLBACK_END {
        parse_callback_end(&record.name).map_or(RoutedEvent::Ignored, |(device, error_code)| {
            RoutedEvent::DeviceEnd { device, error_code }
        })
    } else {
        RoutedEvent::Ignored
    }
}

/// `<driver> <device>, parent: <parent>[, ...]`
fn parse_callback_start(body: &str) -> Option<(String, String, String)> {
    let (head, tail) = body.split_once(", parent:")?;
    let (driver, device) = head.trim().rsplit_once(' ').unwrap_or(("", head.trim()));
    if device.is_empty() {
        return None;
    }
    let parent = tail.split(',').next().unwrap_or("").trim();
    Some((driver.trim().to_string(), device.to_string(), parent.to_string()))
}

/// `[<driver> ]<device>, err=<code>`
fn parse_callback_end(body: &str) -> Option<(String, Option<i32>)> {
    let (head, tail) = body.split_once(", err")?;
    let device = head.split_whitespace().last()?;
    let error_code = tail
        .trim_start_matches(['=', ' ', ':'])
        .split(|c: char| !(c == '-' || c.is_ascii_digit()))
        .next()
        .and_then(|code| code.parse().ok());
    Some((device.to_string(), error_code))
}
