//! # Shared Trace Tables (parser ↔ timeline)
//!
//! Read-only tables shared by every stage of the ftrace reconstruction: the
//! canonical suspend/resume phase list, the trace-event names that open and
//! close each phase, and the marker strings that delimit one test run.
//!
//! Nothing here carries state. Independent parses share these tables freely.
//!
//! ## Key Types
//!
//! - [`PhaseId`] - One of the ten canonical phases, in fixed order
//!
//! ## Text Conventions
//!
//! - Run delimiters: [`SUSPEND_START_MARKER`] / [`RESUME_COMPLETE_MARKER`]
//! - Kprobe entry/exit: event type suffixed [`KPROBE_ENTRY_SUFFIX`] / [`KPROBE_EXIT_SUFFIX`]
//! - Depth repair placeholder: [`SENTINEL_FUNCTION`]

#![no_std]

// ============================================================================
// Event Type Tags
// ============================================================================

/// Comment/metadata lines start with this character
pub const COMMENT_MARKER: char = '#';

/// User-space trace marker event (`echo ... > trace_marker`)
pub const EVENT_TRACING_MARK: &str = "tracing_mark_write";

/// Kernel `suspend_resume` trace event carrying `name[arg] begin|end`
pub const EVENT_SUSPEND_RESUME: &str = "suspend_resume";

/// Device callback start: `<driver> <device>, parent: <parent>, ...`
pub const EVENT_DEVICE_CALLBACK_START: &str = "device_pm_callback_start";

/// Device callback end: `[<driver>] <device>, err=<code>`
pub const EVENT_DEVICE_CALLBACK_END: &str = "device_pm_callback_end";

/// Event type suffix of a kprobe entry record
pub const KPROBE_ENTRY_SUFFIX: &str = "_cal";

/// Event type suffix of a kprobe return record
pub const KPROBE_EXIT_SUFFIX: &str = "_ret";

// ============================================================================
// Run Markers
// ============================================================================

/// Trace marker written immediately before the suspend is triggered
pub const SUSPEND_START_MARKER: &str = "SUSPEND START";

/// Trace marker written once the resume has fully completed
pub const RESUME_COMPLETE_MARKER: &str = "RESUME COMPLETE";

/// Trace marker written when a test command finished
pub const CMD_COMPLETE_MARKER: &str = "CMD COMPLETE";

/// `suspend_resume` event whose `begin` starts a run when no markers exist
pub const KERNEL_SUSPEND_EVENT: &str = "suspend_enter";

/// `suspend_resume` event whose `end` finishes a run when no markers exist
pub const KERNEL_RESUME_END_EVENT: &str = "thaw_processes";

/// Low-level suspend event in mem/standby/disk modes
pub const MACHINE_SUSPEND_EVENT: &str = "machine_suspend";

/// Low-level suspend event in freeze (s2idle) mode
pub const FREEZE_MACHINE_EVENT: &str = "timekeeping_freeze";

// ============================================================================
// Call Graph
// ============================================================================

/// Function name given to calls/returns synthesized during depth repair.
///
/// A finalized graph whose first record carries this name is invalid.
pub const SENTINEL_FUNCTION: &str = "missing_function_name";

/// Root functions of device-callback graphs; these are never promoted to
/// standalone actions because their devices already exist.
pub const DEVICE_CALLBACK_ROOTS: [&str; 3] = ["dpm_run_callback", "dpm_prepare", "dpm_complete"];

// ============================================================================
// Canonical Phases
// ============================================================================

/// One stage of the suspend/resume sequence.
///
/// The discriminant is the canonical order; phases of a run always sort by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum PhaseId {
    SuspendPrepare = 0,
    Suspend = 1,
    SuspendLate = 2,
    SuspendNoirq = 3,
    SuspendMachine = 4,
    ResumeMachine = 5,
    ResumeNoirq = 6,
    ResumeEarly = 7,
    Resume = 8,
    ResumeComplete = 9,
}

impl PhaseId {
    /// Every phase in canonical order
    pub const ALL: [PhaseId; 10] = [
        PhaseId::SuspendPrepare,
        PhaseId::Suspend,
        PhaseId::SuspendLate,
        PhaseId::SuspendNoirq,
        PhaseId::SuspendMachine,
        PhaseId::ResumeMachine,
        PhaseId::ResumeNoirq,
        PhaseId::ResumeEarly,
        PhaseId::Resume,
        PhaseId::ResumeComplete,
    ];

    /// Canonical index (0..10)
    #[must_use]
    pub const fn order(self) -> usize {
        self as usize
    }

    /// Name used in reports and exports
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PhaseId::SuspendPrepare => "suspend_prepare",
            PhaseId::Suspend => "suspend",
            PhaseId::SuspendLate => "suspend_late",
            PhaseId::SuspendNoirq => "suspend_noirq",
            PhaseId::SuspendMachine => "suspend_machine",
            PhaseId::ResumeMachine => "resume_machine",
            PhaseId::ResumeNoirq => "resume_noirq",
            PhaseId::ResumeEarly => "resume_early",
            PhaseId::Resume => "resume",
            PhaseId::ResumeComplete => "resume_complete",
        }
    }

    /// Look up a phase by its report name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// The `suspend_resume` event that brackets this phase.
    ///
    /// Both machine phases share one event: its `begin` enters the low-level
    /// suspend and its `end` starts the low-level resume.
    #[must_use]
    pub const fn trace_event(self) -> &'static str {
        match self {
            PhaseId::SuspendPrepare => "dpm_prepare",
            PhaseId::Suspend => "dpm_suspend",
            PhaseId::SuspendLate => "dpm_suspend_late",
            PhaseId::SuspendNoirq => "dpm_suspend_noirq",
            PhaseId::SuspendMachine | PhaseId::ResumeMachine => MACHINE_SUSPEND_EVENT,
            PhaseId::ResumeNoirq => "dpm_resume_noirq",
            PhaseId::ResumeEarly => "dpm_resume_early",
            PhaseId::Resume => "dpm_resume",
            PhaseId::ResumeComplete => "dpm_complete",
        }
    }

    /// Map a `suspend_resume` event name to the non-machine phase it brackets
    #[must_use]
    pub fn from_trace_event(event: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .filter(|p| !p.is_machine())
            .find(|p| p.trace_event() == event)
    }

    /// True for the two low-level (firmware/hardware) phases
    #[must_use]
    pub const fn is_machine(self) -> bool {
        matches!(self, PhaseId::SuspendMachine | PhaseId::ResumeMachine)
    }

    /// True for phases on the resume side of the low-level suspend
    #[must_use]
    pub const fn is_resume(self) -> bool {
        self.order() >= PhaseId::ResumeMachine.order()
    }
}

impl core::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order_matches_discriminant() {
        for (idx, phase) in PhaseId::ALL.iter().enumerate() {
            assert_eq!(phase.order(), idx);
        }
    }

    #[test]
    fn test_trace_event_lookup_skips_machine_phases() {
        assert_eq!(PhaseId::from_trace_event("dpm_suspend_late"), Some(PhaseId::SuspendLate));
        assert_eq!(PhaseId::from_trace_event("dpm_suspend"), Some(PhaseId::Suspend));
        assert_eq!(PhaseId::from_trace_event("dpm_complete"), Some(PhaseId::ResumeComplete));
        assert_eq!(PhaseId::from_trace_event(MACHINE_SUSPEND_EVENT), None);
    }

    #[test]
    fn test_name_round_trip() {
        for phase in PhaseId::ALL {
            assert_eq!(PhaseId::from_name(phase.name()), Some(phase));
        }
        assert_eq!(PhaseId::from_name("post_resume"), None);
    }

    #[test]
    fn test_resume_side() {
        assert!(!PhaseId::SuspendMachine.is_resume());
        assert!(PhaseId::ResumeMachine.is_resume());
        assert!(PhaseId::ResumeComplete.is_resume());
    }
}
