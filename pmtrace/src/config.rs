//! # Analyzer Configuration
//!
//! Every threshold the reconstruction uses lives in [`AnalyzerConfig`]. Values
//! come from three layers, later ones winning:
//!
//! 1. Built-in defaults ([`AnalyzerConfig::default`])
//! 2. An optional JSON file (`--config tuning.json`), any subset of fields
//! 3. Command-line overrides (`--max-depth`, `--device-filter`, `--markers`)
//!
//! ```json
//! { "max_graph_depth": 6, "callgraph_blacklist": ["_raw_spin_lock"] }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::ParseError;

/// Kernel functions whose kprobe spans (or call graphs) are shown as
/// standalone actions on the timeline.
pub const DEFAULT_TRACE_FUNCS: &[&str] = &[
    "async_synchronize_full",
    "sys_sync",
    "ksys_sync",
    "__pm_notifier_call_chain",
    "pm_prepare_console",
    "pm_notifier_call_chain",
    "freeze_processes",
    "freeze_kernel_threads",
    "pm_restrict_gfp_mask",
    "acpi_suspend_begin",
    "acpi_hibernation_begin",
    "acpi_hibernation_enter",
    "acpi_hibernation_leave",
    "acpi_pm_freeze",
    "acpi_pm_thaw",
    "acpi_s2idle_end",
    "acpi_s2idle_sync",
    "acpi_s2idle_begin",
    "acpi_s2idle_prepare",
    "acpi_s2idle_prepare_late",
    "acpi_s2idle_wake",
    "acpi_s2idle_wakeup",
    "acpi_s2idle_restore",
    "acpi_s2idle_restore_early",
    "hibernate_preallocate_memory",
    "create_basic_memory_bitmaps",
    "swsusp_write",
    "suspend_console",
    "acpi_pm_prepare",
    "syscore_suspend",
    "arch_enable_nonboot_cpus_end",
    "syscore_resume",
    "acpi_pm_finish",
    "resume_console",
    "acpi_pm_end",
    "pm_restore_gfp_mask",
    "thaw_processes",
    "pm_restore_console",
    "CPU_OFF",
    "CPU_ON",
];

/// Kprobes attached as sub-call annotations inside device callbacks
pub const DEFAULT_DEV_TRACE_FUNCS: &[&str] = &[
    "msleep",
    "schedule_timeout",
    "udelay",
    "usleep_range",
    "mutex_lock_slowpath",
    "acpi_os_stall",
    "rt_mutex_slowlock",
    "acpi_resume_power_resources",
    "acpi_ps_execute_method",
    "mei_reset",
    "ext4_sync_fs",
    "ath10k_bmi_read_memory",
    "ath10k_bmi_write_memory",
    "ath10k_bmi_fast_download",
    "iwlagn_mac_start",
    "iwlagn_mac_stop",
    "iwlagn_mac_suspend",
    "iwlagn_mac_resume",
    "iwl_trans_pcie_start_hw",
    "iwl_trans_pcie_start_fw",
    "iwl_run_init_ucode",
    "iwl_load_ucode_wait_alive",
    "iwl_alive_start",
    "ata_eh_recover",
    "i915_gem_resume",
    "i915_restore_state",
    "intel_opregion_setup",
    "intel_hpd_init",
    "intel_opregion_register",
    "intel_dp_detect",
    "intel_hdmi_detect",
    "intel_opregion_init",
    "intel_fbdev_set_suspend",
];

/// Wait/delay probes called from almost everywhere. A ubiquitous probe whose
/// caller is itself ubiquitous adds nothing and is dropped.
pub const DEFAULT_UBIQUITOUS_FUNCS: &[&str] = &[
    "msleep",
    "schedule_timeout",
    "udelay",
    "usleep_range",
    "mutex_lock_slowpath",
    "acpi_os_stall",
    "rt_mutex_slowlock",
];

/// How a test run is delimited in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MarkerMode {
    /// Kernel events until the first `SUSPEND START` marker shows up, markers after
    #[default]
    Auto,
    /// `tracing_mark_write: SUSPEND START` / `RESUME COMPLETE`
    Markers,
    /// `suspend_enter[..] begin` / `thaw_processes[..] end`
    Events,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Calls nested this deep are folded into leaves (`None` = unlimited)
    pub max_graph_depth: Option<u32>,
    /// A call graph with more records than this is invalidated
    pub max_graph_records: usize,
    /// Discarding a graph larger than this logs a ring-buffer warning
    pub suspicious_graph_records: usize,
    /// Functions whose subtrees are folded into a single leaf
    pub callgraph_blacklist: Vec<String>,
    pub trace_funcs: Vec<String>,
    pub dev_trace_funcs: Vec<String>,
    pub ubiquitous_funcs: Vec<String>,
    /// Display templates keyed by probe name, e.g. `CPU_ON` -> `CPU_ON[{cpu}]`
    pub kprobe_formats: BTreeMap<String, String>,
    /// Kprobe pairs shorter than this (milliseconds) are dropped
    pub min_device_ms: f64,
    /// Max gap (seconds) between two identical sub-calls to merge them
    pub call_loop_max_gap: f64,
    /// Sub-calls at least this long (seconds) are never merged
    pub call_loop_max_len: f64,
    pub trace_markers: MarkerMode,
    /// Keep only actions whose name or driver contains one of these
    pub device_filter: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| (*s).to_string()).collect();
        let mut kprobe_formats = BTreeMap::new();
        kprobe_formats.insert("CPU_ON".to_string(), "CPU_ON[{cpu}]".to_string());
        kprobe_formats.insert("CPU_OFF".to_string(), "CPU_OFF[{cpu}]".to_string());
        Self {
            max_graph_depth: None,
            max_graph_records: 1_000_000,
            suspicious_graph_records: 100_000,
            callgraph_blacklist: Vec::new(),
            trace_funcs: owned(DEFAULT_TRACE_FUNCS),
            dev_trace_funcs: owned(DEFAULT_DEV_TRACE_FUNCS),
            ubiquitous_funcs: owned(DEFAULT_UBIQUITOUS_FUNCS),
            kprobe_formats,
            min_device_ms: 0.0001,
            call_loop_max_gap: 0.0001,
            call_loop_max_len: 0.005,
            trace_markers: MarkerMode::Auto,
            device_filter: Vec::new(),
        }
    }
}

impl AnalyzerConfig {
    /// Load a JSON config file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ParseError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ParseError::InvalidConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn is_trace_func(&self, name: &str) -> bool {
        self.trace_funcs.iter().any(|f| f == name)
    }

    #[must_use]
    pub fn is_dev_trace_func(&self, name: &str) -> bool {
        self.dev_trace_funcs.iter().any(|f| f == name)
    }

    #[must_use]
    pub fn is_ubiquitous(&self, name: &str) -> bool {
        self.ubiquitous_funcs.iter().any(|f| f == name)
    }

    /// Render the display name of a kprobe entry from its argument text.
    ///
    /// `data` looks like `(dpm_run_callback+0x5c/0x150) cpu=2 "name=a b"`.
    /// Quoted spaces become underscores before `key=value` pairs are read;
    /// placeholders without a value render empty.
    #[must_use]
    pub fn kprobe_display_name(&self, probe: &str, data: &str) -> String {
        let Some(template) = self.kprobe_formats.get(probe) else {
            return probe.to_string();
        };

        let mut cleaned = String::with_capacity(data.len());
        let mut quoted = false;
        for c in data.chars() {
            match c {
                '"' => quoted = !quoted,
                ' ' if quoted => cleaned.push('_'),
                _ => cleaned.push(c),
            }
        }

        let lookup = |key: &str| -> &str {
            cleaned
                .split_whitespace()
                .find_map(|token| token.strip_prefix(key).and_then(|v| v.strip_prefix('=')))
                .unwrap_or("")
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            if let Some(close) = after.find('}') {
                out.push_str(lookup(&after[..close]));
                rest = &after[close + 1..];
            } else {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
        out.push_str(rest);
        out.replace(' ', "_")
    }
}
