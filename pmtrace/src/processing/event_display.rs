// Durations are shown in milliseconds with three decimals
#![allow(clippy::cast_precision_loss)]

use crate::domain::millis;
use crate::trace_data::{RunOutcome, TestRun, TraceData};

/// Display one run: phases, their durations and action counts
pub fn display_run(run: &TestRun) {
    let host = run.metadata.host.as_deref().unwrap_or("unknown host");
    println!(
        "\n[RUN {}] {} {:.3}ms ({host})",
        run.index,
        run.metadata.mode,
        millis(run.duration())
    );
    if let Some(failure) = &run.failure {
        println!("  FAILED: {failure}");
    }
    println!(
        "  kernel suspend {:.6}  hw suspend {:.6}  hw resume {:.6}  kernel resume end {:.6}",
        run.timings.kernel_suspend_start,
        run.timings.hardware_suspend_start,
        run.timings.hardware_resume_start,
        run.timings.kernel_resume_end
    );

    for phase in &run.phases {
        let marker = if phase.missing { " (missing)" } else { "" };
        println!(
            "  {:<18} {:>10.3}ms  {:>4} actions{marker}",
            phase.name,
            millis(phase.length()),
            phase.actions.len()
        );
        if let Some(waking) = phase.waking {
            println!(
                "    woke {} times, {:.3}ms awake",
                waking.count,
                millis(waking.total)
            );
        }
    }

    let stats = run.graph_stats;
    if stats.attached + stats.sliced + stats.promoted + stats.discarded > 0 {
        println!(
            "  call graphs: attached={} sliced={} promoted={} discarded={}",
            stats.attached, stats.sliced, stats.promoted, stats.discarded
        );
    }
}

/// Display a failed outcome
pub fn display_failed(index: usize, error: &impl std::fmt::Display, start: f64, end: f64) {
    println!("\n[RUN {index}] ERROR: {error} ({start:.6} - {end:.6})");
}

/// Display every outcome of a parsed log
pub fn display_summary(data: &TraceData) {
    for outcome in &data.runs {
        match outcome {
            RunOutcome::Complete(run) => display_run(run),
            RunOutcome::Failed {
                index,
                error,
                start,
                end,
            } => display_failed(*index, error, *start, *end),
        }
    }
    let complete = data.complete_runs().count();
    eprintln!(
        "stats: runs={} complete={complete} failed={}",
        data.runs.len(),
        data.runs.len() - complete
    );
}
