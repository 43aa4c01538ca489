use std::path::PathBuf;

use pmtrace::callgraph::{CallGraphBuilder, GraphLimits, GraphLine, LineShape};
use pmtrace::config::AnalyzerConfig;
use pmtrace::domain::Tid;
use pmtrace::trace_data::{TestRun, TraceData};
use pmtrace::timeline::DeviceAction;
use pmtrace_common::{PhaseId, SENTINEL_FUNCTION};

fn function_graph_run() -> TestRun {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/function_graph.txt");
    let data = TraceData::from_file(path, &AnalyzerConfig::default()).unwrap();
    assert_eq!(data.runs.len(), 1);
    data.runs[0].run().cloned().expect("complete run")
}

fn device<'a>(run: &'a TestRun, name: &str) -> &'a DeviceAction {
    run.phases
        .iter()
        .filter(|p| p.id == PhaseId::Suspend)
        .flat_map(|p| &p.actions)
        .find(|a| a.name == name)
        .unwrap_or_else(|| panic!("{name} not found"))
}

#[test]
fn test_graph_is_sliced_to_callback_window() {
    let run = function_graph_run();
    let i2c = device(&run, "i2c-0");
    assert_eq!(i2c.tid, Tid(117));

    let graph = i2c.call_graph.as_ref().expect("graph attached to i2c-0");
    assert_eq!(graph.name, "pci_pm_suspend");
    let (start, end) = graph.span().unwrap();
    assert!(start >= i2c.start);
    assert!(end <= i2c.end.unwrap());

    let shape: Vec<(u32, &str, LineShape)> = graph
        .lines
        .iter()
        .map(|l| (l.depth, l.name.as_str(), l.shape))
        .collect();
    assert_eq!(
        shape,
        vec![
            (0, "pci_pm_suspend", LineShape::Call),
            (1, "mutex_lock", LineShape::Leaf),
            (0, "pci_pm_suspend", LineShape::Return),
        ]
    );
    assert!(run.graph_stats.sliced >= 1);
}

#[test]
fn test_depth_gap_is_repaired_without_losing_the_graph() {
    let run = function_graph_run();
    let usb = device(&run, "1-1");

    let graph = usb.call_graph.as_ref().expect("graph attached to 1-1");
    assert_eq!(graph.name, "outer_fn");
    assert!(!graph.invalid);
    assert!(graph.lines.iter().any(|l| l.name == SENTINEL_FUNCTION));
    assert_eq!(graph.lines.first().map(|l| l.depth), Some(0));
    assert_eq!(graph.lines.last().map(|l| (l.depth, l.shape)), Some((0, LineShape::Return)));
    assert!(run.graph_stats.attached >= 1);
}

#[test]
fn test_callback_without_end_event_still_gets_its_graph() {
    let run = function_graph_run();
    let button = device(&run, "PNP0C0C:00");

    // Clipped at the end of suspend
    assert_eq!(button.end, Some(1.4));
    let graph = button.call_graph.as_ref().expect("graph attached to PNP0C0C:00");
    assert_eq!(graph.name, "acpi_button_suspend");
    assert_eq!(graph.span(), Some((1.3501, 1.3502)));
}

fn limits() -> GraphLimits {
    GraphLimits {
        max_depth: None,
        max_records: 1_000_000,
        blacklist: Vec::new(),
    }
}

#[test]
fn test_unterminated_graph_is_closed_as_partial() {
    let mut builder = CallGraphBuilder::new(limits());
    let tid = Tid(9);
    builder.push(tid, GraphLine::new(1.0, 0, "dpm_run_callback", LineShape::Call));
    builder.push(tid, GraphLine::new(1.1, 1, "acpi_dev_suspend", LineShape::Call));
    builder.push(tid, GraphLine::new(1.2, 2, "msleep", LineShape::Leaf));

    let graphs = builder.finish();
    assert_eq!(graphs.len(), 1);
    let graph = &graphs[0];
    assert!(graph.partial);
    assert_eq!(graph.span(), Some((1.0, 1.2)));
    let returns = graph
        .lines
        .iter()
        .filter(|l| l.shape == LineShape::Return)
        .count();
    assert_eq!(returns, 2);
}

#[test]
fn test_graph_starting_mid_tree_is_discarded() {
    let mut builder = CallGraphBuilder::new(limits());
    let tid = Tid(9);
    // Buffer dropped the opening call: a return at depth 2 arrives first
    builder.push(tid, GraphLine::new(1.0, 2, "", LineShape::Return));
    builder.push(tid, GraphLine::new(1.1, 1, "", LineShape::Return));
    builder.push(tid, GraphLine::new(1.2, 0, "", LineShape::Return));
    builder.push(tid, GraphLine::new(2.0, 0, "dpm_run_callback", LineShape::Call));
    builder.push(tid, GraphLine::new(2.5, 0, "", LineShape::Return));

    let graphs = builder.finish();
    assert!(graphs.iter().all(|g| !g.invalid));
    assert!(graphs.iter().all(|g| g.name != SENTINEL_FUNCTION));
    assert!(graphs.iter().any(|g| g.span() == Some((2.0, 2.5))));
}
