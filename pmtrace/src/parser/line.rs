//! # Line Classification
//!
//! One pass over one line of ftrace text, producing a [`TraceRecord`] whose
//! [`RecordKind`] is a closed set. No line can make this fail: anything the
//! tokenizer does not recognise comes back as `None` (no record header) or as
//! [`RecordKind::Unknown`] (header parsed, message not understood).
//!
//! ## Dialects
//!
//! ```text
//! function_graph:
//!  6029.700151 |   0)  kworker-117   |               |  dpm_run_callback() {
//!  6029.700155 |   0)  kworker-117   |   0.580 us    |    mutex_lock();
//!  6029.700290 |   0)  kworker-117   | ! 139.014 us  |  } /* dpm_run_callback */
//!  6029.700291 |   0)  kworker-117   |               |  /* suspend_resume: dpm_suspend[2] end */
//!
//! nop (flat):
//!  kworker/u8:2-117   [000] d..2  6029.700151: device_pm_callback_start: i2c_designware i2c-0, parent: pci0000:00
//! ```
//!
//! Function-graph messages are indented two spaces per nesting level. Events
//! in both dialects have the shape `<type>: <body>`; a type ending in `_cal`
//! or `_ret` is a kprobe entry/exit.

use pmtrace_common::{
    COMMENT_MARKER, EVENT_DEVICE_CALLBACK_END, EVENT_DEVICE_CALLBACK_START, KPROBE_ENTRY_SUFFIX,
    KPROBE_EXIT_SUFFIX,
};
use serde::Serialize;

use crate::domain::{CpuId, Tid};

/// Record layout of the lines that follow; announced by `# tracer: ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `nop` tracer: one event per line, no nesting
    #[default]
    Flat,
    /// `function_graph` tracer: indented call tree plus embedded events
    FunctionGraph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `name() {`
    Call,
    /// `}` or `} /* name */`
    Return,
    /// `name();`, a call and its return fused, with the duration column
    Leaf,
    /// Any trace event other than a device callback or kprobe
    /// (`suspend_resume`, `tracing_mark_write`, ...)
    PhaseEvent,
    /// `device_pm_callback_start` / `device_pm_callback_end`
    DeviceEvent,
    KprobeEnter,
    KprobeExit,
    Unknown,
}

/// One parsed trace line. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    /// Seconds since boot
    pub timestamp: f64,
    pub tid: Tid,
    pub cpu: Option<CpuId>,
    /// Process name as printed before the tid (`<...>` when unknown)
    pub process: String,
    pub kind: RecordKind,
    /// Nesting level; function-graph call records only
    pub depth: u32,
    /// Duration column in seconds (function-graph only, when printed)
    pub duration_hint: Option<f64>,
    /// Function name for graph records, event body for events
    pub name: String,
    /// Event type (`suspend_resume`, probe name without suffix, ...)
    pub event_type: String,
    pub raw: String,
}

impl TraceRecord {
    /// True for an event of the given type
    #[must_use]
    pub fn is_event(&self, event_type: &str) -> bool {
        matches!(self.kind, RecordKind::PhaseEvent | RecordKind::DeviceEvent)
            && self.event_type == event_type
    }
}

/// What a single input line turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    /// Starts with `#`; routed to the metadata parser
    Comment,
    /// Blank, or no recognisable record header
    Unparseable,
    Record(TraceRecord),
}

/// Stateless apart from the active dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct LineParser {
    dialect: Dialect,
}

impl LineParser {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn set_dialect(&mut self, dialect: Dialect) {
        self.dialect = dialect;
    }

    /// Parse one line into a record. Comments and lines without a record
    /// header give `None`; a record whose message is not understood comes
    /// back with [`RecordKind::Unknown`].
    #[must_use]
    pub fn parse(&self, line: &str) -> Option<TraceRecord> {
        match self.classify(line) {
            LineClass::Record(record) => Some(record),
            LineClass::Comment | LineClass::Unparseable => None,
        }
    }

    /// Total classification of one line
    #[must_use]
    pub fn classify(&self, line: &str) -> LineClass {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.starts_with(COMMENT_MARKER) {
            return LineClass::Comment;
        }
        if line.trim().is_empty() {
            return LineClass::Unparseable;
        }
        let header = match self.dialect {
            Dialect::Flat => split_flat(line),
            Dialect::FunctionGraph => split_function_graph(line),
        };
        match header {
            Some(header) => LineClass::Record(self.build(line, header)),
            None => LineClass::Unparseable,
        }
    }

    fn build(&self, line: &str, header: Header<'_>) -> TraceRecord {
        let mut record = TraceRecord {
            timestamp: header.timestamp,
            tid: header.tid,
            cpu: header.cpu,
            process: header.process.to_string(),
            kind: RecordKind::Unknown,
            depth: 0,
            duration_hint: header.duration,
            name: String::new(),
            event_type: String::new(),
            raw: line.to_string(),
        };

        match self.dialect {
            Dialect::Flat => classify_event(&mut record, header.message),
            Dialect::FunctionGraph => {
                if let Some(body) = embedded_event(header.message) {
                    classify_event(&mut record, body);
                } else {
                    classify_graph(&mut record, header.message);
                }
            }
        }
        record
    }
}

// ============================================================================
// Header Tokenizing
// ============================================================================

struct Header<'a> {
    timestamp: f64,
    tid: Tid,
    cpu: Option<CpuId>,
    process: &'a str,
    duration: Option<f64>,
    message: &'a str,
}

/// `time | cpu) proc-pid | [flags] duration us | <two spaces>message`
fn split_function_graph(line: &str) -> Option<Header<'_>> {
    let mut fields = line.splitn(4, '|');
    let time = fields.next()?.trim();
    let owner = fields.next()?.trim();
    let duration = fields.next()?;
    let message = fields.next()?.strip_prefix("  ")?;

    let timestamp = time.parse::<f64>().ok()?;
    let (cpu, task) = owner.split_once(')')?;
    let cpu = cpu.trim().parse::<u32>().ok().map(CpuId);
    let (process, tid) = split_task(task.trim())?;

    // Overhead markers (`+ ! # * @ $`) precede the number
    let duration = duration
        .trim_start_matches([' ', '+', '!', '#', '*', '@', '$'])
        .split_whitespace()
        .next()
        .and_then(|d| d.parse::<f64>().ok())
        .map(|us| us / 1_000_000.0);

    Some(Header {
        timestamp,
        tid,
        cpu,
        process,
        duration,
        message,
    })
}

/// `proc-pid [cpu] flags time: message`, flags optional
fn split_flat(line: &str) -> Option<Header<'_>> {
    let (open, close) = find_cpu_brackets(line)?;
    let (process, tid) = split_task(line[..open].trim())?;
    let cpu = line[open + 1..close].parse::<u32>().ok().map(CpuId);

    let mut rest = line[close + 1..].trim_start();
    // At most one flags token precedes the timestamp
    for _ in 0..2 {
        let (token, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if let Some(timestamp) = token.strip_suffix(':').and_then(|t| t.parse::<f64>().ok()) {
            return Some(Header {
                timestamp,
                tid,
                cpu,
                process,
                duration: None,
                message: tail.trim_start(),
            });
        }
        rest = tail.trim_start();
    }
    None
}

/// First `[digits]` group in the line
fn find_cpu_brackets(line: &str) -> Option<(usize, usize)> {
    line.match_indices('[').find_map(|(open, _)| {
        let tail = &line[open + 1..];
        let close = tail.find(']')?;
        let digits = &tail[..close];
        (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .then_some((open, open + 1 + close))
    })
}

/// `kworker/u8:2-117` -> (`kworker/u8:2`, 117)
fn split_task(task: &str) -> Option<(&str, Tid)> {
    let (process, pid) = task.rsplit_once('-')?;
    let pid = pid.trim().parse::<u32>().ok()?;
    Some((process.trim(), Tid(pid)))
}

// ============================================================================
// Message Classification
// ============================================================================

/// `/* type: body */` in the function-graph message column
fn embedded_event(message: &str) -> Option<&str> {
    message
        .trim()
        .strip_prefix("/*")?
        .strip_suffix("*/")
        .map(str::trim)
}

fn classify_event(record: &mut TraceRecord, body: &str) {
    let (event_type, name) = body.split_once(": ").unwrap_or(("", body));
    record.name = name.to_string();

    if let Some(probe) = event_type.strip_suffix(KPROBE_ENTRY_SUFFIX) {
        record.kind = RecordKind::KprobeEnter;
        record.event_type = probe.to_string();
        return;
    }
    if let Some(probe) = event_type.strip_suffix(KPROBE_EXIT_SUFFIX) {
        record.kind = RecordKind::KprobeExit;
        record.event_type = probe.to_string();
        return;
    }

    record.event_type = event_type.to_string();
    record.kind = if event_type == EVENT_DEVICE_CALLBACK_START || event_type == EVENT_DEVICE_CALLBACK_END {
        RecordKind::DeviceEvent
    } else if event_type.is_empty() {
        RecordKind::Unknown
    } else {
        RecordKind::PhaseEvent
    };
}

fn classify_graph(record: &mut TraceRecord, message: &str) {
    let body = message.trim_start_matches(' ');
    let indent = message.len() - body.len();
    let body = body.trim_end();
    record.depth = u32::try_from(indent / 2).unwrap_or(u32::MAX);

    if let Some(rest) = body.strip_prefix('}') {
        record.kind = RecordKind::Return;
        record.name = rest
            .trim()
            .strip_prefix("/*")
            .and_then(|c| c.strip_suffix("*/"))
            .map(|n| n.trim().to_string())
            .unwrap_or_default();
    } else if body.ends_with('{') {
        record.kind = RecordKind::Call;
        record.name = function_name(body);
    } else if body.ends_with(';') {
        record.kind = RecordKind::Leaf;
        record.name = function_name(body);
    }
}

/// `dpm_run_callback() {` -> `dpm_run_callback`
fn function_name(body: &str) -> String {
    body.split_once('(')
        .map_or(body, |(name, _)| name)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fg() -> LineParser {
        LineParser::new(Dialect::FunctionGraph)
    }

    #[test]
    fn test_flat_device_event() {
        let line = "  kworker/u8:2-117   [000] d..2  6029.700151: device_pm_callback_start: i2c_designware i2c-0, parent: pci0000:00";
        let rec = LineParser::default().parse(line).unwrap();
        assert_eq!(rec.kind, RecordKind::DeviceEvent);
        assert_eq!(rec.tid, Tid(117));
        assert_eq!(rec.cpu, Some(CpuId(0)));
        assert_eq!(rec.process, "kworker/u8:2");
        assert!((rec.timestamp - 6029.700_151).abs() < 1e-9);
        assert_eq!(rec.event_type, "device_pm_callback_start");
        assert_eq!(rec.name, "i2c_designware i2c-0, parent: pci0000:00");
    }

    #[test]
    fn test_flat_without_flags_column() {
        let line = "bash-1234  [001]  100.000000: tracing_mark_write: SUSPEND START";
        let rec = LineParser::default().parse(line).unwrap();
        assert_eq!(rec.kind, RecordKind::PhaseEvent);
        assert_eq!(rec.event_type, "tracing_mark_write");
        assert_eq!(rec.name, "SUSPEND START");
    }

    #[test]
    fn test_flat_process_name_with_dashes() {
        let line = "irq-9-acpi-42 [002] .... 1.5: suspend_resume: dpm_suspend[2] begin";
        let rec = LineParser::default().parse(line).unwrap();
        assert_eq!(rec.process, "irq-9-acpi");
        assert_eq!(rec.tid, Tid(42));
    }

    #[test]
    fn test_kprobe_suffixes() {
        let parser = LineParser::default();
        let enter = parser
            .parse("sh-5 [000] .... 1.000: msleep_cal: (i2c_dw_xfer+0x1c/0x40) time=10")
            .unwrap();
        assert_eq!(enter.kind, RecordKind::KprobeEnter);
        assert_eq!(enter.event_type, "msleep");
        assert_eq!(enter.name, "(i2c_dw_xfer+0x1c/0x40) time=10");

        let exit = parser
            .parse("sh-5 [000] .... 1.010: msleep_ret: (i2c_dw_xfer+0x1c/0x40 <- msleep) arg1=0x0")
            .unwrap();
        assert_eq!(exit.kind, RecordKind::KprobeExit);
        assert_eq!(exit.event_type, "msleep");
    }

    #[test]
    fn test_function_graph_call_leaf_return() {
        let parser = fg();
        let call = parser
            .parse(" 6029.700151 |   0)  kworker-117   |               |  dpm_run_callback() {")
            .unwrap();
        assert_eq!(call.kind, RecordKind::Call);
        assert_eq!(call.depth, 0);
        assert_eq!(call.name, "dpm_run_callback");

        let leaf = parser
            .parse(" 6029.700155 |   0)  kworker-117   |   0.580 us    |    mutex_lock();")
            .unwrap();
        assert_eq!(leaf.kind, RecordKind::Leaf);
        assert_eq!(leaf.depth, 1);
        assert_eq!(leaf.name, "mutex_lock");
        assert!((leaf.duration_hint.unwrap() - 0.000_000_58).abs() < 1e-12);

        let ret = parser
            .parse(" 6029.700290 |   0)  kworker-117   | ! 139.014 us  |  } /* dpm_run_callback */")
            .unwrap();
        assert_eq!(ret.kind, RecordKind::Return);
        assert_eq!(ret.depth, 0);
        assert_eq!(ret.name, "dpm_run_callback");
        assert!(ret.duration_hint.is_some());
    }

    #[test]
    fn test_function_graph_bare_return() {
        let rec = fg()
            .parse(" 1.000000 |   1)  sh-9   |   2.000 us    |      }")
            .unwrap();
        assert_eq!(rec.kind, RecordKind::Return);
        assert_eq!(rec.depth, 2);
        assert!(rec.name.is_empty());
    }

    #[test]
    fn test_function_graph_embedded_event() {
        let rec = fg()
            .parse(" 6029.700291 |   0)  kworker-117   |               |  /* suspend_resume: dpm_suspend[2] end */")
            .unwrap();
        assert_eq!(rec.kind, RecordKind::PhaseEvent);
        assert_eq!(rec.event_type, "suspend_resume");
        assert_eq!(rec.name, "dpm_suspend[2] end");
        assert!(rec.is_event("suspend_resume"));
    }

    #[test]
    fn test_classification_is_total() {
        let parser = fg();
        for line in [
            "",
            "   ",
            "# tracer: function_graph",
            "garbage without structure",
            " 1.0 | x) |",
            " abc |   0)  sh-1   |   |  foo() {",
            " ------------------------------------------",
            " 1.000 |   0)  sh-1   |    |  => sh-2",
        ] {
            match parser.classify(line) {
                LineClass::Record(rec) => assert_eq!(rec.kind, RecordKind::Unknown, "{line}"),
                LineClass::Comment | LineClass::Unparseable => {}
            }
            assert!(LineParser::default().parse(line).map_or(true, |r| r.kind == RecordKind::Unknown));
        }
        assert_eq!(parser.classify("# tracer: nop"), LineClass::Comment);
    }

    #[test]
    fn test_carriage_return_is_stripped() {
        let rec = LineParser::default()
            .parse("sh-5 [000] .... 2.5: tracing_mark_write: RESUME COMPLETE\r\n")
            .unwrap();
        assert_eq!(rec.name, "RESUME COMPLETE");
    }
}
