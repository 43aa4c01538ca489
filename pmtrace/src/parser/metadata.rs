//! Comment-line metadata (`# ...`) written by the capture tool
//!
//! The header is read once per file; per-run entries (`fwsuspend`,
//! `enter_sleep_error`) are indexed by run number.

use chrono::{NaiveDate, NaiveDateTime};
use log::warn;
use serde::Serialize;
use std::collections::BTreeMap;

use super::line::Dialect;

/// `# suspend-081523-101112 myhost mem 6.5.0-rc4`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestStamp {
    pub time: NaiveDateTime,
    pub host: String,
    pub mode: String,
    pub kernel: String,
}

/// Firmware suspend/resume times (microseconds) for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FirmwareTimes {
    pub suspend: u64,
    pub resume: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataLine {
    Tracer(Dialect),
    Stamp(TestStamp),
    SysInfo(BTreeMap<String, String>),
    Command(String),
    KernelParams(String),
    Firmware(FirmwareTimes),
    EnterSleepError(String),
    Other,
}

/// Parse one comment line. Unrecognised comments give [`MetadataLine::Other`].
#[must_use]
pub fn parse_comment(line: &str) -> MetadataLine {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(body) = line.strip_prefix('#') else {
        return MetadataLine::Other;
    };
    let body = body.trim_start();

    if let Some(tracer) = body.strip_prefix("tracer:") {
        return match tracer.trim() {
            "function_graph" => MetadataLine::Tracer(Dialect::FunctionGraph),
            "nop" => MetadataLine::Tracer(Dialect::Flat),
            other => {
                warn!("Invalid tracer format: [{other}], keeping current dialect");
                MetadataLine::Other
            }
        };
    }
    if let Some(rest) = body.strip_prefix("sysinfo ") {
        let fields = rest
            .split('|')
            .filter_map(|f| f.trim().split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        return MetadataLine::SysInfo(fields);
    }
    if let Some(cmd) = body.strip_prefix("command |") {
        return MetadataLine::Command(cmd.trim().to_string());
    }
    if let Some(params) = body.strip_prefix("kparams |") {
        return MetadataLine::KernelParams(params.trim().to_string());
    }
    if let Some(rest) = body.strip_prefix("fwsuspend ") {
        return parse_firmware(rest).map_or(MetadataLine::Other, MetadataLine::Firmware);
    }
    if let Some(err) = body.strip_prefix("enter_sleep_error ") {
        return MetadataLine::EnterSleepError(err.trim().to_string());
    }
    parse_stamp(body).map_or(MetadataLine::Other, MetadataLine::Stamp)
}

/// `<digits> fwresume <digits>`
fn parse_firmware(rest: &str) -> Option<FirmwareTimes> {
    let mut parts = rest.split_whitespace();
    let suspend = parts.next()?.parse().ok()?;
    if parts.next()? != "fwresume" {
        return None;
    }
    let resume = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some(FirmwareTimes { suspend, resume })
}

/// `<label>-MMDDYY-HHMMSS <host> <mode> <kernel>`
fn parse_stamp(body: &str) -> Option<TestStamp> {
    let mut tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.len() < 4 {
        return None;
    }
    let mut id = tokens.remove(0).split('-');
    let label = id.next()?;
    let date = id.next()?;
    let clock = id.next()?;
    if !label.bytes().all(|b| b.is_ascii_lowercase())
        || id.next().is_some()
        || date.len() != 6
        || clock.len() != 6
    {
        return None;
    }
    let num = |s: &str, at: usize| s.get(at..at + 2).and_then(|v| v.parse::<u32>().ok());
    let day = NaiveDate::from_ymd_opt(
        2000 + i32::try_from(num(date, 4)?).ok()?,
        num(date, 0)?,
        num(date, 2)?,
    )?;
    let time = day.and_hms_opt(num(clock, 0)?, num(clock, 2)?, num(clock, 4)?)?;

    let kernel = tokens.pop()?.to_string();
    let mode = tokens.pop()?.to_string();
    Some(TestStamp {
        time,
        host: tokens.join(" "),
        mode,
        kernel,
    })
}

/// Wall-clock time carried by a run marker:
/// `SUSPEND START 20230815-10:11:12.123456`
#[must_use]
pub fn parse_marker_time(marker: &str, text: &str) -> Option<NaiveDateTime> {
    let stamp = text.strip_prefix(marker)?.trim();
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d-%H:%M:%S%.f").ok()
}

/// Everything the comment lines told us, accumulated over the file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogHeader {
    pub stamp: Option<TestStamp>,
    pub sysinfo: BTreeMap<String, String>,
    pub command: Option<String>,
    pub kernel_params: Option<String>,
    pub firmware: Vec<FirmwareTimes>,
    pub enter_errors: Vec<String>,
}

impl LogHeader {
    /// Fold one comment into the header; returns a dialect switch if the
    /// line announced one
    pub fn apply(&mut self, line: MetadataLine) -> Option<Dialect> {
        match line {
            MetadataLine::Tracer(dialect) => return Some(dialect),
            MetadataLine::Stamp(stamp) => self.stamp = Some(stamp),
            MetadataLine::SysInfo(fields) => self.sysinfo = fields,
            MetadataLine::Command(cmd) => self.command = Some(cmd),
            MetadataLine::KernelParams(params) => self.kernel_params = Some(params),
            MetadataLine::Firmware(fw) => self.firmware.push(fw),
            MetadataLine::EnterSleepError(err) => self.enter_errors.push(err),
            MetadataLine::Other => {}
        }
        None
    }

    /// Suspend mode from the stamp line (`mem`, `freeze`, `disk`, ...)
    #[must_use]
    pub fn mode(&self) -> &str {
        self.stamp.as_ref().map_or("mem", |s| s.mode.as_str())
    }

    /// Metadata snapshot attached to run `index`
    #[must_use]
    pub fn for_run(&self, index: usize) -> RunMetadata {
        let stamp = self.stamp.as_ref();
        RunMetadata {
            host: stamp.map(|s| s.host.clone()),
            mode: self.mode().to_string(),
            kernel: stamp.map(|s| s.kernel.clone()),
            test_time: stamp.map(|s| s.time),
            sysinfo: self.sysinfo.clone(),
            command: self.command.clone(),
            kernel_params: self.kernel_params.clone(),
            firmware: self
                .firmware
                .get(index)
                .copied()
                .filter(|fw| fw.suspend > 0 || fw.resume > 0),
            enter_error: self.enter_errors.get(index).cloned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunMetadata {
    pub host: Option<String>,
    pub mode: String,
    pub kernel: Option<String>,
    pub test_time: Option<NaiveDateTime>,
    pub sysinfo: BTreeMap<String, String>,
    pub command: Option<String>,
    pub kernel_params: Option<String>,
    pub firmware: Option<FirmwareTimes>,
    pub enter_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_line() {
        let MetadataLine::Stamp(stamp) = parse_comment("# suspend-081523-101112 lab box mem 6.5.0-rc4") else {
            panic!("expected stamp");
        };
        assert_eq!(stamp.host, "lab box");
        assert_eq!(stamp.mode, "mem");
        assert_eq!(stamp.kernel, "6.5.0-rc4");
        assert_eq!(stamp.time.to_string(), "2023-08-15 10:11:12");
    }

    #[test]
    fn test_tracer_lines() {
        assert_eq!(
            parse_comment("# tracer: function_graph"),
            MetadataLine::Tracer(Dialect::FunctionGraph)
        );
        assert_eq!(parse_comment("# tracer: nop"), MetadataLine::Tracer(Dialect::Flat));
        assert_eq!(parse_comment("# tracer: blk"), MetadataLine::Other);
    }

    #[test]
    fn test_firmware_and_errors_are_per_run() {
        let mut header = LogHeader::default();
        header.apply(parse_comment("# fwsuspend 0 fwresume 0"));
        header.apply(parse_comment("# fwsuspend 1200 fwresume 3400"));
        header.apply(parse_comment("# enter_sleep_error write error: Device busy"));

        assert_eq!(header.for_run(0).firmware, None);
        assert_eq!(
            header.for_run(1).firmware,
            Some(FirmwareTimes {
                suspend: 1200,
                resume: 3400
            })
        );
        assert_eq!(
            header.for_run(0).enter_error.as_deref(),
            Some("write error: Device busy")
        );
        assert_eq!(header.for_run(1).enter_error, None);
    }

    #[test]
    fn test_sysinfo_fields() {
        let MetadataLine::SysInfo(fields) =
            parse_comment("# sysinfo | man:LENOVO | plat:ThinkPad | cpu:Intel(R) Core(TM) i7")
        else {
            panic!("expected sysinfo");
        };
        assert_eq!(fields.get("man").map(String::as_str), Some("LENOVO"));
        assert_eq!(fields.get("cpu").map(String::as_str), Some("Intel(R) Core(TM) i7"));
    }

    #[test]
    fn test_column_header_comments_are_ignored() {
        assert_eq!(parse_comment("#           TASK-PID   CPU#  TIMESTAMP  FUNCTION"), MetadataLine::Other);
        assert_eq!(parse_comment("#              | |       |   |         |"), MetadataLine::Other);
    }

    #[test]
    fn test_marker_time() {
        let t = parse_marker_time("SUSPEND START", "SUSPEND START 20230815-10:11:12.250000").unwrap();
        assert_eq!(t.to_string(), "2023-08-15 10:11:12.250");
        assert!(parse_marker_time("SUSPEND START", "SUSPEND START").is_none());
    }
}
