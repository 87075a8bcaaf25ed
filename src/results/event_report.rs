//! Per-run event reports
//!
//! Every runner invocation writes one `open-test-report.xml` into its own
//! `junit-<n>` directory. The file holds one element per line:
//!
//! ```text
//! <?xml version="1.0" encoding="UTF-8"?>
//! <events run="junit-3">
//!   <started id="1" unit="a.CalcTests" name="CalcTests" attempt="1" time="..."/>
//!   <finished id="1" unit="a.CalcTests" attempt="1" status="SUCCESSFUL" duration-ms="12" executor="local" time="..."/>
//! </events>
//! ```

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::models::{AttemptResult, TestStatus, TestUnit};

/// Prefix shared by every run directory
pub const RUN_DIR_PREFIX: &str = "junit-";

/// Event report file name inside a run directory
pub const REPORT_FILE_NAME: &str = "open-test-report.xml";

/// A `junit-*` directory under the output root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunDirectory {
    /// Run number, when the suffix is numeric
    pub number: Option<u64>,
    pub name: String,
    pub path: PathBuf,
}

impl RunDirectory {
    fn from_path(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        let suffix = name.strip_prefix(RUN_DIR_PREFIX)?;
        Some(Self {
            number: suffix.parse().ok(),
            name,
            path,
        })
    }

    pub fn report_path(&self) -> PathBuf {
        self.path.join(REPORT_FILE_NAME)
    }
}

/// List run directories under `root`, ordered by run number then name.
/// A missing root has no run directories.
pub fn list_run_directories(root: &Path) -> HarnessResult<Vec<RunDirectory>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HarnessError::io(root, e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(HarnessError::io(root, e)),
        };
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        if let Some(dir) = RunDirectory::from_path(entry.path()) {
            dirs.push(dir);
        }
    }

    dirs.sort_by(|a, b| {
        (a.number.unwrap_or(u64::MAX), &a.name).cmp(&(b.number.unwrap_or(u64::MAX), &b.name))
    });
    Ok(dirs)
}

/// Allocates fresh, collision-free run directories
#[derive(Debug)]
pub struct RunDirAllocator {
    root: PathBuf,
    next: AtomicU64,
}

impl RunDirAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next: AtomicU64::new(1),
        }
    }

    /// Create the next `junit-<n>` directory. Creation is the claim, so two
    /// processes sharing the root never receive the same directory.
    pub fn allocate(&self) -> HarnessResult<RunDirectory> {
        fs::create_dir_all(&self.root).map_err(|e| HarnessError::io(&self.root, e))?;

        let floor = list_run_directories(&self.root)?
            .iter()
            .filter_map(|d| d.number)
            .max()
            .unwrap_or(0)
            + 1;
        let mut candidate = self.next.fetch_max(floor, Ordering::SeqCst).max(floor);

        loop {
            let name = format!("{RUN_DIR_PREFIX}{candidate}");
            let path = self.root.join(&name);
            match fs::create_dir(&path) {
                Ok(()) => {
                    self.next.fetch_max(candidate + 1, Ordering::SeqCst);
                    debug!("Allocated run directory {}", path.display());
                    return Ok(RunDirectory {
                        number: Some(candidate),
                        name,
                        path,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => candidate += 1,
                Err(e) => return Err(HarnessError::io(path, e)),
            }
        }
    }
}

/// A single report event
#[derive(Clone, Debug, PartialEq)]
pub enum ReportEvent {
    Started {
        id: u64,
        unit_id: String,
        name: String,
        attempt: u32,
        time: DateTime<Utc>,
    },
    Finished {
        id: u64,
        unit_id: String,
        attempt: u32,
        status: TestStatus,
        duration_ms: u64,
        executor: String,
        time: DateTime<Utc>,
        message: Option<String>,
    },
}

impl ReportEvent {
    pub fn unit_id(&self) -> &str {
        match self {
            ReportEvent::Started { unit_id, .. } | ReportEvent::Finished { unit_id, .. } => unit_id,
        }
    }

    fn to_xml(&self) -> String {
        match self {
            ReportEvent::Started {
                id,
                unit_id,
                name,
                attempt,
                time,
            } => format!(
                r#"  <started id="{}" unit="{}" name="{}" attempt="{}" time="{}"/>"#,
                id,
                escape_xml(unit_id),
                escape_xml(name),
                attempt,
                format_time(time)
            ),
            ReportEvent::Finished {
                id,
                unit_id,
                attempt,
                status,
                duration_ms,
                executor,
                time,
                message,
            } => {
                let mut line = format!(
                    r#"  <finished id="{}" unit="{}" attempt="{}" status="{}" duration-ms="{}" executor="{}" time="{}""#,
                    id,
                    escape_xml(unit_id),
                    attempt,
                    status.event_name(),
                    duration_ms,
                    escape_xml(executor),
                    format_time(time)
                );
                if let Some(message) = message {
                    line.push_str(&format!(r#" message="{}""#, escape_xml(message)));
                }
                line.push_str("/>");
                line
            }
        }
    }
}

/// Events of one runner invocation
#[derive(Clone, Debug, PartialEq)]
pub struct EventReport {
    /// Name of the run directory the report belongs to
    pub run: String,
    pub events: Vec<ReportEvent>,
}

impl EventReport {
    /// Build the report for a finished attempt round
    pub fn from_results(run: impl Into<String>, units: &[TestUnit], results: &[AttemptResult]) -> Self {
        let names: HashMap<&str, String> = units
            .iter()
            .map(|u| (u.id.as_str(), u.display_name()))
            .collect();
        let finished_at = Utc::now();

        let mut events = Vec::with_capacity(results.len() * 2);
        for (idx, result) in results.iter().enumerate() {
            let id = idx as u64 + 1;
            let started_at = finished_at - Duration::milliseconds(result.duration_ms as i64);
            events.push(ReportEvent::Started {
                id,
                unit_id: result.unit_id.clone(),
                name: names
                    .get(result.unit_id.as_str())
                    .cloned()
                    .unwrap_or_else(|| result.unit_id.clone()),
                attempt: result.attempt,
                time: started_at,
            });
            events.push(ReportEvent::Finished {
                id,
                unit_id: result.unit_id.clone(),
                attempt: result.attempt,
                status: result.status,
                duration_ms: result.duration_ms,
                executor: result.executor.clone(),
                time: finished_at,
                message: result.message.clone(),
            });
        }

        Self {
            run: run.into(),
            events,
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!("<events run=\"{}\">\n", escape_xml(&self.run)));
        for event in &self.events {
            xml.push_str(&event.to_xml());
            xml.push('\n');
        }
        xml.push_str("</events>\n");
        xml
    }

    /// Write the report into `dir`, flushed and synced before returning.
    /// The file appears under its final name only once complete.
    pub fn write(&self, dir: &Path) -> HarnessResult<PathBuf> {
        let path = dir.join(REPORT_FILE_NAME);
        let tmp = dir.join(format!(".{REPORT_FILE_NAME}.tmp"));

        let file = File::create(&tmp).map_err(|e| HarnessError::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(self.to_xml().as_bytes())
            .map_err(|e| HarnessError::io(&tmp, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| HarnessError::io(&tmp, e.into_error()))?;
        file.sync_all().map_err(|e| HarnessError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path).map_err(|e| HarnessError::io(&path, e))?;
        debug!("Wrote {} events to {}", self.events.len(), path.display());
        Ok(path)
    }

    pub fn read(path: &Path) -> HarnessResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> HarnessResult<Self> {
        let mut run = None;
        let mut closed = false;
        let mut events = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with("<?xml") {
                continue;
            }
            if closed {
                return Err(HarnessError::malformed(path, line_no, "content after </events>"));
            }
            if line == "</events>" {
                if run.is_none() {
                    return Err(HarnessError::malformed(path, line_no, "</events> without <events>"));
                }
                closed = true;
                continue;
            }

            let (element, attrs) =
                parse_element(line).map_err(|reason| HarnessError::malformed(path, line_no, reason))?;
            let field = |key: &str| -> HarnessResult<String> {
                attrs
                    .get(key)
                    .cloned()
                    .ok_or_else(|| HarnessError::malformed(path, line_no, format!("missing attribute {key}")))
            };
            let number = |key: &str| -> HarnessResult<u64> {
                field(key)?
                    .parse()
                    .map_err(|_| HarnessError::malformed(path, line_no, format!("attribute {key} is not a number")))
            };
            let attempt = || -> HarnessResult<u32> {
                field("attempt")?.parse().map_err(|_| {
                    HarnessError::malformed(path, line_no, "attribute attempt is not a valid attempt number")
                })
            };
            let time = |key: &str| -> HarnessResult<DateTime<Utc>> {
                DateTime::parse_from_rfc3339(&field(key)?)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| HarnessError::malformed(path, line_no, format!("bad {key}: {e}")))
            };

            match element {
                "events" => {
                    if run.is_some() {
                        return Err(HarnessError::malformed(path, line_no, "nested <events>"));
                    }
                    run = Some(field("run")?);
                }
                _ if run.is_none() => {
                    return Err(HarnessError::malformed(path, line_no, "event outside <events>"));
                }
                "started" => events.push(ReportEvent::Started {
                    id: number("id")?,
                    unit_id: field("unit")?,
                    name: field("name")?,
                    attempt: attempt()?,
                    time: time("time")?,
                }),
                "finished" => {
                    let status = TestStatus::from_event_name(&field("status")?).ok_or_else(|| {
                        HarnessError::malformed(path, line_no, "unknown status")
                    })?;
                    events.push(ReportEvent::Finished {
                        id: number("id")?,
                        unit_id: field("unit")?,
                        attempt: attempt()?,
                        status,
                        duration_ms: number("duration-ms")?,
                        executor: field("executor")?,
                        time: time("time")?,
                        message: attrs.get("message").cloned(),
                    });
                }
                other => {
                    return Err(HarnessError::malformed(
                        path,
                        line_no,
                        format!("unknown element <{other}>"),
                    ))
                }
            }
        }

        match run {
            Some(run) if closed => Ok(Self { run, events }),
            _ => Err(HarnessError::malformed(
                path,
                content.lines().count(),
                "unterminated report",
            )),
        }
    }
}

/// Split `<name a="1" b="2"/>` (or `<name ...>`) into name and attributes
fn parse_element(line: &str) -> Result<(&str, HashMap<String, String>), String> {
    let inner = line
        .strip_prefix('<')
        .and_then(|l| l.strip_suffix("/>").or_else(|| l.strip_suffix('>')))
        .ok_or_else(|| format!("not an element: {line}"))?;

    let (name, mut rest) = match inner.find(char::is_whitespace) {
        Some(idx) => (&inner[..idx], &inner[idx..]),
        None => (inner, ""),
    };
    if name.is_empty() {
        return Err("empty element name".to_string());
    }

    let mut attrs = HashMap::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let eq = rest.find('=').ok_or("attribute without value")?;
        let key = rest[..eq].trim();
        let value_part = rest[eq + 1..]
            .strip_prefix('"')
            .ok_or_else(|| format!("unquoted value for {key}"))?;
        let end = value_part
            .find('"')
            .ok_or_else(|| format!("unterminated value for {key}"))?;
        attrs.insert(key.to_string(), unescape_xml(&value_part[..end]));
        rest = &value_part[end + 1..];
    }

    Ok((name, attrs))
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
        .replace('\t', "&#9;")
}

fn unescape_xml(s: &str) -> String {
    s.replace("&#9;", "\t")
        .replace("&#13;", "\r")
        .replace("&#10;", "\n")
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}
