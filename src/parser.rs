use csv::StringRecord;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

use crate::error::{ConvError, Result};
use crate::events::{EventTable, LineRecord, Outcome, ParseState};
use crate::reader::{get_file_reader, tab_reader};
use crate::task::{process_task, Task};

/// Why a log line did not contribute to the task record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiagnosticKind {
    #[error("unexpected line length ({fields} fields)")]
    ShortLine { fields: usize },

    #[error("column {column} is not a number: '{value}'")]
    BadNumber { column: usize, value: String },

    #[error("column {column} is missing")]
    MissingField { column: usize },

    #[error("trial stop without an open trial")]
    StrayTrialStop,

    #[error("trial field before the first trial")]
    NoOpenTrial,

    #[error("unreadable line: {0}")]
    Unreadable(String),

    #[error("log file is empty")]
    EmptyLog,
}

/// A line-level parse anomaly. The line is skipped and parsing continues.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub line: u64,
    pub kind: DiagnosticKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}

/// Result of a permissive parse: whatever could be collected, plus a record
/// of every line that was skipped.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub task: Task,
    pub diagnostics: Vec<Diagnostic>,
    /// Number of lines per event name that had no handler.
    pub unhandled: BTreeMap<String, usize>,
}

impl ParseReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn print_summary(&self) {
        self.task.print_summary();

        println!("\nDiagnostics: {}", self.diagnostics.len());
        for diagnostic in &self.diagnostics {
            println!("- {}", diagnostic);
        }

        if !self.unhandled.is_empty() {
            println!("\nUnhandled events:");
            for (event, count) in &self.unhandled {
                println!("- {}: {}", event, count);
            }
        }
    }

    fn note(&mut self, line: u64, kind: DiagnosticKind) {
        let diagnostic = Diagnostic { line, kind };
        warn!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }
}

/// Parses a task log file, collecting its information into a task record.
///
/// `task` is extended when given, otherwise a new record is created. Only a
/// file that cannot be opened or read is an error; malformed lines end up in
/// [`ParseReport::diagnostics`].
pub fn parse_lines_log<P: AsRef<Path>>(
    file_path: P,
    task: Option<Task>,
    events: &EventTable,
) -> Result<ParseReport> {
    let reader = get_file_reader(file_path.as_ref())?;
    parse_log_reader(reader, task, events)
}

pub fn parse_log_reader<R: Read>(
    reader: R,
    task: Option<Task>,
    events: &EventTable,
) -> Result<ParseReport> {
    let mut report = ParseReport {
        task: task.unwrap_or_default(),
        ..ParseReport::default()
    };

    let mut records = Vec::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut line_no = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        // Blank lines are kept so they are reported like any other short line.
        match std::str::from_utf8(&buf) {
            Ok(text) => {
                let fields: Vec<&str> = text.trim_end_matches(['\n', '\r']).split('\t').collect();
                records.push((line_no, StringRecord::from(fields)));
            }
            Err(err) => report.note(line_no, DiagnosticKind::Unreadable(err.to_string())),
        }
    }

    // Session bounds come from the first and last non-blank line, whatever
    // they hold.
    let mut filled = records.iter().filter(|(_, record)| !is_blank(record));
    match (filled.next(), filled.next_back()) {
        (Some((_, first)), last) => {
            let last = last.map(|(_, record)| record).unwrap_or(first);
            report.task.session.start_time = leading_time(first);
            report.task.session.end_time = leading_time(last);
        }
        _ => report.note(0, DiagnosticKind::EmptyLog),
    }

    let mut state = ParseState::default();
    for (line_no, record) in &records {
        let line_no = *line_no;

        let line = match LineRecord::from_record(line_no, record) {
            Ok(line) => line,
            Err(kind) => {
                report.note(line_no, kind);
                continue;
            }
        };

        let outcome = match events.get(line.event) {
            Some(handler) => handler.handle(&line, &mut state, &mut report.task),
            None => Ok(Outcome::Unhandled),
        };

        match outcome {
            Ok(Outcome::Handled) => {}
            Ok(Outcome::Unhandled) => {
                *report.unhandled.entry(line.event.to_string()).or_insert(0) += 1;
            }
            Err(kind) => report.note(line_no, kind),
        }
    }

    Ok(report)
}

fn is_blank(record: &StringRecord) -> bool {
    record.len() == 1 && record[0].trim().is_empty()
}

fn leading_time(record: &StringRecord) -> Option<f64> {
    record
        .get(0)
        .and_then(|t| t.trim().parse::<f64>().ok())
        .filter(|t| t.is_finite())
}

/// Parses timestamp information from a synchronization file.
///
/// Each line holds `time, frame, on_off` and becomes one entry of
/// `task.sync_behavioral`, in file order.
pub fn parse_lines_sync<P: AsRef<Path>>(file_path: P, task: Option<Task>) -> Result<Task> {
    let reader = get_file_reader(file_path.as_ref())?;
    parse_sync_reader(reader, task)
}

pub fn parse_sync_reader<R: Read>(reader: R, task: Option<Task>) -> Result<Task> {
    let mut task = task.unwrap_or_default();

    for result in tab_reader(reader).records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if record.len() < 3 {
            return Err(ConvError::Sync {
                line,
                reason: format!("expected 3 fields, found {}", record.len()),
            });
        }

        let time = record[0]
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite())
            .ok_or_else(|| ConvError::Sync {
                line,
                reason: format!("invalid time '{}'", &record[0]),
            })?;

        task.sync_behavioral
            .push(time, record[1].to_string(), record[2].to_string());
    }

    Ok(task)
}

/// Parses a session's task log, optionally deriving secondary measures.
pub fn process_session<P: AsRef<Path>>(
    file_path_log: P,
    events: &EventTable,
    process: bool,
) -> Result<ParseReport> {
    let mut report = parse_lines_log(&file_path_log, None, events)?;

    info!(
        "parsing completed for {} ({} diagnostics)",
        file_path_log.as_ref().display(),
        report.diagnostics.len()
    );

    if process {
        report.task = process_task(report.task);
    }

    Ok(report)
}
