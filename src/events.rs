//! Event vocabulary of a task log.
//!
//! Which events a log contains, and where their values sit in a line, varies
//! between task builds. The parser therefore never matches event names
//! itself: it looks the third column up in an [`EventTable`] and hands the
//! line to whatever [`EventHandler`] is registered for it. Handlers come from
//! configuration ([`EventKind`]) or from code via [`EventTable::register`].

use csv::StringRecord;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::parser::DiagnosticKind;
use crate::task::{Task, Trial};

/// Minimum number of tab separated fields of a usable log line.
pub const MIN_FIELDS: usize = 4;

/// One log line, split into `[timestamp, frame, event, subevent, ...]`.
#[derive(Debug, Clone, Copy)]
pub struct LineRecord<'a> {
    pub line: u64,
    pub time: f64,
    pub frame: &'a str,
    pub event: &'a str,
    pub subevent: &'a str,
    record: &'a StringRecord,
}

impl<'a> LineRecord<'a> {
    pub fn from_record(line: u64, record: &'a StringRecord) -> Result<Self, DiagnosticKind> {
        if record.len() < MIN_FIELDS {
            return Err(DiagnosticKind::ShortLine {
                fields: record.len(),
            });
        }

        let time = parse_number(&record[0], 0)?;

        Ok(LineRecord {
            line,
            time,
            frame: &record[1],
            event: &record[2],
            subevent: &record[3],
            record,
        })
    }

    pub fn field(&self, column: usize) -> Result<&'a str, DiagnosticKind> {
        self.record
            .get(column)
            .ok_or(DiagnosticKind::MissingField { column })
    }

    pub fn number(&self, column: usize) -> Result<f64, DiagnosticKind> {
        parse_number(self.field(column)?, column)
    }

    /// Fields after the subevent column.
    pub fn extra(&self) -> impl Iterator<Item = &'a str> {
        self.record.iter().skip(MIN_FIELDS)
    }
}

fn parse_number(value: &str, column: usize) -> Result<f64, DiagnosticKind> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DiagnosticKind::BadNumber {
            column,
            value: value.to_string(),
        })
}

/// Flags and counters carried from one line to the next.
#[derive(Debug, Clone, Default)]
pub struct ParseState {
    pub trial_counter: usize,
    pub in_trial: bool,
    pub task_phase: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    Unhandled,
}

pub trait EventHandler: fmt::Debug {
    fn handle(
        &self,
        line: &LineRecord<'_>,
        state: &mut ParseState,
        task: &mut Task,
    ) -> Result<Outcome, DiagnosticKind>;
}

/// Handlers that can be declared in the configuration file.
///
/// Column indices count from zero over the whole line, so the first field
/// after the subevent is column 4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Position { x: usize, z: usize },
    HeadDirection { degrees: usize },
    TrialStart,
    TrialStop,
    TrialField { field: String, column: usize },
    Phase { column: usize },
    Experiment { key: String, column: usize },
    BySubevent { cases: BTreeMap<String, EventKind> },
    Ignore,
}

impl EventHandler for EventKind {
    fn handle(
        &self,
        line: &LineRecord<'_>,
        state: &mut ParseState,
        task: &mut Task,
    ) -> Result<Outcome, DiagnosticKind> {
        match self {
            EventKind::Position { x, z } => {
                let x = line.number(*x)?;
                let z = line.number(*z)?;
                task.position.push(line.time, x, z);
            }
            EventKind::HeadDirection { degrees } => {
                let degrees = line.number(*degrees)?;
                task.head_direction.push(line.time, degrees);
            }
            EventKind::TrialStart => {
                if state.in_trial {
                    debug!(
                        "line {}: trial {} started before the previous one stopped",
                        line.line, state.trial_counter
                    );
                }
                task.trials.push(Trial {
                    index: state.trial_counter,
                    start_time: line.time,
                    stop_time: None,
                    phase: state.task_phase.clone(),
                    fields: BTreeMap::new(),
                });
                state.trial_counter += 1;
                state.in_trial = true;
            }
            EventKind::TrialStop => {
                if !state.in_trial {
                    return Err(DiagnosticKind::StrayTrialStop);
                }
                if let Some(trial) = task.current_trial_mut() {
                    trial.stop_time = Some(line.time);
                }
                state.in_trial = false;
            }
            EventKind::TrialField { field, column } => {
                let value = line.field(*column)?;
                let trial = task
                    .current_trial_mut()
                    .ok_or(DiagnosticKind::NoOpenTrial)?;
                trial.fields.insert(field.clone(), value.to_string());
            }
            EventKind::Phase { column } => {
                state.task_phase = Some(line.field(*column)?.to_string());
            }
            EventKind::Experiment { key, column } => {
                let value = line.field(*column)?;
                task.experiment.insert(key.clone(), value.to_string());
            }
            EventKind::BySubevent { cases } => {
                return match cases.get(line.subevent) {
                    Some(kind) => kind.handle(line, state, task),
                    None => Ok(Outcome::Unhandled),
                };
            }
            EventKind::Ignore => {}
        }
        Ok(Outcome::Handled)
    }
}

/// The only event whose layout is fixed across task builds.
pub fn default_events() -> BTreeMap<String, EventKind> {
    let mut events = BTreeMap::new();
    events.insert("POSITION".to_string(), EventKind::Position { x: 4, z: 5 });
    events
}

/// Maps the event column of a log line to its handler.
#[derive(Debug)]
pub struct EventTable {
    handlers: BTreeMap<String, Box<dyn EventHandler>>,
}

impl EventTable {
    pub fn new() -> Self {
        EventTable {
            handlers: BTreeMap::new(),
        }
    }

    pub fn from_kinds(kinds: &BTreeMap<String, EventKind>) -> Self {
        let mut table = EventTable::new();
        for (event, kind) in kinds {
            table.register(event.clone(), kind.clone());
        }
        table
    }

    /// Registers `handler` for `event`, replacing any previous handler.
    pub fn register<H>(&mut self, event: impl Into<String>, handler: H) -> &mut Self
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(event.into(), Box::new(handler));
        self
    }

    pub fn get(&self, event: &str) -> Option<&dyn EventHandler> {
        self.handlers.get(event).map(|h| h.as_ref())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for EventTable {
    fn default() -> Self {
        EventTable::from_kinds(&default_events())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str) -> StringRecord {
        StringRecord::from(line.split('\t').collect::<Vec<_>>())
    }

    #[test]
    fn short_line_is_rejected() {
        let rec = record("10\t1\tPOSITION");
        let err = LineRecord::from_record(1, &rec).unwrap_err();
        assert_eq!(err, DiagnosticKind::ShortLine { fields: 3 });
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let rec = record("abc\t1\tPOSITION\t0");
        let err = LineRecord::from_record(1, &rec).unwrap_err();
        assert!(matches!(err, DiagnosticKind::BadNumber { column: 0, .. }));
    }

    #[test]
    fn trial_events_open_and_close_trials() {
        let mut task = Task::new();
        let mut state = ParseState::default();
        let start = record("10\t1\tTRIAL\tSTART");
        let field = record("12\t2\tTRIAL\tINFO\tred");
        let stop = record("20\t3\tTRIAL\tEND");

        let kind = EventKind::BySubevent {
            cases: BTreeMap::from([
                ("START".to_string(), EventKind::TrialStart),
                ("END".to_string(), EventKind::TrialStop),
                (
                    "INFO".to_string(),
                    EventKind::TrialField {
                        field: "color".to_string(),
                        column: 4,
                    },
                ),
            ]),
        };

        for (n, rec) in [&start, &field, &stop].into_iter().enumerate() {
            let line = LineRecord::from_record(n as u64 + 1, rec).unwrap();
            assert_eq!(kind.handle(&line, &mut state, &mut task), Ok(Outcome::Handled));
        }

        assert_eq!(task.trials.len(), 1);
        assert_eq!(task.trials[0].start_time, 10.0);
        assert_eq!(task.trials[0].stop_time, Some(20.0));
        assert_eq!(task.trials[0].fields["color"], "red");
        assert!(!state.in_trial);

        let line = LineRecord::from_record(4, &stop).unwrap();
        assert_eq!(
            kind.handle(&line, &mut state, &mut task),
            Err(DiagnosticKind::StrayTrialStop)
        );
    }

    #[test]
    fn unknown_subevent_is_unhandled() {
        let kind = EventKind::BySubevent {
            cases: BTreeMap::new(),
        };
        let rec = record("10\t1\tTRIAL\tPAUSE");
        let line = LineRecord::from_record(1, &rec).unwrap();
        let mut task = Task::new();
        let outcome = kind.handle(&line, &mut ParseState::default(), &mut task);
        assert_eq!(outcome, Ok(Outcome::Unhandled));
    }

    #[test]
    fn event_kinds_deserialize_from_config() {
        let json = r#"{
            "HEADING": {"kind": "head_direction", "degrees": 4},
            "TASK": {"kind": "experiment", "key": "language", "column": 4}
        }"#;
        let kinds: BTreeMap<String, EventKind> = serde_json::from_str(json).unwrap();
        assert_eq!(kinds["HEADING"], EventKind::HeadDirection { degrees: 4 });
        let table = EventTable::from_kinds(&kinds);
        assert_eq!(table.len(), 2);
        assert!(table.get("POSITION").is_none());
    }
}
