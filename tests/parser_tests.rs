use convnwb_rs::events::{EventHandler, EventKind, LineRecord, Outcome, ParseState};
use convnwb_rs::parser::{parse_lines_log, parse_lines_sync, process_session, DiagnosticKind};
use convnwb_rs::{EventTable, Task};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn position_log(samples: &[(u64, f64, f64)]) -> String {
    samples
        .iter()
        .enumerate()
        .map(|(frame, (t, x, z))| format!("{t}\t{frame}\tPOSITION\t0\t{x}\t{z}\n"))
        .collect()
}

#[test]
fn session_bounds_are_first_and_last_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let log = "1234567\t1\tSTART\tSESSION\n1234600\t2\tPOSITION\t0\t1.0\t1.0\n1239999\t3\tEND\tSESSION\n";
    let path = write_file(dir.path(), "log.txt", log);

    let report = parse_lines_log(&path, None, &EventTable::default()).unwrap();
    assert_eq!(report.task.session.start_time, Some(1234567.0));
    assert_eq!(report.task.session.end_time, Some(1239999.0));
    assert_eq!(report.unhandled.get("START"), Some(&1));
    assert_eq!(report.unhandled.get("END"), Some(&1));
}

#[test]
fn position_stream_keeps_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let samples: Vec<(u64, f64, f64)> = (0..50)
        .map(|i| (i * 20, (i as f64) * 0.5, 100.0 - i as f64))
        .collect();
    let path = write_file(dir.path(), "log.txt", &position_log(&samples));

    let report = parse_lines_log(&path, None, &EventTable::default()).unwrap();
    let position = &report.task.position;

    assert_eq!(position.len(), samples.len());
    for (i, (t, x, z)) in samples.iter().enumerate() {
        assert_eq!(position.time[i], *t as f64);
        assert_eq!(position.x[i], *x);
        assert_eq!(position.z[i], *z);
    }
}

#[test]
fn malformed_lines_never_fail_the_parse() {
    let dir = tempfile::tempdir().unwrap();
    let log = "0\t1\tPOSITION\t0\t1.0\t2.0\n\
               garbage\n\
               10\t2\n\
               20\t3\tPOSITION\t0\tx\t2.0\n\
               oops\t4\tPOSITION\t0\t1.0\t2.0\n\
               30\t5\tPOSITION\t0\t1.5\t2.5\n";
    let path = write_file(dir.path(), "log.txt", log);

    let report = parse_lines_log(&path, None, &EventTable::default()).unwrap();

    assert_eq!(report.task.position.x, vec![1.0, 1.5]);
    let lines: Vec<u64> = report.diagnostics.iter().map(|d| d.line).collect();
    assert_eq!(lines, vec![2, 3, 4, 5]);
    assert_eq!(report.diagnostics[0].kind, DiagnosticKind::ShortLine { fields: 1 });
}

#[test]
fn parsing_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let log = "0\t1\tPOSITION\t0\t1.0\t2.0\n5\t2\tBAD\n100\t2\tPOSITION\t0\t1.5\t2.5\n";
    let path = write_file(dir.path(), "log.txt", log);
    let events = EventTable::default();

    let first = parse_lines_log(&path, None, &events).unwrap();
    let second = parse_lines_log(&path, None, &events).unwrap();
    assert_eq!(first.task, second.task);
    assert_eq!(first.diagnostics, second.diagnostics);
}

#[test]
fn sync_file_extends_existing_task() {
    let dir = tempfile::tempdir().unwrap();
    let log = write_file(dir.path(), "log.txt", "0\t1\tPOSITION\t0\t1.0\t2.0\n");
    let sync = write_file(dir.path(), "sync.txt", "0\t1\tON\r\n500\t31\tOFF\r\n1000\t61\tON\r\n");

    let report = process_session(&log, &EventTable::default(), true).unwrap();
    let task = parse_lines_sync(&sync, Some(report.task)).unwrap();

    assert_eq!(task.position.len(), 1);
    assert_eq!(task.sync_behavioral.len(), 3);
    assert_eq!(task.sync_behavioral.time[1], 500.0);
    assert_eq!(task.sync_behavioral.frame[1], "31");
    assert_eq!(task.sync_behavioral.on_off[1], "OFF");
}

#[test]
fn gzipped_logs_are_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.txt.gz");
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder
        .write_all(b"0\t1\tPOSITION\t0\t1.0\t2.0\n100\t2\tPOSITION\t0\t1.5\t2.5\n")
        .unwrap();
    encoder.finish().unwrap();

    let report = parse_lines_log(&path, None, &EventTable::default()).unwrap();
    assert_eq!(report.task.position.z, vec![2.0, 2.5]);
}

#[test]
fn configured_vocabulary_drives_accumulation() {
    let dir = tempfile::tempdir().unwrap();
    let log = "0\t1\tPHASE\tENCODING\tencoding\n\
               10\t2\tTRIAL\tSTART\n\
               15\t3\tHEADING\t0\t270\n\
               20\t4\tTRIAL\tITEM\tapple\n\
               30\t5\tTRIAL\tEND\n\
               40\t6\tTRIAL\tSTART\n";
    let path = write_file(dir.path(), "log.txt", log);

    let json = r#"{
        "PHASE": {"kind": "phase", "column": 4},
        "HEADING": {"kind": "head_direction", "degrees": 4},
        "TRIAL": {"kind": "by_subevent", "cases": {
            "START": {"kind": "trial_start"},
            "END": {"kind": "trial_stop"},
            "ITEM": {"kind": "trial_field", "field": "item", "column": 4}
        }}
    }"#;
    let kinds: BTreeMap<String, EventKind> = serde_json::from_str(json).unwrap();
    let report = parse_lines_log(&path, None, &EventTable::from_kinds(&kinds)).unwrap();
    let task = &report.task;

    assert!(report.is_clean());
    assert_eq!(task.trials.len(), 2);
    assert_eq!(task.trials[0].phase.as_deref(), Some("encoding"));
    assert_eq!(task.trials[0].fields["item"], "apple");
    assert_eq!(task.trials[0].stop_time, Some(30.0));
    assert_eq!(task.trials[1].index, 1);
    assert!(!task.trials[1].is_complete());
    assert_eq!(task.head_direction.degrees, vec![270.0]);
}

/// Counts every line of one event, without touching the task record.
#[derive(Debug)]
struct CountingHandler;

impl EventHandler for CountingHandler {
    fn handle(
        &self,
        line: &LineRecord<'_>,
        state: &mut ParseState,
        task: &mut Task,
    ) -> Result<Outcome, DiagnosticKind> {
        state.trial_counter += 1;
        let key = format!("marker_{}", state.trial_counter);
        task.experiment.insert(key, line.extra().collect::<Vec<_>>().join(","));
        Ok(Outcome::Handled)
    }
}

#[test]
fn custom_handlers_can_be_registered() {
    let dir = tempfile::tempdir().unwrap();
    let log = "0\t1\tMARKER\tA\tx\ty\n5\t2\tMARKER\tB\tz\n";
    let path = write_file(dir.path(), "log.txt", log);

    let mut events = EventTable::default();
    events.register("MARKER", CountingHandler);

    let report = parse_lines_log(&path, None, &events).unwrap();
    assert_eq!(report.task.experiment["marker_1"], "x,y");
    assert_eq!(report.task.experiment["marker_2"], "z");
}
