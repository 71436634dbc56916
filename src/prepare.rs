use log::{info, warn};
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{ConvError, Result};
use crate::io::{get_files, save_task_obj, Paths, SessionId};
use crate::parser::{parse_lines_sync, process_session, ParseReport};

/// Parses the behavioral files of a session and saves the task record.
///
/// The first file in the session's recordings folder whose name contains
/// `files.log_select` is the task log; a file containing `files.sync_select`
/// is parsed as sync file when present.
pub fn prepare_data(config: &Config, session: &SessionId) -> Result<(PathBuf, ParseReport)> {
    let paths = Paths::for_session(&config.project_path, session);
    let session_name = session.name();

    info!("preparing data for: {}", session_name);

    let log_files = get_files(&paths.recordings, Some(&config.files.log_select), None)?;
    let log_file = log_files.first().ok_or_else(|| ConvError::NoFiles {
        folder: paths.recordings.clone(),
        select: config.files.log_select.clone(),
    })?;

    let events = config.event_table();
    let mut report = process_session(paths.recordings.join(log_file), &events, true)?;

    let sync_files = get_files(&paths.recordings, Some(&config.files.sync_select), None)?;
    if let Some(sync_file) = sync_files.first() {
        report.task = parse_lines_sync(paths.recordings.join(sync_file), Some(report.task))?;
    }

    if let (Some(start), Some(end)) = (report.task.session.start_time, report.task.session.end_time) {
        if start > end {
            warn!("{}: session starts ({}) after it ends ({})", session_name, start, end);
        }
    }

    if !report.unhandled.is_empty() {
        info!("{}: events without a handler: {:?}", session_name, report.unhandled);
    }

    let path = save_task_obj(&report.task, &session_name, &paths.task)?;
    info!("task record saved for: {}", session_name);

    Ok((path, report))
}
