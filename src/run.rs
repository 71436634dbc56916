use log::info;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::convert::convert_data;
use crate::error::Result;
use crate::io::{get_files, nwb_file_name, Paths, SessionId};
use crate::prepare::prepare_data;

/// What a batch run did with each session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    /// Session names.
    pub converted: Vec<String>,
    /// Subject ids listed in the skip settings.
    pub skipped_subjects: Vec<String>,
    /// Session names, either listed in the skip settings or already converted.
    pub skipped_sessions: Vec<String>,
}

/// Finds every session of `config.experiment`, per subject.
///
/// Subjects are the folders of `recordings/`; sessions are the entries of
/// `recordings/<subject>/<experiment>` whose name contains `session`.
pub fn find_sessions(config: &Config) -> Result<BTreeMap<String, Vec<String>>> {
    let paths = Paths::new(&config.project_path);

    let mut all_sessions = BTreeMap::new();
    for subject in get_files(&paths.recordings, None, None)? {
        let folder = paths.recordings.join(&subject).join(&config.experiment);
        let sessions = get_files(&folder, Some("session"), None)?;
        all_sessions.insert(subject, sessions);
    }
    Ok(all_sessions)
}

/// Runs preparation and conversion on all available sessions, one after the
/// other. The first failing session stops the run.
pub fn run_all_conversions(config: &Config) -> Result<BatchSummary> {
    let settings = &config.settings;
    let paths = Paths::new(&config.project_path);
    let mut summary = BatchSummary::default();

    info!("running all conversions for - {}", config.experiment);

    let all_sessions = find_sessions(config)?;

    let converted = if paths.nwb.is_dir() {
        get_files(&paths.nwb, Some("nwb"), None)?
    } else {
        Vec::new()
    };

    for (subject, sessions) in &all_sessions {
        if config.skip.subjects.contains(subject) {
            info!("skipping subject: {}", subject);
            summary.skipped_subjects.push(subject.clone());
            continue;
        }

        for session in sessions {
            let session = SessionId::new(subject, &config.experiment, session);
            let session_name = session.name();

            if config.skip.sessions.contains(&session_name) {
                info!("skipping session: {}", session_name);
                summary.skipped_sessions.push(session_name);
                continue;
            }

            if settings.skip_already_run
                && converted.contains(&nwb_file_name(&session_name, settings.compress))
            {
                info!("session already run: {}", session_name);
                summary.skipped_sessions.push(session_name);
                continue;
            }

            prepare_data(config, &session)?;
            convert_data(config, &session)?;
            summary.converted.push(session_name);
        }
    }

    info!("finished conversions for - {}", config.experiment);
    Ok(summary)
}
