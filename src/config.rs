use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::events::{default_events, EventKind, EventTable};

/// Switches for the conversion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    /// Print status messages while converting.
    pub verbose: bool,
    /// Add LFP traces to the output file.
    pub add_lfp: bool,
    /// Convert task timestamps from milliseconds to seconds.
    pub change_time_unit: bool,
    /// Make task timestamps relative to the session start.
    pub reset_time: bool,
    /// Drop spikes recorded before the task started.
    pub drop_before_task: bool,
    /// Skip sessions that already have an output file.
    pub skip_already_run: bool,
    /// Gzip the output file.
    pub compress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            verbose: true,
            add_lfp: false,
            change_time_unit: true,
            reset_time: true,
            drop_before_task: true,
            skip_already_run: true,
            compress: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Skip {
    pub subjects: Vec<String>,
    /// Session names, as built by `make_session_name`.
    pub sessions: Vec<String>,
}

/// Which files in a session folder hold what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSelection {
    pub log_select: String,
    pub sync_select: String,
    pub spike_select: String,
    pub lfp_ext: String,
    /// Sampling rate of the LFP files, in Hz.
    pub lfp_rate: f64,
    /// Number of the first recording channel (`CSC1` by default).
    pub channel_base: usize,
}

impl Default for FileSelection {
    fn default() -> Self {
        FileSelection {
            log_select: "log".to_string(),
            sync_select: "sync".to_string(),
            spike_select: "times".to_string(),
            lfp_ext: ".txt".to_string(),
            lfp_rate: 1000.0,
            channel_base: 1,
        }
    }
}

/// Everything the pipeline needs to know, loaded once and passed down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project_path: PathBuf,
    pub experiment: String,
    pub settings: Settings,
    pub skip: Skip,
    pub files: FileSelection,
    /// Event name to handler, for the log parser.
    pub events: BTreeMap<String, EventKind>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            project_path: PathBuf::from("."),
            experiment: String::new(),
            settings: Settings::default(),
            skip: Skip::default(),
            files: FileSelection::default(),
            events: default_events(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn event_table(&self) -> EventTable {
        EventTable::from_kinds(&self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let json = r#"{
            "project_path": "/data/project",
            "experiment": "THF",
            "settings": {"ADD_LFP": true, "VERBOSE": false},
            "skip": {"SUBJECTS": ["wv001"]}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.project_path, PathBuf::from("/data/project"));
        assert!(config.settings.add_lfp);
        assert!(!config.settings.verbose);
        assert!(config.settings.reset_time);
        assert_eq!(config.skip.subjects, vec!["wv001"]);
        assert!(config.skip.sessions.is_empty());
        assert_eq!(config.files.spike_select, "times");
        assert_eq!(config.files.channel_base, 1);
        assert_eq!(config.event_table().len(), 1);
    }

    #[test]
    fn configured_events_replace_defaults() {
        let json = r#"{"events": {"HEADING": {"kind": "head_direction", "degrees": 4}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let table = config.event_table();
        assert!(table.get("HEADING").is_some());
        assert!(table.get("POSITION").is_none());
    }
}
