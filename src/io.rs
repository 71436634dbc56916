use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ConvError, Result};
use crate::metadata::Metadata;
use crate::nwb::NwbFile;
use crate::reader::get_file_reader;
use crate::task::Task;

/// Extension of converted output files.
pub const NWB_EXT: &str = ".nwb.json";

/// One recording session of one subject in one experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId {
    pub subject: String,
    pub experiment: String,
    pub session: String,
}

impl SessionId {
    pub fn new(subject: &str, experiment: &str, session: &str) -> Self {
        SessionId {
            subject: subject.to_string(),
            experiment: experiment.to_string(),
            session: session.to_string(),
        }
    }

    pub fn name(&self) -> String {
        make_session_name(&self.subject, &self.experiment, &self.session)
    }
}

pub fn make_session_name(subject: &str, experiment: &str, session: &str) -> String {
    format!("{experiment}_{subject}_{session}")
}

/// Folder layout of a project.
///
/// Recordings, spikes, LFP and metadata live in per subject, experiment and
/// session sub folders. Task records and converted files are stored flat,
/// named after the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    pub project: PathBuf,
    pub recordings: PathBuf,
    pub spikes: PathBuf,
    pub micro_lfp: PathBuf,
    pub metadata: PathBuf,
    pub task: PathBuf,
    pub nwb: PathBuf,
}

impl Paths {
    pub fn new<P: AsRef<Path>>(project: P) -> Self {
        let project = project.as_ref().to_path_buf();
        Paths {
            recordings: project.join("recordings"),
            spikes: project.join("spikes"),
            micro_lfp: project.join("lfp"),
            metadata: project.join("metadata"),
            task: project.join("task"),
            nwb: project.join("nwb"),
            project,
        }
    }

    pub fn for_session<P: AsRef<Path>>(project: P, session: &SessionId) -> Self {
        let mut paths = Paths::new(project);
        let sub = |base: &Path| {
            base.join(&session.subject)
                .join(&session.experiment)
                .join(&session.session)
        };
        paths.recordings = sub(&paths.recordings);
        paths.spikes = sub(&paths.spikes);
        paths.micro_lfp = sub(&paths.micro_lfp);
        paths.metadata = sub(&paths.metadata);
        paths
    }
}

/// Lists the entries of a folder, sorted by name.
///
/// Hidden entries are left out. `select` keeps names containing it, `ext`
/// keeps names ending with it.
pub fn get_files(folder: &Path, select: Option<&str>, ext: Option<&str>) -> Result<Vec<String>> {
    if !folder.is_dir() {
        return Err(ConvError::FileNotFound(folder.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(folder)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if select.is_some_and(|s| !name.contains(s)) {
            continue;
        }
        if ext.is_some_and(|e| !name.ends_with(e)) {
            continue;
        }
        files.push(name);
    }
    files.sort();
    Ok(files)
}

fn task_file(session_name: &str, folder: &Path) -> PathBuf {
    folder.join(format!("{session_name}.json"))
}

pub fn save_task_obj(task: &Task, session_name: &str, folder: &Path) -> Result<PathBuf> {
    fs::create_dir_all(folder)?;
    let path = task_file(session_name, folder);
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer(writer, task)?;
    Ok(path)
}

pub fn load_task_obj(session_name: &str, folder: &Path) -> Result<Task> {
    let reader = get_file_reader(&task_file(session_name, folder))?;
    let task: Task = serde_json::from_reader(reader)?;
    task.check_streams()?;
    Ok(task)
}

pub fn load_metadata(session_name: &str, folder: &Path) -> Result<Metadata> {
    let reader = get_file_reader(&folder.join(format!("{session_name}.json")))?;
    Ok(serde_json::from_reader(reader)?)
}

pub fn nwb_file_name(session_name: &str, compress: bool) -> String {
    if compress {
        format!("{session_name}{NWB_EXT}.gz")
    } else {
        format!("{session_name}{NWB_EXT}")
    }
}

/// Writes a converted session into `folder`, gzipped when `compress` is set.
pub fn save_nwbfile(
    nwbfile: &NwbFile,
    session_name: &str,
    folder: &Path,
    compress: bool,
) -> Result<PathBuf> {
    fs::create_dir_all(folder)?;
    let path = folder.join(nwb_file_name(session_name, compress));
    let file = BufWriter::new(File::create(&path)?);

    if compress {
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, nwbfile)?;
        encoder.finish()?.flush()?;
    } else {
        let mut file = file;
        serde_json::to_writer(&mut file, nwbfile)?;
        file.flush()?;
    }

    info!("saved {}", path.display());
    Ok(path)
}

pub fn load_nwbfile(path: &Path) -> Result<NwbFile> {
    let reader = get_file_reader(path)?;
    Ok(serde_json::from_reader(reader)?)
}
