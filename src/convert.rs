use chrono::{DateTime, MappedLocalTime, TimeZone, Utc};
use log::{debug, info, warn};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{ConvError, Result};
use crate::io::{get_files, load_metadata, load_task_obj, save_nwbfile, Paths, SessionId};
use crate::metadata::{Electrodes, Metadata};
use crate::nwb::{
    DataInterface, ElectricalSeries, NwbFile, NwbFileInfo, ProcessingModule, SpatialSeries,
    Subject, TimeSeries, Unit,
};
use crate::reader::{read_lfp_file, read_spike_file};
use crate::task::{process_task, Task, TimeUpdate};

/// Milliseconds per second; the task log is written in milliseconds.
const MS_PER_SECOND: f64 = 1000.0;

/// Converts a session timestamp, in milliseconds since the epoch, to a date.
pub fn convert_time_to_date(timestamp_ms: f64) -> Result<DateTime<Utc>> {
    match Utc.timestamp_millis_opt(timestamp_ms as i64) {
        MappedLocalTime::Single(dt) => Ok(dt),
        MappedLocalTime::Ambiguous(early, _late) => Ok(early),
        MappedLocalTime::None => Err(ConvError::InvalidTask(format!(
            "session start {timestamp_ms} is not a valid timestamp"
        ))),
    }
}

/// Channel name encoded at the end of a spike file name: `times_CSC12.txt`
/// gives `CSC12`.
pub fn channel_name(file_name: &str) -> &str {
    let stem = file_name.split('.').next().unwrap_or(file_name);
    stem.rsplit('_').next().unwrap_or(stem)
}

/// Number of a channel name, from its trailing digits.
pub fn channel_number(channel: &str) -> Option<usize> {
    channel
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()
}

fn experiment_description(task: &Task) -> String {
    let get = |key: &str| {
        task.experiment
            .get(key)
            .map(String::as_str)
            .unwrap_or("unknown")
    };
    format!(
        "Task: {} build-{} ({})",
        get("version_label"),
        get("version_number"),
        get("language")
    )
}

/// Converts a session of data to an NWB file.
///
/// Expects the task record written by [`prepare_data`](crate::prepare::prepare_data),
/// a metadata file, and at least one spike file (and LFP file, with
/// `ADD_LFP`). Returns the path of the written file.
pub fn convert_data(config: &Config, session: &SessionId) -> Result<PathBuf> {
    let settings = &config.settings;
    let paths = Paths::for_session(&config.project_path, session);
    let session_name = session.name();

    info!("converting data for: {}", session_name);

    // File loading
    let mut task = load_task_obj(&session_name, &paths.task)?;
    if !task.status.processed {
        task = process_task(task);
    }

    let metadata = load_metadata(&session_name, &paths.metadata)?;
    let electrodes = metadata.electrodes();

    let spike_files = get_files(&paths.spikes, Some(&config.files.spike_select), None)?;
    if spike_files.is_empty() {
        return Err(ConvError::NoFiles {
            folder: paths.spikes.clone(),
            select: config.files.spike_select.clone(),
        });
    }

    let lfp_files = if settings.add_lfp {
        let files = get_files(&paths.micro_lfp, None, Some(&config.files.lfp_ext))?;
        if files.is_empty() {
            return Err(ConvError::NoFiles {
                folder: paths.micro_lfp.clone(),
                select: config.files.lfp_ext.clone(),
            });
        }
        files
    } else {
        Vec::new()
    };

    // Setup
    let start_time = task
        .session
        .start_time
        .ok_or_else(|| ConvError::InvalidTask("session start time is missing".to_string()))?;
    let session_date = convert_time_to_date(start_time)?;

    if settings.change_time_unit {
        task.update_time(TimeUpdate::ChangeUnits {
            divisor: MS_PER_SECOND,
        });
    }

    let mut notes = None;
    if settings.reset_time {
        let offset = task.session.start_time.unwrap_or(0.0);
        task.update_time(TimeUpdate::Offset { offset });
        notes = Some(format!(
            "The exact subtracted timestamp is: {}",
            task.info.time_offset
        ));
    }

    let subject = Subject {
        subject_id: session.subject.clone(),
        age: metadata.subject.age().map(str::to_string),
        sex: metadata.subject.sex().map(str::to_string),
        species: metadata.subject.species.clone(),
        description: metadata.subject.description.clone(),
    };

    let study = &metadata.study;
    let info = NwbFileInfo {
        session_description: study.session_description.clone(),
        identifier: study.identifier.clone(),
        file_create_date: Utc::now(),
        session_start_time: session_date,
        experimenter: study.experimenter.clone(),
        experiment_description: experiment_description(&task),
        session_id: session_name.clone(),
        institution: study.institution.clone(),
        keywords: study.keywords.clone(),
        notes,
        source_script: study.source_script.clone(),
        source_script_file_name: file!().to_string(),
        data_collection: study
            .data_collection
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        stimulus_notes: study.stimulus_notes.clone(),
        lab: study.lab.clone(),
    };

    let mut nwbfile = NwbFile::new(info, subject);

    add_electrodes(&mut nwbfile, &metadata, &electrodes)?;
    add_trials(&mut nwbfile, &metadata, &task)?;
    add_position(&mut nwbfile, &task)?;
    add_units(&mut nwbfile, config, &paths, &metadata, &electrodes, &task, &spike_files)?;

    if settings.add_lfp {
        add_lfp(&mut nwbfile, config, &paths, &lfp_files)?;
    }

    let path = save_nwbfile(&nwbfile, &session_name, &paths.nwb, settings.compress)?;

    info!("data converted for: {}", session_name);
    Ok(path)
}

fn add_electrodes(nwbfile: &mut NwbFile, metadata: &Metadata, electrodes: &Electrodes) -> Result<()> {
    let device = &metadata.device;
    nwbfile.create_device(&device.name, &device.description, &device.manufacturer)?;

    for (bundle_name, bundle_location) in electrodes.iter() {
        nwbfile.create_electrode_group(
            bundle_name,
            &device.bundle_description,
            bundle_location,
            &device.name,
        )?;

        for electrode_ind in 0..electrodes.n_electrodes_per_bundle {
            nwbfile.add_electrode(electrode_ind, bundle_location, bundle_name)?;
        }
    }
    Ok(())
}

fn add_trials(nwbfile: &mut NwbFile, metadata: &Metadata, task: &Task) -> Result<()> {
    for (event, description) in &metadata.events {
        nwbfile.add_trial_column(event, description)?;
    }

    for trial in &task.trials {
        let Some(stop_time) = trial.stop_time else {
            info!("incomplete trial {} - skipped adding", trial.index);
            continue;
        };

        let values: BTreeMap<String, String> = metadata
            .events
            .keys()
            .map(|column| {
                let value = trial.fields.get(column).cloned().unwrap_or_else(|| {
                    debug!("trial {} has no value for '{}'", trial.index, column);
                    String::new()
                });
                (column.clone(), value)
            })
            .collect();

        nwbfile.add_trial(trial.start_time, stop_time, values)?;
    }
    Ok(())
}

fn add_position(nwbfile: &mut NwbFile, task: &Task) -> Result<()> {
    let stream = &task.position;
    let shape_error = |e: ndarray::ShapeError| ConvError::Container(e.to_string());

    let data = Array2::from_shape_vec(
        (2, stream.len()),
        stream.x.iter().chain(stream.z.iter()).copied().collect(),
    )
    .map_err(shape_error)?;

    let mut position = DataInterface::Position { series: Vec::new() };
    position.create_spatial_series(SpatialSeries {
        name: "player_position".to_string(),
        description: "Position of the subject along the track.".to_string(),
        unit: "virtual units".to_string(),
        reference_frame: "middle".to_string(),
        data,
        timestamps: stream.time.clone(),
    })?;
    nwbfile.add_acquisition("position", position)?;

    let heading_stream = &task.head_direction;
    let data = Array2::from_shape_vec((1, heading_stream.len()), heading_stream.degrees.clone())
        .map_err(shape_error)?;

    let mut heading = DataInterface::CompassDirection { series: Vec::new() };
    heading.create_spatial_series(SpatialSeries {
        name: "direction".to_string(),
        description: "The direction the subjects head is pointing, in degrees.".to_string(),
        unit: "degrees".to_string(),
        reference_frame: "north".to_string(),
        data,
        timestamps: heading_stream.time.clone(),
    })?;
    nwbfile.add_acquisition("heading", heading)?;

    let speed = TimeSeries {
        name: "speed".to_string(),
        description: "The players movement speed, computed from the position data.".to_string(),
        unit: "virtual units / second".to_string(),
        data: stream.speed.clone(),
        timestamps: stream.time.clone(),
    };

    nwbfile.add_processing_module(ProcessingModule {
        name: "position_measures".to_string(),
        description: "Derived measures related to position data.".to_string(),
        data_interfaces: BTreeMap::from([("speed".to_string(), DataInterface::TimeSeries(speed))]),
    })
}

fn unit_values(
    columns: &BTreeMap<String, String>,
    channel: &str,
    location: &str,
    cluster: i64,
) -> BTreeMap<String, String> {
    columns
        .keys()
        .map(|column| {
            let value = match column.as_str() {
                "channel" => channel.to_string(),
                "location" => location.to_string(),
                "cluster" => cluster.to_string(),
                _ => String::new(),
            };
            (column.clone(), value)
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn add_units(
    nwbfile: &mut NwbFile,
    config: &Config,
    paths: &Paths,
    metadata: &Metadata,
    electrodes: &Electrodes,
    task: &Task,
    spike_files: &[String],
) -> Result<()> {
    let sorting = &metadata.sorting;
    let description = format!(
        "Spike sorting solutions - done with {} (v-{}) by {}.",
        sorting.sorter, sorting.version, sorting.done_by
    );
    nwbfile.set_units(&description);

    for (field, description) in &metadata.units {
        nwbfile.add_unit_column(field, description)?;
    }

    let task_start = task.session.start_time.unwrap_or(f64::NEG_INFINITY);
    let mut unit_ids = 0..;

    for spike_file in spike_files {
        let channel = channel_name(spike_file);
        let row = channel_number(channel)
            .and_then(|number| electrodes.row_of_channel(number, config.files.channel_base));
        if row.is_none() {
            warn!(
                "{}: channel {} is outside the {} listed electrodes",
                spike_file,
                channel,
                electrodes.n_electrodes()
            );
        }
        let location = row
            .and_then(|row| electrodes.location_of(row))
            .unwrap_or("unknown");
        let electrode_rows: Vec<usize> = row.into_iter().collect();

        let spikes = read_spike_file(&paths.spikes.join(spike_file))?;
        debug!("{}: {} spikes", spike_file, spikes.len());

        for cluster in spikes.cluster_ids() {
            let mut spike_times = spikes.spike_times(cluster);
            task.align_times(&mut spike_times);
            if config.settings.drop_before_task {
                spike_times.retain(|&t| t >= task_start);
            }

            nwbfile.add_unit(Unit {
                id: unit_ids.next().unwrap_or_default(),
                electrodes: electrode_rows.clone(),
                spike_times,
                waveform_mean: spikes.waveform_mean(cluster),
                values: unit_values(&metadata.units, channel, location, cluster),
            })?;
        }
    }
    Ok(())
}

fn add_lfp(nwbfile: &mut NwbFile, config: &Config, paths: &Paths, lfp_files: &[String]) -> Result<()> {
    for (ind, lfp_file) in lfp_files.iter().enumerate() {
        let data = read_lfp_file(&paths.micro_lfp.join(lfp_file))?;

        let region = nwbfile.create_electrode_table_region(
            (0..data.ncols()).collect(),
            &format!("electrodes recorded in {lfp_file}"),
        )?;

        let name = format!("field_data_{ind}");
        let series = ElectricalSeries {
            name: name.clone(),
            description: "LFP time series.".to_string(),
            comments: lfp_file.clone(),
            data,
            electrodes: region,
            starting_time: 0.0,
            rate: config.files.lfp_rate,
        };
        nwbfile.add_acquisition(&name, DataInterface::ElectricalSeries(series))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_from_file_name() {
        assert_eq!(channel_name("times_CSC12.txt"), "CSC12");
        assert_eq!(channel_name("times_CSC12.txt.gz"), "CSC12");
        assert_eq!(channel_name("spikes"), "spikes");
        assert_eq!(channel_number("CSC12"), Some(12));
        assert_eq!(channel_number("CSC"), None);
    }

    #[test]
    fn session_date_from_milliseconds() {
        let date = convert_time_to_date(1_500_000_000_123.0).unwrap();
        assert_eq!(date.timestamp_millis(), 1_500_000_000_123);
    }

    #[test]
    fn experiment_description_uses_task_info() {
        let mut task = Task::new();
        task.experiment
            .insert("version_label".to_string(), "TH".to_string());
        task.experiment
            .insert("version_number".to_string(), "42".to_string());
        assert_eq!(experiment_description(&task), "Task: TH build-42 (unknown)");
    }
}
