//! In-memory NWB container.
//!
//! Mirrors the parts of the NWB schema the conversion fills in: file level
//! fields, subject, devices, electrodes, trials, acquisition, processing
//! modules and units. The whole container serializes to JSON.

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConvError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub subject_id: String,
    pub age: Option<String>,
    pub sex: Option<String>,
    pub species: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub description: String,
    pub manufacturer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeGroup {
    pub name: String,
    pub description: String,
    pub location: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Electrode {
    pub id: usize,
    pub location: String,
    pub group: String,
}

/// Rows of the electrodes table referenced by a data series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeTableRegion {
    pub rows: Vec<usize>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRow {
    pub start_time: f64,
    pub stop_time: f64,
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialTable {
    pub columns: BTreeMap<String, String>,
    pub rows: Vec<TrialRow>,
}

/// Samples in space. `data` is `(dimensions, samples)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialSeries {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub reference_frame: String,
    pub data: Array2<f64>,
    pub timestamps: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub data: Vec<f64>,
    pub timestamps: Vec<f64>,
}

/// Voltage traces, `(samples, channels)`, sampled at a fixed rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectricalSeries {
    pub name: String,
    pub description: String,
    pub comments: String,
    pub data: Array2<f64>,
    pub electrodes: ElectrodeTableRegion,
    pub starting_time: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "neurodata_type")]
pub enum DataInterface {
    Position { series: Vec<SpatialSeries> },
    CompassDirection { series: Vec<SpatialSeries> },
    TimeSeries(TimeSeries),
    ElectricalSeries(ElectricalSeries),
}

impl DataInterface {
    /// Adds a spatial series to a `Position` or `CompassDirection` container.
    pub fn create_spatial_series(&mut self, series: SpatialSeries) -> Result<()> {
        if series.data.ncols() != series.timestamps.len() {
            return Err(ConvError::Container(format!(
                "spatial series '{}' has {} samples but {} timestamps",
                series.name,
                series.data.ncols(),
                series.timestamps.len()
            )));
        }
        match self {
            DataInterface::Position { series: all } | DataInterface::CompassDirection { series: all } => {
                all.push(series);
                Ok(())
            }
            _ => Err(ConvError::Container(format!(
                "cannot add spatial series '{}' to this data interface",
                series.name
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingModule {
    pub name: String,
    pub description: String,
    pub data_interfaces: BTreeMap<String, DataInterface>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: usize,
    pub electrodes: Vec<usize>,
    pub spike_times: Vec<f64>,
    pub waveform_mean: Array1<f64>,
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Units {
    pub description: String,
    pub columns: BTreeMap<String, String>,
    pub rows: Vec<Unit>,
}

/// File level information given when the container is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NwbFileInfo {
    pub session_description: String,
    pub identifier: String,
    pub file_create_date: DateTime<Utc>,
    pub session_start_time: DateTime<Utc>,
    pub experimenter: Vec<String>,
    pub experiment_description: String,
    pub session_id: String,
    pub institution: String,
    pub keywords: Vec<String>,
    pub notes: Option<String>,
    pub source_script: String,
    pub source_script_file_name: String,
    pub data_collection: String,
    pub stimulus_notes: String,
    pub lab: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NwbFile {
    pub info: NwbFileInfo,
    pub subject: Subject,
    pub devices: BTreeMap<String, Device>,
    pub electrode_groups: BTreeMap<String, ElectrodeGroup>,
    pub electrodes: Vec<Electrode>,
    pub trials: TrialTable,
    pub acquisition: BTreeMap<String, DataInterface>,
    pub processing: BTreeMap<String, ProcessingModule>,
    pub units: Option<Units>,
}

impl NwbFile {
    pub fn new(info: NwbFileInfo, subject: Subject) -> Self {
        NwbFile {
            info,
            subject,
            devices: BTreeMap::new(),
            electrode_groups: BTreeMap::new(),
            electrodes: Vec::new(),
            trials: TrialTable::default(),
            acquisition: BTreeMap::new(),
            processing: BTreeMap::new(),
            units: None,
        }
    }

    pub fn create_device(&mut self, name: &str, description: &str, manufacturer: &str) -> Result<&Device> {
        if self.devices.contains_key(name) {
            return Err(ConvError::Container(format!("device '{name}' already exists")));
        }
        let device = Device {
            name: name.to_string(),
            description: description.to_string(),
            manufacturer: manufacturer.to_string(),
        };
        Ok(self.devices.entry(name.to_string()).or_insert(device))
    }

    pub fn create_electrode_group(
        &mut self,
        name: &str,
        description: &str,
        location: &str,
        device: &str,
    ) -> Result<&ElectrodeGroup> {
        if !self.devices.contains_key(device) {
            return Err(ConvError::Container(format!("unknown device '{device}'")));
        }
        if self.electrode_groups.contains_key(name) {
            return Err(ConvError::Container(format!(
                "electrode group '{name}' already exists"
            )));
        }
        let group = ElectrodeGroup {
            name: name.to_string(),
            description: description.to_string(),
            location: location.to_string(),
            device: device.to_string(),
        };
        Ok(self.electrode_groups.entry(name.to_string()).or_insert(group))
    }

    /// Adds a row to the electrodes table. Ids repeat across groups.
    pub fn add_electrode(&mut self, id: usize, location: &str, group: &str) -> Result<()> {
        if !self.electrode_groups.contains_key(group) {
            return Err(ConvError::Container(format!("unknown electrode group '{group}'")));
        }
        self.electrodes.push(Electrode {
            id,
            location: location.to_string(),
            group: group.to_string(),
        });
        Ok(())
    }

    pub fn create_electrode_table_region(
        &self,
        rows: Vec<usize>,
        description: &str,
    ) -> Result<ElectrodeTableRegion> {
        if let Some(row) = rows.iter().find(|&&r| r >= self.electrodes.len()) {
            return Err(ConvError::Container(format!(
                "electrode row {row} out of range ({} electrodes)",
                self.electrodes.len()
            )));
        }
        Ok(ElectrodeTableRegion {
            rows,
            description: description.to_string(),
        })
    }

    pub fn add_trial_column(&mut self, name: &str, description: &str) -> Result<()> {
        if !self.trials.rows.is_empty() {
            return Err(ConvError::Container(format!(
                "cannot add trial column '{name}' after trials were added"
            )));
        }
        self.trials
            .columns
            .insert(name.to_string(), description.to_string());
        Ok(())
    }

    /// Adds a trial. Every declared column needs a value.
    pub fn add_trial(
        &mut self,
        start_time: f64,
        stop_time: f64,
        values: BTreeMap<String, String>,
    ) -> Result<()> {
        if stop_time < start_time {
            return Err(ConvError::Container(format!(
                "trial stops ({stop_time}) before it starts ({start_time})"
            )));
        }
        check_columns("trial", &self.trials.columns, &values)?;
        self.trials.rows.push(TrialRow {
            start_time,
            stop_time,
            values,
        });
        Ok(())
    }

    pub fn add_acquisition(&mut self, name: &str, data: DataInterface) -> Result<()> {
        if self.acquisition.contains_key(name) {
            return Err(ConvError::Container(format!(
                "acquisition '{name}' already exists"
            )));
        }
        self.acquisition.insert(name.to_string(), data);
        Ok(())
    }

    pub fn add_processing_module(&mut self, module: ProcessingModule) -> Result<()> {
        if self.processing.contains_key(&module.name) {
            return Err(ConvError::Container(format!(
                "processing module '{}' already exists",
                module.name
            )));
        }
        self.processing.insert(module.name.clone(), module);
        Ok(())
    }

    pub fn set_units(&mut self, description: &str) {
        self.units = Some(Units {
            description: description.to_string(),
            ..Units::default()
        });
    }

    pub fn add_unit_column(&mut self, name: &str, description: &str) -> Result<()> {
        let units = self.units_mut()?;
        units
            .columns
            .insert(name.to_string(), description.to_string());
        Ok(())
    }

    /// Adds a unit. Every declared column needs a value and unit ids are unique.
    pub fn add_unit(&mut self, unit: Unit) -> Result<()> {
        let n_electrodes = self.electrodes.len();
        if let Some(row) = unit.electrodes.iter().find(|&&r| r >= n_electrodes) {
            return Err(ConvError::Container(format!(
                "unit {} references electrode row {row} out of range",
                unit.id
            )));
        }
        let units = self.units_mut()?;
        if units.rows.iter().any(|u| u.id == unit.id) {
            return Err(ConvError::Container(format!("unit id {} already used", unit.id)));
        }
        check_columns("unit", &units.columns, &unit.values)?;
        units.rows.push(unit);
        Ok(())
    }

    fn units_mut(&mut self) -> Result<&mut Units> {
        self.units
            .as_mut()
            .ok_or_else(|| ConvError::Container("units table is not initialized".to_string()))
    }
}

fn check_columns(
    table: &str,
    columns: &BTreeMap<String, String>,
    values: &BTreeMap<String, String>,
) -> Result<()> {
    if let Some(missing) = columns.keys().find(|c| !values.contains_key(*c)) {
        return Err(ConvError::Container(format!(
            "{table} is missing a value for column '{missing}'"
        )));
    }
    if let Some(extra) = values.keys().find(|v| !columns.contains_key(*v)) {
        return Err(ConvError::Container(format!(
            "{table} has a value for undeclared column '{extra}'"
        )));
    }
    Ok(())
}
