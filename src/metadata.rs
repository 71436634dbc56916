use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value used in metadata files for fields that are not known.
pub const UNKNOWN: &str = "XX";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectInfo {
    pub age: String,
    pub sex: String,
    pub species: String,
    pub description: String,
}

impl SubjectInfo {
    pub fn age(&self) -> Option<&str> {
        known(&self.age)
    }

    pub fn sex(&self) -> Option<&str> {
        known(&self.sex)
    }
}

fn known(value: &str) -> Option<&str> {
    if value.is_empty() || value == UNKNOWN {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyInfo {
    pub session_description: String,
    pub identifier: String,
    pub experimenter: Vec<String>,
    pub institution: String,
    pub keywords: Vec<String>,
    pub source_script: String,
    pub stimulus_notes: String,
    pub lab: String,
    pub data_collection: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub name: String,
    pub description: String,
    pub manufacturer: String,
    pub bundle_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortingInfo {
    pub sorter: String,
    pub version: String,
    pub done_by: String,
}

/// Electrode bundles of the recording, as `(name, location)` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Electrodes {
    pub bundles: Vec<(String, String)>,
    pub n_electrodes_per_bundle: usize,
}

impl Default for Electrodes {
    fn default() -> Self {
        Electrodes {
            bundles: Vec::new(),
            n_electrodes_per_bundle: 8,
        }
    }
}

impl Electrodes {
    pub fn add_bundle(&mut self, name: &str, location: &str) {
        self.bundles.push((name.to_string(), location.to_string()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bundles
            .iter()
            .map(|(name, location)| (name.as_str(), location.as_str()))
    }

    pub fn n_electrodes(&self) -> usize {
        self.bundles.len() * self.n_electrodes_per_bundle
    }

    /// Electrode table row of a channel, where `base` is the number of the
    /// first channel. `None` when the channel lies outside the bundles.
    pub fn row_of_channel(&self, channel: usize, base: usize) -> Option<usize> {
        channel
            .checked_sub(base)
            .filter(|&row| row < self.n_electrodes())
    }

    /// Location of the bundle an electrode table row belongs to.
    pub fn location_of(&self, row: usize) -> Option<&str> {
        if self.n_electrodes_per_bundle == 0 {
            return None;
        }
        self.bundles
            .get(row / self.n_electrodes_per_bundle)
            .map(|(_, location)| location.as_str())
    }
}

/// Session metadata that does not come from the recordings themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub subject: SubjectInfo,
    pub study: StudyInfo,
    pub device: DeviceInfo,
    pub sorting: SortingInfo,
    /// Trial table columns and their descriptions.
    pub events: BTreeMap<String, String>,
    /// Unit table columns and their descriptions.
    pub units: BTreeMap<String, String>,
    pub electrodes: Electrodes,
}

impl Metadata {
    /// Electrode layout, with a single placeholder bundle when none is listed.
    pub fn electrodes(&self) -> Electrodes {
        let mut electrodes = self.electrodes.clone();
        if electrodes.bundles.is_empty() {
            electrodes.add_bundle("bundle1", "loc1");
        }
        electrodes
    }
}
