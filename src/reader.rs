use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use ndarray::{s, Array1, Array2, Axis};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{ConvError, Result};

const DELIMITER: u8 = b'\t';

/// Helper function to get a reader for the file, whether it's gzipped or not.
pub fn get_file_reader(filepath: &Path) -> Result<Box<dyn Read>> {
    if !filepath.exists() {
        return Err(ConvError::FileNotFound(filepath.to_path_buf()));
    }

    let file = File::open(filepath)?;
    if filepath.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Tab separated reader without headers or quoting; rows may differ in length.
pub fn tab_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(reader)
}

/// Reads a tab separated table of numbers into a `(rows, columns)` array.
pub fn read_numeric_table(filepath: &Path) -> Result<Array2<f64>> {
    let invalid = |reason: String| ConvError::InvalidRecording {
        path: filepath.to_path_buf(),
        reason,
    };

    let mut rdr = tab_reader(get_file_reader(filepath)?);
    let mut num_columns = None;
    let mut values = Vec::new();
    let mut num_rows = 0;

    for record in rdr.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        match num_columns {
            None => num_columns = Some(record.len()),
            Some(n) if n != record.len() => {
                return Err(invalid(format!(
                    "line {line} has {} columns, expected {n}",
                    record.len()
                )));
            }
            Some(_) => {}
        }

        for field in record.iter() {
            let value = field
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid(format!("line {line}: '{field}' is not a number")))?;
            values.push(value);
        }
        num_rows += 1;
    }

    Array2::from_shape_vec((num_rows, num_columns.unwrap_or(0)), values)
        .map_err(|e| invalid(e.to_string()))
}

/// Spike sorting output of one channel.
///
/// Stored as a tab separated file with one spike per row:
/// `time, cluster, waveform samples...`.
#[derive(Debug, Clone)]
pub struct SpikeData {
    /// Path of the file the spikes were read from.
    pub filepath: PathBuf,

    /// Spike times, on the same clock as the task log.
    pub times: Array1<f64>,

    /// Cluster assigned to each spike by the sorter.
    pub clusters: Array1<i64>,

    /// One waveform per row, `(num_spikes, num_samples)`. Has zero columns
    /// when the file carries no waveforms.
    pub waveforms: Array2<f64>,
}

impl SpikeData {
    pub fn from_table(filepath: &Path, table: Array2<f64>) -> Result<Self> {
        if table.nrows() > 0 && table.ncols() < 2 {
            return Err(ConvError::InvalidRecording {
                path: filepath.to_path_buf(),
                reason: "expected at least time and cluster columns".to_string(),
            });
        }

        if table.nrows() == 0 {
            return Ok(SpikeData {
                filepath: filepath.to_path_buf(),
                times: Array1::zeros(0),
                clusters: Array1::zeros(0),
                waveforms: Array2::zeros((0, 0)),
            });
        }

        let clusters = table.column(1);
        if let Some(bad) = clusters.iter().find(|c| c.fract() != 0.0) {
            return Err(ConvError::InvalidRecording {
                path: filepath.to_path_buf(),
                reason: format!("cluster id {bad} is not an integer"),
            });
        }

        Ok(SpikeData {
            filepath: filepath.to_path_buf(),
            times: table.column(0).to_owned(),
            clusters: clusters.mapv(|c| c as i64),
            waveforms: table.slice(s![.., 2..]).to_owned(),
        })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Distinct cluster ids, in ascending order.
    pub fn cluster_ids(&self) -> Vec<i64> {
        self.clusters
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn indices(&self, cluster: i64) -> Vec<usize> {
        self.clusters
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == cluster)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn spike_times(&self, cluster: i64) -> Vec<f64> {
        self.indices(cluster)
            .into_iter()
            .map(|i| self.times[i])
            .collect()
    }

    /// Average waveform of a cluster; empty when there are no waveforms.
    pub fn waveform_mean(&self, cluster: i64) -> Array1<f64> {
        let selected = self.waveforms.select(Axis(0), &self.indices(cluster));
        selected
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.waveforms.ncols()))
    }

    /// Prints the number of spikes per cluster and a preview of the first rows.
    pub fn print_summary(&self) {
        println!("Spike File: {}", self.filepath.display());
        for cluster in self.cluster_ids() {
            println!("Cluster {}: {} spikes", cluster, self.indices(cluster).len());
        }

        let total_samples = self.len();
        let preview_count = total_samples.min(5);
        println!("\nSpikes (First 5 of {total_samples}):");
        for i in 0..preview_count {
            println!("Spike {}: t={} cluster={}", i + 1, self.times[i], self.clusters[i]);
        }
    }
}

pub fn read_spike_file(filepath: &Path) -> Result<SpikeData> {
    let table = read_numeric_table(filepath)?;
    SpikeData::from_table(filepath, table)
}

/// Reads an LFP file: one sample per row, one channel per column.
pub fn read_lfp_file(filepath: &Path) -> Result<Array2<f64>> {
    read_numeric_table(filepath)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use ndarray::array;
    use std::io::Write;

    #[test]
    fn reads_spikes_and_groups_by_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("times_CSC3.txt");
        std::fs::write(&path, "10\t2\t1.0\t3.0\n20\t1\t0.0\t0.0\n30\t2\t3.0\t5.0\n").unwrap();

        let spikes = read_spike_file(&path).unwrap();
        assert_eq!(spikes.len(), 3);
        assert_eq!(spikes.cluster_ids(), vec![1, 2]);
        assert_eq!(spikes.spike_times(2), vec![10.0, 30.0]);
        assert_eq!(spikes.waveform_mean(2), array![2.0, 4.0]);
    }

    #[test]
    fn spikes_without_waveforms() {
        let table = array![[1.0, 0.0], [2.0, 0.0]];
        let spikes = SpikeData::from_table(Path::new("s.txt"), table).unwrap();
        assert_eq!(spikes.waveform_mean(0).len(), 0);
    }

    #[test]
    fn fractional_cluster_is_rejected() {
        let table = array![[1.0, 0.5]];
        assert!(SpikeData::from_table(Path::new("s.txt"), table).is_err());
    }

    #[test]
    fn ragged_table_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lfp.txt");
        std::fs::write(&path, "1\t2\n3\n").unwrap();
        assert!(matches!(
            read_lfp_file(&path),
            Err(ConvError::InvalidRecording { .. })
        ));
    }

    #[test]
    fn reads_gzipped_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lfp.txt.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"0.5\t1.5\n2.5\t3.5\n").unwrap();
        encoder.finish().unwrap();

        let lfp = read_lfp_file(&path).unwrap();
        assert_eq!(lfp, array![[0.5, 1.5], [2.5, 3.5]]);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = get_file_reader(Path::new("/nonexistent/log.txt")).err().unwrap();
        assert!(matches!(err, ConvError::FileNotFound(_)));
    }
}
