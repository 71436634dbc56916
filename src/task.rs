use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConvError, Result};

/// Start and end of the session, as written in the first and last log line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
}

/// One trial of the task.
///
/// `stop_time` stays `None` until a trial-stop event closes the trial, which
/// is the case for a session that ends mid-trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub index: usize,
    pub start_time: f64,
    pub stop_time: Option<f64>,
    pub phase: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl Trial {
    pub fn is_complete(&self) -> bool {
        self.stop_time.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionStream {
    pub time: Vec<f64>,
    pub x: Vec<f64>,
    pub z: Vec<f64>,
    /// Derived by [`process_task`]; empty until then.
    pub speed: Vec<f64>,
}

impl PositionStream {
    pub fn push(&mut self, time: f64, x: f64, z: f64) {
        self.time.push(time);
        self.x.push(x);
        self.z.push(z);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadDirectionStream {
    pub time: Vec<f64>,
    pub degrees: Vec<f64>,
}

impl HeadDirectionStream {
    pub fn push(&mut self, time: f64, degrees: f64) {
        self.time.push(time);
        self.degrees.push(degrees);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Synchronization pulses, one entry per line of the sync file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStream {
    pub time: Vec<f64>,
    pub frame: Vec<String>,
    pub on_off: Vec<String>,
}

impl SyncStream {
    pub fn push(&mut self, time: f64, frame: String, on_off: String) {
        self.time.push(time);
        self.frame.push(frame);
        self.on_off.push(on_off);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Accumulated time transform: `t' = t * time_scale - time_offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub time_scale: f64,
    pub time_offset: f64,
}

impl Default for TimeInfo {
    fn default() -> Self {
        TimeInfo {
            time_scale: 1.0,
            time_offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub time_units_changed: bool,
    pub time_reset: bool,
    pub processed: bool,
}

/// Changes applied to every timestamp held by a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeUpdate {
    /// Divide all times, e.g. by 1000 to go from milliseconds to seconds.
    ChangeUnits { divisor: f64 },
    /// Subtract a reference time, e.g. the session start.
    Offset { offset: f64 },
}

/// In-memory record of everything parsed for a session.
///
/// Created empty, filled line by line by the log and sync parsers, and then
/// read by the conversion step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub session: SessionInfo,
    pub experiment: BTreeMap<String, String>,
    pub trials: Vec<Trial>,
    pub position: PositionStream,
    pub head_direction: HeadDirectionStream,
    pub sync_behavioral: SyncStream,
    pub info: TimeInfo,
    pub status: Status,
}

impl Task {
    pub fn new() -> Self {
        Task::default()
    }

    /// The trial currently receiving events, if any.
    pub fn current_trial_mut(&mut self) -> Option<&mut Trial> {
        self.trials.last_mut()
    }

    pub fn update_time(&mut self, update: TimeUpdate) {
        let apply = |t: f64| match update {
            TimeUpdate::ChangeUnits { divisor } => t / divisor,
            TimeUpdate::Offset { offset } => t - offset,
        };

        self.for_each_time(apply);

        match update {
            TimeUpdate::ChangeUnits { divisor } => {
                for speed in self.position.speed.iter_mut() {
                    *speed *= divisor;
                }
                self.info.time_scale /= divisor;
                self.info.time_offset /= divisor;
                self.status.time_units_changed = true;
            }
            TimeUpdate::Offset { offset } => {
                self.info.time_offset += offset;
                self.status.time_reset = true;
            }
        }
    }

    /// Applies the transform accumulated by [`Task::update_time`] to raw times
    /// that share the task clock, such as spike times.
    pub fn align_times(&self, times: &mut [f64]) {
        for t in times.iter_mut() {
            *t = *t * self.info.time_scale - self.info.time_offset;
        }
    }

    fn for_each_time<F: Fn(f64) -> f64>(&mut self, f: F) {
        if let Some(start) = self.session.start_time.as_mut() {
            *start = f(*start);
        }
        if let Some(end) = self.session.end_time.as_mut() {
            *end = f(*end);
        }
        for trial in self.trials.iter_mut() {
            trial.start_time = f(trial.start_time);
            trial.stop_time = trial.stop_time.map(&f);
        }
        let streams = [
            &mut self.position.time,
            &mut self.head_direction.time,
            &mut self.sync_behavioral.time,
        ];
        for stream in streams {
            for t in stream.iter_mut() {
                *t = f(*t);
            }
        }
    }

    /// Checks that the arrays of each stream line up, as they always do for a
    /// record built by the parser. Records read back from disk may not.
    pub fn check_streams(&self) -> Result<()> {
        let position = &self.position;
        let heading = &self.head_direction;
        let sync = &self.sync_behavioral;

        let checks = [
            ("position.x", position.time.len(), position.x.len()),
            ("position.z", position.time.len(), position.z.len()),
            ("head_direction.degrees", heading.time.len(), heading.degrees.len()),
            ("sync_behavioral.frame", sync.time.len(), sync.frame.len()),
            ("sync_behavioral.on_off", sync.time.len(), sync.on_off.len()),
        ];
        for (name, expected, found) in checks {
            if expected != found {
                return Err(ConvError::InvalidTask(format!(
                    "{name} has {found} values for {expected} timestamps"
                )));
            }
        }

        if !position.speed.is_empty() && position.speed.len() != position.time.len() {
            return Err(ConvError::InvalidTask(format!(
                "position.speed has {} values for {} timestamps",
                position.speed.len(),
                position.time.len()
            )));
        }
        Ok(())
    }

    /// Prints a summary of the task record with a preview of each stream.
    pub fn print_summary(&self) {
        match (self.session.start_time, self.session.end_time) {
            (Some(start), Some(end)) => println!("Session: {} - {}", start, end),
            _ => println!("Session: Not available"),
        }

        if !self.experiment.is_empty() {
            println!("\nExperiment:");
            for (key, value) in &self.experiment {
                println!("- {}: {}", key, value);
            }
        }

        let complete = self.trials.iter().filter(|t| t.is_complete()).count();
        println!("\nTrials: {} ({} complete)", self.trials.len(), complete);

        let position = &self.position;
        println!("\nPosition Data (First 5 of {} Samples):", position.len());
        let samples = position.time.iter().zip(&position.x).zip(&position.z);
        for (i, ((t, x), z)) in samples.take(5).enumerate() {
            println!("Sample {}: t={} x={} z={}", i + 1, t, x, z);
        }

        println!("\nHead Direction Samples: {}", self.head_direction.len());
        println!("Sync Pulses: {}", self.sync_behavioral.len());
    }
}

/// Derives secondary measures from the parsed streams.
///
/// Speed is the x/z distance covered since the previous sample divided by the
/// elapsed time. The first sample, and any sample with no elapsed time, has a
/// speed of zero.
pub fn process_task(mut task: Task) -> Task {
    let position = &task.position;
    let mut speed = Vec::with_capacity(position.len());
    let mut previous: Option<(f64, f64, f64)> = None;

    // Samples beyond the shortest of the three arrays are left out.
    for ((&t, &x), &z) in position.time.iter().zip(&position.x).zip(&position.z) {
        let value = match previous {
            Some((pt, px, pz)) if t - pt > 0.0 => {
                let (dx, dz) = (x - px, z - pz);
                (dx * dx + dz * dz).sqrt() / (t - pt)
            }
            _ => 0.0,
        };
        speed.push(value);
        previous = Some((t, x, z));
    }

    task.position.speed = speed;
    task.status.processed = true;
    task
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        let mut task = Task::new();
        task.session.start_time = Some(1000.0);
        task.session.end_time = Some(5000.0);
        task.position.push(1000.0, 0.0, 0.0);
        task.position.push(2000.0, 3.0, 4.0);
        task.position.push(2000.0, 6.0, 8.0);
        task.trials.push(Trial {
            index: 0,
            start_time: 1500.0,
            stop_time: Some(2500.0),
            phase: None,
            fields: BTreeMap::new(),
        });
        task
    }

    #[test]
    fn speed_is_distance_over_time() {
        let task = process_task(sample_task());
        assert_eq!(task.position.speed, vec![0.0, 5.0 / 1000.0, 0.0]);
        assert!(task.status.processed);
    }

    #[test]
    fn uneven_streams_do_not_panic() {
        let mut task = sample_task();
        task.position.x.pop();
        task.print_summary();

        let task = process_task(task);
        assert_eq!(task.position.speed, vec![0.0, 5.0 / 1000.0]);
    }

    #[test]
    fn uneven_streams_are_rejected() {
        let mut task = process_task(sample_task());
        assert!(task.check_streams().is_ok());

        task.head_direction.time.push(1000.0);
        let err = task.check_streams().unwrap_err();
        assert!(matches!(err, ConvError::InvalidTask(msg) if msg.contains("head_direction")));

        let mut task = process_task(sample_task());
        task.position.speed.pop();
        assert!(task.check_streams().is_err());

        let mut task = sample_task();
        task.position.z.push(1.0);
        assert!(task.check_streams().is_err());
    }

    #[test]
    fn change_units_then_offset() {
        let mut task = process_task(sample_task());
        task.update_time(TimeUpdate::ChangeUnits { divisor: 1000.0 });
        task.update_time(TimeUpdate::Offset { offset: 1.0 });

        assert_eq!(task.session.start_time, Some(0.0));
        assert_eq!(task.session.end_time, Some(4.0));
        assert_eq!(task.position.time, vec![0.0, 1.0, 1.0]);
        assert_eq!(task.trials[0].start_time, 0.5);
        assert_eq!(task.trials[0].stop_time, Some(1.5));
        assert_eq!(task.position.speed[1], 5.0);
        assert!(task.status.time_units_changed);
        assert!(task.status.time_reset);

        let mut spikes = vec![1000.0, 3000.0];
        task.align_times(&mut spikes);
        assert_eq!(spikes, vec![0.0, 2.0]);
    }

    #[test]
    fn offset_then_change_units() {
        let mut task = sample_task();
        task.update_time(TimeUpdate::Offset { offset: 1000.0 });
        task.update_time(TimeUpdate::ChangeUnits { divisor: 1000.0 });

        let mut spikes = vec![3000.0];
        task.align_times(&mut spikes);
        assert_eq!(spikes, vec![2.0]);
        assert_eq!(task.session.end_time, Some(4.0));
    }
}
