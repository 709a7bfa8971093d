//! Utility functions for the demand_forecast crate

use crate::data::{Event, HOUR_FORMAT};
use crate::error::{ForecastError, Result};
use chrono::{Duration, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Consecutive hour buckets starting at `start`
pub fn future_hours(start: NaiveDateTime, hours: usize) -> Vec<NaiveDateTime> {
    (0..hours)
        .map(|offset| start + Duration::hours(offset as i64))
        .collect()
}

/// Write a file so that readers only ever see complete contents.
///
/// Data goes to a temporary sibling first and is renamed over `path` once
/// `write` succeeded; on failure the temporary file is removed and `path` is
/// left untouched.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    stage_file(path, write)?.commit()
}

/// Fully written contents waiting in a temporary sibling of their target.
///
/// Dropping a staged file without committing it removes the temporary file.
#[derive(Debug)]
pub struct StagedFile {
    tmp: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Rename the staged contents over the target path
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.path)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Write `path`'s future contents to a temporary sibling without replacing it
pub fn stage_file<F>(path: &Path, write: F) -> Result<StagedFile>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let staged = StagedFile {
        tmp: temporary_sibling(path),
        path: path.to_path_buf(),
        committed: false,
    };
    let mut file = File::create(&staged.tmp)?;
    write(&mut file)?;
    file.sync_all()?;
    Ok(staged)
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Format an hour bucket the way persisted tables store it
pub fn format_hour(hour: NaiveDateTime) -> String {
    hour.format(HOUR_FORMAT).to_string()
}

/// Parse an hour bucket written by [`format_hour`]
pub fn parse_hour(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), HOUR_FORMAT).map_err(|e| {
        ForecastError::DataError(format!("Invalid hour bucket '{}': {}", raw, e))
    })
}

/// Generate seeded synthetic trip starts for demos and tests.
///
/// Each station draws a Poisson number of trips per hour around `base_rate`,
/// scaled by a daily profile with morning and evening peaks.
pub fn synthetic_trip_events(
    stations: &[&str],
    start: NaiveDateTime,
    hours: usize,
    base_rate: f64,
    seed: u64,
) -> Result<Vec<Event>> {
    if base_rate <= 0.0 {
        return Err(ForecastError::InvalidParameter(
            "Base trip rate must be positive".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut events = Vec::new();

    for (station_idx, station) in stations.iter().enumerate() {
        let station_scale = 1.0 + 0.25 * station_idx as f64;
        for hour in future_hours(start, hours) {
            let rate = base_rate * station_scale * daily_profile(hour.hour());
            let poisson = Poisson::new(rate).map_err(|e| {
                ForecastError::InvalidParameter(format!("Invalid trip rate {}: {}", rate, e))
            })?;
            let trips = poisson.sample(&mut rng) as u64;
            for trip in 0..trips {
                let minute = (trip * 7 + station_idx as u64) % 60;
                let occurred_at = hour + Duration::minutes(minute as i64);
                events.push(Event::new(*station, format_hour(occurred_at)));
            }
        }
    }

    Ok(events)
}

fn daily_profile(hour: u32) -> f64 {
    match hour {
        7..=9 => 2.0,
        16..=19 => 2.5,
        0..=5 => 0.3,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn future_hours_are_consecutive() {
        let hours = future_hours(start(), 3);
        assert_eq!(hours.len(), 3);
        assert_eq!(hours[2] - hours[0], Duration::hours(2));
    }

    #[test]
    fn hour_format_round_trips() {
        let hour = start() + Duration::hours(13);
        assert_eq!(parse_hour(&format_hour(hour)).unwrap(), hour);
        assert!(parse_hour("13 o'clock").is_err());
    }

    #[test]
    fn synthetic_events_are_reproducible() {
        let a = synthetic_trip_events(&["A", "B"], start(), 24, 3.0, 7).unwrap();
        let b = synthetic_trip_events(&["A", "B"], start(), 24, 3.0, 7).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn atomic_write_leaves_no_partial_file_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let result = write_atomically(&path, |_| {
            Err(ForecastError::DataError("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!temporary_sibling(&path).exists());

        write_atomically(&path, |file| {
            use std::io::Write;
            file.write_all(b"ok")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "ok");
    }
}
