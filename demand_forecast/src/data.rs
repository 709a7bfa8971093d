//! Trip events and per-station hourly count series

use crate::config::IngestConfig;
use crate::error::{ForecastError, Result};
use chrono::{Duration, NaiveDateTime};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Identifier of a bike-share station
pub type StationId = String;

/// Textual format of hour buckets in persisted tables
pub const HOUR_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single trip start, with its timestamp still in raw form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub station_id: StationId,
    pub occurred_at: String,
}

impl Event {
    pub fn new(station_id: impl Into<StationId>, occurred_at: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            occurred_at: occurred_at.into(),
        }
    }
}

/// Number of trips started at a station within one hour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourCount {
    pub hour_bucket: NaiveDateTime,
    pub count: u32,
}

/// Ordered hourly counts per station.
///
/// Within a station the hour buckets are strictly increasing. Missing hours
/// are simply absent unless the series is densified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountSeries {
    stations: BTreeMap<StationId, Vec<HourCount>>,
}

impl CountSeries {
    /// Create an empty series
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from per-station counts, validating their ordering
    pub fn from_station_counts(stations: BTreeMap<StationId, Vec<HourCount>>) -> Result<Self> {
        let mut series = Self::new();
        for (station_id, counts) in stations {
            series.insert_station(station_id, counts)?;
        }
        Ok(series)
    }

    /// Consecutive hourly counts for a single station starting at `start`
    pub fn from_hourly_counts(
        station_id: impl Into<StationId>,
        start: NaiveDateTime,
        counts: &[u32],
    ) -> Result<Self> {
        let mut series = Self::new();
        series.insert_station(station_id, consecutive_hours(start, counts))?;
        Ok(series)
    }

    /// Add or replace the counts of one station
    pub fn insert_station(
        &mut self,
        station_id: impl Into<StationId>,
        counts: Vec<HourCount>,
    ) -> Result<()> {
        let station_id = station_id.into();
        if let Some(pair) = counts
            .windows(2)
            .find(|pair| pair[0].hour_bucket >= pair[1].hour_bucket)
        {
            return Err(ForecastError::DataError(format!(
                "Station {} has unordered or duplicate hour {}",
                station_id, pair[1].hour_bucket
            )));
        }
        if counts.is_empty() {
            self.stations.remove(&station_id);
        } else {
            self.stations.insert(station_id, counts);
        }
        Ok(())
    }

    /// Counts of a single station, oldest first
    pub fn station(&self, station_id: &str) -> Option<&[HourCount]> {
        self.stations.get(station_id).map(Vec::as_slice)
    }

    /// Iterate stations in ascending id order
    pub fn stations(&self) -> impl Iterator<Item = (&StationId, &[HourCount])> {
        self.stations
            .iter()
            .map(|(station_id, counts)| (station_id, counts.as_slice()))
    }

    /// Station ids in ascending order
    pub fn station_ids(&self) -> Vec<StationId> {
        self.stations.keys().cloned().collect()
    }

    /// Number of stations with at least one count
    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    /// Total number of (station, hour) entries
    pub fn len(&self) -> usize {
        self.stations.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Latest hour bucket across all stations
    pub fn latest_hour(&self) -> Option<NaiveDateTime> {
        self.stations
            .values()
            .filter_map(|counts| counts.last().map(|c| c.hour_bucket))
            .max()
    }

    /// Copy of the series with every missing hour between a station's first
    /// and last bucket filled with a zero count
    pub fn densify(&self) -> Self {
        let stations = self
            .stations
            .iter()
            .map(|(station_id, counts)| {
                let mut dense: Vec<HourCount> = Vec::with_capacity(counts.len());
                for count in counts {
                    if let Some(previous) = dense.last().map(|c| c.hour_bucket) {
                        let mut hour = previous + Duration::hours(1);
                        while hour < count.hour_bucket {
                            dense.push(HourCount {
                                hour_bucket: hour,
                                count: 0,
                            });
                            hour += Duration::hours(1);
                        }
                    }
                    dense.push(*count);
                }
                (station_id.clone(), dense)
            })
            .collect();

        Self { stations }
    }
}

/// Hourly counts on consecutive hours starting at `start`
pub fn consecutive_hours(start: NaiveDateTime, counts: &[u32]) -> Vec<HourCount> {
    counts
        .iter()
        .enumerate()
        .map(|(i, &count)| HourCount {
            hour_bucket: start + Duration::hours(i as i64),
            count,
        })
        .collect()
}

/// Reader for raw trip files
#[derive(Debug)]
pub struct DataLoader;

impl DataLoader {
    /// Read trip events from a single CSV file
    pub fn from_csv<P: AsRef<Path>>(path: P, ingest: &IngestConfig) -> Result<Vec<Event>> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let station_idx = Self::column_index(&headers, &ingest.station_column, path)?;
        let time_idx = Self::column_index(&headers, &ingest.timestamp_column, path)?;

        let limit = ingest.max_rows_per_file.unwrap_or(usize::MAX);
        let mut events = Vec::new();
        for record in reader.records().take(limit) {
            let record = record?;
            let station_id = record.get(station_idx).unwrap_or_default().trim();
            let occurred_at = record.get(time_idx).unwrap_or_default().trim();
            events.push(Event::new(station_id, occurred_at));
        }

        debug!("Read {} trips from {}", events.len(), path.display());
        Ok(events)
    }

    /// Read every `.csv` file of a directory in file-name order
    pub fn from_directory<P: AsRef<Path>>(dir: P, ingest: &IngestConfig) -> Result<Vec<Event>> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "csv"))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(ForecastError::DataError(format!(
                "No trip CSV files found in {}",
                dir.display()
            )));
        }

        let mut events = Vec::new();
        for file in &files {
            events.extend(Self::from_csv(file, ingest)?);
        }

        info!("Loaded {} trips from {} files", events.len(), files.len());
        Ok(events)
    }

    fn column_index(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
        headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
            ForecastError::DataError(format!(
                "Column '{}' not found in {}",
                name,
                path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn rejects_unordered_counts() {
        let mut series = CountSeries::new();
        let counts = vec![
            HourCount { hour_bucket: hour(2), count: 1 },
            HourCount { hour_bucket: hour(1), count: 1 },
        ];
        assert!(series.insert_station("A", counts).is_err());
    }

    #[test]
    fn rejects_duplicate_hours() {
        let mut series = CountSeries::new();
        let counts = vec![
            HourCount { hour_bucket: hour(1), count: 1 },
            HourCount { hour_bucket: hour(1), count: 3 },
        ];
        assert!(series.insert_station("A", counts).is_err());
    }

    #[test]
    fn densify_fills_gaps_with_zero() {
        let mut series = CountSeries::new();
        series
            .insert_station(
                "A",
                vec![
                    HourCount { hour_bucket: hour(0), count: 4 },
                    HourCount { hour_bucket: hour(3), count: 2 },
                ],
            )
            .unwrap();

        let dense = series.densify();
        let counts: Vec<u32> = dense.station("A").unwrap().iter().map(|c| c.count).collect();
        assert_eq!(counts, vec![4, 0, 0, 2]);
        assert_eq!(series.station("A").unwrap().len(), 2);
    }

    #[test]
    fn latest_hour_spans_stations() {
        let mut series = CountSeries::from_hourly_counts("A", hour(0), &[1, 2]).unwrap();
        series
            .insert_station("B", consecutive_hours(hour(5), &[3]))
            .unwrap();
        assert_eq!(series.latest_hour(), Some(hour(5)));
        assert_eq!(series.len(), 3);
        assert_eq!(series.station_ids(), vec!["A".to_string(), "B".to_string()]);
    }
}
