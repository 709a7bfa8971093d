//! Forecast feature synthesis
//!
//! Builds feature rows for future hours that have no observed history,
//! using the same [`FeatureSchema`] as the historical table so one estimator
//! can score either table.
//!
//! The future hours of a station are appended after its last observation,
//! so lag positions keep counting rows. A lag or rolling field is taken from
//! real counts only when every count it needs is observed; otherwise the
//! value comes from the [`FallbackPolicy`]:
//!
//! | field            | default rule       |
//! |------------------|--------------------|
//! | `lag_i`          | `LastValue`        |
//! | `rolling_mean_w` | `HistoricalMean`   |
//! | `rolling_std_w`  | `HistoricalStd`    |
//! | calendar fields  | always exact       |
//!
//! Stations with no history at all resolve every rule against the global
//! statistics of all known stations, where the "last value" is the global
//! mean. With no history anywhere every imputed field is zero.

use crate::aggregate::floor_hour;
use crate::data::{CountSeries, StationId};
use crate::error::{ForecastError, Result};
use crate::features::{FeatureKind, FeatureRow, FeatureSchema, FeatureTable};
use crate::utils::future_hours;
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use series_math::RollingWindow;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet};

/// Source of an imputed feature value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FallbackRule {
    /// Most recent observed count
    LastValue,
    /// Mean of all observed counts
    HistoricalMean,
    /// Sample standard deviation of all observed counts
    HistoricalStd,
    Zero,
}

/// Fixed mapping from feature family to fallback rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub lag: FallbackRule,
    pub rolling_mean: FallbackRule,
    pub rolling_std: FallbackRule,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            lag: FallbackRule::LastValue,
            rolling_mean: FallbackRule::HistoricalMean,
            rolling_std: FallbackRule::HistoricalStd,
        }
    }
}

impl FallbackPolicy {
    /// Rule for a feature; calendar features never fall back
    pub fn rule_for(&self, kind: &FeatureKind) -> Option<FallbackRule> {
        match kind {
            FeatureKind::Lag(_) => Some(self.lag),
            FeatureKind::RollingMean(_) => Some(self.rolling_mean),
            FeatureKind::RollingStd(_) => Some(self.rolling_std),
            FeatureKind::Calendar(_) => None,
        }
    }

    /// The full column → rule table for a schema
    pub fn table(&self, schema: &FeatureSchema) -> Vec<(String, Option<FallbackRule>)> {
        schema
            .features()
            .iter()
            .map(|kind| (kind.column_name(), self.rule_for(kind)))
            .collect()
    }
}

/// Summary statistics of a station's observed counts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StationStats {
    pub last_value: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl StationStats {
    /// Statistics of counts given oldest first; `None` when empty
    pub fn from_counts(counts: &[f64]) -> Option<Self> {
        let last_value = *counts.last()?;
        let mean = counts.iter().mean();
        let std_dev = if counts.len() < 2 {
            0.0
        } else {
            counts.iter().std_dev()
        };

        Some(Self {
            last_value,
            mean,
            std_dev,
        })
    }

    pub fn zero() -> Self {
        Self {
            last_value: 0.0,
            mean: 0.0,
            std_dev: 0.0,
        }
    }

    pub fn resolve(&self, rule: FallbackRule) -> f64 {
        match rule {
            FallbackRule::LastValue => self.last_value,
            FallbackRule::HistoricalMean => self.mean,
            FallbackRule::HistoricalStd => self.std_dev,
            FallbackRule::Zero => 0.0,
        }
    }
}

/// Most recent known state of one station
#[derive(Debug, Clone, PartialEq)]
pub struct StationHistory {
    /// Latest observed counts in row order, oldest first
    pub recent: Vec<f64>,
    pub stats: StationStats,
    pub last_hour: NaiveDateTime,
}

/// Read-only view of the latest history of every known station
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySnapshot {
    stations: BTreeMap<StationId, StationHistory>,
    global: Option<StationStats>,
}

impl HistorySnapshot {
    /// Snapshot from a count series, keeping `required_history` recent counts
    /// per station
    pub fn from_series(series: &CountSeries, schema: &FeatureSchema) -> Self {
        let keep = schema.required_history();
        let mut all_counts = Vec::with_capacity(series.len());
        let mut stations = BTreeMap::new();

        for (station_id, counts) in series.stations() {
            let values: Vec<f64> = counts.iter().map(|c| f64::from(c.count)).collect();
            let (stats, last_hour) = match (StationStats::from_counts(&values), counts.last()) {
                (Some(stats), Some(last)) => (stats, last.hour_bucket),
                _ => continue,
            };
            let recent = values[values.len().saturating_sub(keep)..].to_vec();
            all_counts.extend_from_slice(&values);
            stations.insert(
                station_id.clone(),
                StationHistory {
                    recent,
                    stats,
                    last_hour,
                },
            );
        }

        Self {
            stations,
            global: global_stats(&all_counts),
        }
    }

    /// Snapshot from a labelled historical feature table.
    ///
    /// The recent counts of a station are the labels of its last rows,
    /// preceded by the lag fields of its first row when the table holds fewer
    /// than `required_history` rows. Statistics cover those first-row lags and
    /// every label.
    pub fn from_table(table: &FeatureTable) -> Result<Self> {
        let schema = table.schema();
        let keep = schema.required_history();
        let lag_indices: Vec<usize> = (1..=schema.lags())
            .rev()
            .map(|lag| {
                schema.index_of(&format!("lag_{}", lag)).ok_or_else(|| {
                    ForecastError::Alignment(format!("Feature table has no lag_{} column", lag))
                })
            })
            .collect::<Result<_>>()?;

        let mut by_station: BTreeMap<&str, Vec<&FeatureRow>> = BTreeMap::new();
        for row in table.rows().iter().filter(|row| row.count.is_some()) {
            by_station.entry(row.station_id.as_str()).or_default().push(row);
        }

        let mut all_counts = Vec::new();
        let mut stations = BTreeMap::new();
        for (station_id, mut rows) in by_station {
            rows.sort_by_key(|row| row.hour_bucket);
            let (first, last) = match (rows.first(), rows.last()) {
                (Some(first), Some(last)) => (*first, *last),
                _ => continue,
            };

            // counts before the first row, oldest first, then every label
            let mut counts: Vec<f64> = lag_indices.iter().map(|&idx| first.values[idx]).collect();
            counts.extend(rows.iter().filter_map(|row| row.count.map(f64::from)));
            let stats = match StationStats::from_counts(&counts) {
                Some(stats) => stats,
                None => continue,
            };
            let recent = counts[counts.len().saturating_sub(keep)..].to_vec();

            all_counts.extend_from_slice(&counts);
            stations.insert(
                station_id.to_string(),
                StationHistory {
                    recent,
                    stats,
                    last_hour: last.hour_bucket,
                },
            );
        }

        Ok(Self {
            stations,
            global: global_stats(&all_counts),
        })
    }

    pub fn station(&self, station_id: &str) -> Option<&StationHistory> {
        self.stations.get(station_id)
    }

    pub fn station_ids(&self) -> Vec<StationId> {
        self.stations.keys().cloned().collect()
    }

    /// Statistics over every station, used for stations without history
    pub fn global(&self) -> Option<&StationStats> {
        self.global.as_ref()
    }

    /// Latest observed hour across stations
    pub fn latest_hour(&self) -> Option<NaiveDateTime> {
        self.stations.values().map(|h| h.last_hour).max()
    }
}

fn global_stats(counts: &[f64]) -> Option<StationStats> {
    StationStats::from_counts(counts).map(|stats| StationStats {
        last_value: stats.mean,
        ..stats
    })
}

/// Consecutive future hours to forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastHorizon {
    start: NaiveDateTime,
    hours: usize,
}

impl ForecastHorizon {
    /// Horizon of `hours` hours from the hour containing `start`
    pub fn new(start: NaiveDateTime, hours: usize) -> Result<Self> {
        if hours == 0 {
            return Err(ForecastError::InvalidParameter(
                "Forecast horizon must cover at least one hour".to_string(),
            ));
        }
        let start = floor_hour(start).ok_or_else(|| {
            ForecastError::InvalidParameter(format!("Cannot truncate {} to an hour", start))
        })?;
        Ok(Self { start, hours })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn len(&self) -> usize {
        self.hours
    }

    pub fn is_empty(&self) -> bool {
        self.hours == 0
    }

    pub fn hour_buckets(&self) -> Vec<NaiveDateTime> {
        future_hours(self.start, self.hours)
    }
}

/// Synthesized future feature table and what was imputed to build it
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub table: FeatureTable,
    /// Number of feature values taken from the fallback policy
    pub imputed_values: usize,
    /// Requested stations that had no history at all
    pub cold_stations: Vec<StationId>,
}

/// Builds unlabelled feature rows for future hours
#[derive(Debug, Clone)]
pub struct ForecastSynthesizer {
    schema: FeatureSchema,
    policy: FallbackPolicy,
}

impl ForecastSynthesizer {
    pub fn new(schema: FeatureSchema) -> Self {
        Self::with_policy(schema, FallbackPolicy::default())
    }

    pub fn with_policy(schema: FeatureSchema, policy: FallbackPolicy) -> Self {
        Self { schema, policy }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    /// One row per (station, hour) of the horizon for every requested station.
    ///
    /// Rows are ordered by station, then hour. The snapshot is only read.
    /// A horizon that starts at or before a station's last observed hour is
    /// rejected.
    pub fn synthesize(
        &self,
        snapshot: &HistorySnapshot,
        horizon: &ForecastHorizon,
        stations: &[StationId],
    ) -> Result<Synthesis> {
        let stations: BTreeSet<&StationId> = stations.iter().collect();
        if stations.is_empty() {
            return Err(ForecastError::DataInsufficient(
                "No stations requested for the forecast".to_string(),
            ));
        }

        let fallback_global = snapshot.global().copied().unwrap_or_else(StationStats::zero);
        let hours = horizon.hour_buckets();
        let mut table = FeatureTable::new(self.schema.clone());
        let mut imputed_values = 0usize;
        let mut cold_stations = Vec::new();

        for station_id in stations {
            let history = snapshot.station(station_id);
            let (recent, stats) = match history {
                Some(history) => {
                    // rows are built from the tail, which must precede every forecast hour
                    if history.last_hour >= horizon.start() {
                        return Err(ForecastError::InvalidParameter(format!(
                            "Forecast for station {} starts at {}, within its history ending {}",
                            station_id,
                            horizon.start(),
                            history.last_hour
                        )));
                    }
                    (history.recent.as_slice(), history.stats)
                }
                None => {
                    cold_stations.push(station_id.clone());
                    (&[][..], fallback_global)
                }
            };

            for (step, &hour) in hours.iter().enumerate() {
                let values = self.schema.assemble(hour, |kind| {
                    match observed_value(kind, step, recent)? {
                        Some(value) => Ok(value),
                        None => {
                            imputed_values += 1;
                            Ok(self.fallback(kind, &stats))
                        }
                    }
                })?;
                table.push(FeatureRow {
                    station_id: station_id.clone(),
                    hour_bucket: hour,
                    count: None,
                    values,
                })?;
            }
            debug!("Synthesized {} rows for station {}", hours.len(), station_id);
        }

        if !cold_stations.is_empty() {
            warn!(
                "{} stations have no history; using global fallback values: {:?}",
                cold_stations.len(),
                cold_stations
            );
        }
        info!(
            "Synthesized {} forecast rows ({} imputed values)",
            table.len(),
            imputed_values
        );

        Ok(Synthesis {
            table,
            imputed_values,
            cold_stations,
        })
    }

    fn fallback(&self, kind: &FeatureKind, stats: &StationStats) -> f64 {
        self.policy
            .rule_for(kind)
            .map_or(0.0, |rule| stats.resolve(rule))
    }
}

/// Value of a history feature at `step` rows past the last observation, when
/// every count it depends on is observed
fn observed_value(kind: &FeatureKind, step: usize, recent: &[f64]) -> Result<Option<f64>> {
    match *kind {
        FeatureKind::Lag(lag) => {
            if lag <= step {
                return Ok(None);
            }
            let back = lag - step;
            Ok(recent.len().checked_sub(back).map(|idx| recent[idx]))
        }
        FeatureKind::RollingMean(window) | FeatureKind::RollingStd(window) => {
            if step > 0 || recent.len() < window {
                return Ok(None);
            }
            let mut trailing = RollingWindow::new(window)?;
            for &value in &recent[recent.len() - window..] {
                trailing.update(value);
            }
            let value = if matches!(kind, FeatureKind::RollingMean(_)) {
                trailing.mean()?
            } else {
                trailing.std_dev()?
            };
            Ok(Some(value))
        }
        FeatureKind::Calendar(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use chrono::NaiveDate;

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn schema() -> FeatureSchema {
        FeatureSchema::new(&FeatureConfig::new(3, vec![2]).unwrap()).unwrap()
    }

    #[test]
    fn lags_reach_into_history_then_fall_back() {
        let series = CountSeries::from_hourly_counts("A", hour(0), &[1, 2, 3, 4]).unwrap();
        let schema = schema();
        let snapshot = HistorySnapshot::from_series(&series, &schema);
        let horizon = ForecastHorizon::new(hour(4), 3).unwrap();

        let synthesis = ForecastSynthesizer::new(schema.clone())
            .synthesize(&snapshot, &horizon, &["A".to_string()])
            .unwrap();
        let rows = synthesis.table.rows();

        // step 0: every lag is observed
        assert_eq!(rows[0].get(&schema, "lag_1"), Some(4.0));
        assert_eq!(rows[0].get(&schema, "lag_3"), Some(2.0));
        assert_eq!(rows[0].get(&schema, "rolling_mean_2"), Some(3.5));
        // step 1: lag_1 points at the unobserved step 0, lag_2 at the last count
        assert_eq!(rows[1].get(&schema, "lag_1"), Some(4.0));
        assert_eq!(rows[1].get(&schema, "lag_2"), Some(4.0));
        assert_eq!(rows[1].get(&schema, "lag_3"), Some(3.0));
        assert_eq!(rows[1].get(&schema, "rolling_mean_2"), Some(2.5));
        // step 2: lag_3 is the last observation
        assert_eq!(rows[2].get(&schema, "lag_3"), Some(4.0));
    }

    #[test]
    fn fallback_policy_table_covers_every_column() {
        let schema = schema();
        let table = FallbackPolicy::default().table(&schema);
        assert_eq!(table.len(), schema.len());
        assert_eq!(table[0], ("lag_1".to_string(), Some(FallbackRule::LastValue)));
        assert_eq!(
            table.iter().find(|(c, _)| c == "month").unwrap().1,
            None
        );
    }

    #[test]
    fn horizon_floors_start_and_rejects_empty() {
        let start = hour(5) + chrono::Duration::minutes(42);
        let horizon = ForecastHorizon::new(start, 2).unwrap();
        assert_eq!(horizon.start(), hour(5));
        assert_eq!(horizon.hour_buckets(), vec![hour(5), hour(6)]);
        assert!(ForecastHorizon::new(start, 0).is_err());
    }

    #[test]
    fn single_count_station_has_zero_spread() {
        let stats = StationStats::from_counts(&[7.0]).unwrap();
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.mean, 7.0);
        assert!(StationStats::from_counts(&[]).is_none());
    }
}
