//! Leakage-safe lag, rolling-window and calendar features
//!
//! Every feature of a row at hour `T` is computed from counts that precede
//! `T` in its station's series. Lags count back over *rows*, not elapsed
//! hours: when a station has missing hours, `lag_1` is the previous observed
//! hour, however far back it lies.

use crate::config::FeatureConfig;
use crate::data::{CountSeries, HourCount, StationId};
use crate::error::{ForecastError, Result};
use crate::models::FeatureMatrix;
use chrono::{Datelike, NaiveDateTime, Timelike};
use log::{debug, info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use series_math::RollingWindow;
use std::collections::BTreeSet;

/// Version of the feature schema layout
pub const SCHEMA_VERSION: u32 = 1;

/// Calendar attributes derived from the hour bucket alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalendarField {
    HourOfDay,
    Weekday,
    IsWeekend,
    Month,
}

impl CalendarField {
    pub const ALL: [CalendarField; 4] = [
        CalendarField::HourOfDay,
        CalendarField::Weekday,
        CalendarField::IsWeekend,
        CalendarField::Month,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CalendarField::HourOfDay => "hour_of_day",
            CalendarField::Weekday => "weekday",
            CalendarField::IsWeekend => "is_weekend",
            CalendarField::Month => "month",
        }
    }

    /// Value for an hour bucket; weekdays count from Monday = 0
    pub fn value(&self, hour: NaiveDateTime) -> f64 {
        let weekday = hour.weekday().num_days_from_monday();
        match self {
            CalendarField::HourOfDay => hour.hour() as f64,
            CalendarField::Weekday => weekday as f64,
            CalendarField::IsWeekend => {
                if weekday >= 5 {
                    1.0
                } else {
                    0.0
                }
            }
            CalendarField::Month => hour.month() as f64,
        }
    }
}

/// What a feature column holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Count at the i-th preceding row
    Lag(usize),
    /// Mean of the w preceding rows
    RollingMean(usize),
    /// Sample standard deviation of the w preceding rows
    RollingStd(usize),
    Calendar(CalendarField),
}

impl FeatureKind {
    pub fn column_name(&self) -> String {
        match self {
            FeatureKind::Lag(i) => format!("lag_{}", i),
            FeatureKind::RollingMean(w) => format!("rolling_mean_{}", w),
            FeatureKind::RollingStd(w) => format!("rolling_std_{}", w),
            FeatureKind::Calendar(field) => field.name().to_string(),
        }
    }
}

/// Ordered, versioned list of feature columns.
///
/// Produced once from a [`FeatureConfig`] and shared verbatim by the feature
/// builder, the forecast synthesizer, the trainer and the predictor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    version: u32,
    lags: usize,
    windows: Vec<usize>,
    features: Vec<FeatureKind>,
}

impl FeatureSchema {
    /// Derive the schema for a feature configuration
    pub fn new(config: &FeatureConfig) -> Result<Self> {
        config.validate()?;

        let mut features: Vec<FeatureKind> = (1..=config.lags).map(FeatureKind::Lag).collect();
        for &window in &config.windows {
            features.push(FeatureKind::RollingMean(window));
            features.push(FeatureKind::RollingStd(window));
        }
        features.extend(CalendarField::ALL.iter().copied().map(FeatureKind::Calendar));

        Ok(Self {
            version: SCHEMA_VERSION,
            lags: config.lags,
            windows: config.windows.clone(),
            features,
        })
    }

    /// Check that a deserialized manifest is one this crate produces
    pub fn validate(&self) -> Result<()> {
        if self.version != SCHEMA_VERSION {
            return Err(ForecastError::Alignment(format!(
                "Feature schema version {} is not supported (expected {})",
                self.version, SCHEMA_VERSION
            )));
        }
        let expected = Self::new(&self.feature_config())?;
        if expected.features != self.features {
            return Err(ForecastError::Alignment(
                "Feature schema columns do not match its lag and window settings".to_string(),
            ));
        }
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn lags(&self) -> usize {
        self.lags
    }

    pub fn windows(&self) -> &[usize] {
        &self.windows
    }

    pub fn features(&self) -> &[FeatureKind] {
        &self.features
    }

    /// Feature column names in schema order
    pub fn columns(&self) -> Vec<String> {
        self.features.iter().map(FeatureKind::column_name).collect()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.features.iter().position(|f| f.column_name() == column)
    }

    pub fn feature_config(&self) -> FeatureConfig {
        FeatureConfig {
            lags: self.lags,
            windows: self.windows.clone(),
        }
    }

    /// Rows a station must have observed before its first complete row
    pub fn required_history(&self) -> usize {
        self.feature_config().required_history()
    }

    /// Assemble the feature values of one row in schema order.
    ///
    /// Calendar fields are computed here; every other field is delegated to
    /// `resolve`.
    pub fn assemble<F>(&self, hour: NaiveDateTime, mut resolve: F) -> Result<Vec<f64>>
    where
        F: FnMut(&FeatureKind) -> Result<f64>,
    {
        self.features
            .iter()
            .map(|kind| match kind {
                FeatureKind::Calendar(field) => Ok(field.value(hour)),
                other => resolve(other),
            })
            .collect()
    }
}

/// One row of the feature table
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub station_id: StationId,
    pub hour_bucket: NaiveDateTime,
    /// Observed ride count; absent for synthesized future rows
    pub count: Option<u32>,
    /// Feature values in schema order
    pub values: Vec<f64>,
}

impl FeatureRow {
    /// Value of a named feature column
    pub fn get(&self, schema: &FeatureSchema, column: &str) -> Option<f64> {
        schema
            .index_of(column)
            .and_then(|idx| self.values.get(idx).copied())
    }
}

/// Feature rows sharing one schema
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    schema: FeatureSchema,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Create an empty table
    pub fn new(schema: FeatureSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(schema: FeatureSchema, rows: Vec<FeatureRow>) -> Result<Self> {
        let mut table = Self::new(schema);
        for row in rows {
            table.push(row)?;
        }
        Ok(table)
    }

    /// Append a row, checking it is complete for the schema
    pub fn push(&mut self, row: FeatureRow) -> Result<()> {
        if row.values.len() != self.schema.len() {
            return Err(ForecastError::Alignment(format!(
                "Row for station {} at {} has {} values, schema has {}",
                row.station_id,
                row.hour_bucket,
                row.values.len(),
                self.schema.len()
            )));
        }
        if row.values.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::DataError(format!(
                "Row for station {} at {} has a missing feature value",
                row.station_id, row.hour_bucket
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<FeatureRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every column of the table: keys, label, then features in schema order
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![
            "station_id".to_string(),
            "hour_bucket".to_string(),
            "count".to_string(),
        ];
        columns.extend(self.schema.columns());
        columns
    }

    /// Distinct station ids in ascending order
    pub fn stations(&self) -> Vec<StationId> {
        self.rows
            .iter()
            .map(|row| row.station_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn latest_hour(&self) -> Option<NaiveDateTime> {
        self.rows.iter().map(|row| row.hour_bucket).max()
    }

    /// Rows of one station in table order
    pub fn station_rows<'a>(&'a self, station_id: &'a str) -> impl Iterator<Item = &'a FeatureRow> {
        self.rows.iter().filter(move |row| row.station_id == station_id)
    }

    /// Order rows by hour, breaking ties by station
    pub fn sort_chronologically(&mut self) {
        self.rows.sort_by(|a, b| {
            a.hour_bucket
                .cmp(&b.hour_bucket)
                .then_with(|| a.station_id.cmp(&b.station_id))
        });
    }

    /// Order rows by station, then hour
    pub fn sort_by_station(&mut self) {
        self.rows.sort_by(|a, b| {
            a.station_id
                .cmp(&b.station_id)
                .then_with(|| a.hour_bucket.cmp(&b.hour_bucket))
        });
    }

    /// The last `n` rows of every station, ordered by station then hour
    pub fn tail_per_station(&self, n: usize) -> Self {
        let mut sorted = self.clone();
        sorted.sort_by_station();

        let mut rows = Vec::new();
        let mut start = 0;
        while start < sorted.rows.len() {
            let station = &sorted.rows[start].station_id;
            let end = sorted.rows[start..]
                .iter()
                .position(|row| &row.station_id != station)
                .map_or(sorted.rows.len(), |offset| start + offset);
            let keep_from = end.saturating_sub(n).max(start);
            rows.extend_from_slice(&sorted.rows[keep_from..end]);
            start = end;
        }

        Self {
            schema: self.schema.clone(),
            rows,
        }
    }

    /// Observed counts as regression targets
    pub fn labels(&self) -> Result<Vec<f64>> {
        self.rows
            .iter()
            .map(|row| {
                row.count.map(f64::from).ok_or_else(|| {
                    ForecastError::DataError(format!(
                        "Row for station {} at {} has no observed count",
                        row.station_id, row.hour_bucket
                    ))
                })
            })
            .collect()
    }

    /// Project the table onto the named feature columns, in the given order.
    ///
    /// Naming a column the schema does not carry is an alignment error.
    pub fn select(&self, columns: &[String]) -> Result<FeatureMatrix> {
        let indices = columns
            .iter()
            .map(|column| {
                self.schema.index_of(column).ok_or_else(|| {
                    ForecastError::Alignment(format!(
                        "Feature table has no column '{}'",
                        column
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let values = Array2::from_shape_fn((self.rows.len(), indices.len()), |(i, j)| {
            self.rows[i].values[indices[j]]
        });

        FeatureMatrix::from_array(columns.to_vec(), values)
    }
}

/// Computes feature rows per station from an hourly count series
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    schema: FeatureSchema,
}

impl FeatureBuilder {
    pub fn new(config: &FeatureConfig) -> Result<Self> {
        Ok(Self {
            schema: FeatureSchema::new(config)?,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Build the feature table for every station of the series.
    ///
    /// Stations without enough history contribute no rows. A series that
    /// yields no rows at all is an error.
    pub fn build(&self, series: &CountSeries) -> Result<FeatureTable> {
        let mut table = FeatureTable::new(self.schema.clone());
        let mut cold_stations = 0usize;

        for (station_id, counts) in series.stations() {
            let rows = self.build_station(station_id, counts)?;
            if rows.is_empty() {
                cold_stations += 1;
                debug!(
                    "Station {} has {} hours, needs more than {} for a feature row",
                    station_id,
                    counts.len(),
                    self.schema.required_history()
                );
            }
            for row in rows {
                table.push(row)?;
            }
        }

        if cold_stations > 0 {
            warn!(
                "{} of {} stations lack enough history for any feature row",
                cold_stations,
                series.station_count()
            );
        }

        if table.is_empty() {
            return Err(ForecastError::DataInsufficient(format!(
                "No station has more than {} observed hours",
                self.schema.required_history()
            )));
        }

        info!(
            "Built {} feature rows with {} columns",
            table.len(),
            self.schema.len()
        );
        Ok(table)
    }

    /// Feature rows of a single station, oldest first
    pub fn build_station(&self, station_id: &str, counts: &[HourCount]) -> Result<Vec<FeatureRow>> {
        let required = self.schema.required_history();
        let mut history = RollingWindow::new(required.max(1))?;
        let mut rows = Vec::with_capacity(counts.len().saturating_sub(required));

        for (position, observed) in counts.iter().enumerate() {
            if position >= required {
                let values = self
                    .schema
                    .assemble(observed.hour_bucket, |kind| trailing_value(&history, kind))?;
                rows.push(FeatureRow {
                    station_id: station_id.to_string(),
                    hour_bucket: observed.hour_bucket,
                    count: Some(observed.count),
                    values,
                });
            }
            history.update(f64::from(observed.count));
        }

        Ok(rows)
    }
}

/// Feature value from the preceding observations held in `history`
fn trailing_value(history: &RollingWindow, kind: &FeatureKind) -> Result<f64> {
    match *kind {
        FeatureKind::Lag(lag) => history.lag(lag).ok_or_else(|| {
            ForecastError::DataInsufficient(format!("No observation {} rows back", lag))
        }),
        FeatureKind::RollingMean(window) => Ok(trailing_window(history, window)?.mean()?),
        FeatureKind::RollingStd(window) => Ok(trailing_window(history, window)?.std_dev()?),
        FeatureKind::Calendar(field) => Err(ForecastError::InvalidParameter(format!(
            "Calendar field {} is not derived from history",
            field.name()
        ))),
    }
}

/// The last `window` observations of `history` as their own window
fn trailing_window(history: &RollingWindow, window: usize) -> Result<RollingWindow> {
    if history.len() < window {
        return Err(ForecastError::DataInsufficient(format!(
            "Need {} observations for a rolling window, have {}",
            window,
            history.len()
        )));
    }
    let mut trailing = RollingWindow::new(window)?;
    for value in history.values().skip(history.len() - window) {
        trailing.update(value);
    }
    Ok(trailing)
}
