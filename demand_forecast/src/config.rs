//! Pipeline configuration
//!
//! Configuration is a plain serde structure with defaults for every field, so a
//! JSON file only needs to name the values it changes. `from_env` loads a
//! `.env` file first and then applies `RIDECAST_*` variables on top.

use crate::aggregate::parse_timestamp;
use crate::error::{ForecastError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default number of lag features
pub const DEFAULT_LAGS: usize = 28;

/// Default rolling window sizes
pub const DEFAULT_WINDOWS: [usize; 3] = [6, 12, 24];

/// Complete configuration of the forecasting pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathConfig,
    pub ingest: IngestConfig,
    pub features: FeatureConfig,
    pub training: TrainingConfig,
    pub forecast: ForecastConfig,
    pub catalog: RetryPolicy,
}

/// Input and output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory holding raw trip CSV files
    pub input_dir: PathBuf,
    /// Root directory for feature and prediction tables
    pub output_dir: PathBuf,
    /// Directory of the local model catalog
    pub catalog_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./data/processed"),
            output_dir: PathBuf::from("./data"),
            catalog_dir: PathBuf::from("./data/catalog"),
        }
    }
}

impl PathConfig {
    /// Location of the persisted feature table
    pub fn feature_table(&self) -> PathBuf {
        self.output_dir.join("features").join("ride_features.csv")
    }

    /// Location of the feature schema manifest
    pub fn feature_schema(&self) -> PathBuf {
        self.output_dir.join("features").join("feature_schema.json")
    }

    /// Location of predictions over the tail of the historical table
    pub fn predictions(&self) -> PathBuf {
        self.output_dir.join("predictions").join("predictions.csv")
    }

    /// Location of predictions over the synthesized future table
    pub fn forecast(&self) -> PathBuf {
        self.output_dir.join("predictions").join("forecast.csv")
    }
}

/// How raw trip files are read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub station_column: String,
    pub timestamp_column: String,
    /// Read at most this many rows from each file
    pub max_rows_per_file: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            station_column: "start_station_id".to_string(),
            timestamp_column: "started_at".to_string(),
            max_rows_per_file: None,
        }
    }
}

/// Lag and rolling-window feature configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Number of lag features (lag_1..lag_K)
    pub lags: usize,
    /// Rolling window sizes, each producing a mean and a standard deviation
    pub windows: Vec<usize>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: DEFAULT_LAGS,
            windows: DEFAULT_WINDOWS.to_vec(),
        }
    }
}

impl FeatureConfig {
    /// Create a feature configuration, validating its parameters
    pub fn new(lags: usize, windows: Vec<usize>) -> Result<Self> {
        let config = Self { lags, windows };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lags == 0 {
            return Err(ForecastError::InvalidParameter(
                "Lag count must be positive".to_string(),
            ));
        }
        if let Some(&window) = self.windows.iter().find(|&&w| w < 2) {
            return Err(ForecastError::InvalidParameter(format!(
                "Rolling window {} is too small; standard deviation needs at least 2 values",
                window
            )));
        }
        let unique: BTreeSet<_> = self.windows.iter().collect();
        if unique.len() != self.windows.len() {
            return Err(ForecastError::InvalidParameter(
                "Rolling windows must be distinct".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of preceding observations a row needs before every feature is defined
    pub fn required_history(&self) -> usize {
        self.windows
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
            .max(self.lags)
    }
}

/// Model training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Fraction of the chronologically ordered table used for training
    pub train_fraction: f64,
    /// Smallest feature table the trainer accepts
    pub min_rows: usize,
    /// Size of the reduced feature subset
    pub top_n: usize,
    /// L2 penalty of the ridge estimator
    pub ridge_alpha: f64,
    /// Feature columns never offered to estimators
    pub exclude_features: Vec<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.8,
            min_rows: 10,
            top_n: 10,
            ridge_alpha: 1.0,
            exclude_features: vec!["month".to_string()],
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "Train fraction must be between 0 and 1, got {}",
                self.train_fraction
            )));
        }
        if self.min_rows < 2 {
            return Err(ForecastError::InvalidParameter(
                "Minimum table size must allow a train and a test row".to_string(),
            ));
        }
        // lag and rolling-mean columns are collinear, so the penalty is required
        if !(self.ridge_alpha > 0.0 && self.ridge_alpha.is_finite()) {
            return Err(ForecastError::InvalidParameter(format!(
                "Ridge alpha must be a positive number, got {}",
                self.ridge_alpha
            )));
        }
        Ok(())
    }
}

/// Forecast horizon and station selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// First forecast hour; defaults to the hour after the latest known row
    pub start: Option<NaiveDateTime>,
    /// Number of consecutive hours to forecast
    pub hours: usize,
    /// Stations to forecast in addition to those with history
    pub stations: Vec<String>,
    /// Rows per station taken from the end of the historical table for `predict`
    pub tail_rows: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            start: None,
            hours: 24,
            stations: Vec::new(),
            tail_rows: 48,
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hours == 0 {
            return Err(ForecastError::InvalidParameter(
                "Forecast horizon must cover at least one hour".to_string(),
            ));
        }
        if self.tail_rows == 0 {
            return Err(ForecastError::InvalidParameter(
                "Tail row count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounded retry policy for catalog calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the environment.
    ///
    /// `RIDECAST_CONFIG` names an optional JSON base file; the remaining
    /// `RIDECAST_*` variables override individual values.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match env::var("RIDECAST_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(dir) = env::var("RIDECAST_INPUT_DIR") {
            config.paths.input_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("RIDECAST_OUTPUT_DIR") {
            config.paths.output_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("RIDECAST_CATALOG_DIR") {
            config.paths.catalog_dir = PathBuf::from(dir);
        }
        if let Some(lags) = env_parse("RIDECAST_LAGS")? {
            config.features.lags = lags;
        }
        if let Ok(windows) = env::var("RIDECAST_WINDOWS") {
            config.features.windows = parse_list(&windows)?;
        }
        if let Some(fraction) = env_parse("RIDECAST_TRAIN_FRACTION")? {
            config.training.train_fraction = fraction;
        }
        if let Some(top_n) = env_parse("RIDECAST_TOP_N")? {
            config.training.top_n = top_n;
        }
        if let Ok(start) = env::var("RIDECAST_FORECAST_START") {
            let start = parse_timestamp(&start).ok_or_else(|| {
                ForecastError::InvalidParameter(format!(
                    "RIDECAST_FORECAST_START is not a timestamp: {}",
                    start
                ))
            })?;
            config.forecast.start = Some(start);
        }
        if let Some(hours) = env_parse("RIDECAST_FORECAST_HOURS")? {
            config.forecast.hours = hours;
        }
        if let Ok(stations) = env::var("RIDECAST_FORECAST_STATIONS") {
            config.forecast.stations = stations
                .split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect();
        }
        if let Some(attempts) = env_parse("RIDECAST_CATALOG_ATTEMPTS")? {
            config.catalog.max_attempts = attempts;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.training.validate()?;
        self.forecast.validate()?;
        if self.catalog.max_attempts == 0 {
            return Err(ForecastError::InvalidParameter(
                "Catalog retry policy needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ForecastError::InvalidParameter(format!("{} has an invalid value: {}", key, raw))
        }),
        Err(_) => Ok(None),
    }
}

fn parse_list(raw: &str) -> Result<Vec<usize>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| {
                ForecastError::InvalidParameter(format!("Invalid window size: {}", s))
            })
        })
        .collect()
}
