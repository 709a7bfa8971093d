//! # Demand Forecast
//!
//! Hourly bike-share demand forecasting per docking station.
//!
//! ## Features
//!
//! - Aggregation of raw trip starts into per-station hourly counts
//! - Leakage-safe lag, rolling-window and calendar features behind a
//!   versioned feature schema
//! - Forecast-table synthesis for future hours with an explicit fallback policy
//! - Chronological training of candidate estimators (mean baseline, ridge)
//! - A model catalog that records runs and returns the best one by MAE
//! - CSV persistence of feature and prediction tables
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use demand_forecast::aggregate::Aggregator;
//! use demand_forecast::config::FeatureConfig;
//! use demand_forecast::features::FeatureBuilder;
//! use demand_forecast::forecast::{ForecastHorizon, ForecastSynthesizer, HistorySnapshot};
//! use demand_forecast::utils::synthetic_trip_events;
//!
//! # fn main() -> demand_forecast::Result<()> {
//! let start = NaiveDate::from_ymd_opt(2024, 5, 1)
//!     .unwrap()
//!     .and_hms_opt(0, 0, 0)
//!     .unwrap();
//!
//! // Hourly counts from trip starts
//! let events = synthetic_trip_events(&["A", "B"], start, 96, 4.0, 42)?;
//! let aggregation = Aggregator::new().aggregate(&events)?;
//!
//! // Historical feature table
//! let builder = FeatureBuilder::new(&FeatureConfig::default())?;
//! let table = builder.build(&aggregation.series)?;
//!
//! // Feature rows for the next 24 hours, same columns as the history
//! let snapshot = HistorySnapshot::from_series(&aggregation.series, builder.schema());
//! let horizon = ForecastHorizon::new(start + chrono::Duration::hours(96), 24)?;
//! let synthesis = ForecastSynthesizer::new(builder.schema().clone())
//!     .synthesize(&snapshot, &horizon, &table.stations())?;
//!
//! assert_eq!(synthesis.table.len(), 48);
//! assert_eq!(synthesis.table.schema(), table.schema());
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod forecast;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod predict;
pub mod table;
pub mod training;
pub mod utils;

// Re-export commonly used types
pub use crate::aggregate::{Aggregation, Aggregator};
pub use crate::catalog::{Catalog, LocalCatalog, RetryingCatalog};
pub use crate::config::PipelineConfig;
pub use crate::data::{CountSeries, DataLoader, Event};
pub use crate::error::{ForecastError, Result};
pub use crate::features::{FeatureBuilder, FeatureSchema, FeatureTable};
pub use crate::forecast::{FallbackPolicy, ForecastSynthesizer, HistorySnapshot};
pub use crate::models::{FittedRegressor, Regressor};
pub use crate::predict::Predictor;
pub use crate::table::PredictionTable;
pub use crate::training::Trainer;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
