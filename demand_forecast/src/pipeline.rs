//! Batch pipeline stages
//!
//! Each stage reads its inputs, computes its result in full and only then
//! writes its output files.

use crate::aggregate::Aggregator;
use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::data::{DataLoader, StationId};
use crate::error::{ForecastError, Result};
use crate::features::{FeatureBuilder, FeatureTable};
use crate::forecast::{ForecastHorizon, ForecastSynthesizer, HistorySnapshot};
use crate::metrics::MAE;
use crate::predict::Predictor;
use crate::table::{read_feature_table, write_feature_table, PredictionTable};
use crate::training::{Trainer, TrainingReport};
use chrono::Duration;
use log::info;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Pipeline stage selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Features,
    Train,
    Predict,
    Forecast,
    All,
}

impl FromStr for Stage {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "features" => Ok(Stage::Features),
            "train" => Ok(Stage::Train),
            "predict" => Ok(Stage::Predict),
            "forecast" => Ok(Stage::Forecast),
            "all" => Ok(Stage::All),
            other => Err(ForecastError::InvalidParameter(format!(
                "Unknown stage '{}' (expected features, train, predict, forecast or all)",
                other
            ))),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Features => "features",
            Stage::Train => "train",
            Stage::Predict => "predict",
            Stage::Forecast => "forecast",
            Stage::All => "all",
        };
        write!(f, "{}", name)
    }
}

/// Trip files → hourly counts → persisted feature table
pub fn run_features(config: &PipelineConfig) -> Result<FeatureTable> {
    let events = DataLoader::from_directory(&config.paths.input_dir, &config.ingest)?;
    let aggregation = Aggregator::new().aggregate(&events)?;
    let table = FeatureBuilder::new(&config.features)?.build(&aggregation.series)?;

    write_feature_table(
        &table,
        &config.paths.feature_table(),
        &config.paths.feature_schema(),
    )?;
    Ok(table)
}

/// Persisted feature table → candidate runs recorded in the catalog
pub fn run_training(config: &PipelineConfig, catalog: &dyn Catalog) -> Result<TrainingReport> {
    let table = load_table(config)?;
    Trainer::new(config.training.clone())?.train(&table, catalog)
}

/// Best model applied to the latest rows of every station's history
pub fn run_predict(config: &PipelineConfig, catalog: &dyn Catalog) -> Result<PredictionTable> {
    let table = load_table(config)?;
    let tail = table.tail_per_station(config.forecast.tail_rows);
    let predictions = Predictor::from_catalog(catalog, MAE)?.predict(&tail)?;

    predictions.write_csv(&config.paths.predictions())?;
    Ok(predictions)
}

/// Best model applied to synthesized rows for the configured horizon
pub fn run_forecast(config: &PipelineConfig, catalog: &dyn Catalog) -> Result<PredictionTable> {
    let table = load_table(config)?;
    let snapshot = HistorySnapshot::from_table(&table)?;

    let start = match config.forecast.start {
        Some(start) => start,
        None => {
            snapshot.latest_hour().ok_or_else(|| {
                ForecastError::DataInsufficient("Feature table has no observed rows".to_string())
            })? + Duration::hours(1)
        }
    };
    let horizon = ForecastHorizon::new(start, config.forecast.hours)?;
    let stations = forecast_stations(&table, &config.forecast.stations);

    let synthesis = ForecastSynthesizer::new(table.schema().clone()).synthesize(
        &snapshot,
        &horizon,
        &stations,
    )?;
    let predictions = Predictor::from_catalog(catalog, MAE)?.predict(&synthesis.table)?;

    predictions.write_csv(&config.paths.forecast())?;
    info!(
        "Forecast {} hours from {} for {} stations",
        horizon.len(),
        horizon.start(),
        stations.len()
    );
    Ok(predictions)
}

/// Stations with history in the table plus any explicitly requested ones
pub fn forecast_stations(table: &FeatureTable, extra: &[String]) -> Vec<StationId> {
    table
        .stations()
        .into_iter()
        .chain(extra.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Run one stage, or every stage in order
pub fn run_stage(stage: Stage, config: &PipelineConfig, catalog: &dyn Catalog) -> Result<()> {
    info!("Running stage {}", stage);
    match stage {
        Stage::Features => {
            run_features(config)?;
        }
        Stage::Train => {
            run_training(config, catalog)?;
        }
        Stage::Predict => {
            run_predict(config, catalog)?;
        }
        Stage::Forecast => {
            run_forecast(config, catalog)?;
        }
        Stage::All => {
            for stage in [Stage::Features, Stage::Train, Stage::Predict, Stage::Forecast] {
                run_stage(stage, config, catalog)?;
            }
        }
    }
    Ok(())
}

fn load_table(config: &PipelineConfig) -> Result<FeatureTable> {
    read_feature_table(
        &config.paths.feature_table(),
        &config.paths.feature_schema(),
    )
}
