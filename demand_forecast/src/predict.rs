//! Applying a fitted estimator to a feature table

use crate::catalog::Catalog;
use crate::error::{ForecastError, Result};
use crate::features::FeatureTable;
use crate::models::FittedRegressor;
use crate::table::{PredictionRow, PredictionTable};
use log::info;

/// Scores historical or synthesized feature tables with one estimator
#[derive(Debug)]
pub struct Predictor {
    estimator: Box<dyn FittedRegressor>,
}

impl Predictor {
    pub fn new(estimator: Box<dyn FittedRegressor>) -> Self {
        Self { estimator }
    }

    /// Load the catalog's best run by `metric` (lowest wins)
    pub fn from_catalog(catalog: &dyn Catalog, metric: &str) -> Result<Self> {
        let (run_id, artifact) = catalog.best(metric, true)?;
        let estimator = catalog.load(&artifact)?;
        info!(
            "Using run {} ({}) with {} features",
            run_id,
            estimator.name(),
            estimator.feature_names().len()
        );
        Ok(Self::new(estimator))
    }

    pub fn estimator(&self) -> &dyn FittedRegressor {
        self.estimator.as_ref()
    }

    pub fn feature_names(&self) -> &[String] {
        self.estimator.feature_names()
    }

    /// One prediction per row, keyed by the row's station and hour.
    ///
    /// The table must carry every feature the estimator was trained on;
    /// a missing column is an alignment error.
    pub fn predict(&self, table: &FeatureTable) -> Result<PredictionTable> {
        let x = table.select(self.estimator.feature_names())?;
        let predicted = self.estimator.predict(&x)?;
        if predicted.len() != table.len() {
            return Err(ForecastError::Alignment(format!(
                "Estimator returned {} predictions for {} rows",
                predicted.len(),
                table.len()
            )));
        }

        let rows = table
            .rows()
            .iter()
            .zip(predicted)
            .map(|(row, predicted_count)| PredictionRow {
                station_id: row.station_id.clone(),
                hour_bucket: row.hour_bucket,
                predicted_count,
            })
            .collect();

        Ok(PredictionTable::new(rows))
    }
}
