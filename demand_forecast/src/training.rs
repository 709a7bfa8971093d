//! Chronological train/test split and candidate estimator training
//!
//! The trainer evaluates every candidate on the same chronological test slice
//! and reports each one to the catalog. Picking the best run is left to the
//! catalog.

use crate::catalog::{Catalog, NewRun, RunId};
use crate::config::TrainingConfig;
use crate::error::{ForecastError, Result};
use crate::features::FeatureTable;
use crate::metrics::{self, ErrorMetrics, MAE, RMSE};
use crate::models::{FeatureMatrix, FittedRegressor, MeanBaseline, Regressor, RidgeRegressor};
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};

/// Train and test partitions of a feature table
#[derive(Debug, Clone)]
pub struct ChronologicalSplit {
    pub train: FeatureTable,
    pub test: FeatureTable,
}

/// Split a table by time: the earliest `train_fraction` of rows train, the
/// rest test.
///
/// Rows are ordered by hour (ties by station) before splitting, so every
/// training hour is at or before every test hour.
pub fn chronological_split(
    table: &FeatureTable,
    train_fraction: f64,
    min_rows: usize,
) -> Result<ChronologicalSplit> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(ForecastError::InvalidParameter(format!(
            "Train fraction must be between 0 and 1, got {}",
            train_fraction
        )));
    }
    if table.len() < min_rows.max(2) {
        return Err(ForecastError::DataInsufficient(format!(
            "Feature table has {} rows, training needs at least {}",
            table.len(),
            min_rows.max(2)
        )));
    }

    let mut sorted = table.clone();
    sorted.sort_chronologically();
    let cut = (sorted.len() as f64 * train_fraction).floor() as usize;
    if cut == 0 || cut == sorted.len() {
        return Err(ForecastError::DataInsufficient(format!(
            "A {} split of {} rows leaves an empty partition",
            train_fraction,
            sorted.len()
        )));
    }

    let schema = sorted.schema().clone();
    let mut rows = sorted.into_rows();
    let test_rows = rows.split_off(cut);

    Ok(ChronologicalSplit {
        train: FeatureTable::from_rows(schema.clone(), rows)?,
        test: FeatureTable::from_rows(schema, test_rows)?,
    })
}

/// One candidate as reported to the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedRun {
    pub run_id: RunId,
    pub run_name: String,
    pub features: Vec<String>,
    pub metrics: ErrorMetrics,
}

/// Outcome of a training pass
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub train_rows: usize,
    pub test_rows: usize,
    pub runs: Vec<TrainedRun>,
}

impl TrainingReport {
    pub fn run(&self, run_name: &str) -> Option<&TrainedRun> {
        self.runs.iter().find(|run| run.run_name == run_name)
    }
}

/// Fits the baseline, full-feature and reduced-feature candidates
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Feature columns offered to estimators, in schema order
    pub fn candidate_features(&self, table: &FeatureTable) -> Vec<String> {
        let excluded: HashSet<&str> = self
            .config
            .exclude_features
            .iter()
            .map(String::as_str)
            .collect();
        table
            .schema()
            .columns()
            .into_iter()
            .filter(|column| !excluded.contains(column.as_str()))
            .collect()
    }

    /// Train every candidate on the chronological split and record it
    pub fn train(&self, table: &FeatureTable, catalog: &dyn Catalog) -> Result<TrainingReport> {
        let split = chronological_split(table, self.config.train_fraction, self.config.min_rows)?;
        let features = self.candidate_features(table);
        if features.is_empty() {
            return Err(ForecastError::InvalidParameter(
                "Every feature column is excluded from training".to_string(),
            ));
        }
        info!(
            "Training on {} rows, testing on {} rows with {} features",
            split.train.len(),
            split.test.len(),
            features.len()
        );

        let mut runs = Vec::new();

        let baseline = MeanBaseline::new();
        let (run, _) =
            self.fit_and_record("baseline_model", &baseline, &split, &features, catalog)?;
        runs.push(run);

        let ridge = RidgeRegressor::new(self.config.ridge_alpha)?;
        let (run, full_model) =
            self.fit_and_record("ridge_all_features", &ridge, &split, &features, catalog)?;
        runs.push(run);

        let top_n = self.config.top_n;
        if top_n == 0 || top_n >= features.len() {
            debug!(
                "Skipping reduced-feature run: top {} of {} features",
                top_n,
                features.len()
            );
        } else {
            let reduced = top_features(&full_model, top_n)?;
            let run_name = format!("ridge_top{}_features", top_n);
            let (run, _) = self.fit_and_record(&run_name, &ridge, &split, &reduced, catalog)?;
            runs.push(run);
        }

        Ok(TrainingReport {
            train_rows: split.train.len(),
            test_rows: split.test.len(),
            runs,
        })
    }

    fn fit_and_record<R: Regressor>(
        &self,
        run_name: &str,
        estimator: &R,
        split: &ChronologicalSplit,
        features: &[String],
        catalog: &dyn Catalog,
    ) -> Result<(TrainedRun, R::Fitted)> {
        let x_train = split.train.select(features)?;
        let x_test = split.test.select(features)?;
        let y_train = split.train.labels()?;
        let y_test = split.test.labels()?;

        let model = estimator.fit(&x_train, &y_train)?;
        let scores = score(&model, &x_test, &y_test)?;

        let mut params = estimator.params();
        params.insert("n_features".to_string(), features.len().to_string());
        let run = NewRun {
            run_name: run_name.to_string(),
            params,
            metrics: BTreeMap::from([
                (MAE.to_string(), scores.mae),
                (RMSE.to_string(), scores.rmse),
            ]),
            artifact: model.to_artifact(),
        };
        let run_id = catalog.record(&run)?;
        info!("{} [{}] {}: {}", run_name, run_id, estimator.name(), scores);

        Ok((
            TrainedRun {
                run_id,
                run_name: run_name.to_string(),
                features: features.to_vec(),
                metrics: scores,
            },
            model,
        ))
    }
}

fn score(model: &dyn FittedRegressor, x: &FeatureMatrix, y: &[f64]) -> Result<ErrorMetrics> {
    let predictions = model.predict(x)?;
    metrics::evaluate(&predictions, y)
}

/// The `n` trained features with the largest importance, most important first
pub fn top_features(model: &dyn FittedRegressor, n: usize) -> Result<Vec<String>> {
    let importances = model.feature_importances().ok_or_else(|| {
        ForecastError::InvalidParameter(format!(
            "Estimator {} does not rank its features",
            model.name()
        ))
    })?;

    let mut ranked: Vec<(&String, f64)> = model.feature_names().iter().zip(importances).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(ranked.into_iter().take(n).map(|(name, _)| name.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::data::CountSeries;
    use crate::features::FeatureBuilder;
    use crate::models::{FeatureMatrix, TrainedRidge};
    use chrono::{NaiveDate, NaiveDateTime};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn table(hours: u32) -> FeatureTable {
        let counts: Vec<u32> = (0..hours).map(|h| 5 + h % 7).collect();
        let series = CountSeries::from_hourly_counts("A", start(), &counts).unwrap();
        FeatureBuilder::new(&FeatureConfig::new(3, vec![2]).unwrap())
            .unwrap()
            .build(&series)
            .unwrap()
    }

    #[test]
    fn split_keeps_time_order() {
        let split = chronological_split(&table(23), 0.8, 10).unwrap();
        assert_eq!(split.train.len(), 16);
        assert_eq!(split.test.len(), 4);

        let last_train = split.train.latest_hour().unwrap();
        assert!(split.test.rows().iter().all(|row| row.hour_bucket >= last_train));
    }

    #[test]
    fn small_table_is_insufficient() {
        let result = chronological_split(&table(8), 0.8, 10);
        assert!(matches!(result, Err(ForecastError::DataInsufficient(_))));
    }

    #[test]
    fn excluded_features_are_not_candidates() {
        let trainer = Trainer::new(TrainingConfig::default()).unwrap();
        let features = trainer.candidate_features(&table(10));
        assert!(!features.contains(&"month".to_string()));
        assert!(features.contains(&"hour_of_day".to_string()));
    }

    #[test]
    fn top_features_orders_by_importance() {
        let rows: Vec<Vec<f64>> = (0..12).map(|i| vec![(i % 2) as f64, i as f64]).collect();
        let y: Vec<f64> = rows.iter().map(|r| 4.0 * r[1]).collect();
        let x = FeatureMatrix::new(vec!["weak".to_string(), "strong".to_string()], rows).unwrap();
        let model: TrainedRidge = RidgeRegressor::new(0.1).unwrap().fit(&x, &y).unwrap();

        assert_eq!(top_features(&model, 1).unwrap(), vec!["strong".to_string()]);
    }
}
