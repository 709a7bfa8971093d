//! Mean-of-train baseline

use crate::error::Result;
use crate::models::{
    check_alignment, check_targets, FeatureMatrix, FittedRegressor, ModelArtifact, Regressor,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Predicts the mean training target for every row
#[derive(Debug, Clone, Default)]
pub struct MeanBaseline;

/// Fitted mean baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedMeanBaseline {
    feature_names: Vec<String>,
    mean: f64,
}

impl MeanBaseline {
    pub fn new() -> Self {
        Self
    }
}

impl TrainedMeanBaseline {
    /// The constant prediction
    pub fn mean(&self) -> f64 {
        self.mean
    }
}

impl Regressor for MeanBaseline {
    type Fitted = TrainedMeanBaseline;

    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<Self::Fitted> {
        check_targets(x, y)?;
        let mean = y.iter().sum::<f64>() / y.len() as f64;

        Ok(TrainedMeanBaseline {
            feature_names: x.columns().to_vec(),
            mean,
        })
    }

    fn name(&self) -> &str {
        "mean_baseline"
    }

    fn params(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("model_type".to_string(), "mean_baseline".to_string())])
    }
}

impl FittedRegressor for TrainedMeanBaseline {
    fn name(&self) -> &str {
        "mean_baseline"
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        check_alignment(&self.feature_names, x)?;
        Ok(vec![self.mean; x.n_rows()])
    }

    fn to_artifact(&self) -> ModelArtifact {
        ModelArtifact::MeanBaseline(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForecastError;

    fn matrix(rows: Vec<Vec<f64>>) -> FeatureMatrix {
        FeatureMatrix::new(vec!["a".to_string()], rows).unwrap()
    }

    #[test]
    fn predicts_training_mean() {
        let x = matrix(vec![vec![1.0], vec![2.0], vec![3.0]]);
        let model = MeanBaseline::new().fit(&x, &[2.0, 4.0, 9.0]).unwrap();
        assert_eq!(model.predict(&x).unwrap(), vec![5.0, 5.0, 5.0]);
    }

    #[test]
    fn rejects_empty_training_set() {
        let x = matrix(Vec::new());
        let result = MeanBaseline::new().fit(&x, &[]);
        assert!(matches!(result, Err(ForecastError::DataInsufficient(_))));
    }
}
