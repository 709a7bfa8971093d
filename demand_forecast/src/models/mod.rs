//! Regression estimators over feature matrices

use crate::error::{ForecastError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

pub mod baseline;
pub mod ridge;

pub use baseline::{MeanBaseline, TrainedMeanBaseline};
pub use ridge::{RidgeRegressor, TrainedRidge};

/// Dense matrix of named feature columns, one row per observation
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    /// Create a matrix, checking every row has one value per column
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(ForecastError::Alignment(format!(
                "Row has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        let shape = (rows.len(), columns.len());
        let values = Array2::from_shape_vec(shape, rows.into_iter().flatten().collect())
            .map_err(|e| ForecastError::Alignment(e.to_string()))?;
        Self::from_array(columns, values)
    }

    /// Wrap an existing array whose columns follow `columns`
    pub fn from_array(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.ncols() != columns.len() {
            return Err(ForecastError::Alignment(format!(
                "Matrix has {} columns but {} names",
                values.ncols(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }
}

/// Check that `x` carries exactly the trained columns, in order
pub fn check_alignment(expected: &[String], x: &FeatureMatrix) -> Result<()> {
    if x.columns() != expected {
        let missing: Vec<&String> = expected
            .iter()
            .filter(|name| !x.columns().contains(name))
            .collect();
        return Err(ForecastError::Alignment(format!(
            "Estimator expects {} columns, got {} (missing: {:?})",
            expected.len(),
            x.n_cols(),
            missing
        )));
    }
    Ok(())
}

/// Fitted estimator able to predict ride counts
pub trait FittedRegressor: Debug {
    /// Name of the estimator
    fn name(&self) -> &str;

    /// Feature columns the estimator was trained on, in order
    fn feature_names(&self) -> &[String];

    /// Predict one value per matrix row
    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>>;

    /// Relative importance of each trained feature, if the estimator has one
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    /// Serializable form of the fitted estimator
    fn to_artifact(&self) -> ModelArtifact;
}

/// Estimator that can be fitted on a feature matrix
pub trait Regressor: Debug + Clone {
    /// The type of fitted model produced
    type Fitted: FittedRegressor;

    /// Fit the estimator
    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<Self::Fitted>;

    /// Get the name of the estimator
    fn name(&self) -> &str;

    /// Hyperparameters, as reported to the model catalog
    fn params(&self) -> BTreeMap<String, String>;
}

/// Persisted form of any fitted estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model")]
pub enum ModelArtifact {
    MeanBaseline(TrainedMeanBaseline),
    Ridge(TrainedRidge),
}

impl ModelArtifact {
    /// Turn the artifact back into a usable estimator
    pub fn into_estimator(self) -> Box<dyn FittedRegressor> {
        match self {
            ModelArtifact::MeanBaseline(model) => Box::new(model),
            ModelArtifact::Ridge(model) => Box::new(model),
        }
    }

    pub fn feature_names(&self) -> &[String] {
        match self {
            ModelArtifact::MeanBaseline(model) => model.feature_names(),
            ModelArtifact::Ridge(model) => model.feature_names(),
        }
    }
}

fn check_targets(x: &FeatureMatrix, y: &[f64]) -> Result<()> {
    if x.is_empty() {
        return Err(ForecastError::DataInsufficient(
            "Cannot fit an estimator on an empty matrix".to_string(),
        ));
    }
    if x.n_rows() != y.len() {
        return Err(ForecastError::Alignment(format!(
            "Matrix has {} rows but {} targets",
            x.n_rows(),
            y.len()
        )));
    }
    Ok(())
}
