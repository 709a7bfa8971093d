//! Ridge regression on standardized features

use crate::error::{ForecastError, Result};
use crate::models::{
    check_alignment, check_targets, FeatureMatrix, FittedRegressor, ModelArtifact, Regressor,
};
use log::warn;
use ndarray::{Array1, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use series_math::solve;
use std::collections::BTreeMap;

/// Columns with a spread below this are treated as constant
const MIN_SCALE: f64 = 1e-12;

/// L2-penalized least squares
#[derive(Debug, Clone)]
pub struct RidgeRegressor {
    name: String,
    alpha: f64,
}

/// Fitted ridge model.
///
/// Coefficients apply to standardized columns, so their magnitudes are
/// comparable and double as feature importances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedRidge {
    name: String,
    alpha: f64,
    feature_names: Vec<String>,
    means: Vec<f64>,
    scales: Vec<f64>,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl RidgeRegressor {
    /// Create a new ridge estimator with penalty `alpha`
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha >= 0.0) || !alpha.is_finite() {
            return Err(ForecastError::InvalidParameter(
                "Ridge alpha must be a non-negative number".to_string(),
            ));
        }

        Ok(Self {
            name: format!("ridge(alpha={})", alpha),
            alpha,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Regressor for RidgeRegressor {
    type Fitted = TrainedRidge;

    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<Self::Fitted> {
        check_targets(x, y)?;
        let p = x.n_cols();
        if p == 0 {
            return Err(ForecastError::InvalidParameter(
                "Ridge regression needs at least one feature".to_string(),
            ));
        }
        let values = x.values();
        let y = ArrayView1::from(y);

        let means = values.mean_axis(Axis(0)).ok_or_else(|| {
            ForecastError::DataInsufficient("Cannot standardize an empty matrix".to_string())
        })?;
        let spreads = values.std_axis(Axis(0), 0.0);
        let scales = spreads.mapv(|s| if s < MIN_SCALE { 1.0 } else { s });
        let intercept = y.mean().unwrap_or(0.0);

        // Constant columns carry no signal; their coefficients stay at zero
        let active: Vec<usize> = (0..p).filter(|&j| spreads[j] >= MIN_SCALE).collect();
        let mut coefficients = Array1::<f64>::zeros(p);
        if active.is_empty() {
            warn!("Every feature column is constant; ridge predicts the training mean");
        } else {
            let z = ((values - &means) / &scales).select(Axis(1), &active);
            let centered = y.mapv(|target| target - intercept);

            // Normal equations (Z'Z + alpha I) b = Z'(y - mean)
            let mut gram = z.t().dot(&z);
            for j in 0..active.len() {
                gram[[j, j]] += self.alpha;
            }
            let rhs = z.t().dot(&centered);

            let solved = solve(gram, rhs)?;
            for (&j, &coef) in active.iter().zip(solved.iter()) {
                coefficients[j] = coef;
            }
        }

        Ok(TrainedRidge {
            name: self.name.clone(),
            alpha: self.alpha,
            feature_names: x.columns().to_vec(),
            means: means.to_vec(),
            scales: scales.to_vec(),
            coefficients: coefficients.to_vec(),
            intercept,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("model_type".to_string(), "ridge".to_string()),
            ("alpha".to_string(), self.alpha.to_string()),
        ])
    }
}

impl TrainedRidge {
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl FittedRegressor for TrainedRidge {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        check_alignment(&self.feature_names, x)?;

        let means = ArrayView1::from(self.means.as_slice());
        let scales = ArrayView1::from(self.scales.as_slice());
        let coefficients = ArrayView1::from(self.coefficients.as_slice());
        let predictions = ((x.values() - &means) / &scales).dot(&coefficients) + self.intercept;

        Ok(predictions.to_vec())
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.coefficients.iter().map(|c| c.abs()).collect())
    }

    fn to_artifact(&self) -> ModelArtifact {
        ModelArtifact::Ridge(self.clone())
    }
}
