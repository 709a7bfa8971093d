//! Metrics for evaluating predicted ride counts

use crate::error::{ForecastError, Result};

/// Name under which mean absolute error is reported to the catalog
pub const MAE: &str = "mae";

/// Name under which root mean squared error is reported to the catalog
pub const RMSE: &str = "rmse";

/// Error metrics of a prediction against observed counts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorMetrics {
    /// Mean Absolute Error
    pub mae: f64,
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
}

/// Evaluate predictions against actual values
pub fn evaluate(predicted: &[f64], actual: &[f64]) -> Result<ErrorMetrics> {
    if predicted.len() != actual.len() || predicted.is_empty() {
        return Err(ForecastError::DataError(
            "Predicted and actual values must have the same non-zero length".to_string(),
        ));
    }

    let n = predicted.len() as f64;
    let errors: Vec<f64> = predicted
        .iter()
        .zip(actual.iter())
        .map(|(&p, &a)| a - p)
        .collect();

    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let mse = errors.iter().map(|e| e.powi(2)).sum::<f64>() / n;

    Ok(ErrorMetrics {
        mae,
        mse,
        rmse: mse.sqrt(),
    })
}

/// Mean absolute error between predictions and actual values
pub fn mean_absolute_error(predicted: &[f64], actual: &[f64]) -> Result<f64> {
    evaluate(predicted, actual).map(|metrics| metrics.mae)
}

impl std::fmt::Display for ErrorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MAE {:.4}, MSE {:.4}, RMSE {:.4}",
            self.mae, self.mse, self.rmse
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn computes_error_metrics() {
        let metrics = evaluate(&[1.0, 2.0, 3.0], &[2.0, 2.0, 5.0]).unwrap();
        assert_relative_eq!(metrics.mae, 1.0);
        assert_relative_eq!(metrics.mse, 5.0 / 3.0);
        assert_relative_eq!(metrics.rmse, (5.0f64 / 3.0).sqrt());
    }

    #[test]
    fn rejects_length_mismatch() {
        assert!(evaluate(&[1.0], &[1.0, 2.0]).is_err());
        assert!(mean_absolute_error(&[], &[]).is_err());
    }
}
