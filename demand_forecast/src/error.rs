//! Error types for the demand_forecast crate

use polars::prelude::PolarsError;
use series_math::MathError;
use thiserror::Error;

/// Custom error types for the demand_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Not enough rows for the requested operation
    #[error("Insufficient data: {0}")]
    DataInsufficient(String),

    /// Feature table columns do not match what an estimator was trained on
    #[error("Alignment error: {0}")]
    Alignment(String),

    /// Model catalog could not be reached or read
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// Catalog was reachable but holds no matching run or artifact
    #[error("Catalog entry not found: {0}")]
    CatalogNotFound(String),

    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error from numerical routines
    #[error("Math error: {0}")]
    MathError(String),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    PolarsError(String),

    /// Error from CSV reading or writing
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Error from JSON (de)serialization
    #[error("JSON error: {0}")]
    JsonError(String),
}

impl ForecastError {
    /// Whether retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ForecastError::CatalogUnavailable(_))
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::PolarsError(err.to_string())
    }
}

impl From<csv::Error> for ForecastError {
    fn from(err: csv::Error) -> Self {
        ForecastError::CsvError(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::JsonError(err.to_string())
    }
}

impl From<MathError> for ForecastError {
    fn from(err: MathError) -> Self {
        match err {
            MathError::InsufficientData(msg) => ForecastError::DataInsufficient(msg),
            MathError::InvalidInput(msg) => ForecastError::InvalidParameter(msg),
            MathError::Singular(msg) => ForecastError::MathError(msg),
        }
    }
}
