//! # Series Math
//!
//! Numerical building blocks for the demand forecasting crates.
//! This crate provides streaming rolling-window statistics over ordered
//! observations and a dense linear solver used by regression estimators.

use thiserror::Error;

pub mod linalg;
pub mod rolling;

pub use linalg::solve;
pub use rolling::RollingWindow;

/// Errors that can occur in series calculations
#[derive(Error, Debug, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Singular system: {0}")]
    Singular(String),
}

/// Result type for series math operations
pub type Result<T> = std::result::Result<T, MathError>;
