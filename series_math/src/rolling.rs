//! Rolling window over the most recent observations of a series
//!
//! The window only ever sees values that were pushed into it, so a caller that
//! reads the statistics *before* pushing the current observation gets values
//! computed strictly from earlier observations.

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fixed-capacity window keeping the last `period` observations in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingWindow {
    period: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl RollingWindow {
    /// Create a new rolling window with the specified period
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(MathError::InvalidInput(
                "Period must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            period,
            values: VecDeque::with_capacity(period),
            sum: 0.0,
        })
    }

    /// Push a new observation, evicting the oldest one once the window is full
    pub fn update(&mut self, value: f64) {
        self.values.push_back(value);
        self.sum += value;

        if self.values.len() > self.period {
            if let Some(old_value) = self.values.pop_front() {
                self.sum -= old_value;
            }
        }
    }

    /// Whether the window holds `period` observations
    pub fn is_full(&self) -> bool {
        self.values.len() == self.period
    }

    /// Number of observations currently held
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the window holds no observations
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the configured period
    pub fn period(&self) -> usize {
        self.period
    }

    /// Mean of the full window
    pub fn mean(&self) -> Result<f64> {
        if !self.is_full() {
            return Err(MathError::InsufficientData(format!(
                "Not enough data for rolling mean. Need {} values, have {}.",
                self.period,
                self.values.len()
            )));
        }

        Ok(self.sum / self.period as f64)
    }

    /// Sample standard deviation (n - 1 denominator) of the full window
    pub fn std_dev(&self) -> Result<f64> {
        let mean = self.mean()?;
        if self.period < 2 {
            return Err(MathError::InsufficientData(
                "Sample standard deviation needs at least 2 values".to_string(),
            ));
        }

        let variance = self
            .values
            .iter()
            .map(|&value| {
                let diff = value - mean;
                diff * diff
            })
            .sum::<f64>()
            / (self.period - 1) as f64;

        Ok(variance.sqrt())
    }

    /// The observation `lag` positions back from the newest one.
    ///
    /// `lag(1)` is the most recently pushed value.
    pub fn lag(&self, lag: usize) -> Option<f64> {
        if lag == 0 || lag > self.values.len() {
            return None;
        }
        self.values.get(self.values.len() - lag).copied()
    }

    /// Observations in push order, oldest first
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Reset the window, clearing all values
    pub fn reset(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_zero_period() {
        assert!(RollingWindow::new(0).is_err());
    }

    #[test]
    fn mean_requires_full_window() {
        let mut window = RollingWindow::new(3).unwrap();
        window.update(1.0);
        window.update(2.0);
        assert!(matches!(window.mean(), Err(MathError::InsufficientData(_))));

        window.update(3.0);
        assert_relative_eq!(window.mean().unwrap(), 2.0);
    }

    #[test]
    fn evicts_oldest_value() {
        let mut window = RollingWindow::new(3).unwrap();
        for value in [1.0, 2.0, 3.0, 10.0] {
            window.update(value);
        }
        assert_eq!(window.values().collect::<Vec<_>>(), vec![2.0, 3.0, 10.0]);
        assert_relative_eq!(window.mean().unwrap(), 5.0);
    }

    #[test]
    fn sample_std_dev() {
        let mut window = RollingWindow::new(4).unwrap();
        for value in [2.0, 4.0, 4.0, 6.0] {
            window.update(value);
        }
        // mean 4, squared deviations 4+0+0+4 over n-1 = 3
        assert_relative_eq!(window.std_dev().unwrap(), (8.0f64 / 3.0).sqrt());
    }

    #[test]
    fn std_dev_of_single_value_window_is_undefined() {
        let mut window = RollingWindow::new(1).unwrap();
        window.update(5.0);
        assert!(window.std_dev().is_err());
    }

    #[test]
    fn lag_counts_back_from_newest() {
        let mut window = RollingWindow::new(3).unwrap();
        for value in [7.0, 8.0, 9.0] {
            window.update(value);
        }
        assert_eq!(window.lag(1), Some(9.0));
        assert_eq!(window.lag(3), Some(7.0));
        assert_eq!(window.lag(0), None);
        assert_eq!(window.lag(4), None);
    }

    #[test]
    fn reset_clears_state() {
        let mut window = RollingWindow::new(2).unwrap();
        window.update(1.0);
        window.update(2.0);
        window.reset();
        assert!(window.is_empty());
        window.update(4.0);
        window.update(6.0);
        assert_relative_eq!(window.mean().unwrap(), 5.0);
    }
}
