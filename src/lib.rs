//! # Ridecast
//!
//! Workspace facade for hourly bike-share demand forecasting.
//!
//! - [`demand_forecast`]: aggregation, feature building, forecast synthesis,
//!   training, prediction and the model catalog
//! - [`series_math`]: rolling-window statistics and the linear solver
//!
//! ## Example
//!
//! ```
//! use ridecast_workspace::series_math::RollingWindow;
//!
//! let mut window = RollingWindow::new(3).unwrap();
//! for count in [4.0, 8.0, 6.0, 10.0] {
//!     window.update(count);
//! }
//! assert_eq!(window.mean().unwrap(), 8.0);
//! assert_eq!(window.lag(1), Some(10.0));
//! ```

pub use demand_forecast;
pub use series_math;

/// Version of the workspace facade
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
