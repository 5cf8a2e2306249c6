//! Hardware capabilities.
//!
//! Consumers such as the [`StabilityMonitor`](crate::stability::StabilityMonitor) are
//! written against capability traits rather than against the concrete driver, so they run
//! unchanged against a simulated device in tests.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses [`AppResult`] for errors
//! - Focuses on ONE thing

use crate::error::AppResult;
use async_trait::async_trait;

/// Slack added to tolerance comparisons so that, e.g., 37.2 vs. 37.0 with a 0.2 tolerance
/// is not rejected by binary floating-point rounding.
pub const TEMPERATURE_EPSILON_C: f64 = 1e-9;

/// `|actual - setpoint| <= tolerance`, with [`TEMPERATURE_EPSILON_C`] of slack.
pub fn within_tolerance(actual_c: f64, setpoint_c: f64, tolerance_c: f64) -> bool {
    (actual_c - setpoint_c).abs() <= tolerance_c + TEMPERATURE_EPSILON_C
}

/// Capability: Closed-loop temperature control
///
/// Devices that drive toward a set-point and can report their actual temperature
/// (heater controllers, TEC controllers, simulated thermal loads).
///
/// # Contract
/// - Temperatures are in degrees Celsius
/// - `setpoint_c` is the last set-point confirmed by the device, no I/O
/// - `actual_temperature` performs a fresh read and may change between calls
#[async_trait]
pub trait TemperatureControl: Send + Sync {
    /// Read the current temperature from the device.
    async fn actual_temperature(&self) -> AppResult<f64>;

    /// Last device-confirmed set-point.
    fn setpoint_c(&self) -> f64;

    /// Read the actual temperature and compare it to the set-point.
    ///
    /// # Returns
    /// - Ok(true) if `|actual - setpoint| <= tolerance_c`
    /// - Err if the read fails
    async fn reached_temperature(&self, tolerance_c: f64) -> AppResult<bool> {
        let actual = self.actual_temperature().await?;
        let setpoint = self.setpoint_c();
        let reached = within_tolerance(actual, setpoint, tolerance_c);
        tracing::debug!(actual, setpoint, tolerance_c, reached, "reached temperature?");
        Ok(reached)
    }
}
