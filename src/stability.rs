//! Thermal stability detection.
//!
//! A set-point is "held" once the actual temperature has stayed within tolerance for a
//! continuous stretch of polls whose intervals add up to the stability target. Any
//! out-of-tolerance sample clears the accumulated window.
//!
//! ```text
//!            in tolerance              in tolerance, sum >= target
//!   WAITING ──────────────► ACCUMULATING ─────────────────────────► STABLE
//!      ▲                        │
//!      └── out of tolerance ────┘
//! ```
//!
//! [`StabilityWindow`] is the pure state machine; [`StabilityMonitor`] drives it against a
//! [`TemperatureControl`] device, sleeping one poll interval between samples. The monitor
//! has no overall deadline. An unreachable set-point polls forever, so callers that need a
//! bound wrap the future, e.g. in `tokio::time::timeout`; dropping the future cancels the
//! wait at the next await point.

use crate::error::{AppResult, Tc200Error};
use crate::hardware::capabilities::TemperatureControl;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Where the window stands after the latest sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StabilityState {
    /// Last sample out of tolerance (or no sample yet).
    Waiting,
    /// In tolerance, target not yet reached.
    Accumulating,
    /// Target reached. Terminal.
    Stable,
}

/// Parameters of a stability wait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilitySettings {
    /// Allowed deviation from the set-point (C)
    #[serde(default = "default_tolerance")]
    pub tolerance_c: f64,
    /// Time between samples
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Continuous in-tolerance time required
    #[serde(default = "default_target", with = "humantime_serde")]
    pub target: Duration,
}

fn default_tolerance() -> f64 {
    0.2
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_target() -> Duration {
    Duration::from_secs(60)
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            tolerance_c: default_tolerance(),
            poll_interval: default_poll_interval(),
            target: default_target(),
        }
    }
}

impl StabilitySettings {
    /// Reject settings that can never produce a meaningful result.
    pub fn validate(&self) -> AppResult<()> {
        if !self.tolerance_c.is_finite() || self.tolerance_c <= 0.0 {
            return Err(Tc200Error::Validation {
                what: "stability tolerance",
                reason: format!("{} C must be finite and greater than zero", self.tolerance_c),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(Tc200Error::Validation {
                what: "poll interval",
                reason: "must be greater than zero".into(),
            });
        }
        if self.target < self.poll_interval {
            return Err(Tc200Error::Validation {
                what: "stability target",
                reason: format!(
                    "{:?} is shorter than one poll interval ({:?})",
                    self.target, self.poll_interval
                ),
            });
        }
        Ok(())
    }
}

// =============================================================================
// StabilityWindow
// =============================================================================

/// Accumulates one poll interval per in-tolerance sample.
#[derive(Debug, Clone)]
pub struct StabilityWindow {
    poll_interval: Duration,
    target: Duration,
    accumulated: Duration,
    run_length: u64,
    state: StabilityState,
}

impl StabilityWindow {
    /// Empty window in the `Waiting` state.
    pub fn new(poll_interval: Duration, target: Duration) -> Self {
        Self {
            poll_interval,
            target,
            accumulated: Duration::ZERO,
            run_length: 0,
            state: StabilityState::Waiting,
        }
    }

    /// Feed one sample.
    ///
    /// Once `Stable`, further samples are ignored.
    pub fn record(&mut self, in_tolerance: bool) -> StabilityState {
        if self.state == StabilityState::Stable {
            return self.state;
        }

        if in_tolerance {
            self.accumulated = self.accumulated.saturating_add(self.poll_interval);
            self.run_length = self.run_length.saturating_add(1);
            self.state = if self.accumulated >= self.target {
                StabilityState::Stable
            } else {
                StabilityState::Accumulating
            };
        } else {
            self.accumulated = Duration::ZERO;
            self.run_length = 0;
            self.state = StabilityState::Waiting;
        }
        self.state
    }

    /// Current state.
    pub fn state(&self) -> StabilityState {
        self.state
    }

    /// Time accumulated in the current run.
    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    /// Number of consecutive in-tolerance samples in the current run.
    pub fn run_length(&self) -> u64 {
        self.run_length
    }

    /// Whether the target has been reached.
    pub fn is_stable(&self) -> bool {
        self.state == StabilityState::Stable
    }
}

// =============================================================================
// StabilityMonitor
// =============================================================================

/// Outcome of a completed stability wait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StabilityReport {
    /// Samples taken, including out-of-tolerance ones
    pub polls: u64,
    /// Accumulated in-tolerance time when stability was declared
    pub in_window: Duration,
    /// Wall time from the first sample to stability
    pub elapsed: Duration,
    /// Set-point the device was held at (C)
    pub setpoint_c: f64,
}

/// Polls a device until its temperature has been held for the target duration.
#[derive(Debug, Clone)]
pub struct StabilityMonitor {
    settings: StabilitySettings,
}

impl StabilityMonitor {
    /// Create a monitor after validating `settings`.
    pub fn new(settings: StabilitySettings) -> AppResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    /// Settings in use.
    pub fn settings(&self) -> &StabilitySettings {
        &self.settings
    }

    /// Sample `device` every poll interval until it is stable.
    ///
    /// Any device error ends the wait and is returned unchanged.
    pub async fn wait_until_stable<D>(&self, device: &D) -> AppResult<StabilityReport>
    where
        D: TemperatureControl + ?Sized,
    {
        let StabilitySettings {
            tolerance_c,
            poll_interval,
            target,
        } = self.settings;

        let mut window = StabilityWindow::new(poll_interval, target);
        let start = Instant::now();
        let mut polls: u64 = 0;

        tracing::info!(
            setpoint_c = device.setpoint_c(),
            tolerance_c,
            ?poll_interval,
            ?target,
            "waiting for thermal stability"
        );

        loop {
            let in_tolerance = device.reached_temperature(tolerance_c).await?;
            polls += 1;

            let previous = window.state();
            let state = window.record(in_tolerance);
            if previous == StabilityState::Accumulating && state == StabilityState::Waiting {
                tracing::info!(polls, "left tolerance band, window reset");
            }

            if state == StabilityState::Stable {
                let report = StabilityReport {
                    polls,
                    in_window: window.accumulated(),
                    elapsed: start.elapsed(),
                    setpoint_c: device.setpoint_c(),
                };
                tracing::info!(
                    polls,
                    elapsed_s = report.elapsed.as_secs_f64(),
                    "thermal stability reached"
                );
                return Ok(report);
            }

            tracing::debug!(
                polls,
                ?state,
                accumulated = ?window.accumulated(),
                "waiting to reach temperature"
            );
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const DELTA: Duration = Duration::from_secs(2);
    const TARGET: Duration = Duration::from_secs(60);

    /// Device whose `reached_temperature` answers come from a script.
    struct ScriptedDevice {
        answers: Mutex<VecDeque<bool>>,
    }

    impl ScriptedDevice {
        fn new(answers: impl IntoIterator<Item = bool>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl TemperatureControl for ScriptedDevice {
        async fn actual_temperature(&self) -> AppResult<f64> {
            Ok(0.0)
        }

        fn setpoint_c(&self) -> f64 {
            37.0
        }

        async fn reached_temperature(&self, _tolerance_c: f64) -> AppResult<bool> {
            self.answers
                .lock()
                .pop_front()
                .ok_or(Tc200Error::Configuration("script exhausted".into()))
        }
    }

    fn feed(window: &mut StabilityWindow, samples: impl IntoIterator<Item = bool>) {
        for sample in samples {
            window.record(sample);
        }
    }

    #[test]
    fn starts_waiting() {
        let window = StabilityWindow::new(DELTA, TARGET);
        assert_eq!(window.state(), StabilityState::Waiting);
        assert_eq!(window.accumulated(), Duration::ZERO);
    }

    #[test]
    fn stable_exactly_when_run_reaches_target() {
        let mut window = StabilityWindow::new(DELTA, TARGET);
        feed(&mut window, std::iter::repeat(true).take(29));
        assert_eq!(window.state(), StabilityState::Accumulating);
        assert_eq!(window.accumulated(), Duration::from_secs(58));

        assert_eq!(window.record(true), StabilityState::Stable);
        assert_eq!(window.accumulated(), TARGET);
    }

    #[test]
    fn huge_target_saturates_instead_of_overflowing() {
        let mut window = StabilityWindow::new(Duration::MAX / 2, Duration::MAX);
        assert_eq!(window.record(true), StabilityState::Accumulating);
        assert_eq!(window.record(true), StabilityState::Accumulating);
        assert_eq!(window.record(true), StabilityState::Stable);
        assert_eq!(window.accumulated(), Duration::MAX);
        assert_eq!(window.run_length(), 3);
    }

    #[test]
    fn false_sample_resets_partial_run() {
        let mut window = StabilityWindow::new(DELTA, TARGET);
        feed(&mut window, std::iter::repeat(true).take(29));
        assert_eq!(window.record(false), StabilityState::Waiting);
        assert_eq!(window.accumulated(), Duration::ZERO);
        assert_eq!(window.run_length(), 0);

        // 29 + 1 + 29 = 59 polls: the 29 before the reset do not count.
        feed(&mut window, std::iter::repeat(true).take(29));
        assert!(!window.is_stable());
        assert_eq!(window.accumulated(), Duration::from_secs(58));

        // Poll 60 completes a fresh run of 30.
        assert_eq!(window.record(true), StabilityState::Stable);
    }

    #[test]
    fn only_trailing_run_counts() {
        for k in 0..=40u32 {
            let mut window = StabilityWindow::new(DELTA, TARGET);
            let leading_false = 40 - k;
            feed(&mut window, std::iter::repeat(false).take(leading_false as usize));
            feed(&mut window, std::iter::repeat(true).take(k as usize));
            assert_eq!(
                window.is_stable(),
                DELTA * k >= TARGET,
                "k = {k} trailing in-tolerance polls"
            );
        }
    }

    #[test]
    fn target_not_multiple_of_interval_still_stabilizes() {
        let mut window = StabilityWindow::new(DELTA, Duration::from_secs(5));
        feed(&mut window, [true, true]);
        assert!(!window.is_stable());
        assert_eq!(window.record(true), StabilityState::Stable);
        assert_eq!(window.accumulated(), Duration::from_secs(6));
    }

    #[test]
    fn stable_is_terminal() {
        let mut window = StabilityWindow::new(DELTA, DELTA);
        assert_eq!(window.record(true), StabilityState::Stable);
        assert_eq!(window.record(false), StabilityState::Stable);
    }

    #[test]
    fn settings_validation() {
        assert!(StabilitySettings::default().validate().is_ok());

        let bad_tolerance = StabilitySettings {
            tolerance_c: -0.1,
            ..Default::default()
        };
        assert!(bad_tolerance.validate().is_err());

        let zero_interval = StabilitySettings {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_interval.validate().is_err());

        let short_target = StabilitySettings {
            target: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(StabilityMonitor::new(short_target).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_stops_after_thirty_consecutive_hits() {
        let script = std::iter::repeat(true)
            .take(29)
            .chain([false])
            .chain(std::iter::repeat(true).take(30));
        let device = ScriptedDevice::new(script);
        let monitor = StabilityMonitor::new(StabilitySettings::default()).unwrap();

        let report = monitor.wait_until_stable(&device).await.unwrap();

        assert_eq!(report.polls, 60);
        assert_eq!(report.in_window, TARGET);
        // One sleep between consecutive polls.
        assert_eq!(report.elapsed, DELTA * 59);
        assert!(device.answers.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_propagates_device_errors() {
        let device = ScriptedDevice::new([true, true, false]);
        let monitor = StabilityMonitor::new(StabilitySettings::default()).unwrap();

        let err = monitor.wait_until_stable(&device).await.unwrap_err();
        assert!(matches!(err, Tc200Error::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn caller_can_bound_an_unreachable_setpoint() {
        let device = ScriptedDevice::new(std::iter::repeat(false).take(1_000));
        let monitor = StabilityMonitor::new(StabilitySettings::default()).unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            monitor.wait_until_stable(&device),
        )
        .await;
        assert!(outcome.is_err());
    }
}
