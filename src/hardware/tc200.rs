//! Thorlabs TC200 Temperature Controller Driver
//!
//! Reference: TC200 User Guide (serial command reference) plus empirical status decoding,
//! see [`crate::hardware::status`].
//!
//! The driver owns the serial link exclusively and mirrors the controller in a
//! [`DeviceState`]. Every setter writes, re-reads and compares before it returns, so the
//! mirror only ever holds values the controller has confirmed.
//!
//! Construction synchronizes the controller:
//! 1. `id?` must match the expected firmware identity
//! 2. sensor type is written and verified
//! 3. mode is set to `normal`
//! 4. max temperature is written and verified (the set-point is re-read too)
//! 5. enable status and actual temperature are read
//!
//! # Example Usage
//!
//! ```no_run
//! use tc200::config::Tc200Config;
//! use tc200::hardware::tc200::Tc200Driver;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Tc200Config::load()?;
//!     let driver = Tc200Driver::connect(&config).await?;
//!
//!     driver.set_setpoint(37.0).await?;
//!     driver.set_enable(true).await?;
//!     println!("Actual: {:.1} C", driver.actual_temp().await?);
//!
//!     driver.set_enable(false).await?;
//!     driver.close().await?;
//!     Ok(())
//! }
//! ```

use crate::error::{AppResult, Tc200Error};
use crate::hardware::capabilities::TemperatureControl;
use crate::hardware::protocol::{Command, CommandChannel, Mode, Sensor};
use crate::hardware::serial::SerialLink;
use crate::hardware::status::EnableStatus;
use async_trait::async_trait;
use serde::Serialize;
use std::ops::RangeInclusive;
use tokio::sync::Mutex;
use tracing::instrument;

/// Identity string reported by supported firmware.
pub const EXPECTED_IDENTITY: &str = "THORLABS TC200 VERSION 2.0";

/// Range accepted for the max temperature (C).
pub const TMAX_RANGE_C: RangeInclusive<f64> = 20.0..=205.0;

/// Lowest accepted set-point (C). The upper bound is the current max temperature.
pub const MIN_SETPOINT_C: f64 = 20.0;

/// Round to the controller's resolution of one decimal place.
///
/// Exact halves go to the even tenth (37.25 -> 37.2, 37.75 -> 37.8).
pub fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}

/// Controller state as last confirmed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceState {
    /// Configured sensor type
    pub sensor: Sensor,
    /// Max temperature (C)
    pub tmax_c: f64,
    /// Set-point (C), never above `tmax_c`
    pub tset_c: f64,
    /// Last read actual temperature (C)
    pub tactual_c: f64,
    /// Heater output enabled
    pub enabled: bool,
    /// Sensor alarm seen on the last status read
    pub sensor_alarm: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            sensor: Sensor::Ntc10k,
            tmax_c: MIN_SETPOINT_C,
            tset_c: MIN_SETPOINT_C,
            tactual_c: 0.0,
            enabled: false,
            sensor_alarm: false,
        }
    }
}

/// Settings applied when the driver synchronizes with the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOptions {
    /// Sensor attached to the controller
    pub sensor: Sensor,
    /// Max allowable temperature (C)
    pub tmax_c: f64,
    /// Identity string `id?` must return
    pub expected_identity: String,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            sensor: Sensor::Ntc10k,
            tmax_c: 50.0,
            expected_identity: EXPECTED_IDENTITY.to_string(),
        }
    }
}

/// Driver for the Thorlabs TC200 temperature controller
///
/// Implements the [`TemperatureControl`] capability. All transactions are serialized
/// through one async mutex around the command channel; read-then-write sequences such as
/// [`set_enable`](Self::set_enable) hold it for the whole sequence.
pub struct Tc200Driver {
    /// Transaction engine, exclusive access per transaction
    channel: Mutex<CommandChannel>,
    /// Device mirror
    state: parking_lot::Mutex<DeviceState>,
    /// Identity `id?` must match
    expected_identity: String,
}

impl Tc200Driver {
    /// Open the configured serial port and synchronize the controller.
    ///
    /// # Errors
    /// - [`Tc200Error::Connection`] if the port cannot be opened
    /// - any error raised while synchronizing, see [`Tc200Driver::open`]
    #[cfg(feature = "tokio_serial")]
    pub async fn connect(config: &crate::config::Tc200Config) -> AppResult<Self> {
        let link = crate::hardware::serial::open_serial_async(
            &config.port,
            config.baud_rate,
            config.timeout,
        )
        .await?;
        Self::open(link, config.driver_options()).await
    }

    /// Synchronize a controller reachable over `link`.
    ///
    /// The link is released if synchronization fails.
    ///
    /// # Errors
    /// - [`Tc200Error::IdentityMismatch`] for the wrong device or firmware
    /// - [`Tc200Error::SensorAlarm`] if the controller reports a faulted sensor
    /// - [`Tc200Error::Validation`] if `options.tmax_c` is out of range
    /// - transport, protocol and verification errors from the individual steps
    #[instrument(skip(link), fields(sensor = %options.sensor, tmax_c = options.tmax_c), err)]
    pub async fn open(link: SerialLink, options: DriverOptions) -> AppResult<Self> {
        let driver = Self {
            channel: Mutex::new(CommandChannel::new(link)),
            state: parking_lot::Mutex::new(DeviceState {
                sensor: options.sensor,
                ..DeviceState::default()
            }),
            expected_identity: options.expected_identity,
        };

        driver.identify().await?;
        driver.set_sensor(options.sensor).await?;
        driver.set_mode(Mode::Normal).await?;
        driver.set_max_temp(options.tmax_c).await?;
        driver.enable_status().await?;
        driver.actual_temp().await?;

        tracing::info!(state = ?driver.state(), "TC200 synchronized");
        Ok(driver)
    }

    /// Snapshot of the device mirror.
    pub fn state(&self) -> DeviceState {
        *self.state.lock()
    }

    /// Read the identity string and check it against the expected firmware.
    #[instrument(skip(self), err)]
    pub async fn identify(&self) -> AppResult<String> {
        let mut channel = self.channel.lock().await;
        let identity = query(&mut channel, Command::Identity).await?;

        if identity != self.expected_identity {
            return Err(Tc200Error::IdentityMismatch {
                expected: self.expected_identity.clone(),
                actual: identity,
            });
        }
        tracing::info!(%identity, "identified controller");
        Ok(identity)
    }

    /// Read the configured sensor type.
    #[instrument(skip(self), err)]
    pub async fn sensor(&self) -> AppResult<Sensor> {
        let mut channel = self.channel.lock().await;
        self.read_sensor(&mut channel).await
    }

    /// Select the sensor type and verify the controller accepted it.
    #[instrument(skip(self), err)]
    pub async fn set_sensor(&self, sensor: Sensor) -> AppResult<()> {
        let mut channel = self.channel.lock().await;
        channel.send(&Command::SetSensor(sensor)).await?;

        let actual = self.read_sensor(&mut channel).await?;
        if actual != sensor {
            return Err(Tc200Error::Verification {
                what: "sensor",
                expected: sensor.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Select the operating mode.
    ///
    /// Only `normal` is exercised; the firmware's spurious error on `mode=normal` is
    /// absorbed by the transaction engine.
    #[instrument(skip(self), err)]
    pub async fn set_mode(&self, mode: Mode) -> AppResult<()> {
        let mut channel = self.channel.lock().await;
        channel.send(&Command::SetMode(mode)).await?;
        Ok(())
    }

    /// Read the max temperature (C).
    #[instrument(skip(self), err)]
    pub async fn max_temp(&self) -> AppResult<f64> {
        let mut channel = self.channel.lock().await;
        self.read_max_temp(&mut channel).await
    }

    /// Write the max temperature, rounded to 0.1 C, and verify it.
    ///
    /// The set-point is re-read afterwards and must not exceed the new max temperature.
    ///
    /// # Errors
    /// - [`Tc200Error::Validation`] if `tmax_c` is outside 20..=205 C (nothing is sent)
    /// - [`Tc200Error::Verification`] if the read-back differs from the rounded value, or if
    ///   the controller kept a set-point above the new max temperature
    #[instrument(skip(self), err)]
    pub async fn set_max_temp(&self, tmax_c: f64) -> AppResult<()> {
        if !TMAX_RANGE_C.contains(&tmax_c) {
            return Err(Tc200Error::Validation {
                what: "max temperature",
                reason: format!(
                    "{tmax_c} C outside {:.1}..={:.1} C",
                    TMAX_RANGE_C.start(),
                    TMAX_RANGE_C.end()
                ),
            });
        }
        let target = round_to_tenth(tmax_c);

        let mut channel = self.channel.lock().await;
        channel.send(&Command::SetMaxTemp(target)).await?;

        let actual = self.read_max_temp(&mut channel).await?;
        verify_temperature("max temperature", target, actual)?;

        let tset_c = self.read_setpoint(&mut channel).await?;
        if tset_c > actual {
            return Err(Tc200Error::Verification {
                what: "set temperature",
                expected: format!("<= {actual:.1}"),
                actual: format!("{tset_c}"),
            });
        }
        Ok(())
    }

    /// Read the set-point (C).
    #[instrument(skip(self), err)]
    pub async fn setpoint(&self) -> AppResult<f64> {
        let mut channel = self.channel.lock().await;
        self.read_setpoint(&mut channel).await
    }

    /// Write the set-point, rounded to 0.1 C, and verify it.
    ///
    /// # Errors
    /// - [`Tc200Error::Validation`] if `tset_c` is outside 20 C..=max temperature; nothing
    ///   is sent and the mirror is untouched
    /// - [`Tc200Error::Verification`] if the read-back differs from the rounded value
    #[instrument(skip(self), err)]
    pub async fn set_setpoint(&self, tset_c: f64) -> AppResult<()> {
        // The bound is read under the channel lock.
        let mut channel = self.channel.lock().await;

        let tmax_c = self.state.lock().tmax_c;
        if !(MIN_SETPOINT_C..=tmax_c).contains(&tset_c) {
            return Err(Tc200Error::Validation {
                what: "set temperature",
                reason: format!("{tset_c} C outside {MIN_SETPOINT_C:.1}..={tmax_c:.1} C"),
            });
        }
        let target = round_to_tenth(tset_c);

        channel.send(&Command::SetSetTemp(target)).await?;

        let actual = self.read_setpoint(&mut channel).await?;
        verify_temperature("set temperature", target, actual)
    }

    /// Read the actual temperature (C).
    #[instrument(skip(self), err)]
    pub async fn actual_temp(&self) -> AppResult<f64> {
        let mut channel = self.channel.lock().await;
        let response = query(&mut channel, Command::ActualTempQuery).await?;
        let tactual_c = parse_temperature(&response, "actual temperature")?;

        self.state.lock().tactual_c = tactual_c;
        Ok(tactual_c)
    }

    /// Read the status word and return whether the output is enabled.
    ///
    /// # Errors
    /// [`Tc200Error::SensorAlarm`] if the controller reports a sensor alarm. The mirror still
    /// records the alarm.
    #[instrument(skip(self), err)]
    pub async fn enable_status(&self) -> AppResult<bool> {
        let mut channel = self.channel.lock().await;
        Ok(self.read_status(&mut channel).await?.enabled)
    }

    /// Switch the output on or off.
    ///
    /// The controller only offers a toggle (`ens`), so the current state is read first and
    /// the toggle is sent only when it differs. The status is re-read afterwards.
    ///
    /// # Errors
    /// - [`Tc200Error::SensorAlarm`] from either status read
    /// - [`Tc200Error::Verification`] if the toggle did not take effect
    #[instrument(skip(self), err)]
    pub async fn set_enable(&self, on: bool) -> AppResult<()> {
        let mut channel = self.channel.lock().await;

        if self.read_status(&mut channel).await?.enabled == on {
            return Ok(());
        }
        channel.send(&Command::ToggleEnable).await?;

        let after = self.read_status(&mut channel).await?;
        if after.enabled != on {
            return Err(Tc200Error::Verification {
                what: "enable",
                expected: on.to_string(),
                actual: after.enabled.to_string(),
            });
        }
        tracing::info!(enabled = on, "output toggled");
        Ok(())
    }

    /// Read the actual temperature and report whether it is within `tolerance_c` of the
    /// set-point.
    pub async fn reached_temperature(&self, tolerance_c: f64) -> AppResult<bool> {
        TemperatureControl::reached_temperature(self, tolerance_c).await
    }

    /// Release the serial port.
    ///
    /// Dropping the driver also releases the port; this variant reports shutdown errors.
    pub async fn close(self) -> AppResult<()> {
        tracing::info!("closing TC200");
        self.channel.into_inner().close().await
    }

    async fn read_sensor(&self, channel: &mut CommandChannel) -> AppResult<Sensor> {
        let response = query(channel, Command::SensorQuery).await?;
        let sensor = parse_sensor_response(&response)?;
        self.state.lock().sensor = sensor;
        Ok(sensor)
    }

    async fn read_max_temp(&self, channel: &mut CommandChannel) -> AppResult<f64> {
        let response = query(channel, Command::MaxTempQuery).await?;
        let tmax_c = parse_temperature(&response, "max temperature")?;
        self.state.lock().tmax_c = tmax_c;
        Ok(tmax_c)
    }

    async fn read_setpoint(&self, channel: &mut CommandChannel) -> AppResult<f64> {
        let response = query(channel, Command::SetTempQuery).await?;
        let tset_c = parse_temperature(&response, "set temperature")?;
        self.state.lock().tset_c = tset_c;
        Ok(tset_c)
    }

    async fn read_status(&self, channel: &mut CommandChannel) -> AppResult<EnableStatus> {
        let status = channel.query_status().await?;
        {
            let mut state = self.state.lock();
            state.enabled = status.enabled;
            state.sensor_alarm = status.sensor_alarm;
        }
        if status.sensor_alarm {
            tracing::error!("controller reports sensor alarm");
            return Err(Tc200Error::SensorAlarm);
        }
        Ok(status)
    }
}

#[async_trait]
impl TemperatureControl for Tc200Driver {
    async fn actual_temperature(&self) -> AppResult<f64> {
        self.actual_temp().await
    }

    fn setpoint_c(&self) -> f64 {
        self.state.lock().tset_c
    }
}

async fn query(channel: &mut CommandChannel, command: Command) -> AppResult<String> {
    channel
        .send(&command)
        .await?
        .ok_or_else(|| Tc200Error::Parse {
            what: "response",
            response: format!("no response line for '{command}'"),
        })
}

fn verify_temperature(what: &'static str, expected: f64, actual: f64) -> AppResult<()> {
    // Exact comparison: both sides carry one decimal place.
    if actual != expected {
        return Err(Tc200Error::Verification {
            what,
            expected: format!("{expected:.1}"),
            actual: format!("{actual}"),
        });
    }
    Ok(())
}

/// Parse a temperature response such as `"37.0"` or `"24.9 C"`.
fn parse_temperature(response: &str, what: &'static str) -> AppResult<f64> {
    response
        .split_whitespace()
        .next()
        .and_then(|token| token.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .ok_or_else(|| Tc200Error::Parse {
            what,
            response: response.to_string(),
        })
}

/// Parse a `sns?` response such as `"Sensor = NTC10K, Beta = 3988"`.
fn parse_sensor_response(response: &str) -> AppResult<Sensor> {
    response
        .split(" = ")
        .nth(1)
        .and_then(|rest| rest.split(',').next())
        .and_then(|name| name.parse::<Sensor>().ok())
        .ok_or_else(|| Tc200Error::Parse {
            what: "sensor",
            response: response.to_string(),
        })
}
