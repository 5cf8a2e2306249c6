//! # TC200 Temperature Controller Library
//!
//! Async driver for the Thorlabs TC200 heater controller plus the thermal-stability
//! detector used to gate experiments on "the sample has reached and held its set-point".
//!
//! ## Crate Structure
//!
//! - **`hardware`**: serial transport, the framed command/response transaction engine,
//!   status-word decoding and the `Tc200Driver` with its verified `DeviceState` mirror.
//! - **`stability`**: `StabilityWindow` state machine and the `StabilityMonitor` poll loop.
//! - **`config`**: figment-based configuration (`config/tc200.toml` + `TC200_*` env vars).
//! - **`error`**: the `Tc200Error` enum shared by every layer.
//! - **`tracing_setup`**: `tracing-subscriber` initialization.
//!
//! ## Control Flow
//!
//! `StabilityMonitor` → `Tc200Driver` (device state) → `CommandChannel` (transactions) →
//! `SerialLink` (bytes).

pub mod config;
pub mod error;
pub mod hardware;
pub mod stability;
pub mod tracing_setup;

pub use error::{AppResult, Tc200Error};
pub use hardware::{Sensor, Tc200Driver, TemperatureControl};
pub use stability::{StabilityMonitor, StabilityReport, StabilitySettings, StabilityState};
