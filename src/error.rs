//! Error types for the TC200 driver.
//!
//! `Tc200Error` is the single error type returned by the transaction engine, the
//! device-state operations and the stability monitor. Using the `thiserror` crate, each
//! failure mode the controller can exhibit gets its own variant so callers can tell a
//! device-reported fault apart from a timeout or a rejected argument.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: the serial port could not be opened. Fatal, never retried.
//! - **`IdentityMismatch`**: the device answered `id?` with an unexpected string, so it is
//!   the wrong instrument or unsupported firmware.
//! - **`Protocol`**: the trailing bytes of a transaction were not the `"> "` prompt. Carries
//!   the raw error payload the device emitted.
//! - **`Timeout`**: the transport gave up waiting for a delimiter or a fixed-size read.
//! - **`SensorAlarm`**: the status word reports a sensor fault. Temperature control cannot
//!   be trusted until the alarm is cleared at the instrument.
//! - **`Validation`**: a caller-supplied value was rejected before any byte was written.
//! - **`Verification`**: a setter's read-back did not match the value written.
//! - **`Parse`** / **`Io`**: undecodable responses and raw transport failures.
//! - **`Configuration`**: semantic errors in a loaded [`crate::config::Tc200Config`].
//!
//! None of these are retried inside the crate; they propagate to the immediate caller.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type AppResult<T> = std::result::Result<T, Tc200Error>;

/// Primary error type for the TC200 driver.
#[derive(Error, Debug)]
pub enum Tc200Error {
    #[error("No connection on port '{port}': {reason}")]
    Connection { port: String, reason: String },

    #[error("Unexpected device identity: expected '{expected}', got '{actual}'")]
    IdentityMismatch { expected: String, actual: String },

    #[error("Controller error after '{command}': {payload:?}")]
    Protocol { command: String, payload: Vec<u8> },

    #[error("Timed out after {timeout:?} waiting for {waiting_for} (command '{command}')")]
    Timeout {
        command: String,
        waiting_for: &'static str,
        timeout: Duration,
    },

    #[error("Controller reports a sensor alarm; temperature control is unavailable")]
    SensorAlarm,

    #[error("Invalid {what}: {reason}")]
    Validation { what: &'static str, reason: String },

    #[error("Verification failed for {what}: wrote {expected}, device reports {actual}")]
    Verification {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Failed to parse {what} from response {response:?}")]
    Parse { what: &'static str, response: String },

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Tc200Error {
    /// Whether the error was raised by the device itself (as opposed to the host side).
    pub fn is_device_fault(&self) -> bool {
        matches!(
            self,
            Tc200Error::Protocol { .. } | Tc200Error::SensorAlarm | Tc200Error::Verification { .. }
        )
    }

    /// Payload of a device-reported protocol error, lossily decoded for display.
    pub fn protocol_payload(&self) -> Option<String> {
        match self {
            Tc200Error::Protocol { payload, .. } => Some(String::from_utf8_lossy(payload).into_owned()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_keeps_raw_payload() {
        let err = Tc200Error::Protocol {
            command: "tset=300.0".into(),
            payload: b"CMD_ARG_RANGE_ERR\r\n".to_vec(),
        };
        assert!(err.is_device_fault());
        assert_eq!(
            err.protocol_payload().as_deref(),
            Some("CMD_ARG_RANGE_ERR\r\n")
        );
        assert!(err.to_string().contains("tset=300.0"));
    }

    #[test]
    fn timeout_is_distinct_from_protocol_error() {
        let err = Tc200Error::Timeout {
            command: "tact?".into(),
            waiting_for: "echo",
            timeout: Duration::from_secs(2),
        };
        assert!(!err.is_device_fault());
        assert!(err.protocol_payload().is_none());
    }

    #[test]
    fn validation_message_names_the_field() {
        let err = Tc200Error::Validation {
            what: "set temperature",
            reason: "19.9 C outside 20.0..=50.0 C".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid set temperature: 19.9 C outside 20.0..=50.0 C"
        );
    }
}
