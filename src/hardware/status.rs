//! Decoding of the `stat?` status word.
//!
//! The TC200 manual does not document the layout of the status field. The two masks
//! below were found empirically on firmware `THORLABS TC200 VERSION 2.0`; re-check them
//! on any other firmware.
//!
//! | byte | bit | meaning |
//! |------|-----|---------|
//! | 0    | 2   | sensor alarm |
//! | 1    | 0   | output enabled |

/// Sensor-alarm mask applied to byte 0.
pub const SENSOR_ALARM_MASK: u8 = 0b0000_0100;

/// Enabled mask applied to byte 1.
pub const ENABLED_MASK: u8 = 0b0000_0001;

/// Decoded status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnableStatus {
    /// The sensor is faulted; no further temperature control is trustworthy.
    pub sensor_alarm: bool,
    /// Heater output is enabled.
    pub enabled: bool,
}

/// Decode the first two bytes of a `stat?` reply.
pub fn decode_status(bytes: [u8; 2]) -> EnableStatus {
    EnableStatus {
        sensor_alarm: bytes[0] & SENSOR_ALARM_MASK != 0,
        enabled: bytes[1] & ENABLED_MASK != 0,
    }
}
