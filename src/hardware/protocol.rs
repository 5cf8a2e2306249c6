//! TC200 command/response transaction engine.
//!
//! Protocol Overview:
//! - Format: ASCII commands terminated by CR (`\r`)
//! - Baud: 115200, 8N1, no flow control
//! - The controller echoes every command back, CR-terminated
//! - Queries are followed by one CR-terminated response line
//! - Every transaction ends with the two-byte prompt `"> "`
//! - If anything else arrives where the prompt belongs, those two bytes plus the rest of
//!   the line (`\n`-terminated) are an inline error message
//!
//! ```text
//! host   : t a c t ? \r
//! device : t a c t ? \r 2 4 . 9   C \r >  ␠
//!          └── echo ──┘ └ response ┘ └prompt┘
//! ```
//!
//! The status query (`stat?`) does not follow this framing: its payload is terminated by
//! `" > "` and is read by [`CommandChannel::query_status`].

use crate::error::{AppResult, Tc200Error};
use crate::hardware::serial::SerialLink;
use crate::hardware::status::{decode_status, EnableStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;

/// Command delimiter, also terminates echoes and response lines.
pub const DELIMITER: u8 = b'\r';

/// Prompt that closes a successful transaction.
pub const PROMPT: &[u8; 2] = b"> ";

/// Terminator of the error line that follows a non-prompt trailer.
pub const ERROR_LINE_TERMINATOR: u8 = b'\n';

/// Terminator of the `stat?` payload.
pub const STATUS_TERMINATOR: &[u8] = b" > ";

/// A command whose non-prompt trailer is known to be spurious.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareQuirk {
    /// Exact command token the quirk applies to.
    pub command: &'static str,
    /// Bytes to discard after the error line before the stream is back in sync.
    pub extra_bytes: usize,
}

/// FIRMWARE QUIRK: `mode=normal` reports an "error" on some firmware revisions even though
/// the mode change succeeds, then emits three more bytes (`">  "`). Those are discarded and
/// the transaction counts as a success. Whether this is revision-specific is unknown; it is
/// applied unconditionally.
pub const MODE_NORMAL_QUIRK: FirmwareQuirk = FirmwareQuirk {
    command: "mode=normal",
    extra_bytes: 3,
};

// =============================================================================
// Command vocabulary
// =============================================================================

/// Temperature sensor types supported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sensor {
    /// PT100 platinum RTD
    #[serde(alias = "ptc100")]
    Ptc100,
    /// PT1000 platinum RTD
    #[serde(alias = "ptc1000")]
    Ptc1000,
    /// 10 kΩ thermistor
    #[serde(alias = "ntc10k")]
    Ntc10k,
}

impl Sensor {
    /// Name as reported by `sns?`.
    pub fn as_str(self) -> &'static str {
        match self {
            Sensor::Ptc100 => "PTC100",
            Sensor::Ptc1000 => "PTC1000",
            Sensor::Ntc10k => "NTC10K",
        }
    }

    /// Whether `sns=<kind>` is answered with a response line.
    ///
    /// The thermistor setting replies with its beta value; the RTD settings do not.
    pub fn set_expects_response(self) -> bool {
        matches!(self, Sensor::Ntc10k)
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sensor {
    type Err = Tc200Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        [Sensor::Ptc100, Sensor::Ptc1000, Sensor::Ntc10k]
            .into_iter()
            .find(|sensor| sensor.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Tc200Error::Validation {
                what: "sensor",
                reason: format!("'{s}' is not one of PTC100, PTC1000, NTC10K"),
            })
    }
}

/// Operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Hold the set-point.
    Normal,
    /// Run the programmed temperature cycle (programming is not supported here).
    Cycle,
}

impl Mode {
    /// Token used in `mode=<mode>`.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Cycle => "cycle",
        }
    }
}

impl FromStr for Mode {
    type Err = Tc200Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Mode::Normal),
            "cycle" => Ok(Mode::Cycle),
            other => Err(Tc200Error::Validation {
                what: "mode",
                reason: format!("'{other}' is not one of normal, cycle"),
            }),
        }
    }
}

/// The subset of the TC200 command set used by this driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `id?`
    Identity,
    /// `sns?`
    SensorQuery,
    /// `sns=<kind>`
    SetSensor(Sensor),
    /// `mode=<mode>`
    SetMode(Mode),
    /// `tmax?`
    MaxTempQuery,
    /// `tmax=<v>`
    SetMaxTemp(f64),
    /// `tset?`
    SetTempQuery,
    /// `tset=<v>`
    SetSetTemp(f64),
    /// `tact?`
    ActualTempQuery,
    /// `ens` (toggles output enable)
    ToggleEnable,
}

impl Command {
    /// Whether a response line follows the echo.
    pub fn expects_response(&self) -> bool {
        match self {
            Command::Identity
            | Command::SensorQuery
            | Command::MaxTempQuery
            | Command::SetTempQuery
            | Command::ActualTempQuery => true,
            Command::SetSensor(sensor) => sensor.set_expects_response(),
            Command::SetMode(_)
            | Command::SetMaxTemp(_)
            | Command::SetSetTemp(_)
            | Command::ToggleEnable => false,
        }
    }
}

/// ASCII token as sent on the wire (without the delimiter).
///
/// Temperatures are always written with one decimal place; the controller stores nothing
/// finer.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Identity => f.write_str("id?"),
            Command::SensorQuery => f.write_str("sns?"),
            Command::SetSensor(sensor) => {
                write!(f, "sns={}", sensor.as_str().to_ascii_lowercase())
            }
            Command::SetMode(mode) => write!(f, "mode={}", mode.as_str()),
            Command::MaxTempQuery => f.write_str("tmax?"),
            Command::SetMaxTemp(v) => write!(f, "tmax={v:.1}"),
            Command::SetTempQuery => f.write_str("tset?"),
            Command::SetSetTemp(v) => write!(f, "tset={v:.1}"),
            Command::ActualTempQuery => f.write_str("tact?"),
            Command::ToggleEnable => f.write_str("ens"),
        }
    }
}

// =============================================================================
// CommandChannel
// =============================================================================

/// Transaction engine over an exclusively owned [`SerialLink`].
///
/// One transaction at a time: every method takes `&mut self`.
pub struct CommandChannel {
    link: SerialLink,
}

impl CommandChannel {
    /// Wrap an open link.
    pub fn new(link: SerialLink) -> Self {
        Self { link }
    }

    /// Send a typed command.
    pub async fn send(&mut self, command: &Command) -> AppResult<Option<String>> {
        self.transact(&command.to_string(), command.expects_response())
            .await
    }

    /// Run one framed transaction.
    ///
    /// Returns the trimmed response when `expect_response` is set, `None` otherwise.
    pub async fn transact(
        &mut self,
        command: &str,
        expect_response: bool,
    ) -> AppResult<Option<String>> {
        let mut frame = Vec::with_capacity(command.len() + 1);
        frame.extend_from_slice(command.as_bytes());
        frame.push(DELIMITER);
        tracing::trace!(cmd = %command, "sending");
        self.link.write(&frame).await?;

        let echo = self
            .link
            .read_until(DELIMITER)
            .await
            .map_err(|e| self.read_error(e, command, "echo"))?;
        tracing::trace!(cmd = %command, echo = ?String::from_utf8_lossy(&echo), "echo");

        let response = if expect_response {
            let raw = self
                .link
                .read_until(DELIMITER)
                .await
                .map_err(|e| self.read_error(e, command, "response"))?;
            Some(decode_ascii(&raw, command)?)
        } else {
            None
        };

        let trailing = self
            .link
            .read_exact(PROMPT.len())
            .await
            .map_err(|e| self.read_error(e, command, "prompt"))?;

        if trailing.as_slice() == PROMPT {
            tracing::debug!(cmd = %command, response = ?response, "transaction complete");
            return Ok(response);
        }

        let mut payload = trailing;
        payload.extend(self.link.read_until_lenient(ERROR_LINE_TERMINATOR).await?);

        if command == MODE_NORMAL_QUIRK.command {
            let discarded = self
                .link
                .read_exact_lenient(MODE_NORMAL_QUIRK.extra_bytes)
                .await?;
            tracing::warn!(
                cmd = %command,
                payload = ?String::from_utf8_lossy(&payload),
                discarded = ?String::from_utf8_lossy(&discarded),
                "ignoring spurious controller error (mode=normal firmware quirk)"
            );
            return Ok(response);
        }

        tracing::error!(
            cmd = %command,
            payload = ?String::from_utf8_lossy(&payload),
            "controller error"
        );
        Err(Tc200Error::Protocol {
            command: command.to_string(),
            payload,
        })
    }

    /// Query the raw two-byte status word and decode it.
    ///
    /// `stat?` replies with its payload terminated by `" > "` instead of the usual
    /// response line and prompt.
    pub async fn query_status(&mut self) -> AppResult<EnableStatus> {
        const COMMAND: &str = "stat?";

        self.link.write(b"stat?\r").await?;
        let echo = self
            .link
            .read_until(DELIMITER)
            .await
            .map_err(|e| self.read_error(e, COMMAND, "echo"))?;
        tracing::trace!(cmd = COMMAND, echo = ?String::from_utf8_lossy(&echo), "echo");

        let raw = self
            .link
            .read_until_marker(STATUS_TERMINATOR)
            .await
            .map_err(|e| self.read_error(e, COMMAND, "status"))?;
        let payload = &raw[..raw.len() - STATUS_TERMINATOR.len()];

        match payload {
            [b0, b1, ..] => {
                let status = decode_status([*b0, *b1]);
                tracing::debug!(
                    raw = ?String::from_utf8_lossy(payload),
                    enabled = status.enabled,
                    sensor_alarm = status.sensor_alarm,
                    "status"
                );
                Ok(status)
            }
            _ => Err(Tc200Error::Parse {
                what: "status word",
                response: String::from_utf8_lossy(payload).into_owned(),
            }),
        }
    }

    /// Release the underlying link.
    pub async fn close(self) -> AppResult<()> {
        self.link.close().await?;
        Ok(())
    }

    fn read_error(&self, err: io::Error, command: &str, waiting_for: &'static str) -> Tc200Error {
        if err.kind() == io::ErrorKind::TimedOut {
            Tc200Error::Timeout {
                command: command.to_string(),
                waiting_for,
                timeout: self.link.timeout(),
            }
        } else {
            Tc200Error::Io(err)
        }
    }
}

fn decode_ascii(raw: &[u8], command: &str) -> AppResult<String> {
    if !raw.is_ascii() {
        return Err(Tc200Error::Parse {
            what: "ASCII response",
            response: format!("{command}: {}", String::from_utf8_lossy(raw)),
        });
    }
    // ASCII is valid UTF-8
    Ok(String::from_utf8_lossy(raw).trim().to_string())
}
