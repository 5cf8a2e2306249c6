//! TC200 hardware layer
//!
//! - [`serial`]: transport (write / read-until / read(n) with timeouts)
//! - [`protocol`]: command vocabulary and the framed transaction engine
//! - [`status`]: empirical decoding of the `stat?` status word
//! - [`tc200`]: the driver and its verified device-state mirror
//! - [`capabilities`]: traits consumers program against

pub mod capabilities;
pub mod protocol;
pub mod serial;
pub mod status;
pub mod tc200;

pub use capabilities::TemperatureControl;
pub use protocol::{Command, CommandChannel, Mode, Sensor};
pub use serial::{DynSerial, SerialLink};
pub use tc200::{DeviceState, DriverOptions, Tc200Driver};
