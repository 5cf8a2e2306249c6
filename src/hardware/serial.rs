//! Serial transport for the TC200.
//!
//! The controller is driven over a plain duplex byte stream. This module wraps any
//! `AsyncRead + AsyncWrite` stream in a [`SerialLink`] that exposes the three primitives
//! the protocol layer needs, all bounded by the link timeout:
//!
//! - [`SerialLink::write`]: write a whole frame and flush it
//! - [`SerialLink::read_until`]: read up to and including a delimiter byte
//! - [`SerialLink::read_exact`]: read a fixed number of bytes
//!
//! Lenient variants return whatever arrived before the timeout instead of failing; the
//! protocol layer uses them only for bytes it is about to discard.
//!
//! Timeouts surface as `std::io::ErrorKind::TimedOut` so the caller can attach the command
//! context. A closed stream surfaces as `UnexpectedEof`.
//!
//! # Example
//!
//! ```rust,ignore
//! use tc200::hardware::serial::{open_serial_async, SerialLink};
//!
//! let mut link = open_serial_async("/dev/ttyUSB0", 115_200, Duration::from_secs(2)).await?;
//! link.write(b"tact?\r").await?;
//! let echo = link.read_until(b'\r').await?;
//! ```

use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Instant;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Default TC200 baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default read timeout used by the vendor software.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// SerialLink
// =============================================================================

/// Exclusively owned, buffered serial stream with a per-read timeout.
pub struct SerialLink {
    port: BufReader<DynSerial>,
    timeout: Duration,
}

impl SerialLink {
    /// Wrap an already-open stream.
    pub fn new(port: DynSerial, timeout: Duration) -> Self {
        Self {
            port: BufReader::new(port),
            timeout,
        }
    }

    /// Timeout applied to every read.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write the whole buffer and flush it.
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port.get_mut();
        port.write_all(bytes).await?;
        port.flush().await
    }

    /// Read up to and including `delimiter`.
    ///
    /// Fails with `TimedOut` if the delimiter does not arrive within the link timeout.
    pub async fn read_until(&mut self, delimiter: u8) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let result =
            tokio::time::timeout(self.timeout, self.port.read_until(delimiter, &mut buf)).await;

        match result {
            Ok(Ok(_)) if buf.last() == Some(&delimiter) => Ok(buf),
            Ok(Ok(_)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial stream closed before delimiter",
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(timed_out(self.timeout)),
        }
    }

    /// Read up to and including `delimiter`, returning a short read on timeout or EOF.
    pub async fn read_until_lenient(&mut self, delimiter: u8) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let result =
            tokio::time::timeout(self.timeout, self.port.read_until(delimiter, &mut buf)).await;

        match result {
            Ok(Err(e)) => Err(e),
            Ok(Ok(_)) | Err(_) => Ok(buf),
        }
    }

    /// Read exactly `n` bytes.
    pub async fn read_exact(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        match tokio::time::timeout(self.timeout, self.port.read_exact(&mut buf)).await {
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(timed_out(self.timeout)),
        }
    }

    /// Read up to `n` bytes, stopping early on timeout or EOF.
    pub async fn read_exact_lenient(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = Vec::with_capacity(n);

        while buf.len() < n {
            match tokio::time::timeout_at(deadline, self.port.read_u8()).await {
                Ok(Ok(byte)) => buf.push(byte),
                Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
        }

        Ok(buf)
    }

    /// Read until the buffer ends with `marker` (a multi-byte delimiter).
    ///
    /// The returned bytes include the marker.
    pub async fn read_until_marker(&mut self, marker: &[u8]) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = Vec::new();

        while !buf.ends_with(marker) {
            match tokio::time::timeout_at(deadline, self.port.read_u8()).await {
                Ok(Ok(byte)) => buf.push(byte),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(timed_out(self.timeout)),
            }
        }

        Ok(buf)
    }

    /// Shut the stream down and release the handle.
    pub async fn close(self) -> io::Result<()> {
        let mut port = self.port.into_inner();
        port.shutdown().await
    }
}

fn timed_out(timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("no data within {timeout:?}"),
    )
}

// =============================================================================
// Opening real ports
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control. Failure to open is reported as
/// [`Tc200Error::Connection`](crate::error::Tc200Error::Connection).
#[cfg(feature = "tokio_serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    timeout: Duration,
) -> crate::error::AppResult<SerialLink> {
    use crate::error::Tc200Error;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    let port = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(timeout)
            .open_native_async()
    })
    .await
    .map_err(|e| Tc200Error::Connection {
        port: port_path.to_string(),
        reason: format!("spawn_blocking for serial port opening failed: {e}"),
    })?
    .map_err(|e| Tc200Error::Connection {
        port: port_path.to_string(),
        reason: e.to_string(),
    })?;

    tracing::info!(port = port_path, baud_rate, "opened serial port");
    Ok(SerialLink::new(Box::new(port), timeout))
}
