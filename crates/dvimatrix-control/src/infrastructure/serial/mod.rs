//! Serial infrastructure: the link to the matrix switcher.
//!
//! The switcher is a half-duplex RS-232 device running at 19200 baud, 8 data
//! bits, no parity, 1 stop bit.  It needs a quiet period between commands and
//! a longer one right after the port is opened; [`transport::Transport`]
//! enforces both.
//!
//! # Testability
//!
//! Three traits keep the transport independent of real hardware:
//!
//! - [`SerialLink`] – an open byte stream (write, flush, clear, read).
//! - [`LinkOpener`] – opens a [`SerialLink`] for a device name.
//! - [`Clock`] – reads the time and sleeps.
//!
//! Production code uses [`port::SerialportOpener`] and [`SystemClock`]; tests
//! use the doubles in [`mock`].

use std::io;
use std::time::{Duration, Instant};

use thiserror::Error;

pub mod mock;
pub mod port;
pub mod transport;

pub use port::{available_ports, PortInfo, SerialportOpener};
pub use transport::Transport;

/// Line speed of the switcher.
pub const BAUD_RATE: u32 = 19_200;

/// How long a read waits for data before giving up.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Quiet time the device needs after the port has been opened.
pub const POST_CONNECT_SETTLE: Duration = Duration::from_secs(1);

/// Default minimum quiet time between two commands.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(250);

/// Error type for serial connection operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The device could not be opened (absent, permission denied, busy…).
    #[error("cannot open serial device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },

    /// Reading or writing an open device failed; the connection was closed.
    #[error("I/O error on serial device {device}: {source}")]
    Io {
        device: String,
        #[source]
        source: io::Error,
    },

    /// The list of serial ports could not be obtained from the OS.
    #[error("cannot enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
}

/// Line settings used when opening a device.
///
/// Framing is always 8N1 without flow control; only the speed and the read
/// timeout are configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            read_timeout: READ_TIMEOUT,
        }
    }
}

/// What to read after a command has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readback {
    /// Do not read.
    None,
    /// Read one line (up to and including `\n`, or until the timeout).
    Line,
    /// Read this many bytes, or fewer if the timeout expires first.
    /// `Bytes(0)` reads nothing.
    Bytes(usize),
}

/// An open, bidirectional byte stream to the device.
pub trait SerialLink: Send {
    /// Discards input that has been received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;
    /// Writes all of `bytes`.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Blocks until written bytes have been handed to the line.
    fn flush(&mut self) -> io::Result<()>;
    /// Reads up to and including the next `\n`, or until the read timeout.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;
    /// Reads `len` bytes, returning early with fewer on read timeout.
    fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>>;
}

/// Opens serial links by device name.
pub trait LinkOpener: Send {
    fn open(
        &self,
        device: &str,
        settings: &LinkSettings,
    ) -> Result<Box<dyn SerialLink>, serialport::Error>;
}

/// Source of time for the settle-delay calculation.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// The wall clock: `Instant::now` and `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
