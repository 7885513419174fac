//! Transport: owns the serial connection and enforces the settle delay.
//!
//! # The settle contract (for beginners)
//!
//! The switcher drops or garbles commands that arrive too close together.
//! Before every write the transport computes
//!
//! ```text
//! sleep = last_command + settle_interval - now
//! ```
//!
//! and blocks for that long if it is positive.  Opening the port sets
//! `last_command` one second into the future, so the first command after a
//! connect waits for the device to wake up as well.
//!
//! The transport never retries.  A failed open or a failed write is returned
//! to the caller and leaves the transport disconnected.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::{
    Clock, ConnectionError, LinkOpener, LinkSettings, Readback, SerialLink, SerialportOpener,
    SystemClock, POST_CONNECT_SETTLE,
};

/// The single live connection.
struct Connection {
    device: String,
    link: Box<dyn SerialLink>,
}

/// Blocking send/read primitive over at most one open serial device.
pub struct Transport {
    opener: Box<dyn LinkOpener>,
    clock: Arc<dyn Clock>,
    settings: LinkSettings,
    settle_interval: Duration,
    connection: Option<Connection>,
    last_command: Option<Instant>,
}

impl Transport {
    /// Creates a disconnected transport.
    pub fn new(
        opener: Box<dyn LinkOpener>,
        clock: Arc<dyn Clock>,
        settle_interval: Duration,
    ) -> Self {
        Self {
            opener,
            clock,
            settings: LinkSettings::default(),
            settle_interval,
            connection: None,
            last_command: None,
        }
    }

    /// Creates a disconnected transport for real serial hardware.
    pub fn serial(settle_interval: Duration) -> Self {
        Self::new(
            Box::new(SerialportOpener),
            Arc::new(SystemClock),
            settle_interval,
        )
    }

    pub fn settle_interval(&self) -> Duration {
        self.settle_interval
    }

    pub fn set_settle_interval(&mut self, interval: Duration) {
        self.settle_interval = interval;
    }

    /// Name of the connected device, if any.
    pub fn current_device(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.device.as_str())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Connects to `device`, replacing any existing connection.
    ///
    /// Returns `Ok(false)` without touching the line if `device` is already
    /// connected, `Ok(true)` after opening a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Open`] if the device cannot be opened.  The
    /// previous connection is closed before the open is attempted, so the
    /// transport is disconnected afterwards.
    pub fn connect(&mut self, device: &str) -> Result<bool, ConnectionError> {
        if self.current_device() == Some(device) {
            debug!("already connected to {device}");
            return Ok(false);
        }
        info!(
            "connecting to '{device}' instead of '{}'",
            self.current_device().unwrap_or("<none>")
        );
        self.disconnect();

        let link = self
            .opener
            .open(device, &self.settings)
            .map_err(|source| ConnectionError::Open {
                device: device.to_string(),
                source,
            })?;
        self.connection = Some(Connection {
            device: device.to_string(),
            link,
        });
        self.last_command = Some(self.clock.now() + POST_CONNECT_SETTLE);
        info!("connected to '{device}'");
        Ok(true)
    }

    /// Closes the connection, if any.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            info!("closing '{}'", conn.device);
        }
        self.last_command = None;
    }

    /// Writes `bytes` after the settle delay and optionally reads a reply.
    ///
    /// Returns `Ok(None)` without doing anything when disconnected, and also
    /// when `readback` asks for no data.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Io`] if the line fails; the connection is
    /// closed in that case.
    pub fn send(
        &mut self,
        bytes: &[u8],
        readback: Readback,
    ) -> Result<Option<Vec<u8>>, ConnectionError> {
        let Some(conn) = self.connection.as_mut() else {
            debug!("not connected; dropping {:?}", String::from_utf8_lossy(bytes));
            return Ok(None);
        };
        let result = exchange(
            conn,
            self.clock.as_ref(),
            &mut self.last_command,
            self.settle_interval,
            bytes,
            readback,
        );
        match result {
            Ok(reply) => Ok(reply),
            Err(source) => {
                let device = conn.device.clone();
                error!("serial I/O on '{device}' failed: {source}; closing connection");
                self.disconnect();
                Err(ConnectionError::Io { device, source })
            }
        }
    }
}

/// One clear → wait → write → flush → read cycle on an open connection.
fn exchange(
    conn: &mut Connection,
    clock: &dyn Clock,
    last_command: &mut Option<Instant>,
    settle_interval: Duration,
    bytes: &[u8],
    readback: Readback,
) -> std::io::Result<Option<Vec<u8>>> {
    // Stale bytes would be parsed as the reply to this command.
    conn.link.clear_input()?;

    if let Some(last) = *last_command {
        let now = clock.now();
        let ready_at = last + settle_interval;
        if ready_at > now {
            let wait = ready_at - now;
            debug!("sleeping {wait:?} before next command");
            clock.sleep(wait);
        }
    }

    debug!("write {:?}", String::from_utf8_lossy(bytes));
    conn.link.write_all(bytes)?;
    conn.link.flush()?;
    *last_command = Some(clock.now());

    match readback {
        Readback::None | Readback::Bytes(0) => Ok(None),
        Readback::Line => conn.link.read_line().map(Some),
        Readback::Bytes(len) => conn.link.read_bytes(len).map(Some),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::serial::mock::{MockClock, MockOpener, SimulatedMatrix};
    use dvimatrix_core::RoutingTable;

    const SETTLE: Duration = Duration::from_millis(250);
    const PORT: &str = "/dev/ttyUSB0";

    fn transport_with(device: &SimulatedMatrix) -> (Transport, MockClock, MockOpener) {
        let clock = MockClock::new();
        let opener = MockOpener::new().with_device(PORT, device.clone());
        let transport = Transport::new(Box::new(opener.clone()), Arc::new(clock.clone()), SETTLE);
        (transport, clock, opener)
    }

    // ── connect ───────────────────────────────────────────────────────────────

    #[test]
    fn test_connect_opens_device_and_reports_name() {
        let device = SimulatedMatrix::new();
        let (mut transport, _clock, opener) = transport_with(&device);

        let opened = transport.connect(PORT).expect("device is present");

        assert!(opened);
        assert_eq!(transport.current_device(), Some(PORT));
        assert_eq!(opener.opened(), vec![PORT.to_string()]);
    }

    #[test]
    fn test_connect_to_same_device_is_a_no_op() {
        let device = SimulatedMatrix::new();
        let (mut transport, _clock, opener) = transport_with(&device);
        transport.connect(PORT).unwrap();

        let opened = transport.connect(PORT).unwrap();

        assert!(!opened);
        assert_eq!(opener.opened().len(), 1, "must not reopen the port");
    }

    #[test]
    fn test_connect_failure_propagates_and_leaves_transport_closed() {
        // Arrange: connected to a working device first
        let device = SimulatedMatrix::new();
        let (mut transport, _clock, _opener) = transport_with(&device);
        transport.connect(PORT).unwrap();

        // Act
        let result = transport.connect("/dev/ttyUSB9");

        // Assert
        assert!(matches!(
            result,
            Err(ConnectionError::Open { ref device, .. }) if device == "/dev/ttyUSB9"
        ));
        assert_eq!(transport.current_device(), None);
    }

    #[test]
    fn test_first_command_after_connect_waits_for_wake_up_and_settle() {
        let device = SimulatedMatrix::new();
        let (mut transport, clock, _opener) = transport_with(&device);
        transport.connect(PORT).unwrap();

        transport.send(b"A1\r", Readback::None).unwrap();

        assert_eq!(clock.sleeps(), vec![POST_CONNECT_SETTLE + SETTLE]);
    }

    // ── send ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_send_without_connection_is_a_no_op() {
        let device = SimulatedMatrix::new();
        let (mut transport, clock, _opener) = transport_with(&device);

        let reply = transport.send(b"A1\r", Readback::Line).unwrap();

        assert_eq!(reply, None);
        assert!(device.writes().is_empty());
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_second_send_within_interval_waits_for_remaining_delta() {
        // Arrange: get past the post-connect window
        let device = SimulatedMatrix::new();
        let (mut transport, clock, _opener) = transport_with(&device);
        transport.connect(PORT).unwrap();
        transport.send(b"A1\r", Readback::None).unwrap();
        let slept_before = clock.sleeps().len();

        // Act: 100 ms later, well inside the 250 ms interval
        clock.advance(Duration::from_millis(100));
        transport.send(b"B2\r", Readback::None).unwrap();

        // Assert
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), slept_before + 1);
        assert_eq!(sleeps.last(), Some(&Duration::from_millis(150)));
        assert_eq!(device.writes().len(), 2);
    }

    #[test]
    fn test_send_after_interval_elapsed_writes_immediately() {
        let device = SimulatedMatrix::new();
        let (mut transport, clock, _opener) = transport_with(&device);
        transport.connect(PORT).unwrap();
        transport.send(b"A1\r", Readback::None).unwrap();
        let slept_before = clock.sleeps().len();

        clock.advance(Duration::from_millis(300));
        transport.send(b"B2\r", Readback::None).unwrap();

        assert_eq!(clock.sleeps().len(), slept_before, "no extra sleep expected");
    }

    #[test]
    fn test_send_discards_stale_input_before_writing() {
        let device = SimulatedMatrix::with_routing(RoutingTable::from([(0, 0)]));
        let (mut transport, _clock, _opener) = transport_with(&device);
        transport.connect(PORT).unwrap();
        device.inject_noise(b"leftover\r");

        let reply = transport.send(b"m\r", Readback::Bytes(673)).unwrap().unwrap();

        assert_eq!(device.cleared_bytes(), 9);
        assert!(reply.starts_with(b"m\r**** MATRIX STATUS ****"));
    }

    #[test]
    fn test_send_line_readback_reads_one_line() {
        let device = SimulatedMatrix::new();
        let (mut transport, _clock, _opener) = transport_with(&device);
        transport.connect(PORT).unwrap();

        // The simulated device answers route commands with nothing, so queue
        // a reply after the input clear by sending a status query.
        let reply = transport.send(b"m\r", Readback::Line).unwrap();

        // No '\n' in the reply: the whole buffer is one "line".
        assert!(reply.unwrap().starts_with(b"m\r"));
    }

    #[test]
    fn test_zero_byte_readback_reads_nothing() {
        let device = SimulatedMatrix::new();
        let (mut transport, _clock, _opener) = transport_with(&device);
        transport.connect(PORT).unwrap();

        let reply = transport.send(b"m\r", Readback::Bytes(0)).unwrap();

        assert_eq!(reply, None);
    }

    #[test]
    fn test_write_failure_closes_connection() {
        let device = SimulatedMatrix::new();
        let (mut transport, _clock, _opener) = transport_with(&device);
        transport.connect(PORT).unwrap();
        device.fail_writes();

        let result = transport.send(b"A1\r", Readback::None);

        assert!(matches!(result, Err(ConnectionError::Io { .. })));
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_disconnect_clears_device_name() {
        let device = SimulatedMatrix::new();
        let (mut transport, _clock, _opener) = transport_with(&device);
        transport.connect(PORT).unwrap();

        transport.disconnect();

        assert_eq!(transport.current_device(), None);
        assert_eq!(transport.send(b"A1\r", Readback::None).unwrap(), None);
    }
}
