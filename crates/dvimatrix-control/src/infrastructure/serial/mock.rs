//! Test doubles for the serial seams.
//!
//! - [`SimulatedMatrix`] – a [`SerialLink`] that behaves like the switcher:
//!   it applies route commands to its own routing table and answers the
//!   status query with a rendered status reply.
//! - [`MockOpener`] – a [`LinkOpener`] that hands out simulated devices by
//!   name and fails for unknown names.
//! - [`MockClock`] – a [`Clock`] whose `sleep` advances virtual time and is
//!   recorded instead of blocking.
//!
//! All doubles are cheap handles around shared state, so a test keeps one
//! clone for inspection while the transport owns the other.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dvimatrix_core::protocol::{decode_route_command, render_status_response};
use dvimatrix_core::RoutingTable;

use super::{Clock, LinkOpener, LinkSettings, SerialLink};

// ── SimulatedMatrix ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DeviceState {
    routing: RoutingTable,
    writes: Vec<Vec<u8>>,
    pending: VecDeque<u8>,
    clears: usize,
    cleared_bytes: usize,
    fail_writes: bool,
    silent: bool,
}

/// A simulated matrix switcher.
#[derive(Debug, Clone, Default)]
pub struct SimulatedMatrix {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedMatrix {
    /// Creates a device whose outputs all show nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device that already routes according to `routing`.
    pub fn with_routing(routing: RoutingTable) -> Self {
        let device = Self::new();
        device.set_routing(routing);
        device
    }

    /// Returns a boxed link sharing this device's state.
    pub fn link(&self) -> Box<dyn SerialLink> {
        Box::new(self.clone())
    }

    /// The routing the device currently applies.
    pub fn routing(&self) -> RoutingTable {
        self.lock().routing.clone()
    }

    /// Changes the routing behind the controller's back (front-panel use).
    pub fn set_routing(&self, routing: RoutingTable) {
        self.lock().routing = routing;
    }

    /// Every write the device received, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Number of route commands received.
    pub fn route_commands(&self) -> usize {
        self.lock()
            .writes
            .iter()
            .filter(|w| decode_route_command(w).is_some())
            .count()
    }

    /// Number of status queries received.
    pub fn status_queries(&self) -> usize {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.as_slice() == b"m\r")
            .count()
    }

    /// Number of times buffered input was discarded.
    pub fn clears(&self) -> usize {
        self.lock().clears
    }

    /// Total bytes thrown away by input clears.
    pub fn cleared_bytes(&self) -> usize {
        self.lock().cleared_bytes
    }

    /// Queues unsolicited bytes, as if the device had printed them.
    pub fn inject_noise(&self, bytes: &[u8]) {
        self.lock().pending.extend(bytes.iter().copied());
    }

    /// Makes every following write fail with a broken-pipe error.
    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }

    /// Makes the device stop answering status queries.
    pub fn go_silent(&self) {
        self.lock().silent = true;
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SerialLink for SimulatedMatrix {
    fn clear_input(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        state.clears += 1;
        state.cleared_bytes += state.pending.len();
        state.pending.clear();
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        state.writes.push(bytes.to_vec());
        if let Some(route) = decode_route_command(bytes) {
            state.routing.set(route.output, route.input);
        } else if bytes == b"m\r" && !state.silent {
            let reply = render_status_response(&state.routing)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            state.pending.extend(reply);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut state = self.lock();
        let mut line = Vec::new();
        while let Some(byte) = state.pending.pop_front() {
            line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        Ok(line)
    }

    fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut state = self.lock();
        let n = len.min(state.pending.len());
        Ok(state.pending.drain(..n).collect())
    }
}

// ── MockOpener ────────────────────────────────────────────────────────────────

/// Opens [`SimulatedMatrix`] devices registered by name.
#[derive(Debug, Clone, Default)]
pub struct MockOpener {
    devices: Arc<Mutex<HashMap<String, SimulatedMatrix>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `device` under `name`.
    pub fn with_device(self, name: &str, device: SimulatedMatrix) -> Self {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), device);
        self
    }

    /// Names of every successful open, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl LinkOpener for MockOpener {
    fn open(
        &self,
        device: &str,
        _settings: &LinkSettings,
    ) -> Result<Box<dyn SerialLink>, serialport::Error> {
        let devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        match devices.get(device) {
            Some(sim) => {
                self.opened
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(device.to_string());
                Ok(sim.link())
            }
            None => Err(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                format!("no such device: {device}"),
            )),
        }
    }
}

// ── MockClock ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ClockState {
    origin: Instant,
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Virtual time for settle-delay tests.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<Mutex<ClockState>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Moves virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// Every sleep requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Sum of all requested sleeps.
    pub fn total_slept(&self) -> Duration {
        self.lock().sleeps.iter().sum()
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let state = self.lock();
        state.origin + state.elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.sleeps.push(duration);
        state.elapsed += duration;
    }
}
