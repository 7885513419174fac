//! RoutingState: the cached routing table kept in step with the switcher.
//!
//! This is the heart of the controller.  It owns the [`Transport`], the live
//! routing table, the emergency snapshot and the labels, and it is the only
//! place that decides when the device is written to or queried.
//!
//! # Apply versus display (for beginners)
//!
//! Two things can happen to a routing table:
//!
//! - **apply** – send it to the device, one route command per output, because
//!   the device does not know about it yet (a table from the config file, or
//!   the emergency table on `restore`).
//! - **display** – hand it to the presentation layer through a
//!   [`RoutingObserver`] without touching the device (a table the device just
//!   reported on `refresh`).
//!
//! # Drift and the fetch policy
//!
//! `refresh` compares what the device reports with the cache.  An output
//! whose reported input differs from the cached one has *drifted*.  When the
//! policy refreshes automatically the cache wins: the drifted routes are sent
//! again and the device is queried once more to confirm.  That confirming
//! query never re-applies, so one top-level `refresh` costs at most two status
//! queries.  In every other case the device wins and its report is merged
//! into the cache.

use dvimatrix_core::protocol::STATUS_READBACK_LEN;
use dvimatrix_core::{
    decode_status_response, encode_route, encode_status_query, FetchPolicy, LabelError,
    MatrixLabels, MatrixSize, ProtocolError, Route, RoutingTable,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::infrastructure::serial::{ConnectionError, Readback, Transport};

/// How many confirming refreshes one top-level `refresh` may trigger.
const REAPPLY_BUDGET: u8 = 1;

/// Error type for routing operations.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("output {output} does not exist (matrix has {outputs} outputs)")]
    UnknownOutput { output: usize, outputs: usize },

    #[error("input {input} does not exist (matrix has {inputs} inputs)")]
    UnknownInput { input: usize, inputs: usize },

    /// `store` was called while the configuration forbids it.
    #[error("storing the emergency routing is disabled by configuration")]
    EmergencyStoreDisabled,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Labels(#[from] LabelError),
}

/// Receives every table that should become visible to the user.
///
/// A GUI would check the matching buttons; the CLI prints the table.
#[cfg_attr(test, mockall::automock)]
pub trait RoutingObserver: Send {
    fn show_routing(&mut self, table: &RoutingTable);
}

/// Everything [`RoutingState::new`] needs besides the transport.
#[derive(Debug, Clone)]
pub struct RoutingSeed {
    pub size: MatrixSize,
    pub labels: MatrixLabels,
    /// Initial emergency routing.
    pub snapshot: RoutingTable,
    pub policy: FetchPolicy,
    /// Whether `store` is permitted.
    pub emergency_store: bool,
}

/// In-memory routing state of one switcher.
///
/// The live table starts empty: the device's routing is unknown until it has
/// been applied or fetched.
pub struct RoutingState {
    transport: Transport,
    size: MatrixSize,
    labels: MatrixLabels,
    live: RoutingTable,
    snapshot: RoutingTable,
    displayed: RoutingTable,
    policy: FetchPolicy,
    emergency_store: bool,
    observer: Option<Box<dyn RoutingObserver>>,
}

impl RoutingState {
    /// Creates the state for a matrix of `seed.size`.
    ///
    /// Snapshot entries outside the matrix are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Labels`] if the labels do not match the size.
    pub fn new(seed: RoutingSeed, transport: Transport) -> Result<Self, RoutingError> {
        seed.labels.check_fits(seed.size)?;
        let (snapshot, dropped) = seed.snapshot.partition_by_size(seed.size);
        for route in dropped {
            warn!("ignoring emergency route {route} outside the {} matrix", seed.size);
        }
        Ok(Self {
            transport,
            size: seed.size,
            labels: seed.labels,
            live: RoutingTable::new(),
            snapshot,
            displayed: RoutingTable::new(),
            policy: seed.policy,
            emergency_store: seed.emergency_store,
            observer: None,
        })
    }

    /// Installs the observer that receives displayed tables.
    pub fn set_observer(&mut self, observer: Box<dyn RoutingObserver>) {
        self.observer = Some(observer);
    }

    // ── Connection ────────────────────────────────────────────────────────────

    /// Connects the transport to `device`.
    ///
    /// A new connection triggers a `refresh` when the policy refreshes
    /// automatically.  Returns `Ok(false)` if `device` was already connected.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Connection`] if the device cannot be opened.
    pub fn connect(&mut self, device: &str) -> Result<bool, RoutingError> {
        let opened = self.transport.connect(device)?;
        if opened && self.policy.refreshes_automatically() {
            self.refresh()?;
        }
        Ok(opened)
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    pub fn current_device(&self) -> Option<&str> {
        self.transport.current_device()
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    /// Routes `input` to `output`.
    ///
    /// The live table is updated before the command is sent, so it reflects
    /// the request even if the line fails.  Returns `Ok(false)` without any
    /// device traffic when the route is already recorded.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownOutput`] or [`RoutingError::UnknownInput`]
    /// for indices outside the matrix, and [`RoutingError::Connection`] if the
    /// command cannot be written.
    pub fn set_route(&mut self, output: usize, input: usize) -> Result<bool, RoutingError> {
        let route = Route::new(output, input);
        self.validate(route)?;
        if self.live.get(output) == Some(input) {
            debug!("route {route} already set");
            return Ok(false);
        }
        self.live.set(output, input);
        info!("routing input {input} to output {output}");
        self.send_route(route)?;
        if self.policy.refreshes_automatically() && self.transport.is_connected() {
            self.refresh()?;
        }
        Ok(true)
    }

    /// Queries the device and reconciles the live table with its report.
    ///
    /// Returns the table the device reported (empty when disconnected).  The
    /// report is displayed when the device wins; see the module docs for the
    /// automatic case.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Connection`] if the query or a re-applied route
    /// cannot be written.
    pub fn refresh(&mut self) -> Result<RoutingTable, RoutingError> {
        self.refresh_with(REAPPLY_BUDGET)
    }

    fn refresh_with(&mut self, budget: u8) -> Result<RoutingTable, RoutingError> {
        let query = encode_status_query();
        let Some(reply) = self
            .transport
            .send(&query, Readback::Bytes(STATUS_READBACK_LEN))?
        else {
            debug!("not connected; nothing to refresh");
            return Ok(RoutingTable::new());
        };

        let (reported, foreign) = decode_status_response(&reply).partition_by_size(self.size);
        for route in foreign {
            warn!("device reports route {route} outside the {} matrix", self.size);
        }
        if reported.is_empty() {
            warn!("device returned no status lines ({} bytes read)", reply.len());
        }
        debug!("device reports {reported}");

        let drift = self.live.drift_from(&reported);
        if drift.is_empty() {
            self.live.merge_from(&reported);
            self.display_table(&reported);
            return Ok(reported);
        }

        if self.policy.refreshes_automatically() {
            if budget > 0 {
                info!("device drifted on {} output(s); re-applying {drift}", drift.len());
                for route in reported.iter() {
                    if self.live.get(route.output).is_none() {
                        self.live.set(route.output, route.input);
                    }
                }
                for route in drift.iter() {
                    self.send_route(route)?;
                }
                return self.refresh_with(budget - 1);
            }
            warn!("device still differs on {drift} after re-applying; adopting device state");
        } else {
            info!("device differs on {drift}; adopting device state");
        }
        self.live.merge_from(&reported);
        self.display_table(&reported);
        Ok(reported)
    }

    /// Records every entry of `table` and sends one route command per entry.
    ///
    /// Entries the live table already holds are sent too: the device may have
    /// been switched behind the cache.  All entries are validated before
    /// anything is sent.  When the table is not empty and the policy refreshes
    /// automatically, the device is refreshed once afterwards.  Returns the
    /// number of route commands issued.
    ///
    /// # Errors
    ///
    /// Returns the first validation or connection error.
    pub fn apply_table(&mut self, table: &RoutingTable) -> Result<usize, RoutingError> {
        for route in table.iter() {
            self.validate(route)?;
        }
        let mut sent = 0;
        for route in table.iter() {
            self.live.set(route.output, route.input);
            self.send_route(route)?;
            sent += 1;
        }
        debug!("applied {table}: {sent} command(s)");
        if sent > 0 && self.policy.refreshes_automatically() && self.transport.is_connected() {
            self.refresh()?;
        }
        Ok(sent)
    }

    /// Makes `table` visible to the observer without touching the device.
    pub fn display_table(&mut self, table: &RoutingTable) {
        self.displayed = table.clone();
        if let Some(observer) = self.observer.as_mut() {
            observer.show_routing(table);
        }
    }

    // ── Emergency routing ─────────────────────────────────────────────────────

    /// Copies the live table into the emergency snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::EmergencyStoreDisabled`] if storing is not
    /// permitted; the snapshot is unchanged in that case.
    pub fn store(&mut self) -> Result<RoutingTable, RoutingError> {
        if !self.emergency_store {
            warn!("refusing to store emergency routing: disabled by configuration");
            return Err(RoutingError::EmergencyStoreDisabled);
        }
        self.snapshot = self.live.clone();
        info!("stored emergency routing {}", self.snapshot);
        let snapshot = self.snapshot.clone();
        self.apply_table(&snapshot)?;
        let live = self.live.clone();
        self.display_table(&live);
        Ok(snapshot)
    }

    /// Applies the emergency snapshot and displays the resulting live table.
    ///
    /// Outputs missing from the snapshot keep their current route.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Connection`] if a route cannot be written.
    pub fn restore(&mut self) -> Result<RoutingTable, RoutingError> {
        let snapshot = self.snapshot.clone();
        self.apply_table(&snapshot)?;
        let live = self.live.clone();
        self.display_table(&live);
        info!("restored emergency routing {snapshot}");
        Ok(live)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn live(&self) -> &RoutingTable {
        &self.live
    }

    /// The emergency routing.
    pub fn snapshot(&self) -> &RoutingTable {
        &self.snapshot
    }

    /// The table last handed to the observer.
    pub fn displayed(&self) -> &RoutingTable {
        &self.displayed
    }

    pub fn size(&self) -> MatrixSize {
        self.size
    }

    pub fn labels(&self) -> &MatrixLabels {
        &self.labels
    }

    /// Replaces both label sets at once.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Labels`] if either set does not match the
    /// matrix size; the labels are unchanged in that case.
    pub fn set_labels(&mut self, labels: MatrixLabels) -> Result<(), RoutingError> {
        labels.check_fits(self.size)?;
        self.labels = labels;
        Ok(())
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        self.policy
    }

    pub fn set_fetch_policy(&mut self, policy: FetchPolicy) {
        info!("fetch policy changed from {} to {policy}", self.policy);
        self.policy = policy;
    }

    pub fn emergency_store_allowed(&self) -> bool {
        self.emergency_store
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn validate(&self, route: Route) -> Result<(), RoutingError> {
        if !self.size.contains_output(route.output) {
            return Err(RoutingError::UnknownOutput {
                output: route.output,
                outputs: self.size.outputs(),
            });
        }
        if !self.size.contains_input(route.input) {
            return Err(RoutingError::UnknownInput {
                input: route.input,
                inputs: self.size.inputs(),
            });
        }
        Ok(())
    }

    fn send_route(&mut self, route: Route) -> Result<(), RoutingError> {
        let command = encode_route(route.input, route.output)?;
        self.transport.send(&command, Readback::None)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
