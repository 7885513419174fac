//! MatrixSession: startup and shutdown around one [`RoutingState`].
//!
//! Data flows in a circle:
//!
//! ```text
//! setup.json ──load──▶ MatrixSession::start ──▶ RoutingState ⇄ Transport ⇄ device
//!      ▲                                              │
//!      └───────────────save◀──────────────────────────┘
//! ```
//!
//! Startup never fails because of the device.  An unreachable port, or a
//! route that cannot be written, is reported in the [`StartupReport`] and the
//! session carries on disconnected.  Only an unsupported matrix size stops it.

use std::path::{Path, PathBuf};

use dvimatrix_core::{FetchPolicy, SizeError};
use thiserror::Error;
use tracing::{error, info, warn};

use super::routing_state::{RoutingError, RoutingSeed, RoutingState};
use crate::infrastructure::serial::Transport;
use crate::infrastructure::storage::config::{
    self, ConfigError, ConfigWarning, LoadedConfig, MatrixConfig, SerialConfig,
};

/// Error type for session startup.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unsupported matrix size: {0}")]
    Size(#[from] SizeError),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Port to connect to; replaces `serial.port` from the file.
    pub port: Option<String>,
    /// Fetch policy; replaces `generic.fetchstate` from the file.
    pub fetch_policy: Option<FetchPolicy>,
    /// Apply the emergency routing once started.
    pub restore: bool,
}

/// What happened during [`MatrixSession::start`].
#[derive(Debug, Default)]
pub struct StartupReport {
    /// Defaulting decisions taken while loading the config.
    pub warnings: Vec<ConfigWarning>,
    /// The connected device, if the connection succeeded.
    pub device: Option<String>,
    /// Non-fatal failures (connection, writes) during startup.
    pub errors: Vec<RoutingError>,
}

/// A running controller bound to one config file.
pub struct MatrixSession {
    state: RoutingState,
    config_path: PathBuf,
    configured_port: Option<String>,
}

impl MatrixSession {
    /// Builds the routing state from `loaded` and brings the device in line.
    ///
    /// 1. The matrix size follows from the label counts.
    /// 2. The fetch policy from `options` wins over the file.
    /// 3. The port from `options` wins over `serial.port`.
    /// 4. Under an automatic policy the config table is cached first and the
    ///    connect-triggered refresh re-applies whatever the device got wrong.
    ///    Otherwise the port is opened and the config table is applied.
    /// 5. With `options.restore` the emergency routing is applied last.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Size`] if the labels describe a matrix the
    /// protocol cannot address.
    pub fn start(
        loaded: LoadedConfig,
        config_path: impl Into<PathBuf>,
        mut transport: Transport,
        options: SessionOptions,
    ) -> Result<(Self, StartupReport), SessionError> {
        let LoadedConfig { config, warnings } = loaded;
        let size = config.labels.size()?;
        let policy = options.fetch_policy.unwrap_or(config.fetch_policy);
        info!("starting {size} matrix, fetch policy {policy}");
        transport.set_settle_interval(config.serial.settle_interval);

        let (matrix, dropped) = config.matrix.partition_by_size(size);
        for route in dropped {
            warn!("ignoring configured route {route} outside the {size} matrix");
        }

        let seed = RoutingSeed {
            size,
            labels: config.labels,
            snapshot: config.default_matrix,
            policy,
            emergency_store: config.emergency_store,
        };
        let mut state = RoutingState::new(seed, transport)?;
        let mut errors = Vec::new();
        let port = options.port.or(config.serial.port);

        if policy.refreshes_automatically() {
            record(&mut errors, state.apply_table(&matrix).map(drop));
            connect(&mut state, port.as_deref(), &mut errors);
        } else {
            connect(&mut state, port.as_deref(), &mut errors);
            info!("using configured routing {matrix}");
            record(&mut errors, state.apply_table(&matrix).map(drop));
        }
        let live = state.live().clone();
        state.display_table(&live);

        if options.restore {
            record(&mut errors, state.restore().map(drop));
        }

        let report = StartupReport {
            warnings,
            device: state.current_device().map(str::to_string),
            errors,
        };
        let session = Self {
            state,
            config_path: config_path.into(),
            configured_port: port,
        };
        Ok((session, report))
    }

    pub fn state(&self) -> &RoutingState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RoutingState {
        &mut self.state
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// The config that [`save`](Self::save) would write.
    ///
    /// The port is the connected device, or the configured port while
    /// disconnected so that a save never erases it.
    pub fn snapshot_config(&self) -> MatrixConfig {
        let state = &self.state;
        MatrixConfig {
            labels: state.labels().clone(),
            serial: SerialConfig {
                port: state
                    .current_device()
                    .map(str::to_string)
                    .or_else(|| self.configured_port.clone()),
                settle_interval: state.transport().settle_interval(),
            },
            fetch_policy: state.fetch_policy(),
            emergency_store: state.emergency_store_allowed(),
            matrix: state.live().clone(),
            default_matrix: state.snapshot().clone(),
        }
    }

    /// Writes the current state to the config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be written.
    pub fn save(&self) -> Result<(), ConfigError> {
        config::save(&self.config_path, &self.snapshot_config())
    }
}

fn connect(state: &mut RoutingState, port: Option<&str>, errors: &mut Vec<RoutingError>) {
    match port {
        Some(port) => record(errors, state.connect(port).map(drop)),
        None => warn!("no serial port configured; running disconnected"),
    }
}

fn record(errors: &mut Vec<RoutingError>, result: Result<(), RoutingError>) {
    if let Err(e) = result {
        error!("{e}");
        errors.push(e);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
