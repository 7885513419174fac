//! MatrixService: one worker thread, many callers.
//!
//! [`RoutingState`](super::routing_state::RoutingState) assumes a single
//! caller.  Every send has to finish and its reply be read before the next
//! command goes out, or the settle timing breaks and one command's readback
//! swallows another's reply.
//!
//! # How the queue works (for beginners)
//!
//! ```text
//! MatrixHandle ─┐
//! MatrixHandle ─┼── mpsc::Sender<Request> ──▶ "matrix-worker" thread ──▶ MatrixSession
//! MatrixHandle ─┘        (bounded, 32)          handles one request
//!       ▲                                        at a time
//!       └──────────── oneshot reply ◀────────────┘
//! ```
//!
//! The worker is a plain OS thread because the session blocks on the serial
//! line.  It pulls requests with `blocking_recv`, so async callers only ever
//! await the channel and never block a runtime thread themselves.

use dvimatrix_core::{FetchPolicy, MatrixLabels, MatrixSize, RoutingTable};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::routing_state::RoutingError;
use super::session::MatrixSession;
use crate::infrastructure::storage::ConfigError;

/// Number of requests that may wait in the queue.
const QUEUE_DEPTH: usize = 32;

/// Error type for calls through a [`MatrixHandle`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The worker has shut down.
    #[error("matrix worker is not running")]
    Stopped,

    #[error("cannot spawn matrix worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A consistent copy of the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixView {
    pub size: MatrixSize,
    pub labels: MatrixLabels,
    pub live: RoutingTable,
    pub emergency: RoutingTable,
    pub device: Option<String>,
    pub policy: FetchPolicy,
}

type Reply<T> = oneshot::Sender<T>;

enum Request {
    Connect {
        device: String,
        reply: Reply<Result<bool, RoutingError>>,
    },
    SetRoute {
        output: usize,
        input: usize,
        reply: Reply<Result<bool, RoutingError>>,
    },
    Refresh {
        reply: Reply<Result<RoutingTable, RoutingError>>,
    },
    Store {
        reply: Reply<Result<RoutingTable, RoutingError>>,
    },
    Restore {
        reply: Reply<Result<RoutingTable, RoutingError>>,
    },
    View {
        reply: Reply<MatrixView>,
    },
    Save {
        reply: Reply<Result<(), ConfigError>>,
    },
    Shutdown {
        save: bool,
        reply: Reply<Result<(), ConfigError>>,
    },
}

/// Spawns the worker that owns a [`MatrixSession`].
pub struct MatrixService;

impl MatrixService {
    /// Moves `session` onto a new worker thread.
    ///
    /// The worker stops after [`MatrixHandle::shutdown`] or once every handle
    /// has been dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Spawn`] if the OS refuses to create the thread.
    pub fn spawn(session: MatrixSession) -> Result<MatrixHandle, ServiceError> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        std::thread::Builder::new()
            .name("matrix-worker".to_string())
            .spawn(move || run(session, rx))
            .map_err(ServiceError::Spawn)?;
        Ok(MatrixHandle { tx })
    }
}

fn run(mut session: MatrixSession, mut rx: mpsc::Receiver<Request>) {
    info!("matrix worker started");
    while let Some(request) = rx.blocking_recv() {
        // A dropped reply receiver means the caller gave up; that is not an
        // error for the worker.
        match request {
            Request::Connect { device, reply } => {
                let _ = reply.send(session.state_mut().connect(&device));
            }
            Request::SetRoute {
                output,
                input,
                reply,
            } => {
                let _ = reply.send(session.state_mut().set_route(output, input));
            }
            Request::Refresh { reply } => {
                let _ = reply.send(session.state_mut().refresh());
            }
            Request::Store { reply } => {
                let _ = reply.send(session.state_mut().store());
            }
            Request::Restore { reply } => {
                let _ = reply.send(session.state_mut().restore());
            }
            Request::View { reply } => {
                let _ = reply.send(view(&session));
            }
            Request::Save { reply } => {
                let _ = reply.send(session.save());
            }
            Request::Shutdown { save, reply } => {
                let result = if save { session.save() } else { Ok(()) };
                let _ = reply.send(result);
                break;
            }
        }
    }
    session.state_mut().disconnect();
    info!("matrix worker stopped");
}

fn view(session: &MatrixSession) -> MatrixView {
    let state = session.state();
    MatrixView {
        size: state.size(),
        labels: state.labels().clone(),
        live: state.live().clone(),
        emergency: state.snapshot().clone(),
        device: state.current_device().map(str::to_string),
        policy: state.fetch_policy(),
    }
}

/// Cloneable async front of the worker.
#[derive(Debug, Clone)]
pub struct MatrixHandle {
    tx: mpsc::Sender<Request>,
}

impl MatrixHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ServiceError::Stopped)?;
        response.await.map_err(|_| ServiceError::Stopped)
    }

    pub async fn connect(&self, device: &str) -> Result<bool, ServiceError> {
        let device = device.to_string();
        debug!("queueing connect to {device}");
        Ok(self.call(|reply| Request::Connect { device, reply }).await??)
    }

    pub async fn set_route(&self, output: usize, input: usize) -> Result<bool, ServiceError> {
        Ok(self
            .call(|reply| Request::SetRoute {
                output,
                input,
                reply,
            })
            .await??)
    }

    pub async fn refresh(&self) -> Result<RoutingTable, ServiceError> {
        Ok(self.call(|reply| Request::Refresh { reply }).await??)
    }

    pub async fn store(&self) -> Result<RoutingTable, ServiceError> {
        Ok(self.call(|reply| Request::Store { reply }).await??)
    }

    pub async fn restore(&self) -> Result<RoutingTable, ServiceError> {
        Ok(self.call(|reply| Request::Restore { reply }).await??)
    }

    pub async fn view(&self) -> Result<MatrixView, ServiceError> {
        self.call(|reply| Request::View { reply }).await
    }

    pub async fn current_device(&self) -> Result<Option<String>, ServiceError> {
        Ok(self.view().await?.device)
    }

    pub async fn routing(&self) -> Result<RoutingTable, ServiceError> {
        Ok(self.view().await?.live)
    }

    pub async fn labels(&self) -> Result<MatrixLabels, ServiceError> {
        Ok(self.view().await?.labels)
    }

    pub async fn save(&self) -> Result<(), ServiceError> {
        Ok(self.call(|reply| Request::Save { reply }).await??)
    }

    /// Stops the worker, saving the configuration first when `save` is set.
    ///
    /// Requests queued before the shutdown are still handled; later calls
    /// on any handle fail with [`ServiceError::Stopped`].
    pub async fn shutdown(&self, save: bool) -> Result<(), ServiceError> {
        Ok(self.call(|reply| Request::Shutdown { save, reply }).await??)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
