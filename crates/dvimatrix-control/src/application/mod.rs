//! Application layer: use cases built on the core and the infrastructure.
//!
//! - [`routing_state`] – keeps the cached routing table in step with the
//!   device according to the fetch policy.
//! - [`session`] – turns a loaded config into a running routing state and
//!   writes it back.
//! - [`service`] – serializes many async callers onto one worker thread.

pub mod routing_state;
pub mod service;
pub mod session;

pub use routing_state::{RoutingError, RoutingObserver, RoutingSeed, RoutingState};
pub use service::{MatrixHandle, MatrixService, MatrixView, ServiceError};
pub use session::{MatrixSession, SessionError, SessionOptions, StartupReport};
