//! # dvimatrix-control
//!
//! Controller for the DVImatrix848 crosspoint switcher: the serial transport,
//! the JSON configuration store, and the routing use cases that keep the
//! device and the cached routing table in step.
//!
//! # Layers (for beginners)
//!
//! ```text
//! main.rs (CLI)
//!    │
//! application/      RoutingState, MatrixSession, MatrixService
//!    │
//! infrastructure/   serial (Transport, serialport link) · storage (setup.json)
//!    │
//! dvimatrix-core    codec, RoutingTable, FetchPolicy, labels
//! ```
//!
//! The library is split from the binary so integration tests under `tests/`
//! can drive the whole stack against a simulated switcher.

pub mod application;
pub mod infrastructure;
