//! # dvimatrix-core
//!
//! Shared library for the DVImatrix848 controller containing the serial wire
//! protocol codec and the routing domain types.
//!
//! This crate performs no I/O.  It has zero dependencies on serial ports, the
//! file system, or any presentation layer, so every function here can be unit
//! tested in isolation.
//!
//! # Architecture overview (for beginners)
//!
//! The DVImatrix848 is a hardware crosspoint switcher: N DVI inputs can be
//! routed to M DVI outputs, and each output shows exactly one input at a time.
//! The device is controlled over an RS-232 link using short ASCII commands.
//!
//! This crate (`dvimatrix-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the serial link.  A route command
//!   is a letter (the output) followed by a number (the input) and a carriage
//!   return; the status query `m\r` returns one text line per output.
//!
//! - **`domain`** – Pure data types: the matrix dimensions, the routing table
//!   (output → input), the fetch policy that decides when the device is
//!   queried, and the display labels of inputs and outputs.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `dvimatrix_core::RoutingTable` instead of `dvimatrix_core::domain::routing::RoutingTable`.
pub use domain::labels::{LabelError, LabelSet, MatrixLabels};
pub use domain::policy::FetchPolicy;
pub use domain::routing::{MatrixSize, Route, RoutingTable, SizeError};
pub use protocol::codec::{
    decode_status_response, encode_route, encode_status_query, ProtocolError,
};
