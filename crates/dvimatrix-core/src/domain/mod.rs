//! Domain entities for the matrix controller.
//!
//! This module contains pure data types with no infrastructure dependencies.
//!
//! # What lives here? (for beginners)
//!
//! - [`routing`] – the matrix dimensions and the routing table that maps each
//!   output to the input it currently shows.
//! - [`policy`] – the fetch policy deciding when the device is asked for its
//!   state instead of trusting the local cache.
//! - [`labels`] – the human-readable names of every input and output.
//!
//! Code in outer layers (transport, storage, presentation) depends on these
//! types, but the domain never depends on them.

pub mod labels;
pub mod policy;
pub mod routing;
