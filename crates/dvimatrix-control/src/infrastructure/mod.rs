//! Infrastructure layer: adapters to the outside world.
//!
//! - [`serial`] – the RS-232 link to the switcher and the settle-delay
//!   transport on top of it.
//! - [`storage`] – the JSON configuration file.

pub mod serial;
pub mod storage;
