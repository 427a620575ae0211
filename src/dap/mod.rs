//! Debug Adapter Protocol (DAP) data types
//!
//! The session speaks in DAP-shaped events and views so any front-end that
//! frames them onto the wire can forward them unchanged.

pub mod types;

pub use types::*;
