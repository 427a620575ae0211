//! Common utilities shared by the controller, the session and the console

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
