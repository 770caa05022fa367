//! Common utilities for the USB channel multiplexer
//!
//! Shared between the multiplexer core and the command-line front end:
//! error handling, logging setup, and test fixtures.

pub mod error;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;
