//! homecam library crate.
//!
//! Streams and records networked cameras into a home-automation accessory
//! platform: continuous prebuffered capture, per-viewer live encodes, and
//! motion-triggered recording streams.

pub mod config;
pub mod error;
pub mod logging;
pub mod prebuffer;
pub mod registry;
pub mod session;
pub mod transcoder;

pub use error::{Error, Result};
