//! Streaming camera event protocol parsing and dispatch.
//!
//! Network cameras push detection events as a never-ending multipart text
//! response. This crate extracts discrete [`MotionEvent`]s from that stream
//! ([`EventStreamParser`]), fans them out to per-channel listeners
//! ([`MotionListenerRegistry`]), and keeps the long-lived connection fed
//! ([`EventStream`]).

pub mod event;
pub mod parser;
pub mod registry;
pub mod stream;

pub use event::{EventKind, MotionEvent};
pub use parser::EventStreamParser;
pub use registry::MotionListenerRegistry;
pub use stream::{EventStream, EventStreamError};
