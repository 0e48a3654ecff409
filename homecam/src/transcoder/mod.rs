//! Transcoder subprocess plumbing: argument construction, process
//! lifecycle, and the loopback socket the container stream arrives on.

pub mod command;
pub mod runner;
pub mod socket;

pub use command::{copy_capture_args, live_encode_args, recording_encode_args};
pub use runner::TranscoderProcess;
pub use socket::ContainerListener;
