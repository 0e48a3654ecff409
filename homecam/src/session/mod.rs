//! Viewer and recording session management.

pub mod live;
pub mod recording;

/// Lifecycle of a live or recording session.
///
/// Pending holds negotiated transport parameters but no process; becoming
/// Active binds exactly one transcoder subprocess; Closed has released the
/// process and sockets and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Active => write!(f, "Active"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
