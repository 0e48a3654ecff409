use rand::RngExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Ephemeral port range the container transport binds in.
const PORT_RANGE: std::ops::Range<u16> = 40_000..60_000;

/// Bind attempts before giving up.
const BIND_ATTEMPTS: usize = 10;

/// Loopback listener the transcoder pushes its container output to.
///
/// The subprocess is configured to connect exactly once; everything after
/// the accept is a continuous fragmented-container byte stream.
pub struct ContainerListener {
    listener: TcpListener,
    port: u16,
}

impl ContainerListener {
    /// Bind on a random high port, retrying on bind failure.
    pub async fn bind() -> Result<Self> {
        let mut last_err = None;
        for _ in 0..BIND_ATTEMPTS {
            let port = rand::rng().random_range(PORT_RANGE);
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => return Ok(Self { listener, port }),
                Err(e) => {
                    debug!(port, error = %e, "bind failed, retrying on another port");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.map(Error::Io).unwrap_or_else(|| {
            Error::Other("no bind attempts were made".to_string())
        }))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Destination URL handed to the transcoder.
    pub fn url(&self) -> String {
        format!("tcp://127.0.0.1:{}", self.port)
    }

    /// Accept the single connection the transcoder makes.
    pub async fn accept_transcoder(self, token: &CancellationToken) -> Result<TcpStream> {
        tokio::select! {
            _ = token.cancelled() => Err(Error::Other(
                "cancelled while waiting for transcoder connection".to_string(),
            )),
            accepted = self.listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, port = self.port, "transcoder connected");
                Ok(stream)
            }
        }
    }
}
