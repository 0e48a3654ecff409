use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::parser::EventStreamParser;
use crate::registry::MotionListenerRegistry;

#[derive(Error, Debug)]
pub enum EventStreamError {
    #[error("event endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Long-lived attachment to a camera's event endpoint.
///
/// The endpoint answers with a multipart text response that never ends;
/// chunks are fed to the parser as they arrive and completed events are
/// dispatched through the registry.
pub struct EventStream {
    url: String,
    client: reqwest::Client,
}

impl EventStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Consume the event response until the peer closes or the token fires.
    pub async fn run(
        &self,
        registry: Arc<MotionListenerRegistry>,
        token: CancellationToken,
    ) -> Result<(), EventStreamError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;

        info!(url = %self.url, "attached to event stream");

        let mut body = response.bytes_stream();
        let mut parser = EventStreamParser::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(url = %self.url, "event stream cancelled");
                    return Ok(());
                }
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes);
                        for event in parser.push_chunk(&text) {
                            debug!(channel = event.channel, kind = %event.kind, active = event.active, "motion event");
                            registry.dispatch(&event);
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        info!(url = %self.url, "event stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}
