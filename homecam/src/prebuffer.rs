//! Continuous per-camera capture with a time-windowed backlog.
//!
//! One prebuffer per camera runs independently of any viewer: a copy-mode
//! transcoder pushes the camera's stream to a loopback socket, the
//! ingestion task decodes it into atoms, and a rolling window of fragments
//! is retained so a triggered recording can reach back before its trigger.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fmp4::{Atom, AtomReader};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CameraConfig;
use crate::error::Result;
use crate::transcoder::{ContainerListener, copy_capture_args, runner};

/// Live-delivery slack on top of a subscriber's replayed backlog.
const SUBSCRIBER_CHANNEL_SLACK: usize = 256;

/// One retained post-initialization atom.
#[derive(Debug, Clone)]
pub struct BufferedAtom {
    pub atom: Atom,
    pub observed_at: Instant,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Atom>,
}

#[derive(Default)]
struct SharedState {
    ftyp: Option<Atom>,
    moov: Option<Atom>,
    fragments: VecDeque<BufferedAtom>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
    released: bool,
}

impl SharedState {
    /// Accept one decoded atom from the ingestion loop.
    ///
    /// The first two unseen atoms become the init segments; everything
    /// after appends to the window (evicting expired fragments) and is
    /// broadcast to live subscribers. Only the ingestion loop calls this,
    /// so append, eviction, and broadcast are atomic relative to one
    /// loop iteration.
    fn ingest(&mut self, atom: Atom, now: Instant, window: Duration) {
        if self.ftyp.is_none() {
            debug!(atom = %atom, "captured init atom");
            self.ftyp = Some(atom);
            return;
        }
        if self.moov.is_none() {
            debug!(atom = %atom, "captured init atom");
            self.moov = Some(atom);
            return;
        }

        self.fragments.push_back(BufferedAtom {
            atom: atom.clone(),
            observed_at: now,
        });
        while let Some(front) = self.fragments.front() {
            if now.duration_since(front.observed_at) > window {
                self.fragments.pop_front();
            } else {
                break;
            }
        }

        self.subscribers.retain(|sub| match sub.tx.try_send(atom.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = sub.id, "subscriber lagging, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Handle to the running capture behind a prebuffer.
///
/// `PreBuffer::stop` never tears the subprocess down synchronously; the
/// caller owns teardown through this handle.
pub struct PreBufferSession {
    token: CancellationToken,
}

impl PreBufferSession {
    pub fn is_alive(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stop the capture: the exit watcher applies the standard grace policy.
    pub fn stop(&self) {
        self.token.cancel();
    }
}

/// Time-windowed circular buffer over a camera's continuous capture.
pub struct PreBuffer {
    camera: CameraConfig,
    window: Duration,
    state: Arc<Mutex<SharedState>>,
    session: Mutex<Option<Arc<PreBufferSession>>>,
}

impl PreBuffer {
    pub fn new(camera: CameraConfig) -> Self {
        let window = camera.prebuffer.window();
        Self {
            camera,
            window,
            state: Arc::new(Mutex::new(SharedState::default())),
            session: Mutex::new(None),
        }
    }

    pub fn camera_name(&self) -> &str {
        &self.camera.name
    }

    /// Start the continuous capture. Idempotent: if a capture is already
    /// running its session handle is returned instead of spawning again.
    pub async fn start(&self) -> Result<Arc<PreBufferSession>> {
        {
            let session = self.session.lock();
            if let Some(existing) = session.as_ref()
                && existing.is_alive()
            {
                return Ok(existing.clone());
            }
        }

        let listener = ContainerListener::bind().await?;
        let args = copy_capture_args(&self.camera, listener.port());
        let token = CancellationToken::new();
        let process = runner::spawn(&self.camera.transcoder_path, &args, token.clone(), false)?;

        info!(camera = %self.camera.name, port = listener.port(), "prebuffer capture started");

        let state = self.state.clone();
        let window = self.window;
        let camera_name = self.camera.name.clone();
        let ingest_token = token.clone();
        tokio::spawn(async move {
            let connection = match listener.accept_transcoder(&ingest_token).await {
                Ok(connection) => connection,
                Err(e) => {
                    error!(camera = %camera_name, error = %e, "transcoder never connected");
                    let _ = process.stop().await;
                    return;
                }
            };

            let mut reader = AtomReader::new(connection);
            loop {
                tokio::select! {
                    _ = ingest_token.cancelled() => break,
                    atom = reader.read_atom() => match atom {
                        Ok(Some(atom)) => {
                            state.lock().ingest(atom, Instant::now(), window);
                        }
                        Ok(None) => {
                            info!(camera = %camera_name, "container stream ended");
                            break;
                        }
                        Err(e) => {
                            // terminal for this capture only; sibling
                            // cameras and sessions are unaffected
                            error!(camera = %camera_name, error = %e, "ingestion failed");
                            break;
                        }
                    }
                }
            }
            // teardown order: ingestion stopped, then socket, then subprocess
            drop(reader);
            let _ = process.stop().await;
        });

        let session = Arc::new(PreBufferSession { token });
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    /// Open a delivery channel over the retained backlog plus live atoms.
    ///
    /// The preamble is `ftyp` then `moov` (once captured), followed by
    /// every retained fragment newer than `now - requested_window` starting
    /// at the first `moof` boundary, fully drained into the channel before
    /// the subscriber goes live. After `stop()` the returned channel is
    /// already closed and delivers nothing.
    pub fn subscribe(&self, requested_window: Duration) -> mpsc::Receiver<Atom> {
        let mut state = self.state.lock();
        let now = Instant::now();

        let replay: Vec<Atom> = {
            let mut at_boundary = false;
            state
                .fragments
                .iter()
                .filter(|buffered| now.duration_since(buffered.observed_at) <= requested_window)
                .filter(|buffered| {
                    // emitting trailing data from a previous fragment would
                    // produce an undecodable stream
                    at_boundary = at_boundary || buffered.atom.is_fourcc(b"moof");
                    at_boundary
                })
                .map(|buffered| buffered.atom.clone())
                .collect()
        };

        let (tx, rx) = mpsc::channel(replay.len() + 2 + SUBSCRIBER_CHANNEL_SLACK);
        if state.released {
            debug!(camera = %self.camera.name, "subscribe after stop, delivering nothing");
            return rx;
        }

        if let Some(ftyp) = &state.ftyp {
            let _ = tx.try_send(ftyp.clone());
        }
        if let Some(moov) = &state.moov {
            let _ = tx.try_send(moov.clone());
        }
        for atom in replay {
            let _ = tx.try_send(atom);
        }

        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.push(Subscriber { id, tx });
        debug!(camera = %self.camera.name, subscriber = id, "subscriber attached");

        rx
    }

    /// Signal all subscribers to terminate and mark the buffer released.
    ///
    /// The subprocess is not killed here; teardown is owned by the session
    /// handle `start()` returned.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.released = true;
        state.subscribers.clear();
        info!(camera = %self.camera.name, "prebuffer released");
    }

    /// Number of fragments currently retained.
    pub fn retained_len(&self) -> usize {
        self.state.lock().fragments.len()
    }

    #[cfg(test)]
    fn ingest_at(&self, atom: Atom, observed_at: Instant) {
        self.state.lock().ingest(atom, observed_at, self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn camera() -> CameraConfig {
        serde_json::from_str(r#"{"name": "porch", "source": "rtsp://10.0.0.2/cam1"}"#).unwrap()
    }

    fn atom(fourcc: &[u8; 4]) -> Atom {
        Atom::build(*fourcc, Bytes::from_static(&[0xAA; 4]))
    }

    fn fill_init(buffer: &PreBuffer) {
        buffer.ingest_at(atom(b"ftyp"), Instant::now());
        buffer.ingest_at(atom(b"moov"), Instant::now());
    }

    #[tokio::test]
    async fn test_first_two_atoms_become_init_segments() {
        let buffer = PreBuffer::new(camera());
        fill_init(&buffer);
        buffer.ingest_at(atom(b"moof"), Instant::now());
        buffer.ingest_at(atom(b"mdat"), Instant::now());

        // init atoms are not part of the window
        assert_eq!(buffer.retained_len(), 2);

        let mut rx = buffer.subscribe(Duration::from_secs(15));
        assert!(rx.recv().await.unwrap().is_fourcc(b"ftyp"));
        assert!(rx.recv().await.unwrap().is_fourcc(b"moov"));
        assert!(rx.recv().await.unwrap().is_fourcc(b"moof"));
        assert!(rx.recv().await.unwrap().is_fourcc(b"mdat"));
    }

    #[tokio::test]
    async fn test_expired_fragments_are_evicted_on_append() {
        let buffer = PreBuffer::new(camera());
        fill_init(&buffer);

        let stale = Instant::now() - Duration::from_secs(60);
        buffer.ingest_at(atom(b"moof"), stale);
        buffer.ingest_at(atom(b"mdat"), stale);
        assert_eq!(buffer.retained_len(), 2);

        // a fresh append evicts everything outside the window
        buffer.ingest_at(atom(b"moof"), Instant::now());
        assert_eq!(buffer.retained_len(), 1);
    }

    #[tokio::test]
    async fn test_replay_skips_to_first_fragment_boundary() {
        let buffer = PreBuffer::new(camera());
        fill_init(&buffer);

        // trailing mdat of a fragment whose moof already fell out
        buffer.ingest_at(atom(b"mdat"), Instant::now());
        buffer.ingest_at(atom(b"moof"), Instant::now());
        buffer.ingest_at(atom(b"mdat"), Instant::now());

        let mut rx = buffer.subscribe(Duration::from_secs(15));
        assert!(rx.recv().await.unwrap().is_fourcc(b"ftyp"));
        assert!(rx.recv().await.unwrap().is_fourcc(b"moov"));
        // the orphaned mdat is skipped: first replayed fragment is a moof
        assert!(rx.recv().await.unwrap().is_fourcc(b"moof"));
        assert!(rx.recv().await.unwrap().is_fourcc(b"mdat"));
    }

    #[tokio::test]
    async fn test_subscriber_receives_live_broadcast_after_replay() {
        let buffer = PreBuffer::new(camera());
        fill_init(&buffer);
        buffer.ingest_at(atom(b"moof"), Instant::now());

        let mut rx = buffer.subscribe(Duration::from_secs(15));
        buffer.ingest_at(atom(b"mdat"), Instant::now());

        // replayed backlog is fully drained before live atoms
        assert!(rx.recv().await.unwrap().is_fourcc(b"ftyp"));
        assert!(rx.recv().await.unwrap().is_fourcc(b"moov"));
        assert!(rx.recv().await.unwrap().is_fourcc(b"moof"));
        assert!(rx.recv().await.unwrap().is_fourcc(b"mdat"));
    }

    #[tokio::test]
    async fn test_requested_window_narrows_replay() {
        let buffer = PreBuffer::new(camera());
        fill_init(&buffer);

        buffer.ingest_at(atom(b"moof"), Instant::now() - Duration::from_secs(10));
        buffer.ingest_at(atom(b"moof"), Instant::now());

        let mut rx = buffer.subscribe(Duration::from_secs(2));
        assert!(rx.recv().await.unwrap().is_fourcc(b"ftyp"));
        assert!(rx.recv().await.unwrap().is_fourcc(b"moov"));
        // only the fragment inside the requested window is replayed
        assert!(rx.recv().await.unwrap().is_fourcc(b"moof"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_closes_existing_and_future_subscribers() {
        let buffer = PreBuffer::new(camera());
        fill_init(&buffer);
        buffer.ingest_at(atom(b"moof"), Instant::now());

        let mut live = buffer.subscribe(Duration::from_secs(15));
        // drain the replayed preamble + backlog
        for _ in 0..3 {
            live.recv().await.unwrap();
        }

        buffer.stop();
        buffer.ingest_at(atom(b"mdat"), Instant::now());
        assert!(live.recv().await.is_none());

        let mut after = buffer.subscribe(Duration::from_secs(15));
        buffer.ingest_at(atom(b"moof"), Instant::now());
        assert!(after.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_subscriber_before_init_capture_gets_atoms_once_set() {
        let buffer = PreBuffer::new(camera());
        let mut rx = buffer.subscribe(Duration::from_secs(15));

        fill_init(&buffer);
        buffer.ingest_at(atom(b"moof"), Instant::now());

        // init atoms are captured, not broadcast; the fragment arrives live
        assert!(rx.recv().await.unwrap().is_fourcc(b"moof"));
    }
}
