//! Trigger-driven recording streams.
//!
//! On trigger, a recording stream composes the prebuffer backlog (or a
//! fresh capture) into a gap-free sequence of container fragments for the
//! host platform to persist: one initialization fragment, then one packet
//! per `moof`+`mdat` pair.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use fmp4::{Atom, AtomReader};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CameraConfig;
use crate::error::{Error, Result};
use crate::prebuffer::PreBuffer;
use crate::transcoder::command::RecordingInput;
use crate::transcoder::{ContainerListener, recording_encode_args, runner};

/// Target codec for recording encodes, supplied by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingCodec {
    H264,
    H265,
}

impl RecordingCodec {
    pub fn codec_name(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingProfile {
    Baseline,
    Main,
    High,
}

impl RecordingProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Main => "main",
            Self::High => "high",
        }
    }
}

/// Encode parameters negotiated by the host platform for recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfiguration {
    pub codec: RecordingCodec,
    pub profile: RecordingProfile,
    pub level: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    /// Target duration of one media fragment.
    pub fragment_ms: u64,
}

/// One yielded unit of a recording stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingPacket {
    pub data: Bytes,
    pub is_last: bool,
}

/// Reason code supplied by the host when closing a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    Cancelled,
    Error,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error => write!(f, "error"),
        }
    }
}

enum StreamSource {
    /// Replay the prebuffer backlog with the configured look-back, then live.
    PreBuffer(Arc<PreBuffer>),
    /// Fresh direct capture from the camera.
    Direct(String),
}

/// Manager for all triggered recording streams of one camera.
pub struct RecordingSessionManager {
    camera: CameraConfig,
    prebuffer: Option<Arc<PreBuffer>>,
    recording_active: AtomicBool,
    configuration: Mutex<Option<RecordingConfiguration>>,
    streams: DashMap<u32, CancellationToken>,
}

impl RecordingSessionManager {
    pub fn new(camera: CameraConfig, prebuffer: Option<Arc<PreBuffer>>) -> Self {
        Self {
            camera,
            prebuffer,
            recording_active: AtomicBool::new(false),
            configuration: Mutex::new(None),
            streams: DashMap::new(),
        }
    }

    pub fn update_recording_active(&self, active: bool) {
        self.recording_active.store(active, Ordering::SeqCst);
        info!(camera = %self.camera.name, active, "recording active state updated");
    }

    pub fn is_recording_active(&self) -> bool {
        self.recording_active.load(Ordering::SeqCst)
    }

    pub fn update_recording_configuration(&self, config: Option<RecordingConfiguration>) {
        match &config {
            Some(c) => info!(
                camera = %self.camera.name,
                width = c.width,
                height = c.height,
                bitrate_kbps = c.bitrate_kbps,
                "recording configuration updated"
            ),
            None => info!(camera = %self.camera.name, "recording configuration cleared"),
        }
        *self.configuration.lock() = config;
    }

    /// Open a fragment stream for the given recording-stream id.
    ///
    /// Fails before any process spawns when no recording configuration has
    /// been negotiated or no capture source is available. The receiver
    /// always ends with a zero-length `is_last` packet, on failure too, so
    /// the host can close cleanly instead of hanging.
    pub fn stream_fragments(&self, stream_id: u32) -> Result<mpsc::Receiver<RecordingPacket>> {
        let config = self
            .configuration
            .lock()
            .clone()
            .ok_or_else(|| Error::config("no recording configuration negotiated"))?;
        let source = self.select_source()?;

        if !self.is_recording_active() {
            warn!(
                camera = %self.camera.name,
                stream = stream_id,
                "fragment stream requested while recording is inactive"
            );
        }

        let token = CancellationToken::new();
        self.streams.insert(stream_id, token.clone());

        let (tx, rx) = mpsc::channel(4);
        let camera = self.camera.clone();
        tokio::spawn(async move {
            match pump_fragments(&camera, &config, source, &token, &tx).await {
                Ok(()) => info!(camera = %camera.name, stream = stream_id, "recording stream ended"),
                Err(e) => {
                    error!(camera = %camera.name, stream = stream_id, error = %e, "recording stream failed")
                }
            }
            // terminal marker so the consumer can close instead of hanging
            let _ = tx
                .send(RecordingPacket {
                    data: Bytes::new(),
                    is_last: true,
                })
                .await;
            token.cancel();
        });

        Ok(rx)
    }

    /// Abort the stream's yielding loop at its next yield point.
    ///
    /// Closing an unknown stream id is a no-op.
    pub fn close_stream(&self, stream_id: u32, reason: CloseReason) {
        match self.streams.remove(&stream_id) {
            Some((_, token)) => {
                info!(camera = %self.camera.name, stream = stream_id, %reason, "closing recording stream");
                token.cancel();
            }
            None => debug!(stream = stream_id, "close for unknown stream, ignoring"),
        }
    }

    fn select_source(&self) -> Result<StreamSource> {
        if self.camera.prebuffer.enabled {
            return self
                .prebuffer
                .clone()
                .map(StreamSource::PreBuffer)
                .ok_or_else(|| {
                    Error::source_misconfigured("prebuffering enabled but no prebuffer attached")
                });
        }
        if !self.camera.source.is_empty() {
            return Ok(StreamSource::Direct(self.camera.source.clone()));
        }
        Err(Error::source_misconfigured(
            "neither prebuffer nor direct capture is available",
        ))
    }
}

async fn pump_fragments(
    camera: &CameraConfig,
    config: &RecordingConfiguration,
    source: StreamSource,
    token: &CancellationToken,
    tx: &mpsc::Sender<RecordingPacket>,
) -> Result<()> {
    let listener = ContainerListener::bind().await?;

    let (input, backlog) = match &source {
        StreamSource::PreBuffer(prebuffer) => (
            RecordingInput::Stdin,
            Some(prebuffer.subscribe(camera.prebuffer.lookback())),
        ),
        StreamSource::Direct(url) => (RecordingInput::Direct(url), None),
    };

    let args = recording_encode_args(camera, config, input, listener.port());
    let mut process = runner::spawn(
        &camera.transcoder_path,
        &args,
        token.clone(),
        backlog.is_some(),
    )?;

    if let Some(mut atoms) = backlog {
        let Some(mut stdin) = process.take_stdin() else {
            return Err(Error::Other("transcoder stdin unavailable".to_string()));
        };
        let feeder_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = feeder_token.cancelled() => break,
                    atom = atoms.recv() => match atom {
                        Some(atom) => {
                            if stdin.write_all(&atom.total_bytes()).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            // dropping stdin signals end of input to the transcoder
        });
    }

    let connection = listener.accept_transcoder(token).await?;
    let mut reader = AtomReader::new(connection);
    let mut assembler = FragmentAssembler::default();

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(camera = %camera.name, "recording stream cancelled");
                break;
            }
            atom = reader.read_atom() => match atom {
                Ok(Some(atom)) => {
                    if let Some(data) = assembler.push(atom)
                        && tx
                            .send(RecordingPacket {
                                data,
                                is_last: false,
                            })
                            .await
                            .is_err()
                    {
                        debug!(camera = %camera.name, "recording consumer went away");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(e.into()),
            }
        }
    }

    drop(reader);
    if let Some(code) = process.stop().await
        && code != 0
    {
        return Err(Error::ProcessExit { code: Some(code) });
    }

    Ok(())
}

/// Pairs decoded atoms into the packets a recording stream yields.
///
/// The initialization fragment concatenates `ftyp` and `moov`; every media
/// fragment concatenates a `moof` with its immediately following `mdat`.
/// A `moof` with no `mdat` before the next `moof` is an incomplete
/// fragment and is discarded silently.
#[derive(Default)]
struct FragmentAssembler {
    ftyp: Option<Atom>,
    pending_moof: Option<Atom>,
}

impl FragmentAssembler {
    fn push(&mut self, atom: Atom) -> Option<Bytes> {
        let fourcc = atom.fourcc;
        match &fourcc {
            b"ftyp" => {
                self.ftyp = Some(atom);
                None
            }
            b"moov" => self.ftyp.take().map(|ftyp| concat_atoms(&ftyp, &atom)),
            b"moof" => {
                if let Some(dropped) = self.pending_moof.replace(atom) {
                    debug!(atom = %dropped, "discarding fragment header without media data");
                }
                None
            }
            b"mdat" => self.pending_moof.take().map(|moof| concat_atoms(&moof, &atom)),
            _ => {
                debug!(atom = %atom, "skipping atom outside fragment structure");
                None
            }
        }
    }
}

fn concat_atoms(first: &Atom, second: &Atom) -> Bytes {
    let mut out = BytesMut::with_capacity(first.size() + second.size());
    out.put_slice(&first.header);
    out.put_slice(&first.data);
    out.put_slice(&second.header);
    out.put_slice(&second.data);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(fourcc: &[u8; 4], payload: u8) -> Atom {
        Atom::build(*fourcc, vec![payload; 4])
    }

    fn camera_without_sources() -> CameraConfig {
        let mut camera: CameraConfig =
            serde_json::from_str(r#"{"name": "porch", "source": ""}"#).unwrap();
        camera.prebuffer.enabled = false;
        camera
    }

    fn recording_config() -> RecordingConfiguration {
        RecordingConfiguration {
            codec: RecordingCodec::H264,
            profile: RecordingProfile::Main,
            level: "4.0".to_string(),
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate_kbps: 4000,
            fragment_ms: 4000,
        }
    }

    #[test]
    fn test_assembler_concatenates_init_fragment() {
        let mut assembler = FragmentAssembler::default();
        assert!(assembler.push(atom(b"ftyp", 1)).is_none());
        let init = assembler.push(atom(b"moov", 2)).unwrap();

        let ftyp = atom(b"ftyp", 1);
        let moov = atom(b"moov", 2);
        let mut expected = ftyp.total_bytes().to_vec();
        expected.extend_from_slice(&moov.total_bytes());
        assert_eq!(init.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_assembler_pairs_moof_with_following_mdat() {
        let mut assembler = FragmentAssembler::default();
        assert!(assembler.push(atom(b"moof", 1)).is_none());
        let fragment = assembler.push(atom(b"mdat", 2)).unwrap();
        assert!(fragment.starts_with(&atom(b"moof", 1).total_bytes()));
        assert!(fragment.ends_with(&atom(b"mdat", 2).total_bytes()));
    }

    #[test]
    fn test_assembler_discards_moof_without_mdat() {
        let mut assembler = FragmentAssembler::default();
        assert!(assembler.push(atom(b"moof", 1)).is_none());
        // a second moof arrives before any mdat: the first is incomplete
        assert!(assembler.push(atom(b"moof", 2)).is_none());
        let fragment = assembler.push(atom(b"mdat", 3)).unwrap();
        assert!(fragment.starts_with(&atom(b"moof", 2).total_bytes()));
    }

    #[test]
    fn test_assembler_ignores_orphan_mdat() {
        let mut assembler = FragmentAssembler::default();
        assert!(assembler.push(atom(b"mdat", 1)).is_none());
    }

    #[test]
    fn test_stream_without_configuration_fails_fast() {
        let manager = RecordingSessionManager::new(camera_without_sources(), None);
        assert!(matches!(
            manager.stream_fragments(1),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_stream_without_source_fails_before_spawn() {
        let manager = RecordingSessionManager::new(camera_without_sources(), None);
        manager.update_recording_configuration(Some(recording_config()));
        assert!(matches!(
            manager.stream_fragments(1),
            Err(Error::SourceMisconfigured(_))
        ));
    }

    #[test]
    fn test_prebuffer_enabled_without_prebuffer_is_misconfigured() {
        let mut camera = camera_without_sources();
        camera.prebuffer.enabled = true;
        let manager = RecordingSessionManager::new(camera, None);
        manager.update_recording_configuration(Some(recording_config()));
        assert!(matches!(
            manager.stream_fragments(1),
            Err(Error::SourceMisconfigured(_))
        ));
    }

    #[test]
    fn test_close_unknown_stream_is_noop() {
        let manager = RecordingSessionManager::new(camera_without_sources(), None);
        manager.close_stream(42, CloseReason::Normal);
    }

    #[tokio::test]
    async fn test_failed_stream_emits_terminal_marker() {
        let mut camera = camera_without_sources();
        camera.source = "rtsp://10.0.0.2/cam1".to_string();
        camera.transcoder_path = "/nonexistent/transcoder-binary".to_string();

        let manager = RecordingSessionManager::new(camera, None);
        manager.update_recording_configuration(Some(recording_config()));
        manager.update_recording_active(true);

        let mut rx = manager.stream_fragments(7).unwrap();
        let packet = rx.recv().await.unwrap();
        assert!(packet.is_last);
        assert!(packet.data.is_empty());
        assert!(rx.recv().await.is_none());
    }
}
