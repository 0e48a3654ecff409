//! Per-viewer live stream sessions.
//!
//! Sessions run in two phases so the caller can perform admission control
//! before committing resources: `prepare` negotiates transport and returns
//! it without starting anything; `start` resolves the effective encode
//! target and spawns the single transcoder for the session.

use std::net::IpAddr;

use bytes::Bytes;
use dashmap::DashMap;
use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CameraConfig, ResolutionPolicy, VideoConstraints};
use crate::error::{Error, Result};
use crate::session::SessionState;
use crate::transcoder::command::LiveEncodeOptions;
use crate::transcoder::{live_encode_args, runner};

/// Bitrate used when the caller does not request one.
const DEFAULT_BITRATE_KBPS: u32 = 2000;

/// Transport parameters negotiated by the caller for one viewer.
#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub session_id: String,
    pub address: IpAddr,
    pub video_port: u16,
    pub audio_port: u16,
    /// SRTP master key + salt for the video stream.
    pub video_key: Bytes,
    /// SRTP master key + salt for the audio stream.
    pub audio_key: Bytes,
}

/// Our side of the negotiation, returned from [`prepare`](LiveStreamSessionManager::prepare).
#[derive(Debug, Clone)]
pub struct SessionEndpoints {
    pub session_id: String,
    pub video_ssrc: u32,
    pub audio_ssrc: u32,
}

/// Caller-selected encode target passed to `start`.
#[derive(Debug, Clone, Copy)]
pub struct StreamTarget {
    pub width: u32,
    pub height: u32,
    pub fps: Option<u32>,
    pub bitrate_kbps: Option<u32>,
}

struct LiveSession {
    request: PrepareRequest,
    endpoints: SessionEndpoints,
    state: SessionState,
    token: Option<CancellationToken>,
}

/// Manager for all live viewer sessions of one camera.
pub struct LiveStreamSessionManager {
    camera: CameraConfig,
    sessions: DashMap<String, LiveSession>,
}

impl LiveStreamSessionManager {
    pub fn new(camera: CameraConfig) -> Self {
        Self {
            camera,
            sessions: DashMap::new(),
        }
    }

    /// Negotiate transport for a new viewer without committing resources.
    ///
    /// The session is held Pending until `start`; no process is spawned.
    pub fn prepare(&self, request: PrepareRequest) -> SessionEndpoints {
        let endpoints = SessionEndpoints {
            session_id: request.session_id.clone(),
            video_ssrc: rand::rng().random(),
            audio_ssrc: rand::rng().random(),
        };

        if self
            .sessions
            .insert(
                request.session_id.clone(),
                LiveSession {
                    request,
                    endpoints: endpoints.clone(),
                    state: SessionState::Pending,
                    token: None,
                },
            )
            .is_some()
        {
            warn!(session = %endpoints.session_id, "replacing an existing prepared session");
        }

        endpoints
    }

    /// Start the encode for a prepared session.
    pub fn start(&self, session_id: &str, target: StreamTarget) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found("live session", session_id))?;

        if session.state != SessionState::Pending {
            return Err(Error::InvalidStateTransition {
                from: session.state.to_string(),
                to: SessionState::Active.to_string(),
            });
        }

        let (width, height) = resolve_resolution(&self.camera.video, target.width, target.height);
        let bitrate_kbps = resolve_bitrate(&self.camera.video, target.bitrate_kbps);

        let opts = LiveEncodeOptions {
            width,
            height,
            bitrate_kbps,
            fps: target.fps,
            address: session.request.address,
            video_port: session.request.video_port,
            audio_port: session.request.audio_port,
            video_ssrc: session.endpoints.video_ssrc,
            audio_ssrc: session.endpoints.audio_ssrc,
            video_key: session.request.video_key.clone(),
            audio_key: session.request.audio_key.clone(),
        };
        let args = live_encode_args(&self.camera, &opts);

        let token = CancellationToken::new();
        runner::spawn(&self.camera.transcoder_path, &args, token.clone(), false)?;

        session.state = SessionState::Active;
        session.token = Some(token);
        info!(
            camera = %self.camera.name,
            session = session_id,
            width,
            height,
            bitrate_kbps,
            encoder = %self.camera.encoder,
            "live session started"
        );
        Ok(())
    }

    /// Accepted but not acted upon: mid-session renegotiation is out of scope.
    pub fn reconfigure(&self, session_id: &str, target: StreamTarget) {
        info!(
            session = session_id,
            width = target.width,
            height = target.height,
            "reconfigure request accepted but not applied"
        );
    }

    /// Terminate the session's subprocess and drop it from the active set.
    ///
    /// Stopping an unknown session id is a no-op.
    pub fn stop(&self, session_id: &str) {
        match self.sessions.remove(session_id) {
            Some((_, mut session)) => {
                if let Some(token) = session.token.take() {
                    token.cancel();
                }
                session.state = SessionState::Closed;
                info!(camera = %self.camera.name, session = session_id, "live session stopped");
            }
            None => debug!(session = session_id, "stop for unknown session, ignoring"),
        }
    }

    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|s| s.state)
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.state == SessionState::Active)
            .count()
    }
}

/// Resolve the effective resolution for a caller's request.
pub fn resolve_resolution(
    constraints: &VideoConstraints,
    requested_width: u32,
    requested_height: u32,
) -> (u32, u32) {
    let clamped = (
        requested_width.min(constraints.max_width),
        requested_height.min(constraints.max_height),
    );
    match constraints.policy {
        ResolutionPolicy::AsRequested => clamped,
        ResolutionPolicy::ForceMax => (constraints.max_width, constraints.max_height),
        ResolutionPolicy::ForceCustom => {
            match (constraints.custom_width, constraints.custom_height) {
                (Some(width), Some(height)) => (width, height),
                _ => {
                    warn!(
                        "forced custom resolution selected but no custom dimensions configured, \
                         using caller request"
                    );
                    clamped
                }
            }
        }
    }
}

/// Resolve the effective bitrate, clamped between configured min/max.
pub fn resolve_bitrate(constraints: &VideoConstraints, requested_kbps: Option<u32>) -> u32 {
    let mut bitrate = requested_kbps.unwrap_or(DEFAULT_BITRATE_KBPS);
    if let Some(max) = constraints.max_bitrate_kbps {
        bitrate = bitrate.min(max);
    }
    if let Some(min) = constraints.min_bitrate_kbps {
        bitrate = bitrate.max(min);
    }
    bitrate
}
