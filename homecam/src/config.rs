//! Camera and stream configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration file shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub cameras: Vec<CameraConfig>,
}

/// Per-camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Display name; also keys the prebuffer arena.
    pub name: String,
    /// Camera ingest URL handed to the transcoder (e.g. an rtsp:// address).
    pub source: String,
    /// Whether the camera's own audio feed should be captured. When false,
    /// recordings get a synthetic silent track instead.
    #[serde(default)]
    pub audio_enabled: bool,
    #[serde(default)]
    pub prebuffer: PreBufferSettings,
    #[serde(default)]
    pub video: VideoConstraints,
    #[serde(default)]
    pub encoder: EncoderFamily,
    /// Transcoder executable path.
    #[serde(default = "default_transcoder_path")]
    pub transcoder_path: String,
    /// Event endpoint for the camera's own motion detection, if any.
    #[serde(default)]
    pub events_url: Option<String>,
    /// One-based event channel this camera corresponds to.
    #[serde(default = "default_channel")]
    pub channel: u32,
}

fn default_transcoder_path() -> String {
    "ffmpeg".to_string()
}

fn default_channel() -> u32 {
    1
}

/// Pre-trigger buffering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreBufferSettings {
    /// Keep a continuous rolling capture for this camera.
    pub enabled: bool,
    /// Retention window for buffered fragments.
    pub window_ms: u64,
    /// How far back a triggered recording reaches into the window.
    pub lookback_ms: u64,
}

impl Default for PreBufferSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 15_000,
            lookback_ms: 4_000,
        }
    }
}

impl PreBufferSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_millis(self.lookback_ms)
    }
}

/// Constraints applied when negotiating a viewer's resolution and bitrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub max_width: u32,
    pub max_height: u32,
    #[serde(default)]
    pub min_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub max_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub policy: ResolutionPolicy,
    #[serde(default)]
    pub custom_width: Option<u32>,
    #[serde(default)]
    pub custom_height: Option<u32>,
    /// GOP/B-frame tuning; encoder flags for these are only emitted when a
    /// profile is explicitly chosen.
    #[serde(default)]
    pub quality_profile: Option<QualityProfile>,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            min_bitrate_kbps: None,
            max_bitrate_kbps: None,
            policy: ResolutionPolicy::default(),
            custom_width: None,
            custom_height: None,
            quality_profile: None,
        }
    }
}

/// How a caller-requested resolution is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Use the caller's request, clamped to the configured maxima.
    #[default]
    AsRequested,
    /// Always stream at the configured maximum resolution.
    ForceMax,
    /// Always stream at the configured custom resolution.
    ForceCustom,
}

/// Explicit GOP/B-frame tuning for live encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub keyframe_interval: u32,
    pub max_b_frames: u32,
}

/// Encoder implementation used for live viewer sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderFamily {
    /// Software H.264 encode.
    #[default]
    Software,
    /// Apple VideoToolbox hardware encode.
    Videotoolbox,
    /// VA-API hardware encode.
    Vaapi,
    /// Intel Quick Sync hardware encode.
    Qsv,
    /// NVIDIA NVENC hardware encode.
    Nvenc,
}

impl EncoderFamily {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "software" => Some(Self::Software),
            "videotoolbox" => Some(Self::Videotoolbox),
            "vaapi" => Some(Self::Vaapi),
            "qsv" => Some(Self::Qsv),
            "nvenc" => Some(Self::Nvenc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Videotoolbox => "videotoolbox",
            Self::Vaapi => "vaapi",
            Self::Qsv => "qsv",
            Self::Nvenc => "nvenc",
        }
    }

    /// Encoder name passed to the transcoder.
    pub fn codec_name(&self) -> &'static str {
        match self {
            Self::Software => "libx264",
            Self::Videotoolbox => "h264_videotoolbox",
            Self::Vaapi => "h264_vaapi",
            Self::Qsv => "h264_qsv",
            Self::Nvenc => "h264_nvenc",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, Self::Software)
    }
}

impl std::fmt::Display for EncoderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_family_from_str() {
        assert_eq!(
            EncoderFamily::from_str("SOFTWARE"),
            Some(EncoderFamily::Software)
        );
        assert_eq!(EncoderFamily::from_str("vaapi"), Some(EncoderFamily::Vaapi));
        assert_eq!(EncoderFamily::from_str("unknown"), None);
    }

    #[test]
    fn test_prebuffer_defaults() {
        let settings = PreBufferSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.window(), Duration::from_secs(15));
        assert_eq!(settings.lookback(), Duration::from_secs(4));
    }

    #[test]
    fn test_camera_config_deserializes_with_defaults() {
        let json = r#"{"name": "porch", "source": "rtsp://10.0.0.2/cam1"}"#;
        let camera: CameraConfig = serde_json::from_str(json).unwrap();
        assert_eq!(camera.transcoder_path, "ffmpeg");
        assert_eq!(camera.channel, 1);
        assert_eq!(camera.encoder, EncoderFamily::Software);
        assert_eq!(camera.video.max_width, 1920);
        assert!(!camera.audio_enabled);
        assert!(camera.events_url.is_none());
    }
}
