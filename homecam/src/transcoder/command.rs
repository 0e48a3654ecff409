use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use std::net::IpAddr;

use crate::config::CameraConfig;
use crate::session::recording::RecordingConfiguration;

/// SRTP payload packet size for video.
const VIDEO_PKT_SIZE: u32 = 1316;
/// SRTP payload packet size for audio.
const AUDIO_PKT_SIZE: u32 = 188;

const SRTP_SUITE: &str = "AES_CM_128_HMAC_SHA1_80";

fn input_args(source: &str) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string(), "-loglevel".to_string(), "warning".to_string()];
    if source.starts_with("rtsp://") {
        args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
    }
    args.extend(["-i".to_string(), source.to_string()]);
    args
}

fn fragmented_output_args(port: u16) -> Vec<String> {
    vec![
        "-f".to_string(),
        "mp4".to_string(),
        "-movflags".to_string(),
        "frag_keyframe+empty_moov+default_base_moof".to_string(),
        "-max_muxing_queue_size".to_string(),
        "1024".to_string(),
        format!("tcp://127.0.0.1:{port}"),
    ]
}

/// Arguments for the continuous stream-copy capture feeding a prebuffer.
///
/// No re-encode: both streams are copied into a fragmented container pushed
/// to the loopback listener.
pub fn copy_capture_args(camera: &CameraConfig, port: u16) -> Vec<String> {
    let mut args = input_args(&camera.source);
    args.extend(["-c:v".to_string(), "copy".to_string()]);
    if camera.audio_enabled {
        args.extend(["-c:a".to_string(), "copy".to_string()]);
    } else {
        args.push("-an".to_string());
    }
    args.extend(fragmented_output_args(port));
    args
}

/// Negotiated parameters for one live viewer encode.
#[derive(Debug, Clone)]
pub struct LiveEncodeOptions {
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub fps: Option<u32>,
    pub address: IpAddr,
    pub video_port: u16,
    pub audio_port: u16,
    pub video_ssrc: u32,
    pub audio_ssrc: u32,
    /// SRTP master key + salt for the video stream.
    pub video_key: Bytes,
    /// SRTP master key + salt for the audio stream.
    pub audio_key: Bytes,
}

/// Arguments for a per-viewer live encode session.
///
/// Encoder-family selection decides the codec name, whether pixel-format
/// and color-range flags are emitted (software only), whether GOP/B-frame
/// flags are emitted (only with an explicit quality profile), and whether a
/// hardware-upload filter chain precedes the scale filter.
pub fn live_encode_args(camera: &CameraConfig, opts: &LiveEncodeOptions) -> Vec<String> {
    let encoder = camera.encoder;
    let mut args = input_args(&camera.source);

    // video
    args.extend(["-map".to_string(), "0:v:0".to_string()]);
    args.extend(["-c:v".to_string(), encoder.codec_name().to_string()]);
    if !encoder.is_hardware() {
        args.extend([
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-color_range".to_string(),
            "mpeg".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
        ]);
    }
    if let Some(profile) = camera.video.quality_profile {
        args.extend([
            "-g".to_string(),
            profile.keyframe_interval.to_string(),
            "-bf".to_string(),
            profile.max_b_frames.to_string(),
        ]);
    }

    let scale = format!("scale={}:{}", opts.width, opts.height);
    let filter = if encoder.is_hardware() {
        format!("format=nv12,hwupload,{scale}")
    } else {
        scale
    };
    args.extend(["-vf".to_string(), filter]);

    if let Some(fps) = opts.fps {
        args.extend(["-r".to_string(), fps.to_string()]);
    }
    args.extend([
        "-b:v".to_string(),
        format!("{}k", opts.bitrate_kbps),
        "-maxrate".to_string(),
        format!("{}k", opts.bitrate_kbps),
        "-bufsize".to_string(),
        format!("{}k", opts.bitrate_kbps * 2),
    ]);
    args.extend([
        "-payload_type".to_string(),
        "99".to_string(),
        "-ssrc".to_string(),
        opts.video_ssrc.to_string(),
        "-f".to_string(),
        "rtp".to_string(),
        "-srtp_out_suite".to_string(),
        SRTP_SUITE.to_string(),
        "-srtp_out_params".to_string(),
        BASE64.encode(&opts.video_key),
        format!(
            "srtp://{}:{}?rtcpport={}&pkt_size={}",
            opts.address, opts.video_port, opts.video_port, VIDEO_PKT_SIZE
        ),
    ]);

    // audio
    if camera.audio_enabled {
        args.extend([
            "-map".to_string(),
            "0:a:0".to_string(),
            "-c:a".to_string(),
            "libopus".to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-b:a".to_string(),
            "24k".to_string(),
            "-payload_type".to_string(),
            "110".to_string(),
            "-ssrc".to_string(),
            opts.audio_ssrc.to_string(),
            "-f".to_string(),
            "rtp".to_string(),
            "-srtp_out_suite".to_string(),
            SRTP_SUITE.to_string(),
            "-srtp_out_params".to_string(),
            BASE64.encode(&opts.audio_key),
            format!(
                "srtp://{}:{}?rtcpport={}&pkt_size={}",
                opts.address, opts.audio_port, opts.audio_port, AUDIO_PKT_SIZE
            ),
        ]);
    }

    args
}

/// Where a recording encode reads its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingInput<'a> {
    /// Prebuffer backlog piped through stdin.
    Stdin,
    /// Fresh direct capture from the camera.
    Direct(&'a str),
}

/// Arguments for one triggered recording encode.
///
/// When the camera's audio feed is disabled a silent synthetic track is
/// injected so the container still carries the audio stream the platform
/// expects.
pub fn recording_encode_args(
    camera: &CameraConfig,
    config: &RecordingConfiguration,
    input: RecordingInput<'_>,
    port: u16,
) -> Vec<String> {
    let mut args = match input {
        RecordingInput::Stdin => {
            let mut a = vec![
                "-hide_banner".to_string(),
                "-loglevel".to_string(),
                "warning".to_string(),
            ];
            a.extend(["-i".to_string(), "pipe:0".to_string()]);
            a
        }
        RecordingInput::Direct(source) => input_args(source),
    };

    if !camera.audio_enabled {
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            "anullsrc=channel_layout=mono:sample_rate=16000".to_string(),
        ]);
    }

    args.extend(["-map".to_string(), "0:v:0".to_string()]);
    args.extend(["-c:v".to_string(), config.codec.codec_name().to_string()]);
    args.extend([
        "-profile:v".to_string(),
        config.profile.as_str().to_string(),
        "-level:v".to_string(),
        config.level.clone(),
        "-b:v".to_string(),
        format!("{}k", config.bitrate_kbps),
        "-vf".to_string(),
        format!("scale={}:{}", config.width, config.height),
        "-r".to_string(),
        config.fps.to_string(),
        "-force_key_frames".to_string(),
        format!("expr:gte(t,n_forced*{})", config.fragment_ms as f64 / 1000.0),
    ]);

    let audio_map = if camera.audio_enabled { "0:a:0" } else { "1:a" };
    args.extend([
        "-map".to_string(),
        audio_map.to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-ar".to_string(),
        "16000".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-b:a".to_string(),
        "32k".to_string(),
    ]);

    args.extend(fragmented_output_args(port));
    args
}
