use crate::error::CodecError;
use crate::kv::KvList;
use crate::transport::{recv_str, send_str};
use anyhow::{Context, Result};
use std::os::unix::net::UnixStream;

const PAIR_DELIM: char = ';';
const KV_DELIM: char = ':';
const INPUT_FILE_KEY: &str = "input_file";

/// Result of probing the input file.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub format: String,
    pub duration: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub video_index: i32,
    pub audio_index: i32,
    pub width: i32,
    pub height: i32,
    pub video_bitrate_kbps: i64,
    pub audio_bitrate_kbps: i64,
    pub fps: f64,
    pub audio_channels: i32,
    pub sample_rate: i32,
    pub audio_packets: i64,
    pub video_packets: i64,
}

impl MediaInfo {
    pub fn total_packets(&self) -> i64 {
        self.audio_packets + self.video_packets
    }

    fn to_kv(&self) -> KvList {
        let mut kv = KvList::new();
        kv.push("format", &self.format);
        kv.push("duration", format!("{:.6}", self.duration));
        kv.push("video_codec", &self.video_codec);
        kv.push("audio_codec", &self.audio_codec);
        kv.push("video_index", self.video_index.to_string());
        kv.push("audio_index", self.audio_index.to_string());
        kv.push("width", self.width.to_string());
        kv.push("height", self.height.to_string());
        kv.push("video_bitrate_kbps", self.video_bitrate_kbps.to_string());
        kv.push("audio_bitrate_kbps", self.audio_bitrate_kbps.to_string());
        kv.push("fps", format!("{:.6}", self.fps));
        kv.push("audio_channels", self.audio_channels.to_string());
        kv.push("sample_rate", self.sample_rate.to_string());
        kv.push("audio_packets", self.audio_packets.to_string());
        kv.push("video_packets", self.video_packets.to_string());
        kv
    }
}

/// Output container configuration.
#[derive(Debug, Clone, Default)]
pub struct FormatConfig {
    pub dst: String,
    pub dst_type: Option<String>,
    pub kv_opts: String,
}

/// Requested video encoder configuration.
#[derive(Debug, Clone, Default)]
pub struct VideoConfig {
    pub codec: String,
    /// Injected from the probe, not the client.
    pub framerate: f64,
    pub width: i32,
    pub height: i32,
    pub gop_size: i32,
    pub pix_fmt: i32,
    pub profile: String,
    pub preset: String,
    /// `-1` means CBR.
    pub crf: i32,
    pub bitrate_bps: i64,
}

/// Requested audio encoder configuration.
#[derive(Debug, Clone, Default)]
pub struct AudioConfig {
    pub codec: String,
    pub bitrate_bps: i64,
    pub channels: i32,
    pub sample_rate: i32,
}

/// One progress update or the terminal status of a session.
#[derive(Debug, Clone, Default)]
pub struct ProgressStatus {
    pub status: i32,
    pub status_desc: String,
    pub proc_time_ms: i64,
    pub time_left_ms: i64,
    pub progress_pct: i32,
    pub audio_pkts_read: i64,
    pub video_pkts_read: i64,
    pub err_msg: String,
}

impl ProgressStatus {
    pub const RUNNING: i32 = 0;
    pub const FINISHED: i32 = 1;
    pub const FAILED: i32 = -1;

    fn to_kv(&self) -> KvList {
        let mut kv = KvList::new();
        kv.push("status", self.status.to_string());
        kv.push("status_desc", &self.status_desc);
        kv.push("proc_time_ms", self.proc_time_ms.to_string());
        kv.push("time_left_ms", self.time_left_ms.to_string());
        kv.push("progress_pct", self.progress_pct.to_string());
        kv.push("audio_pkts_read", self.audio_pkts_read.to_string());
        kv.push("video_pkts_read", self.video_pkts_read.to_string());
        kv.push("err_msg", &self.err_msg);
        kv
    }
}

/// Reads the client's input-file message.
pub fn recv_input(stream: &mut UnixStream) -> Result<String> {
    let raw = recv_str(stream)?;
    let kv = KvList::parse(&raw, PAIR_DELIM, KV_DELIM)?;
    kv.get(INPUT_FILE_KEY)
        .map(|s| s.to_owned())
        .context("input message missing input_file key")
}

/// Sends the probed MediaInfo.
pub fn send_media_info(stream: &mut UnixStream, info: &MediaInfo) -> Result<()> {
    let wire = info.to_kv().serialize(PAIR_DELIM, KV_DELIM)?;
    send_str(stream, &wire)
}

/// Reads and decodes the client's Config message. Unrecognized keys are
/// ignored; unset fields keep their `Default`.
pub fn recv_config(stream: &mut UnixStream) -> Result<(FormatConfig, VideoConfig, AudioConfig)> {
    let raw = recv_str(stream)?;
    let kv = KvList::parse(&raw, PAIR_DELIM, KV_DELIM)?;

    let mut audio = AudioConfig::default();
    let mut video = VideoConfig::default();
    let mut format = FormatConfig::default();

    if let Some(v) = kv.get_opt("audio_codec") {
        audio.codec = v.to_string();
    }
    if let Some(v) = kv.get_opt("audio_bitrate_bps") {
        audio.bitrate_bps = v.parse().unwrap_or(0);
    }
    if let Some(v) = kv.get_opt("audio_channels") {
        audio.channels = v.parse().unwrap_or(0);
    }
    if let Some(v) = kv.get_opt("audio_sample_rate") {
        audio.sample_rate = v.parse().unwrap_or(0);
    }

    if let Some(v) = kv.get_opt("video_codec") {
        video.codec = v.to_string();
    }
    if let Some(v) = kv.get_opt("video_width") {
        video.width = v.parse().unwrap_or(0);
    }
    if let Some(v) = kv.get_opt("video_height") {
        video.height = v.parse().unwrap_or(0);
    }
    if let Some(v) = kv.get_opt("video_gop_size") {
        video.gop_size = v.parse().unwrap_or(0);
    }
    if let Some(v) = kv.get_opt("video_pix_fmt") {
        video.pix_fmt = v.parse().unwrap_or(0);
    }
    if let Some(v) = kv.get_opt("video_profile") {
        video.profile = v.to_string();
    }
    if let Some(v) = kv.get_opt("video_preset") {
        video.preset = v.to_string();
    }
    if let Some(v) = kv.get_opt("video_crf") {
        video.crf = v.parse().unwrap_or(-1);
    }
    if let Some(v) = kv.get_opt("video_bitrate_bps") {
        video.bitrate_bps = v.parse().unwrap_or(0);
    }

    if let Some(v) = kv.get_opt("format_dst") {
        format.dst = v.to_string();
    }
    if let Some(v) = kv.get_opt("format_dst_type") {
        format.dst_type = Some(v.to_string());
    }
    if let Some(v) = kv.get_opt("format_kv_opts") {
        format.kv_opts = v.to_string();
    }

    Ok((format, video, audio))
}

/// Sends a progress or terminal status message.
pub fn send_status(stream: &mut UnixStream, status: &ProgressStatus) -> Result<()> {
    let wire = status.to_kv().serialize(PAIR_DELIM, KV_DELIM)?;
    send_str(stream, &wire)
}

/// Sends a single-pair terminal error message: `error:<message>`.
pub fn send_error(stream: &mut UnixStream, message: &str) -> Result<()> {
    let mut kv = KvList::new();
    kv.push("error", message);
    let wire = kv
        .serialize(PAIR_DELIM, KV_DELIM)
        .map_err(|_| anyhow::Error::from(CodecError::InvalidArg))?;
    send_str(stream, &wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_info_round_trips_through_kv() {
        let info = MediaInfo {
            format: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            duration: 12.5,
            video_codec: "h264".to_string(),
            audio_codec: "aac".to_string(),
            video_index: 0,
            audio_index: 1,
            width: 1920,
            height: 1080,
            video_bitrate_kbps: 4000,
            audio_bitrate_kbps: 128,
            fps: 29.97,
            audio_channels: 2,
            sample_rate: 48000,
            audio_packets: 100,
            video_packets: 300,
        };
        let wire = info.to_kv().serialize(PAIR_DELIM, KV_DELIM).unwrap();
        let parsed = KvList::parse(&wire, PAIR_DELIM, KV_DELIM).unwrap();
        assert_eq!(parsed.get("width").unwrap(), "1920");
        assert_eq!(parsed.get("video_index").unwrap(), "0");
        assert!(parsed.get("fps").unwrap().starts_with("29.97"));
    }

    #[test]
    fn config_ignores_unrecognized_keys_and_defaults_unset_fields() {
        let kv = KvList::parse("video_codec:libx264;bogus_key:1", ';', ':').unwrap();
        assert_eq!(kv.get("video_codec").unwrap(), "libx264");
        // unknown keys simply don't populate anything; no error raised by the parser itself
        assert!(kv.get("bogus_key").is_ok());
    }

    #[test]
    fn recv_input_requires_input_file_key() {
        use std::thread;
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let t = thread::spawn(move || {
            send_str(&mut a, "some_other_key:1").unwrap();
        });
        assert!(recv_input(&mut b).is_err());
        t.join().unwrap();
    }

    #[test]
    fn send_error_formats_single_pair() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        std::thread::spawn(move || {
            send_error(&mut a, "Video Stream not found").unwrap();
        });
        let raw = recv_str(&mut b).unwrap();
        assert_eq!(raw, "error:Video Stream not found");
    }
}
