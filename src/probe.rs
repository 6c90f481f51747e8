use crate::error::AppError;
use crate::protocol::MediaInfo;
use anyhow::{bail, Result};
use ffmpeg_rs_raw::ffmpeg_sys_the_third::AVMediaType::AVMEDIA_TYPE_AUDIO;
use ffmpeg_rs_raw::ffmpeg_sys_the_third::{
    av_packet_free, av_q2d, avcodec_get_name, AV_NOPTS_VALUE, AV_TIME_BASE,
};
use ffmpeg_rs_raw::{Demuxer, StreamInfo, StreamType};
use log::debug;
use std::fs::File;
use std::path::Path;

/// Everything the transcode step needs about one selected input stream, alongside the
/// client-facing [`MediaInfo`] summary.
pub struct ProbeResult {
    pub info: MediaInfo,
    pub video_stream: Option<StreamInfo>,
    pub audio_stream: Option<StreamInfo>,
}

fn codec_name(codec_id: i32) -> String {
    unsafe {
        let name = avcodec_get_name(std::mem::transmute(codec_id));
        if name.is_null() {
            "unknown".to_string()
        } else {
            std::ffi::CStr::from_ptr(name).to_string_lossy().into_owned()
        }
    }
}

/// Reads the container short name and container-reported duration straight off the demuxer's
/// `AVFormatContext`, the same raw-context access `Muxer::context()` gives on the output side
/// (`transcode/output.rs`). Mirrors `fmt->iformat->name` and `fmt->duration` from the original.
unsafe fn container_format_and_duration(demuxer: &mut Demuxer) -> (String, f64) {
    let ctx = demuxer.context();
    let format = if (*ctx).iformat.is_null() {
        String::new()
    } else {
        let name = (*(*ctx).iformat).name;
        if name.is_null() {
            String::new()
        } else {
            std::ffi::CStr::from_ptr(name).to_string_lossy().into_owned()
        }
    };
    let duration = if (*ctx).duration == AV_NOPTS_VALUE {
        -1.0
    } else {
        (*ctx).duration as f64 / AV_TIME_BASE as f64
    };
    (format, duration)
}

/// Opens `path`, enumerates its streams and performs a full packet scan to count packets
/// per media type and derive the video stream's duration.
///
/// The scan consumes the demuxer; transcoding re-opens the input from scratch afterwards.
pub fn probe_file(path: &Path) -> Result<ProbeResult> {
    let file = File::open(path)?;
    let mut demuxer = Demuxer::new_custom_io(Box::new(file), None)?;
    let demux_info = unsafe { demuxer.probe_input()? };

    let video_stream = demux_info
        .streams
        .iter()
        .find(|s| s.stream_type == StreamType::Video)
        .cloned();
    let audio_stream = demux_info
        .streams
        .iter()
        .find(|s| s.stream_type == StreamType::Audio)
        .cloned();

    let Some(ref vs) = video_stream else {
        bail!(AppError::VideoStreamNotFound);
    };

    let (container_format, container_duration) =
        unsafe { container_format_and_duration(&mut demuxer) };

    let mut info = MediaInfo {
        format: container_format,
        video_index: vs.index as i32,
        audio_index: audio_stream.as_ref().map(|s| s.index as i32).unwrap_or(-1),
        width: vs.width,
        height: vs.height,
        fps: vs.fps as f64,
        video_bitrate_kbps: (vs.bitrate / 1000) as i64,
        video_codec: codec_name(vs.codec),
        duration: container_duration,
        ..MediaInfo::default()
    };
    if let Some(ref aus) = audio_stream {
        info.sample_rate = aus.sample_rate;
        info.audio_channels = aus.channels as i32;
        info.audio_bitrate_kbps = (aus.bitrate / 1000) as i64;
        info.audio_codec = codec_name(aus.codec);
    }

    let (duration, audio_packets, video_packets) = unsafe { count_packets(&mut demuxer, vs.index) }?;
    if info.duration == -1.0 {
        info.duration = duration;
    }
    info.audio_packets = audio_packets;
    info.video_packets = video_packets;

    debug!(
        "probed {}: {}x{} {} / {} Hz {}, {} video pkts, {} audio pkts, {:.2}s",
        path.display(),
        info.width,
        info.height,
        info.video_codec,
        info.sample_rate,
        info.audio_codec,
        info.video_packets,
        info.audio_packets,
        info.duration,
    );

    Ok(ProbeResult {
        info,
        video_stream,
        audio_stream,
    })
}

/// Walks every packet, counting audio/video packets and deriving the video stream's
/// duration from `(last_pts - first_pts) + last_duration`, matching `pktav_count_packets`.
unsafe fn count_packets(demuxer: &mut Demuxer, video_index: usize) -> Result<(f64, i64, i64)> {
    let mut start_pts = AV_NOPTS_VALUE;
    let mut end_pts = AV_NOPTS_VALUE;
    let mut end_duration = 0i64;
    let mut audio_pkts = 0i64;
    let mut video_pkts = 0i64;
    let mut video_time_base = None;

    loop {
        let (mut pkt, stream) = demuxer.get_packet()?;
        if pkt.is_null() {
            break;
        }
        let idx = (*pkt).stream_index as usize;
        if idx == video_index {
            if start_pts == AV_NOPTS_VALUE {
                start_pts = (*pkt).pts;
            }
            end_pts = (*pkt).pts;
            end_duration = (*pkt).duration;
            video_time_base.get_or_insert((*stream).time_base);
            video_pkts += 1;
        } else if (*(*stream).codecpar).codec_type == AVMEDIA_TYPE_AUDIO {
            audio_pkts += 1;
        }
        av_packet_free(&mut pkt);
    }

    let duration = if let (Some(tb), true) = (video_time_base, start_pts != AV_NOPTS_VALUE && end_pts != AV_NOPTS_VALUE) {
        let duration_pts = end_pts - start_pts + end_duration;
        duration_pts as f64 * av_q2d(tb)
    } else {
        0.0
    };

    Ok((duration, audio_pkts, video_pkts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_error() {
        let result = probe_file(Path::new("/nonexistent/does-not-exist.mp4"));
        assert!(result.is_err());
    }

    /// Encodes a handful of solid-color frames into a tiny mp4 with `mpeg4` (always built
    /// into FFmpeg, no license restrictions) and probes it back. Needs a real FFmpeg build
    /// with a working encoder/muxer, so it's excluded from the default run, the way the
    /// teacher lineage keeps its own live-FFmpeg coverage (`test_hls_timing.rs`'s fMP4 case)
    /// gated behind `#[ignore]`.
    #[ignore]
    #[test]
    fn probes_a_synthesized_fixture() {
        use ffmpeg_rs_raw::ffmpeg_sys_the_third::AVPixelFormat::AV_PIX_FMT_YUV420P;
        use ffmpeg_rs_raw::ffmpeg_sys_the_third::{
            av_frame_alloc, av_frame_free, av_frame_get_buffer, av_packet_free,
            avcodec_find_encoder_by_name, AVRational,
        };
        use ffmpeg_rs_raw::{Encoder, Muxer};
        use std::ffi::CString;

        const WIDTH: i32 = 64;
        const HEIGHT: i32 = 64;
        const FPS: i32 = 25;
        const FRAMES: i64 = 10;

        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("fixture.mp4");

        unsafe {
            let name = CString::new("mpeg4").unwrap();
            let codec = avcodec_find_encoder_by_name(name.as_ptr());
            assert!(!codec.is_null(), "mpeg4 encoder must be built into FFmpeg");

            let mut encoder = Encoder::new_with_codec(codec)
                .unwrap()
                .with_width(WIDTH)
                .with_height(HEIGHT)
                .with_pix_fmt(AV_PIX_FMT_YUV420P)
                .with_bitrate(200_000)
                .with_framerate(FPS as f32)
                .unwrap()
                .with_options(|ctx| {
                    (*ctx).gop_size = FRAMES as i32;
                    (*ctx).time_base = AVRational { num: 1, den: FPS };
                })
                .open(None)
                .unwrap();

            let mut muxer = Muxer::builder()
                .with_output_path(out_path.to_str().unwrap(), None)
                .unwrap()
                .build()
                .unwrap();
            muxer.add_stream_encoder(&encoder).unwrap();
            muxer.open(None).unwrap();

            for i in 0..FRAMES {
                let mut frame = av_frame_alloc();
                (*frame).width = WIDTH;
                (*frame).height = HEIGHT;
                (*frame).format = AV_PIX_FMT_YUV420P as i32;
                (*frame).pts = i;
                av_frame_get_buffer(frame, 0);
                for plane in 0..3usize {
                    let data = (*frame).data[plane];
                    let size = (*frame).linesize[plane] as usize * HEIGHT as usize;
                    if !data.is_null() && size > 0 {
                        std::ptr::write_bytes(data, 128, size);
                    }
                }

                for mut pkt in encoder.encode_frame(frame).unwrap() {
                    (*pkt).stream_index = 0;
                    muxer.write_packet(pkt).unwrap();
                    av_packet_free(&mut pkt);
                }
                av_frame_free(&mut frame);
            }
            for mut pkt in encoder.encode_frame(std::ptr::null_mut()).unwrap() {
                (*pkt).stream_index = 0;
                muxer.write_packet(pkt).unwrap();
                av_packet_free(&mut pkt);
            }
            muxer.close().unwrap();
        }

        let probed = probe_file(&out_path).unwrap();
        assert_eq!(probed.info.width, WIDTH);
        assert_eq!(probed.info.height, HEIGHT);
        assert!(probed.info.video_packets > 0);
        assert!(!probed.info.format.is_empty());
    }
}
