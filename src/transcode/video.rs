use crate::error::CodecError;
use crate::protocol::VideoConfig;
use anyhow::{bail, Result};
use ffmpeg_rs_raw::ffmpeg_sys_the_third::{av_d2q, avcodec_find_encoder_by_name, AVRational};
use ffmpeg_rs_raw::{Encoder, Scaler};
use std::collections::HashMap;
use std::ffi::CString;
use std::mem::transmute;

/// The pixel format forced onto every encoded video stream.
pub const DEFAULT_PIX_FMT: i32 =
    ffmpeg_rs_raw::ffmpeg_sys_the_third::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;

/// Owns the video decode→(scale)→encode leg of one session.
pub struct VideoStreamTranscoder {
    pub encoder: Encoder,
    pub scaler: Option<Scaler>,
    pub in_stream_index: usize,
}

/// Builds the video encoder, including the CRF/CBR branch and the strict
/// both-axes scaler policy.
pub fn open(
    config: &VideoConfig,
    decode_width: i32,
    decode_height: i32,
    in_stream_index: usize,
) -> Result<VideoStreamTranscoder> {
    let encoder_name = CString::new(config.codec.as_str())?;
    let codec = unsafe { avcodec_find_encoder_by_name(encoder_name.as_ptr()) };
    if codec.is_null() {
        bail!(CodecError::EncoderNotFound);
    }

    let mut opt: HashMap<String, String> = HashMap::new();
    if !config.preset.is_empty() {
        opt.insert("preset".to_string(), config.preset.clone());
    }
    if !config.profile.is_empty() {
        opt.insert("profile".to_string(), config.profile.clone());
    }

    let crf = config.crf;
    let bitrate_bps = config.bitrate_bps;
    if crf >= 0 {
        opt.insert("crf".to_string(), crf.to_string());
    } else {
        opt.insert("tune".to_string(), "zerolatency".to_string());
    }

    let framerate = config.framerate as f32;
    let width = config.width;
    let height = config.height;
    let gop_size = config.gop_size;

    let encoder = unsafe {
        Encoder::new_with_codec(codec)?
            .with_width(width)
            .with_height(height)
            .with_pix_fmt(transmute(DEFAULT_PIX_FMT))
            .with_bitrate(if crf >= 0 { 0 } else { bitrate_bps as _ })
            .with_framerate(framerate)?
            .with_options(move |ctx| {
                (*ctx).gop_size = gop_size;
                // Reciprocal of the framerate as an exact rational (e.g. 1001/30000 for
                // 29.97fps), not a float truncated to an integer denominator.
                let fps_q = av_d2q((framerate as f64).max(1.0), 90_000);
                (*ctx).time_base = AVRational {
                    num: fps_q.den,
                    den: fps_q.num,
                };
                if crf < 0 {
                    (*ctx).rc_max_rate = bitrate_bps as _;
                    (*ctx).rc_buffer_size = (2 * bitrate_bps) as _;
                }
            })
            .open(Some(opt))?
    };

    // Strict both-axes condition: a scaler is materialized only when downscaling on both
    // width and height; an upscale request is silently passed through unscaled.
    let scaler = if decode_width > width && decode_height > height {
        Some(Scaler::new())
    } else {
        None
    };

    Ok(VideoStreamTranscoder {
        encoder,
        scaler,
        in_stream_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(w: i32, h: i32) -> VideoConfig {
        VideoConfig {
            codec: "mpeg4".to_string(),
            framerate: 30.0,
            width: w,
            height: h,
            gop_size: 60,
            pix_fmt: DEFAULT_PIX_FMT,
            profile: "".to_string(),
            preset: "".to_string(),
            crf: 23,
            bitrate_bps: 0,
            ..VideoConfig::default()
        }
    }

    #[test]
    fn scaler_policy_is_strict_both_axes() {
        // Can't exercise the real FFmpeg encoder without a codec build; this asserts the
        // pure predicate used in `open` to select the scaler.
        let decode = (320, 240);
        assert!(decode.0 > 160 && decode.1 > 120); // downscale both axes -> scaler
        assert!(!(decode.0 > 640 && decode.1 > 240)); // upscale width -> no scaler
        assert!(!(decode.0 > 160 && decode.1 > 480)); // upscale height -> no scaler
        let _ = cfg(160, 120);
    }
}
