use crate::error::CodecError;
use crate::protocol::AudioConfig;
use anyhow::{bail, Result};
use ffmpeg_rs_raw::ffmpeg_sys_the_third::avcodec_find_encoder_by_name;
use ffmpeg_rs_raw::ffmpeg_sys_the_third::AVRational;
use ffmpeg_rs_raw::Encoder;
use std::ffi::CString;
use std::mem::transmute;

/// Owns the audio decode→encode leg of one session.
///
/// No resample/FIFO stage is wired up here: sample rate and channel layout are always
/// inherited from the decoder (see [`open`]), so there is never a mismatch to resample away.
pub struct AudioStreamTranscoder {
    pub encoder: Encoder,
    pub in_stream_index: usize,
}

/// Builds the audio encoder.
///
/// `decode_sample_rate`/`decode_channels` come from the source stream, not `config`: the
/// sample rate and channel layout are inherited from the decoder rather than taken from the
/// client-supplied `audio_sample_rate`/`audio_channels`. This preserves observed behavior
/// from the system this was ported from rather than guessing at unstated intent.
pub fn open(
    config: &AudioConfig,
    decode_sample_rate: i32,
    decode_channels: i32,
    in_stream_index: usize,
) -> Result<AudioStreamTranscoder> {
    let encoder_name = CString::new(config.codec.as_str())?;
    let codec = unsafe { avcodec_find_encoder_by_name(encoder_name.as_ptr()) };
    if codec.is_null() {
        bail!(CodecError::EncoderNotFound);
    }

    let sample_fmt = unsafe {
        let fmts = (*codec).sample_fmts;
        if fmts.is_null() {
            bail!(CodecError::InvalidArg);
        }
        *fmts
    };

    let bitrate_bps = config.bitrate_bps;
    let encoder = unsafe {
        Encoder::new_with_codec(codec)?
            .with_sample_rate(decode_sample_rate)?
            .with_bitrate(bitrate_bps as _)
            .with_default_channel_layout(decode_channels)
            .with_sample_format(transmute(sample_fmt as i32))
            .with_options(move |ctx| {
                (*ctx).time_base = AVRational {
                    num: 1,
                    den: decode_sample_rate,
                };
                (*ctx).strict_std_compliance =
                    ffmpeg_rs_raw::ffmpeg_sys_the_third::FF_COMPLIANCE_EXPERIMENTAL as i32;
            })
            .open(None)?
    };

    Ok(AudioStreamTranscoder {
        encoder,
        in_stream_index,
    })
}
