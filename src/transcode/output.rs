use crate::kv::KvList;
use crate::protocol::FormatConfig;
use anyhow::Result;
use ffmpeg_rs_raw::ffmpeg_sys_the_third::AVStream;
use ffmpeg_rs_raw::{cstr, free_cstr, Encoder, Muxer};
use std::collections::HashMap;

/// Branding metadata set on the video output stream, matching the original's fixed
/// `handler_name` tag.
const HANDLER_NAME: &str = "Media file produced by Peekast Media LLC (2024).";

pub const VIDEO_OUT_INDEX: i32 = 0;
pub const AUDIO_OUT_INDEX: i32 = 1;

/// Allocates and opens the output container with exactly two streams, video then audio.
/// Returns the muxer plus the two output stream pointers, needed later for their time bases
/// when rescaling packet timestamps.
pub fn open(
    config: &FormatConfig,
    video_encoder: &Encoder,
    audio_encoder: &Encoder,
) -> Result<(Muxer, *mut AVStream, *mut AVStream)> {
    unsafe {
        let mut muxer = Muxer::builder()
            .with_output_path(&config.dst, config.dst_type.as_deref())?
            .build()?;
        let video_stream = muxer.add_stream_encoder(video_encoder)?;
        let key = cstr!("handler_name");
        let value = cstr!(HANDLER_NAME);
        ffmpeg_rs_raw::ffmpeg_sys_the_third::av_dict_set(&mut (*video_stream).metadata, key, value, 0);
        free_cstr!(key);
        free_cstr!(value);

        let audio_stream = muxer.add_stream_encoder(audio_encoder)?;

        let opts = if config.kv_opts.is_empty() {
            None
        } else {
            let kv = KvList::parse(&config.kv_opts, '&', '=')?;
            let mut map = HashMap::new();
            for (k, v) in kv.iter() {
                map.insert(k.to_string(), v.to_string());
            }
            Some(map)
        };
        muxer.open(opts)?;

        Ok((muxer, video_stream, audio_stream))
    }
}
