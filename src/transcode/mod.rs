pub mod audio;
pub mod output;
pub mod video;

use crate::error::{AppError, CodecError};
use crate::protocol::{AudioConfig, FormatConfig, MediaInfo, VideoConfig};
use anyhow::{bail, Result};
use ffmpeg_rs_raw::ffmpeg_sys_the_third::{av_frame_free, av_packet_free, av_packet_rescale_ts, AVStream};
use ffmpeg_rs_raw::{Decoder, Demuxer, Muxer, StreamType};
use std::fs::File;
use std::path::Path;
use std::ptr;

pub use output::{AUDIO_OUT_INDEX, VIDEO_OUT_INDEX};

/// One packet's worth of bookkeeping returned from a single pump iteration.
pub struct PumpStep {
    pub audio_packets: i64,
    pub video_packets: i64,
    pub eof: bool,
}

/// Owns every codec resource for one session: input demuxer/decoder, both encode legs and
/// the output muxer. Field order is reverse-construction order so the default `Drop` glue
/// releases everything in the prescribed unwind order (packet state first, input context
/// last) without hand-written cleanup labels.
pub struct Transcoder {
    muxer: Muxer,
    video_out_stream: *mut AVStream,
    audio_out_stream: *mut AVStream,
    video: video::VideoStreamTranscoder,
    audio: audio::AudioStreamTranscoder,
    decoder: Decoder,
    demuxer: Demuxer,
    video_in_stream: Option<*mut AVStream>,
    audio_in_stream: Option<*mut AVStream>,
}

impl Transcoder {
    /// Opens the input a second time (the probe already consumed its demuxer), sets up both
    /// decode legs, builds both encoders and opens the output muxer.
    pub fn open(
        path: &Path,
        info: &MediaInfo,
        format: &FormatConfig,
        video_cfg: &VideoConfig,
        audio_cfg: &AudioConfig,
    ) -> Result<Self> {
        if info.total_packets() == 0 {
            bail!(CodecError::InvalidArg);
        }

        let file = File::open(path)?;
        let mut demuxer = Demuxer::new_custom_io(Box::new(file), None)?;
        let demux_info = unsafe { demuxer.probe_input()? };

        let video_stream_info = demux_info
            .streams
            .iter()
            .find(|s| s.stream_type == StreamType::Video)
            .cloned()
            .ok_or(AppError::VideoStreamNotFound)?;
        let audio_stream_info = demux_info
            .streams
            .iter()
            .find(|s| s.stream_type == StreamType::Audio)
            .cloned()
            .ok_or(AppError::AudioStreamNotFound)?;

        let mut decoder = Decoder::new();
        unsafe {
            decoder.setup_decoder(&video_stream_info, None)?;
            decoder.setup_decoder(&audio_stream_info, None)?;
        }

        let video = video::open(video_cfg, info.width, info.height, video_stream_info.index)?;
        let audio = audio::open(
            audio_cfg,
            info.sample_rate,
            info.audio_channels,
            audio_stream_info.index,
        )?;

        let (muxer, video_out_stream, audio_out_stream) =
            output::open(format, &video.encoder, &audio.encoder)?;

        Ok(Self {
            muxer,
            video_out_stream,
            audio_out_stream,
            video,
            audio,
            decoder,
            demuxer,
            video_in_stream: None,
            audio_in_stream: None,
        })
    }

    /// Reads and processes exactly one demuxed packet. Returns `eof: true` once the demuxer
    /// is exhausted; the caller is then expected to call [`Transcoder::finish`].
    pub fn pump(&mut self) -> Result<PumpStep> {
        let (mut pkt, in_stream) = unsafe { self.demuxer.get_packet()? };
        if pkt.is_null() {
            return Ok(PumpStep {
                audio_packets: 0,
                video_packets: 0,
                eof: true,
            });
        }

        let idx = unsafe { (*pkt).stream_index } as usize;
        let video_idx = self.video_stream_index();
        let audio_idx = self.audio_stream_index();

        let mut step = PumpStep {
            audio_packets: 0,
            video_packets: 0,
            eof: false,
        };

        if idx == video_idx {
            self.video_in_stream.get_or_insert(in_stream);
            step.video_packets = 1;
            let frames = unsafe { self.decoder.decode_pkt(pkt) }?;
            for (mut frame, _stream) in frames {
                let mut scaled = false;
                let encode_frame = if let Some(scaler) = &mut self.video.scaler {
                    let enc_ctx = unsafe { self.video.encoder.codec_context() };
                    let (w, h, fmt) = unsafe { ((*enc_ctx).width, (*enc_ctx).height, (*enc_ctx).pix_fmt) };
                    let mut sf = unsafe { scaler.process_frame(frame, w, h, fmt)? };
                    unsafe {
                        (*sf).pts = (*frame).pts;
                    }
                    scaled = true;
                    sf
                } else {
                    frame
                };

                let packets = unsafe { self.video.encoder.encode_frame(encode_frame)? };
                self.write_video_packets(packets)?;

                if scaled {
                    let mut sf = encode_frame;
                    unsafe { av_frame_free(&mut sf) };
                }
                unsafe { av_frame_free(&mut frame) };
            }
        } else if idx == audio_idx {
            self.audio_in_stream.get_or_insert(in_stream);
            step.audio_packets = 1;
            let frames = unsafe { self.decoder.decode_pkt(pkt) }?;
            for (mut frame, _stream) in frames {
                let packets = unsafe { self.audio.encoder.encode_frame(frame)? };
                self.write_audio_packets(packets)?;
                unsafe { av_frame_free(&mut frame) };
            }
        }

        unsafe { av_packet_free(&mut pkt) };
        Ok(step)
    }

    /// Flushes both encoders by feeding a null frame and draining, then writes the trailer.
    pub fn finish(mut self) -> Result<()> {
        unsafe {
            let packets = self.video.encoder.encode_frame(ptr::null_mut())?;
            self.write_video_packets(packets)?;
            let packets = self.audio.encoder.encode_frame(ptr::null_mut())?;
            self.write_audio_packets(packets)?;
            self.muxer.close()?;
        }
        Ok(())
    }

    fn video_stream_index(&self) -> usize {
        self.video.in_stream_index
    }

    fn audio_stream_index(&self) -> usize {
        self.audio.in_stream_index
    }

    /// Recomputes packet duration (video only, preserving the original's derivation) and
    /// rescales timestamps from the input stream's time base to the output stream's before
    /// an interleaved write.
    fn write_video_packets(&mut self, packets: Vec<*mut ffmpeg_rs_raw::ffmpeg_sys_the_third::AVPacket>) -> Result<()> {
        for mut pkt in packets {
            unsafe {
                (*pkt).stream_index = VIDEO_OUT_INDEX;
                if let Some(in_stream) = self.video_in_stream {
                    let in_tb = (*in_stream).time_base;
                    let out_tb = (*self.video_out_stream).time_base;
                    let avg_fr = (*in_stream).avg_frame_rate;
                    if out_tb.num != 0 && avg_fr.num != 0 {
                        (*pkt).duration = in_tb.den as i64 / out_tb.num as i64 / avg_fr.num as i64 * avg_fr.den as i64;
                    }
                    av_packet_rescale_ts(pkt, in_tb, out_tb);
                }
                self.muxer.write_packet(pkt)?;
                av_packet_free(&mut pkt);
            }
        }
        Ok(())
    }

    fn write_audio_packets(&mut self, packets: Vec<*mut ffmpeg_rs_raw::ffmpeg_sys_the_third::AVPacket>) -> Result<()> {
        for mut pkt in packets {
            unsafe {
                (*pkt).stream_index = AUDIO_OUT_INDEX;
                if let Some(in_stream) = self.audio_in_stream {
                    let in_tb = (*in_stream).time_base;
                    let out_tb = (*self.audio_out_stream).time_base;
                    av_packet_rescale_ts(pkt, in_tb, out_tb);
                }
                self.muxer.write_packet(pkt)?;
                av_packet_free(&mut pkt);
            }
        }
        Ok(())
    }
}
