use crate::error::{strerror, CodecError};
use crate::probe;
use crate::protocol::{self, AudioConfig, FormatConfig, MediaInfo, ProgressStatus, VideoConfig};
use crate::transcode::Transcoder;
use anyhow::Result;
use log::{error, info};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Instant;

/// Drives a single client connection end to end: read input path, probe, negotiate config,
/// transcode while reporting progress, send the terminal status. Runs entirely on the thread
/// (or process) that accepted the connection; owns the stream for its whole lifetime.
///
/// A failure before transcoding starts (bad input path, probe failure, malformed config) is
/// reported as a single `error` message, since no session was ever established. A failure once
/// transcoding is under way is reported as a terminal status with `status = FAILED`, since the
/// client has already received a `MediaInfo` and is tracking session progress.
pub fn handle_client(mut stream: UnixStream) {
    if let Err(e) = run_session(&mut stream) {
        error!("session failed: {e}");
    }
}

/// `((apkts + vpkts) * 100) / total_packets`, matching `pktav_worker`'s `current_pct`.
fn progress_pct(apkts: i64, vpkts: i64, total_packets: i64) -> i32 {
    (((apkts + vpkts) * 100) / total_packets) as i32
}

/// `proc_time_ms * (100 - pct) / pct`. Callers must not invoke this with `pct == 0`.
fn time_left_ms(proc_time_ms: i64, pct: i32) -> i64 {
    proc_time_ms * (100 - pct) as i64 / pct as i64
}

fn run_session(stream: &mut UnixStream) -> Result<()> {
    let input = match protocol::recv_input(stream) {
        Ok(v) => v,
        Err(e) => return fail_before_transcode(stream, e),
    };
    let path = Path::new(&input);

    let probed = match probe::probe_file(path) {
        Ok(v) => v,
        Err(e) => return fail_before_transcode(stream, e),
    };
    protocol::send_media_info(stream, &probed.info)?;

    let (format, mut video_cfg, audio_cfg) = match protocol::recv_config(stream) {
        Ok(v) => v,
        Err(e) => return fail_before_transcode(stream, e),
    };
    video_cfg.framerate = probed.info.fps;

    if probed.info.total_packets() == 0 {
        return fail_before_transcode(stream, anyhow::Error::from(CodecError::InvalidArg));
    }

    run_transcode(stream, path, &probed.info, &format, &video_cfg, &audio_cfg)
}

/// Reports a pre-transcode failure via the single-pair `error:<message>` message and
/// propagates the error for logging.
fn fail_before_transcode(stream: &mut UnixStream, e: anyhow::Error) -> Result<()> {
    let _ = protocol::send_error(stream, &strerror(&e));
    Err(e)
}

/// Opens the transcoder and pumps it to completion, reporting progress as it goes. Any
/// failure here — opening the transcoder, pumping a packet, flushing at the end — is reported
/// via a terminal `status = FAILED` message rather than the pre-transcode `error` message,
/// since a session (and its `MediaInfo`) is already underway.
fn run_transcode(
    stream: &mut UnixStream,
    path: &Path,
    info: &MediaInfo,
    format: &FormatConfig,
    video_cfg: &VideoConfig,
    audio_cfg: &AudioConfig,
) -> Result<()> {
    let start = Instant::now();
    let mut apkts = 0i64;
    let mut vpkts = 0i64;
    let mut last_pct = 0i32;
    let total_packets = info.total_packets();

    let mut transcoder = match Transcoder::open(path, info, format, video_cfg, audio_cfg) {
        Ok(t) => t,
        Err(e) => return fail_transcode(stream, e, start, last_pct, apkts, vpkts),
    };

    loop {
        let step = match transcoder.pump() {
            Ok(s) => s,
            Err(e) => return fail_transcode(stream, e, start, last_pct, apkts, vpkts),
        };
        if step.eof {
            break;
        }
        apkts += step.audio_packets;
        vpkts += step.video_packets;

        let pct = progress_pct(apkts, vpkts, total_packets);
        if pct > last_pct {
            last_pct = pct;
            let proc_time_ms = start.elapsed().as_millis() as i64;
            protocol::send_status(
                stream,
                &ProgressStatus {
                    status: ProgressStatus::RUNNING,
                    status_desc: "TRANSCODING".to_string(),
                    proc_time_ms,
                    time_left_ms: time_left_ms(proc_time_ms, pct),
                    progress_pct: pct,
                    audio_pkts_read: apkts,
                    video_pkts_read: vpkts,
                    err_msg: String::new(),
                },
            )?;
        }
    }

    if let Err(e) = transcoder.finish() {
        return fail_transcode(stream, e, start, last_pct, apkts, vpkts);
    }

    let proc_time_ms = start.elapsed().as_millis() as i64;
    let pct = last_pct.max(1);
    protocol::send_status(
        stream,
        &ProgressStatus {
            status: ProgressStatus::FINISHED,
            status_desc: "FINISH".to_string(),
            proc_time_ms,
            time_left_ms: time_left_ms(proc_time_ms, pct),
            progress_pct: last_pct,
            audio_pkts_read: apkts,
            video_pkts_read: vpkts,
            err_msg: String::new(),
        },
    )?;

    info!(
        "session for {} finished: {} video pkts, {} audio pkts",
        path.display(),
        vpkts,
        apkts
    );
    Ok(())
}

/// Sends the terminal `FAILED` status carrying the progress reached so far, then propagates
/// the original error to the caller for logging.
fn fail_transcode(
    stream: &mut UnixStream,
    e: anyhow::Error,
    start: Instant,
    last_pct: i32,
    apkts: i64,
    vpkts: i64,
) -> Result<()> {
    let proc_time_ms = start.elapsed().as_millis() as i64;
    let err_msg = strerror(&e);
    let _ = protocol::send_status(
        stream,
        &ProgressStatus {
            status: ProgressStatus::FAILED,
            status_desc: "FAILED".to_string(),
            proc_time_ms,
            time_left_ms: 0,
            progress_pct: last_pct,
            audio_pkts_read: apkts,
            video_pkts_read: vpkts,
            err_msg,
        },
    );
    Err(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_pct_matches_worker_formula() {
        assert_eq!(progress_pct(50, 50, 200), 50);
        assert_eq!(progress_pct(0, 1, 200), 0);
        assert_eq!(progress_pct(199, 1, 200), 100);
    }

    #[test]
    fn time_left_ms_estimates_remaining_time() {
        assert_eq!(time_left_ms(1000, 50), 1000);
        assert_eq!(time_left_ms(990, 99), 10);
        assert_eq!(time_left_ms(100, 100), 0);
    }

    #[test]
    fn fail_transcode_sends_terminal_failed_status() {
        use crate::kv::KvList;
        use std::thread;

        let (mut a, mut b) = UnixStream::pair().unwrap();
        let t = thread::spawn(move || {
            let err = anyhow::Error::from(CodecError::EncoderNotFound);
            let result = fail_transcode(&mut a, err, Instant::now(), 42, 10, 20);
            assert!(result.is_err());
        });

        let raw = crate::transport::recv_str(&mut b).unwrap();
        let kv = KvList::parse(&raw, ';', ':').unwrap();
        assert_eq!(kv.get("status").unwrap(), "-1");
        assert_eq!(kv.get("status_desc").unwrap(), "FAILED");
        assert_eq!(kv.get("progress_pct").unwrap(), "42");
        assert_eq!(kv.get("err_msg").unwrap(), "Encoder not found");
        t.join().unwrap();
    }
}
