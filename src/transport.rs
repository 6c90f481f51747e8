use anyhow::{bail, Result};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;

/// Maximum message size, matching `MAX_BUFFER_SIZE` in the source protocol.
pub const MAX_BUFFER_SIZE: usize = 4096;

/// Writes `payload` followed by a single NUL byte, retrying on partial writes and on
/// `Interrupted`, mirroring `send_str`.
pub fn send_str(stream: &mut UnixStream, payload: &str) -> Result<()> {
    if payload.len() + 1 > MAX_BUFFER_SIZE {
        bail!(crate::error::AppError::BufferTooSmall);
    }
    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.extend_from_slice(payload.as_bytes());
    buf.push(0);
    write_all_retrying(stream, &buf)
}

fn write_all_retrying(stream: &mut UnixStream, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => bail!("connection closed while writing"),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Reads bytes until a NUL terminator is observed or the connection closes, mirroring
/// `recv_str`. Returns the payload without the terminator. A message that doesn't fit in
/// `MAX_BUFFER_SIZE - 1` bytes is a framing failure.
pub fn recv_str(stream: &mut UnixStream) -> Result<String> {
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => {
                if buf.is_empty() {
                    bail!("connection closed before any data was received");
                }
                bail!("connection closed mid-message (missing NUL terminator)");
            }
            Ok(_) => {
                if byte[0] == 0 {
                    return Ok(String::from_utf8(buf)?);
                }
                if buf.len() + 1 >= MAX_BUFFER_SIZE {
                    bail!(crate::error::AppError::BufferTooSmall);
                }
                buf.push(byte[0]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn round_trip_over_socketpair() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let payload = "input_file:/tmp/video.mp4".to_string();
        let expected = payload.clone();
        let t = thread::spawn(move || {
            send_str(&mut a, &payload).unwrap();
        });
        let got = recv_str(&mut b).unwrap();
        t.join().unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn empty_payload_round_trips() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let t = thread::spawn(move || {
            send_str(&mut a, "").unwrap();
        });
        assert_eq!(recv_str(&mut b).unwrap(), "");
        t.join().unwrap();
    }

    #[test]
    fn closed_connection_before_terminator_is_an_error() {
        let (a, mut b) = UnixStream::pair().unwrap();
        drop(a);
        assert!(recv_str(&mut b).is_err());
    }

    #[test]
    fn oversized_payload_is_rejected_on_send() {
        let (mut a, _b) = UnixStream::pair().unwrap();
        let payload = "x".repeat(MAX_BUFFER_SIZE);
        assert!(send_str(&mut a, &payload).is_err());
    }
}
