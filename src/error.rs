use std::fmt;

/// Application-level failures that don't originate from the OS or the codec provider. Closed
/// set, matching the original protocol's `PK_ERROR_*` domain exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    VideoStreamNotFound,
    AudioStreamNotFound,
    BufferTooSmall,
    KeyNotFound,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppError::VideoStreamNotFound => "Video Stream not found",
            AppError::AudioStreamNotFound => "Audio Stream not found",
            AppError::BufferTooSmall => "Buffer too small",
            AppError::KeyNotFound => "Key not found",
        };
        f.write_str(s)
    }
}

impl std::error::Error for AppError {}

/// Codec-provider-level failures: a named decoder/encoder the provider doesn't support, or a
/// call rejected with an invalid argument. These map to the original's `AVERROR_DECODER_NOT_FOUND`
/// / `AVERROR_ENCODER_NOT_FOUND` / `AVERROR(EINVAL)`, which live in the AV error domain, not the
/// four-member `PK_ERROR` domain [`AppError`] mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    DecoderNotFound,
    EncoderNotFound,
    InvalidArg,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CodecError::DecoderNotFound => "Decoder not found",
            CodecError::EncoderNotFound => "Encoder not found",
            CodecError::InvalidArg => "Invalid argument",
        };
        f.write_str(s)
    }
}

impl std::error::Error for CodecError {}

/// Unified error taxonomy for the transcoder.
///
/// Mirrors the three disjoint error domains of the original protocol (OS, codec, app) but
/// propagates by value through `?` instead of through a process-wide "last error" scalar.
#[derive(Debug)]
pub enum PktavError {
    Os(std::io::Error),
    Codec(anyhow::Error),
    App(AppError),
}

impl fmt::Display for PktavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PktavError::Os(e) => write!(f, "{e}"),
            PktavError::Codec(e) => write!(f, "{e}"),
            PktavError::App(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PktavError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PktavError::Os(e) => Some(e),
            PktavError::Codec(_) | PktavError::App(_) => None,
        }
    }
}

impl From<std::io::Error> for PktavError {
    fn from(e: std::io::Error) -> Self {
        PktavError::Os(e)
    }
}

impl From<AppError> for PktavError {
    fn from(e: AppError) -> Self {
        PktavError::App(e)
    }
}

impl From<CodecError> for PktavError {
    fn from(e: CodecError) -> Self {
        PktavError::Codec(e.into())
    }
}

/// Dispatches on error domain to produce the human string sent back to clients, the way
/// `pktav_strerror` dispatched on `pktav_errno`'s domain.
pub fn strerror(err: &anyhow::Error) -> String {
    if let Some(e) = err.downcast_ref::<PktavError>() {
        e.to_string()
    } else {
        err.to_string()
    }
}
