use thiserror::Error;

/// vidaudio's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// vidaudio's crate-wide error type.
///
/// Every failure of one extraction attempt ends up as one of these variants. The batch runner
/// turns them into per-file failure reasons via `Display`.
#[derive(Debug, Error)]
pub enum Error {
    /// The source container has no track whose media type starts with `audio/`.
    #[error("source has no audio track")]
    NoAudioTrack,

    #[error("failed to open source: {0}")]
    SourceOpen(String),

    /// A decoder or encoder is unavailable, or rejected its configuration.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("failed to create output: {0}")]
    OutputCreate(String),

    #[error("failed to write output")]
    OutputWrite(#[source] std::io::Error),

    #[error("failed to finalize container: {0}")]
    ContainerFinalize(String),

    /// The output container already has its single audio track.
    #[error("output already has an audio track")]
    TrackAlreadyAdded,

    #[error("unsupported output media type: {0}")]
    UnsupportedOutput(String),

    /// Container-level failure while reading samples mid-stream.
    #[error("demux failure: {0}")]
    Demux(String),

    /// Codec-level failure after a session was successfully started.
    #[error("codec failure: {0}")]
    Codec(String),

    #[error("settings error: {0}")]
    Settings(String),
}

impl Error {
    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedCodec(message.into())
    }

    pub(crate) fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Settings(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_write_keeps_io_source() {
        let err = Error::OutputWrite(std::io::Error::other("disk full"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk full"));
    }

    #[test]
    fn display_names_the_failure() {
        assert_eq!(Error::NoAudioTrack.to_string(), "source has no audio track");
        assert_eq!(
            Error::unsupported("mp3 encoder").to_string(),
            "unsupported codec: mp3 encoder"
        );
        assert_eq!(
            Error::TrackAlreadyAdded.to_string(),
            "output already has an audio track"
        );
    }
}
