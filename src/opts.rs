use std::time::Duration;

use crate::codec::mp3::{DEFAULT_MP3_BITRATE, MP3_FRAME_SAMPLES};
use crate::media::OutputFormat;
use crate::pump::{DEFAULT_POLL_TIMEOUT, DEFAULT_STALL_LIMIT, PumpConfig};

/// Remux read buffer size when the container does not declare a maximum sample size.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Options that control how an extraction is performed.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// The CLI maps user input into this type so other frontends (tests, batch jobs)
/// can construct options programmatically.
#[derive(Debug, Clone)]
pub struct ExtractOpts {
    /// Format tried first for every input. `M4a` falls back to `Mp3` on failure;
    /// `Mp3` has no fallback.
    pub preferred_format: OutputFormat,

    /// MP3 encoder bitrate in bits per second.
    pub mp3_bitrate: u32,

    /// Frames per encoder input buffer. Decoded PCM larger than this is split.
    pub encoder_input_frames: usize,

    /// Bounded wait used when polling codec buffers.
    pub poll_timeout: Duration,

    /// Consecutive polls without progress before a transcode is abandoned.
    pub stall_limit: u32,

    /// Sample buffer size when the source track declares no maximum.
    pub default_buffer_size: usize,
}

impl Default for ExtractOpts {
    fn default() -> Self {
        Self {
            preferred_format: OutputFormat::M4a,
            mp3_bitrate: DEFAULT_MP3_BITRATE,
            encoder_input_frames: MP3_FRAME_SAMPLES,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            stall_limit: DEFAULT_STALL_LIMIT,
            default_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ExtractOpts {
    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            poll_timeout: self.poll_timeout,
            stall_limit: self.stall_limit,
        }
    }
}
