// src/extractor.rs

//! Audio extraction entry points.
//!
//! Responsibilities:
//! - open the source and locate its first audio track
//! - dispatch on the requested output media type
//! - own every resource of one attempt (demuxer, codec sessions, muxer) and dispose of
//!   each exactly once, on success and on every error path

use std::io::{Read, Seek, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::codec::mp3::Mp3Config;
use crate::codec::{Mp3Encoder, PcmDecoder, Running};
use crate::demux::{SymphoniaDemuxer, open_audio_track};
use crate::error::{Error, Result};
use crate::media::{MIME_AAC, OutputFormat, TrackFormat};
use crate::mux::M4aMuxer;
use crate::opts::ExtractOpts;
use crate::{pump, remux};

/// Readable, writable, seekable output handle. Blanket-implemented for every
/// `Read + Write + Seek` type.
///
/// Read access is needed because the M4A index is patched in place once it is written, so
/// files must be opened with `read(true)`.
pub trait OutputSink: Read + Write + Seek {}

impl<T: Read + Write + Seek> OutputSink for T {}

/// Turns a media file into an audio-only file of a requested type.
pub trait AudioExtractor {
    /// Locate the audio track of `input` without producing anything.
    ///
    /// Fails with [`Error::NoAudioTrack`] when the source has none, so callers can skip
    /// creating an output for it.
    fn probe(&self, input: &Path) -> Result<TrackFormat>;

    /// Extract the first audio track of `input` into `output` as `output_mime`.
    ///
    /// Unknown media types fail with [`Error::UnsupportedOutput`].
    fn extract_audio(
        &self,
        input: &Path,
        output: &mut dyn OutputSink,
        output_mime: &str,
    ) -> Result<()>;
}

/// [`AudioExtractor`] backed by Symphonia, the `mp4` writer and LAME.
#[derive(Debug, Clone, Default)]
pub struct MediaAudioExtractor {
    opts: ExtractOpts,
}

impl MediaAudioExtractor {
    pub fn new(opts: ExtractOpts) -> Self {
        Self { opts }
    }

    pub fn opts(&self) -> &ExtractOpts {
        &self.opts
    }

    fn remux_to_m4a(&self, input: &Path, output: &mut dyn OutputSink) -> Result<()> {
        let mut demuxer = SymphoniaDemuxer::open_path(input)?;
        let (track, format) = open_audio_track(&mut demuxer)?;
        if format.mime != MIME_AAC {
            return Err(Error::unsupported(format!(
                "m4a remux needs an AAC track, found {}",
                format.mime
            )));
        }

        debug!(track, mime = %format.mime, "remuxing audio track");
        let mut muxer = M4aMuxer::new(output);
        let samples = remux::remux(
            &mut demuxer,
            &format,
            &mut muxer,
            self.opts.default_buffer_size,
        )?;
        muxer.finalize()?;

        info!(samples, "m4a remux complete");
        Ok(())
    }

    fn transcode_to_mp3(&self, input: &Path, output: &mut dyn OutputSink) -> Result<()> {
        let mut demuxer = SymphoniaDemuxer::open_path(input)?;
        let (track, format) = open_audio_track(&mut demuxer)?;
        let (sample_rate, channels) = format.pcm_layout()?;

        debug!(track, mime = %format.mime, sample_rate, channels, "transcoding audio track");

        let max_input = format
            .max_input_size
            .unwrap_or(self.opts.default_buffer_size);
        let mut decoder = Running::start(PcmDecoder::configure(&format, max_input)?)?;
        let mut encoder = Running::start(Mp3Encoder::configure(Mp3Config {
            sample_rate,
            channels,
            bitrate: self.opts.mp3_bitrate,
            input_frames: self.opts.encoder_input_frames,
        })?)?;

        let stats = pump::transcode(
            &mut demuxer,
            &mut *decoder,
            &mut *encoder,
            output,
            sample_rate,
            channels,
            self.opts.pump_config(),
        )?;
        output.flush().map_err(Error::OutputWrite)?;

        info!(
            samples = stats.samples_in,
            bytes_out = stats.bytes_out,
            skipped = decoder.processor().skipped_packets(),
            "mp3 transcode complete"
        );
        Ok(())
    }
}

impl AudioExtractor for MediaAudioExtractor {
    fn probe(&self, input: &Path) -> Result<TrackFormat> {
        let mut demuxer = SymphoniaDemuxer::open_path(input)?;
        let (_, format) = open_audio_track(&mut demuxer)?;
        Ok(format)
    }

    fn extract_audio(
        &self,
        input: &Path,
        output: &mut dyn OutputSink,
        output_mime: &str,
    ) -> Result<()> {
        match OutputFormat::from_mime(output_mime)? {
            OutputFormat::M4a => self.remux_to_m4a(input, output),
            OutputFormat::Mp3 => self.transcode_to_mp3(input, output),
        }
    }
}
