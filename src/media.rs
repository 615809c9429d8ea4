// src/media.rs

//! Plain media data types shared by the demuxer, muxer, codec sessions and the pump.
//!
//! Nothing in here does IO. The types exist so the rest of the pipeline can talk about
//! tracks and samples without leaking Symphonia or `mp4` types everywhere.

use symphonia::core::audio::Channels;
use symphonia::core::codecs::{
    CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_NULL,
    CODEC_TYPE_OPUS, CODEC_TYPE_VORBIS, CodecParameters, CodecType,
};

use crate::error::{Error, Result};

/// Media type prefix that marks a track as audio.
pub const AUDIO_MIME_PREFIX: &str = "audio/";

/// Media type reported for tracks Symphonia cannot classify (video, data, subtitles).
pub const UNKNOWN_TRACK_MIME: &str = "application/octet-stream";

pub const MIME_AAC: &str = "audio/mp4a-latm";

/// Output media type for the M4A container (AAC passthrough).
pub const OUTPUT_MIME_M4A: &str = "audio/mp4";

/// Output media type for MP3 (always transcoded).
pub const OUTPUT_MIME_MP3: &str = "audio/mpeg";

/// Immutable description of one container track.
#[derive(Debug, Clone)]
pub struct TrackFormat {
    /// Declared media type, e.g. `audio/mp4a-latm`.
    pub mime: String,

    /// Largest compressed sample in the track, when the container declares it.
    pub max_input_size: Option<usize>,

    params: CodecParameters,
}

impl TrackFormat {
    /// Build a format from Symphonia codec parameters.
    pub fn from_codec_params(params: CodecParameters) -> Self {
        let mime = mime_for_params(&params);
        Self {
            mime,
            max_input_size: None,
            params,
        }
    }

    /// Describe an audio track from its basic attributes.
    pub fn audio(codec: CodecType, sample_rate: u32, channel_count: u16) -> Self {
        let mut params = CodecParameters::new();
        params
            .for_codec(codec)
            .with_sample_rate(sample_rate)
            .with_channels(channels_from_count(channel_count));
        Self::from_codec_params(params)
    }

    /// Describe a non-audio track (video or data).
    pub fn opaque(mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            max_input_size: None,
            params: CodecParameters::new(),
        }
    }

    pub fn with_codec_config(mut self, config: impl Into<Box<[u8]>>) -> Self {
        self.params.with_extra_data(config.into());
        self
    }

    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = Some(size);
        self
    }

    pub fn is_audio(&self) -> bool {
        self.mime.starts_with(AUDIO_MIME_PREFIX)
    }

    pub fn codec(&self) -> CodecType {
        self.params.codec
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.params.sample_rate
    }

    /// Declared channel count. AAC tracks that only carry it in their AudioSpecificConfig
    /// fall back to that.
    pub fn channel_count(&self) -> Option<u16> {
        match self.params.channels {
            Some(channels) => Some(channels.count() as u16),
            None if self.params.codec == CODEC_TYPE_AAC => {
                self.codec_config().and_then(asc_channel_count)
            }
            None => None,
        }
    }

    /// Codec-specific configuration (for AAC, the AudioSpecificConfig).
    pub fn codec_config(&self) -> Option<&[u8]> {
        self.params.extra_data.as_deref()
    }

    pub fn codec_params(&self) -> &CodecParameters {
        &self.params
    }

    /// Sample rate and channel count, both required before any PCM can be produced.
    pub fn pcm_layout(&self) -> Result<(u32, u16)> {
        let sample_rate = self
            .sample_rate()
            .filter(|r| *r > 0)
            .ok_or_else(|| Error::unsupported("audio track does not declare a sample rate"))?;
        let channels = self
            .channel_count()
            .filter(|c| *c > 0)
            .ok_or_else(|| Error::unsupported("audio track does not declare its channels"))?;
        Ok((sample_rate, channels))
    }
}

/// One compressed access unit of the selected track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Vec<u8>,
    pub info: SampleInfo,
}

/// Timing and flags of a sample, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleInfo {
    pub size: usize,

    /// Presentation timestamp in microseconds.
    pub pts_us: i64,

    /// Duration in microseconds, 0 when the container does not say.
    pub duration_us: u64,

    /// Decodable without prior context.
    pub is_sync: bool,
}

/// Output formats this crate can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputFormat {
    /// AAC in an MPEG-4 audio container, remuxed without re-encoding.
    M4a,

    /// MPEG-1 Layer III, always transcoded.
    Mp3,
}

impl OutputFormat {
    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::M4a => OUTPUT_MIME_M4A,
            OutputFormat::Mp3 => OUTPUT_MIME_MP3,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::M4a => "m4a",
            OutputFormat::Mp3 => "mp3",
        }
    }

    pub fn from_mime(mime: &str) -> Result<Self> {
        match mime {
            OUTPUT_MIME_M4A => Ok(OutputFormat::M4a),
            OUTPUT_MIME_MP3 => Ok(OutputFormat::Mp3),
            other => Err(Error::UnsupportedOutput(other.to_owned())),
        }
    }
}

/// Channel mask covering the first `count` speaker positions.
pub(crate) fn channels_from_count(count: u16) -> Channels {
    let bits = if count >= 32 {
        u32::MAX
    } else {
        (1u32 << count) - 1
    };
    Channels::from_bits_truncate(bits)
}

/// Channel count from an AAC AudioSpecificConfig (ISO/IEC 14496-3, 1.6.2.1).
fn asc_channel_count(asc: &[u8]) -> Option<u16> {
    let mut bits = 0u64;
    for (i, byte) in asc.iter().take(8).enumerate() {
        bits |= u64::from(*byte) << (56 - 8 * i);
    }
    let take = |offset: u32, width: u32| (bits << offset) >> (64 - width);

    let mut offset = 5;
    if take(0, 5) == 31 {
        offset += 6;
    }
    let freq_index = take(offset, 4);
    offset += 4;
    if freq_index == 0xf {
        offset += 24;
    }

    match take(offset, 4) {
        0 => None,
        7 => Some(8),
        n @ 1..=6 => Some(n as u16),
        _ => None,
    }
}

fn mime_for_params(params: &CodecParameters) -> String {
    // Symphonia only knows audio codecs, so a null codec means "not an audio track".
    if params.codec == CODEC_TYPE_NULL || params.sample_rate.is_none() {
        return UNKNOWN_TRACK_MIME.to_owned();
    }

    let known = match params.codec {
        c if c == CODEC_TYPE_AAC => Some(MIME_AAC),
        c if c == CODEC_TYPE_MP3 => Some("audio/mpeg"),
        c if c == CODEC_TYPE_FLAC => Some("audio/flac"),
        c if c == CODEC_TYPE_VORBIS => Some("audio/vorbis"),
        c if c == CODEC_TYPE_OPUS => Some("audio/opus"),
        c if c == CODEC_TYPE_ALAC => Some("audio/alac"),
        _ => None,
    };

    if let Some(mime) = known {
        return mime.to_owned();
    }

    match symphonia::default::get_codecs().get_codec(params.codec) {
        Some(desc) => format!("{AUDIO_MIME_PREFIX}x-{}", desc.short_name),
        None => format!("{AUDIO_MIME_PREFIX}unknown"),
    }
}
