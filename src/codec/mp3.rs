// src/codec/mp3.rs

//! MP3 encoder session backed by LAME (`mp3lame-encoder`).
//!
//! Input is interleaved signed 16-bit little-endian PCM. Slices may end in the middle of a
//! frame; the remainder is carried into the next input so LAME only ever sees whole frames.

use std::collections::VecDeque;

use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm, MonoPcm, Quality};
use tracing::debug;

use super::decoder::PCM_BYTES_PER_SAMPLE;
use super::{BufferInfo, PoolConfig, PooledSession, Processor, Produced};
use crate::error::{Error, Result};

/// Default MP3 bitrate in bits per second.
pub const DEFAULT_MP3_BITRATE: u32 = 128_000;

/// Samples per channel in one MPEG-1 Layer III frame.
pub const MP3_FRAME_SAMPLES: usize = 1152;

// LAME's documented worst case for a flush.
const FLUSH_BUFFER_SIZE: usize = 7200;

pub type EncoderSession = PooledSession<Mp3Encoder>;

/// Encoder configuration, fixed once the session is created.
#[derive(Debug, Clone, Copy)]
pub struct Mp3Config {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,

    /// Frames (samples per channel) that fit in one encoder input buffer.
    pub input_frames: usize,
}

pub struct Mp3Encoder {
    lame: mp3lame_encoder::Encoder,
    channels: u16,
    carry: Vec<u8>,
    samples: Vec<i16>,
}

impl Mp3Encoder {
    /// Configure a LAME encoder session.
    ///
    /// LAME only handles mono and stereo; anything else, or a rejected sample rate or
    /// bitrate, is reported as [`Error::UnsupportedCodec`].
    pub fn configure(config: Mp3Config) -> Result<EncoderSession> {
        if !(1..=2).contains(&config.channels) {
            return Err(Error::unsupported(format!(
                "mp3 encoder supports 1 or 2 channels, got {}",
                config.channels
            )));
        }

        let mut builder =
            Builder::new().ok_or_else(|| Error::unsupported("failed to allocate LAME encoder"))?;
        builder
            .set_num_channels(config.channels as u8)
            .map_err(|e| Error::unsupported(format!("mp3 channels: {e:?}")))?;
        builder
            .set_sample_rate(config.sample_rate)
            .map_err(|e| Error::unsupported(format!("mp3 sample rate: {e:?}")))?;
        builder
            .set_brate(bitrate(config.bitrate)?)
            .map_err(|e| Error::unsupported(format!("mp3 bitrate: {e:?}")))?;
        builder
            .set_quality(Quality::Good)
            .map_err(|e| Error::unsupported(format!("mp3 quality: {e:?}")))?;
        let lame = builder
            .build()
            .map_err(|e| Error::unsupported(format!("mp3 encoder init: {e:?}")))?;

        debug!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            bitrate = config.bitrate,
            "mp3 encoder configured"
        );

        let bytes_per_frame = PCM_BYTES_PER_SAMPLE * config.channels as usize;
        Ok(PooledSession::new(
            "encoder(audio/mpeg)",
            Self {
                lame,
                channels: config.channels,
                carry: Vec::new(),
                samples: Vec::new(),
            },
            PoolConfig {
                input_buffers: 2,
                input_capacity: config.input_frames.max(1) * bytes_per_frame,
                output_buffers: 2,
            },
        ))
    }

    fn encode_samples(&mut self) -> Result<Vec<u8>> {
        let mut mp3 = Vec::new();
        if self.samples.is_empty() {
            return Ok(mp3);
        }

        mp3.reserve(mp3lame_encoder::max_required_buffer_size(self.samples.len()));
        let result = if self.channels == 1 {
            self.lame.encode_to_vec(MonoPcm(&self.samples), &mut mp3)
        } else {
            self.lame
                .encode_to_vec(InterleavedPcm(&self.samples), &mut mp3)
        };
        result.map_err(|e| Error::codec(format!("mp3 encode: {e:?}")))?;
        Ok(mp3)
    }

    fn push(&mut self, mp3: Vec<u8>, pts_us: i64, out: &mut VecDeque<Produced>) {
        if mp3.is_empty() {
            return;
        }
        out.push_back(Produced {
            info: BufferInfo {
                size: mp3.len(),
                pts_us,
                flags: Default::default(),
            },
            data: mp3,
        });
    }
}

impl Processor for Mp3Encoder {
    fn process(
        &mut self,
        data: &[u8],
        info: BufferInfo,
        out: &mut VecDeque<Produced>,
    ) -> Result<()> {
        self.carry.extend_from_slice(data);

        let bytes_per_frame = PCM_BYTES_PER_SAMPLE * self.channels as usize;
        let whole = self.carry.len() - self.carry.len() % bytes_per_frame;

        self.samples.clear();
        self.samples.extend(
            self.carry[..whole]
                .chunks_exact(PCM_BYTES_PER_SAMPLE)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
        self.carry.drain(..whole);

        let mp3 = self.encode_samples()?;
        self.push(mp3, info.pts_us, out);
        Ok(())
    }

    fn finish(&mut self, out: &mut VecDeque<Produced>) -> Result<()> {
        if !self.carry.is_empty() {
            debug!(bytes = self.carry.len(), "dropping partial trailing pcm frame");
            self.carry.clear();
        }

        let mut mp3 = Vec::with_capacity(FLUSH_BUFFER_SIZE);
        self.lame
            .flush_to_vec::<FlushNoGap>(&mut mp3)
            .map_err(|e| Error::codec(format!("mp3 flush: {e:?}")))?;
        self.push(mp3, 0, out);
        Ok(())
    }
}

fn bitrate(bits_per_second: u32) -> Result<Bitrate> {
    let rate = match bits_per_second / 1000 {
        8 => Bitrate::Kbps8,
        16 => Bitrate::Kbps16,
        24 => Bitrate::Kbps24,
        32 => Bitrate::Kbps32,
        40 => Bitrate::Kbps40,
        48 => Bitrate::Kbps48,
        64 => Bitrate::Kbps64,
        80 => Bitrate::Kbps80,
        96 => Bitrate::Kbps96,
        112 => Bitrate::Kbps112,
        128 => Bitrate::Kbps128,
        160 => Bitrate::Kbps160,
        192 => Bitrate::Kbps192,
        224 => Bitrate::Kbps224,
        256 => Bitrate::Kbps256,
        320 => Bitrate::Kbps320,
        _ => {
            return Err(Error::unsupported(format!(
                "mp3 bitrate {bits_per_second} bps is not a standard rate"
            )));
        }
    };
    Ok(rate)
}
