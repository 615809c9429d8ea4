// src/codec/decoder.rs

//! Decoder session built on top of Symphonia.
//!
//! This module isolates codec-level concerns:
//! - constructing a decoder for the selected audio track
//! - decoding compressed samples into interleaved signed 16-bit little-endian PCM
//! - handling Symphonia's error model in a predictable, streaming-friendly way

use std::collections::VecDeque;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tracing::warn;

use super::{BufferInfo, PoolConfig, PooledSession, Processor, Produced};
use crate::error::{Error, Result};
use crate::media::TrackFormat;

/// Bytes per PCM sample in decoder output.
pub const PCM_BYTES_PER_SAMPLE: usize = 2;

pub type DecoderSession = PooledSession<PcmDecoder>;

/// Symphonia decoder that emits interleaved `i16` PCM bytes.
pub struct PcmDecoder {
    decoder: Box<dyn Decoder>,
    sample_buf: Option<SampleBuffer<i16>>,
    sample_rate: u32,
    channels: u16,
    skipped_packets: u64,
}

impl PcmDecoder {
    /// Create a decoder session for the given audio track.
    ///
    /// Fails with [`Error::UnsupportedCodec`] if the codec is unknown to Symphonia's default
    /// registry or the codec parameters are rejected.
    pub fn configure(format: &TrackFormat, max_input_size: usize) -> Result<DecoderSession> {
        let (sample_rate, channels) = format.pcm_layout()?;
        let decoder_opts: DecoderOptions = Default::default();

        let decoder = symphonia::default::get_codecs()
            .make(format.codec_params(), &decoder_opts)
            .map_err(|e| Error::unsupported(format!("no decoder for {}: {e}", format.mime)))?;

        let processor = Self {
            decoder,
            sample_buf: None,
            sample_rate,
            channels,
            skipped_packets: 0,
        };

        Ok(PooledSession::new(
            format!("decoder({})", format.mime),
            processor,
            PoolConfig {
                input_buffers: 4,
                input_capacity: max_input_size,
                output_buffers: 4,
            },
        ))
    }

    /// Packets dropped because they failed to decode.
    pub fn skipped_packets(&self) -> u64 {
        self.skipped_packets
    }

    // Associated fn so the caller can keep `self.decoder` borrowed by `decoded`.
    fn to_pcm_bytes(
        sample_buf: &mut Option<SampleBuffer<i16>>,
        sample_rate: u32,
        channels: u16,
        decoded: AudioBufferRef<'_>,
    ) -> Result<Vec<u8>> {
        let spec = *decoded.spec();
        if spec.channels.count() != channels as usize || spec.rate != sample_rate {
            return Err(Error::codec(format!(
                "decoded layout {} Hz x{} differs from track layout {} Hz x{}",
                spec.rate,
                spec.channels.count(),
                sample_rate,
                channels
            )));
        }

        let capacity = decoded.capacity() as u64;
        let needs_new = sample_buf
            .as_ref()
            .is_none_or(|buf| (buf.capacity() as u64) < capacity * spec.channels.count() as u64);
        if needs_new {
            *sample_buf = Some(SampleBuffer::<i16>::new(capacity, spec));
        }

        let buf = sample_buf
            .as_mut()
            .ok_or_else(|| Error::codec("sample buffer not initialized"))?;
        buf.copy_interleaved_ref(decoded);

        let mut bytes = Vec::with_capacity(buf.samples().len() * PCM_BYTES_PER_SAMPLE);
        for sample in buf.samples() {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(bytes)
    }
}

impl Processor for PcmDecoder {
    /// Error handling policy:
    /// - `DecodeError` → skip the bad frame (common with some codecs)
    /// - `IoError`     → treat as end of the packet
    /// - other errors  → fatal
    fn process(
        &mut self,
        data: &[u8],
        info: BufferInfo,
        out: &mut VecDeque<Produced>,
    ) -> Result<()> {
        let packet = Packet::new_from_slice(0, 0, 0, data);

        let pcm = match self.decoder.decode(&packet) {
            Ok(decoded) => Self::to_pcm_bytes(
                &mut self.sample_buf,
                self.sample_rate,
                self.channels,
                decoded,
            )?,
            Err(SymphoniaError::DecodeError(reason)) => {
                self.skipped_packets += 1;
                warn!(pts_us = info.pts_us, reason, "skipping undecodable sample");
                return Ok(());
            }
            Err(SymphoniaError::IoError(_)) => return Ok(()),
            Err(e) => return Err(Error::codec(format!("decoder failure: {e}"))),
        };

        if pcm.is_empty() {
            return Ok(());
        }

        out.push_back(Produced {
            info: BufferInfo {
                size: pcm.len(),
                pts_us: info.pts_us,
                flags: Default::default(),
            },
            data: pcm,
        });
        Ok(())
    }

    fn finish(&mut self, _out: &mut VecDeque<Produced>) -> Result<()> {
        // Symphonia decoders hold no delayed frames.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::codec::{BufferFlags, CodecSession, Dequeued};
    use symphonia::core::codecs::{CODEC_TYPE_NULL, CODEC_TYPE_PCM_S16LE};

    #[test]
    fn unknown_codec_is_unsupported() {
        let format = TrackFormat::audio(CODEC_TYPE_NULL, 44_100, 2);
        let err = match PcmDecoder::configure(&format, 4096) {
            Ok(_) => panic!("expected configure failure"),
            Err(err) => err,
        };
        assert!(matches!(err, Error::UnsupportedCodec(_)), "got {err:?}");
    }

    #[test]
    fn decodes_pcm_samples_into_le_bytes() -> anyhow::Result<()> {
        let mut format = TrackFormat::audio(CODEC_TYPE_PCM_S16LE, 8_000, 1);
        let mut params = format.codec_params().clone();
        params.with_bits_per_sample(16).with_max_frames_per_packet(64);
        format = TrackFormat::from_codec_params(params);

        let mut session = PcmDecoder::configure(&format, 128)?;
        session.start()?;

        let mut input = session.try_acquire_input(Duration::ZERO)?.expect("slot");
        input.fill(&[0x01, 0x00, 0xff, 0x7f]);
        session.queue_input(
            input,
            BufferInfo {
                size: 4,
                pts_us: 250,
                flags: BufferFlags::key_frame(true),
            },
        )?;

        let out = loop {
            match session.try_retrieve_output(Duration::ZERO)? {
                Dequeued::Buffer(out) => break out,
                Dequeued::FormatChanged => continue,
                Dequeued::TryAgainLater => panic!("decoder produced nothing"),
            }
        };

        assert_eq!(out.data, vec![0x01, 0x00, 0xff, 0x7f]);
        assert_eq!(out.info.pts_us, 250);
        session.release_output(out.index)?;
        Ok(())
    }

    #[test]
    fn consecutive_packets_reuse_the_sample_buffer() -> anyhow::Result<()> {
        let mut params = TrackFormat::audio(CODEC_TYPE_PCM_S16LE, 8_000, 1)
            .codec_params()
            .clone();
        params.with_bits_per_sample(16).with_max_frames_per_packet(64);
        let format = TrackFormat::from_codec_params(params);

        let mut session = PcmDecoder::configure(&format, 128)?;
        session.start()?;

        let packets: [&[u8]; 2] = [&[0x02, 0x00], &[0x03, 0x00, 0x04, 0x00, 0x05, 0x00]];
        for (n, packet) in packets.iter().enumerate() {
            let mut input = session.try_acquire_input(Duration::ZERO)?.expect("slot");
            input.fill(packet);
            session.queue_input(
                input,
                BufferInfo {
                    size: packet.len(),
                    pts_us: n as i64 * 1000,
                    flags: BufferFlags::key_frame(true),
                },
            )?;
        }

        let mut decoded = Vec::new();
        for _ in 0..8 {
            match session.try_retrieve_output(Duration::ZERO)? {
                Dequeued::Buffer(out) => {
                    decoded.push(out.data.clone());
                    session.release_output(out.index)?;
                }
                Dequeued::FormatChanged => {}
                Dequeued::TryAgainLater => break,
            }
        }

        assert_eq!(decoded, vec![packets[0].to_vec(), packets[1].to_vec()]);
        Ok(())
    }
}
