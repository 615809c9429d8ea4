// src/pump.rs

//! Decode → re-encode pump.
//!
//! Drives two non-blocking codec sessions from one loop. Each iteration:
//! 1. drains finished encoder output into the output stream
//! 2. feeds the next compressed sample (or end-of-stream) to the decoder
//! 3. drains one decoded PCM buffer and re-chunks it into encoder input buffers
//! 4. queues encoder end-of-stream once the decoder has finished
//! 5. drains the encoder again, with the poll timeout
//!
//! Whenever the encoder has no free input buffer the pump drains encoder output before
//! retrying, which is what keeps the two sessions from deadlocking on each other.

use std::io::Write;
use std::time::Duration;

use tracing::{debug, trace};

use crate::codec::decoder::PCM_BYTES_PER_SAMPLE;
use crate::codec::{BufferFlags, BufferInfo, CodecSession, Dequeued};
use crate::demux::Demuxer;
use crate::error::{Error, Result};

/// Default bounded wait for decoder/encoder buffers.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Consecutive iterations without progress before the pump gives up.
pub const DEFAULT_STALL_LIMIT: u32 = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct PumpConfig {
    pub poll_timeout: Duration,
    pub stall_limit: u32,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            stall_limit: DEFAULT_STALL_LIMIT,
        }
    }
}

/// Counters collected over one pump run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub samples_in: u64,
    pub pcm_bytes: u64,
    pub encoder_pushes: u64,
    pub bytes_out: u64,
    /// Presentation time of the last PCM slice handed to the encoder.
    pub last_pcm_pts_us: Option<i64>,
}

/// Presentation time of a PCM slice that starts `consumed_bytes` into a decoded buffer.
///
/// A decoded buffer may be split across several encoder inputs; each slice gets the buffer's
/// timestamp advanced by the whole frames that precede it.
pub fn chunk_timestamp_us(
    base_pts_us: i64,
    consumed_bytes: usize,
    bytes_per_frame: usize,
    sample_rate: u32,
) -> i64 {
    let frames = (consumed_bytes / bytes_per_frame) as i64;
    base_pts_us + frames * 1_000_000 / i64::from(sample_rate)
}

/// Run the pump until the encoder signals end-of-stream.
///
/// `sample_rate` and `channels` describe the decoded PCM. The sessions must already be
/// started; the caller keeps ownership and is responsible for stopping them.
pub fn transcode<D, E, W>(
    source: &mut dyn Demuxer,
    decoder: &mut D,
    encoder: &mut E,
    output: &mut W,
    sample_rate: u32,
    channels: u16,
    config: PumpConfig,
) -> Result<PumpStats>
where
    D: CodecSession + ?Sized,
    E: CodecSession + ?Sized,
    W: Write + ?Sized,
{
    if sample_rate == 0 || channels == 0 {
        return Err(Error::unsupported("pcm layout needs a sample rate and channels"));
    }

    let pump = TranscodePump {
        source,
        decoder,
        encoder,
        output,
        sample_rate,
        bytes_per_frame: PCM_BYTES_PER_SAMPLE * channels as usize,
        config,
        extractor_done: false,
        decoder_done: false,
        encoder_done: false,
        encoder_eos_queued: false,
        scratch: Vec::new(),
        events: 0,
        stats: PumpStats::default(),
    };
    pump.run()
}

struct TranscodePump<'a, D: ?Sized, E: ?Sized, W: ?Sized> {
    source: &'a mut dyn Demuxer,
    decoder: &'a mut D,
    encoder: &'a mut E,
    output: &'a mut W,
    sample_rate: u32,
    bytes_per_frame: usize,
    config: PumpConfig,

    extractor_done: bool,
    decoder_done: bool,
    encoder_done: bool,
    encoder_eos_queued: bool,

    scratch: Vec<u8>,
    // Bumped on every buffer that changes hands; used to detect stalls.
    events: u64,
    stats: PumpStats,
}

impl<D, E, W> TranscodePump<'_, D, E, W>
where
    D: CodecSession + ?Sized,
    E: CodecSession + ?Sized,
    W: Write + ?Sized,
{
    fn run(mut self) -> Result<PumpStats> {
        let mut idle_iterations = 0u32;

        while !self.encoder_done {
            let before = self.events;

            self.drain_encoder(Duration::ZERO)?;

            if !self.extractor_done {
                self.feed_decoder()?;
            }

            if !self.decoder_done {
                self.drain_decoder()?;
            }

            if self.decoder_done && !self.encoder_eos_queued {
                self.signal_encoder_eos()?;
            }

            self.drain_encoder(self.config.poll_timeout)?;

            if self.events == before {
                idle_iterations += 1;
                self.check_stall(idle_iterations, "pump loop")?;
            } else {
                idle_iterations = 0;
            }
        }

        self.output.flush().map_err(Error::OutputWrite)?;

        debug!(
            samples_in = self.stats.samples_in,
            pcm_bytes = self.stats.pcm_bytes,
            encoder_pushes = self.stats.encoder_pushes,
            bytes_out = self.stats.bytes_out,
            "transcode finished"
        );
        Ok(self.stats)
    }

    fn drain_encoder(&mut self, timeout: Duration) -> Result<()> {
        loop {
            let out = match self.encoder.try_retrieve_output(timeout)? {
                Dequeued::TryAgainLater => return Ok(()),
                Dequeued::FormatChanged => continue,
                Dequeued::Buffer(out) => out,
            };
            self.events += 1;

            if !out.info.flags.codec_config && !out.data.is_empty() {
                self.output
                    .write_all(&out.data)
                    .map_err(Error::OutputWrite)?;
                self.stats.bytes_out += out.data.len() as u64;
            }

            let eos = out.info.flags.end_of_stream;
            self.encoder.release_output(out.index)?;

            if eos {
                self.encoder_done = true;
                return Ok(());
            }
        }
    }

    fn feed_decoder(&mut self) -> Result<()> {
        let Some(mut input) = self.decoder.try_acquire_input(self.config.poll_timeout)? else {
            return Ok(());
        };
        self.events += 1;

        let Some(sample) = self.source.read_sample(&mut self.scratch)? else {
            self.decoder.queue_input(
                input,
                BufferInfo {
                    size: 0,
                    pts_us: 0,
                    flags: BufferFlags::end_of_stream(),
                },
            )?;
            self.extractor_done = true;
            trace!("decoder end-of-stream queued");
            return Ok(());
        };

        if sample.size > input.capacity() {
            return Err(Error::codec(format!(
                "sample of {} bytes exceeds decoder input buffer of {} bytes",
                sample.size,
                input.capacity()
            )));
        }

        input.fill(&self.scratch);
        self.decoder.queue_input(
            input,
            BufferInfo {
                size: sample.size,
                pts_us: sample.pts_us,
                flags: BufferFlags::key_frame(sample.is_sync),
            },
        )?;
        self.stats.samples_in += 1;
        Ok(())
    }

    fn drain_decoder(&mut self) -> Result<()> {
        let out = match self.decoder.try_retrieve_output(self.config.poll_timeout)? {
            Dequeued::TryAgainLater | Dequeued::FormatChanged => return Ok(()),
            Dequeued::Buffer(out) => out,
        };
        self.events += 1;

        if !out.data.is_empty() {
            self.forward_pcm(&out.data, out.info.pts_us)?;
        }

        self.decoder.release_output(out.index)?;

        if out.info.flags.end_of_stream {
            self.decoder_done = true;
            trace!("decoder drained");
        }
        Ok(())
    }

    /// Re-chunk one decoded buffer into however many encoder inputs it takes.
    fn forward_pcm(&mut self, pcm: &[u8], base_pts_us: i64) -> Result<()> {
        let mut offset = 0;
        let mut misses = 0u32;

        while offset < pcm.len() {
            let Some(mut input) = self.encoder.try_acquire_input(self.config.poll_timeout)? else {
                // Encoder input is full because its output was not collected yet.
                let before = self.events;
                self.drain_encoder(Duration::ZERO)?;
                if self.events == before {
                    misses += 1;
                    self.check_stall(misses, "waiting for encoder input")?;
                }
                continue;
            };
            misses = 0;
            self.events += 1;

            let copied = input.fill(&pcm[offset..]);
            if copied == 0 {
                return Err(Error::codec("encoder input buffer has no capacity"));
            }

            let pts_us =
                chunk_timestamp_us(base_pts_us, offset, self.bytes_per_frame, self.sample_rate);
            self.encoder.queue_input(
                input,
                BufferInfo {
                    size: copied,
                    pts_us,
                    flags: BufferFlags::default(),
                },
            )?;

            offset += copied;
            self.stats.encoder_pushes += 1;
            self.stats.last_pcm_pts_us = Some(pts_us);
        }

        self.stats.pcm_bytes += pcm.len() as u64;
        Ok(())
    }

    fn signal_encoder_eos(&mut self) -> Result<()> {
        let mut misses = 0u32;
        loop {
            if let Some(input) = self.encoder.try_acquire_input(self.config.poll_timeout)? {
                self.encoder.queue_input(
                    input,
                    BufferInfo {
                        size: 0,
                        pts_us: 0,
                        flags: BufferFlags::end_of_stream(),
                    },
                )?;
                self.encoder_eos_queued = true;
                self.events += 1;
                trace!("encoder end-of-stream queued");
                return Ok(());
            }

            let before = self.events;
            self.drain_encoder(Duration::ZERO)?;
            if self.events == before {
                misses += 1;
                self.check_stall(misses, "waiting to queue encoder end-of-stream")?;
            }
        }
    }

    fn check_stall(&self, idle: u32, stage: &str) -> Result<()> {
        if idle < self.config.stall_limit {
            return Ok(());
        }
        Err(Error::codec(format!(
            "{stage}: no progress from {} / {} after {idle} polls",
            self.decoder.name(),
            self.encoder.name()
        )))
    }
}
