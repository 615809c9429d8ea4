// src/mux.rs

//! Append-only M4A writer built on the `mp4` crate.
//!
//! The muxer is a small state machine: `Idle` until the single audio track is registered,
//! `Started` while samples are appended, `Finalized` once the `moov` index is written.
//! Out-of-order calls are rejected instead of producing a broken file.
//!
//! Two limits of `mp4` 0.14 shape the output:
//! - its `esds` carries an SLConfigDescriptor with `predefined = 0`, which ISO/IEC 14496-14
//!   forbids; [`M4aMuxer::finalize`] rewrites it in place through [`patch_sl_config`]
//! - it writes no edit list, so a first sample with a non-zero timestamp starts at 0 in the
//!   output; the offset is logged and dropped

use std::io::{Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use mp4::{
    AacConfig, AudioObjectType, ChannelConfig, FourCC, MediaConfig, Mp4Config, Mp4Sample,
    Mp4Writer, SampleFreqIndex, TrackConfig, TrackType,
};
use symphonia::core::codecs::CODEC_TYPE_AAC;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::media::{SampleInfo, TrackFormat};

/// Samples per AAC access unit; used when the final sample has no declared duration.
pub const AAC_FRAME_SAMPLES: u32 = 1024;

// SLConfigDescriptor as written by `mp4` 0.14, and its conformant replacement of equal size.
const SL_CONFIG_AS_WRITTEN: [u8; 3] = [0x06, 0x00, 0x00];
const SL_CONFIG_MP4: [u8; 3] = [0x06, 0x01, 0x02];

/// Identifies the audio track inside the output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackHandle(u32);

enum MuxState<W: Write + Seek> {
    Idle(W),
    Started(Started<W>),
    Finalized,
    Poisoned,
}

struct Started<W: Write + Seek> {
    writer: Mp4Writer<W>,
    track_id: u32,
    timescale: u32,
    // Held back one sample so its duration can be taken from its successor.
    pending: Option<(Bytes, SampleInfo)>,
    samples_written: u64,
}

/// M4A (MPEG-4 audio) container under construction.
pub struct M4aMuxer<W: Write + Seek> {
    state: MuxState<W>,
}

impl<W: Read + Write + Seek> M4aMuxer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            state: MuxState::Idle(writer),
        }
    }

    /// Register the single AAC track and write the container header.
    ///
    /// Must precede any [`M4aMuxer::write_sample`]. Only one track is supported.
    pub fn start_output(&mut self, format: &TrackFormat) -> Result<TrackHandle> {
        let sink = match std::mem::replace(&mut self.state, MuxState::Poisoned) {
            MuxState::Idle(sink) => sink,
            started @ MuxState::Started(_) => {
                self.state = started;
                return Err(Error::TrackAlreadyAdded);
            }
            other => {
                self.state = other;
                return Err(Error::ContainerFinalize(
                    "container already finalized".to_owned(),
                ));
            }
        };

        let aac = aac_config(format)?;
        let timescale = format.sample_rate().unwrap_or(0);

        let config = Mp4Config {
            major_brand: fourcc("M4A ")?,
            minor_version: 512,
            compatible_brands: vec![
                fourcc("M4A ")?,
                fourcc("isom")?,
                fourcc("iso2")?,
                fourcc("mp41")?,
            ],
            timescale: 1000,
        };

        let mut writer = Mp4Writer::write_start(sink, &config).map_err(mp4_write_error)?;
        writer
            .add_track(&TrackConfig {
                track_type: TrackType::Audio,
                timescale,
                language: "und".to_owned(),
                media_conf: MediaConfig::AacConfig(aac),
            })
            .map_err(mp4_write_error)?;

        debug!(timescale, "m4a container started");

        self.state = MuxState::Started(Started {
            writer,
            track_id: 1,
            timescale,
            pending: None,
            samples_written: 0,
        });
        Ok(TrackHandle(1))
    }

    /// Append one compressed sample, preserving its timestamp and sync flag.
    pub fn write_sample(
        &mut self,
        track: TrackHandle,
        data: &[u8],
        info: &SampleInfo,
    ) -> Result<()> {
        let started = self.started_mut()?;
        if track.0 != started.track_id {
            return Err(Error::OutputWrite(std::io::Error::other(format!(
                "unknown output track {}",
                track.0
            ))));
        }

        if started.samples_written == 0 && started.pending.is_none() && info.pts_us > 0 {
            warn!(
                pts_us = info.pts_us,
                "first sample starts late; m4a output has no edit list, offset dropped"
            );
        }

        let next = (Bytes::copy_from_slice(data), *info);
        if let Some((bytes, prev)) = started.pending.replace(next) {
            let duration = to_timescale(info.pts_us, started.timescale)
                .saturating_sub(to_timescale(prev.pts_us, started.timescale));
            started.write(bytes, &prev, duration)?;
        }
        Ok(())
    }

    /// Write the container index and hand back the underlying writer.
    ///
    /// Called exactly once; the output is not valid until this succeeds. The writer is left
    /// positioned at the end of the file.
    pub fn finalize(&mut self) -> Result<W> {
        let mut started = match std::mem::replace(&mut self.state, MuxState::Finalized) {
            MuxState::Started(started) => started,
            MuxState::Idle(_) => {
                return Err(Error::ContainerFinalize(
                    "container was never started".to_owned(),
                ));
            }
            MuxState::Finalized | MuxState::Poisoned => {
                return Err(Error::ContainerFinalize(
                    "container already finalized".to_owned(),
                ));
            }
        };

        if let Some((bytes, last)) = started.pending.take() {
            let declared = to_timescale(last.duration_us as i64, started.timescale);
            let duration = if declared > 0 {
                declared
            } else {
                u64::from(AAC_FRAME_SAMPLES)
            };
            started.write(bytes, &last, duration)?;
        }

        started
            .writer
            .write_end()
            .map_err(|e| Error::ContainerFinalize(e.to_string()))?;

        let mut sink = started.writer.into_writer();
        patch_sl_config(&mut sink)?;

        debug!(samples = started.samples_written, "m4a container finalized");
        Ok(sink)
    }

    fn started_mut(&mut self) -> Result<&mut Started<W>> {
        match &mut self.state {
            MuxState::Started(started) => Ok(started),
            _ => Err(Error::OutputWrite(std::io::Error::other(
                "sample written outside of a started container",
            ))),
        }
    }
}

impl<W: Write + Seek> Started<W> {
    fn write(&mut self, bytes: Bytes, info: &SampleInfo, duration: u64) -> Result<()> {
        let sample = Mp4Sample {
            start_time: to_timescale(info.pts_us, self.timescale),
            duration: u32::try_from(duration).unwrap_or(u32::MAX),
            rendering_offset: 0,
            is_sync: info.is_sync,
            bytes,
        };
        self.writer
            .write_sample(self.track_id, &sample)
            .map_err(mp4_write_error)?;
        self.samples_written += 1;
        Ok(())
    }
}

/// Rewrite every `esds` SLConfigDescriptor in the `moov` box of `stream` to
/// `predefined = 2`, the only value MP4 files may carry.
///
/// The replacement has the same size, so no box offsets move. Descriptors that are already
/// conformant are left alone. The stream is left positioned at its end.
pub fn patch_sl_config<S: Read + Write + Seek>(stream: &mut S) -> Result<()> {
    let end = stream.seek(SeekFrom::End(0)).map_err(Error::OutputWrite)?;
    let Some((moov_start, moov_len)) = find_top_level_box(stream, end, b"moov")? else {
        return Err(Error::ContainerFinalize("no moov box in output".to_owned()));
    };

    let len = usize::try_from(moov_len)
        .map_err(|_| Error::ContainerFinalize("moov box too large".to_owned()))?;
    let mut moov = vec![0u8; len];
    stream
        .seek(SeekFrom::Start(moov_start))
        .and_then(|_| stream.read_exact(&mut moov))
        .map_err(Error::OutputWrite)?;

    let mut patched = 0;
    let mut from = 0;
    while let Some(at) = find(&moov[from..], b"esds") {
        let type_at = from + at;
        from = type_at + 4;
        if type_at < 4 {
            continue;
        }

        // The SLConfigDescriptor closes the ES_Descriptor, which closes the box.
        let box_start = type_at - 4;
        let size = u32::from_be_bytes([
            moov[box_start],
            moov[box_start + 1],
            moov[box_start + 2],
            moov[box_start + 3],
        ]) as usize;
        let box_end = box_start + size;
        if size < 8 + SL_CONFIG_AS_WRITTEN.len() || box_end > moov.len() {
            continue;
        }

        let sl_at = box_end - SL_CONFIG_AS_WRITTEN.len();
        if moov[sl_at..box_end] == SL_CONFIG_AS_WRITTEN {
            stream
                .seek(SeekFrom::Start(moov_start + sl_at as u64))
                .and_then(|_| stream.write_all(&SL_CONFIG_MP4))
                .map_err(Error::OutputWrite)?;
            patched += 1;
        }
    }

    debug!(patched, "esds sl config descriptors rewritten");
    stream.seek(SeekFrom::End(0)).map_err(Error::OutputWrite)?;
    Ok(())
}

// Walk the top-level boxes and return the (offset, size) of the first `kind` box.
fn find_top_level_box<S: Read + Seek>(
    stream: &mut S,
    end: u64,
    kind: &[u8; 4],
) -> Result<Option<(u64, u64)>> {
    let mut pos = 0u64;
    while pos + 8 <= end {
        let mut header = [0u8; 8];
        stream
            .seek(SeekFrom::Start(pos))
            .and_then(|_| stream.read_exact(&mut header))
            .map_err(Error::OutputWrite)?;

        let size = match u32::from_be_bytes([header[0], header[1], header[2], header[3]]) {
            0 => end - pos,
            1 => {
                let mut large = [0u8; 8];
                stream.read_exact(&mut large).map_err(Error::OutputWrite)?;
                u64::from_be_bytes(large)
            }
            n => u64::from(n),
        };
        if size < 8 {
            return Err(Error::ContainerFinalize(format!(
                "box at offset {pos} has invalid size {size}"
            )));
        }

        if &header[4..] == kind {
            return Ok(Some((pos, size.min(end - pos))));
        }
        pos += size;
    }
    Ok(None)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Convert microseconds to track timescale units, rounding to nearest.
///
/// Rounding (rather than flooring) makes µs → timescale the exact inverse of the
/// demuxer's floor(timescale → µs) conversion for any timescale below 1 MHz.
pub fn to_timescale(pts_us: i64, timescale: u32) -> u64 {
    if pts_us <= 0 {
        return 0;
    }
    ((pts_us as u128 * timescale as u128 + 500_000) / 1_000_000) as u64
}

fn aac_config(format: &TrackFormat) -> Result<AacConfig> {
    if format.codec() != CODEC_TYPE_AAC {
        return Err(Error::unsupported(format!(
            "m4a remux needs an AAC source, found {}",
            format.mime
        )));
    }

    let (sample_rate, channels) = format.pcm_layout()?;

    // AudioSpecificConfig: the first five bits are the audio object type.
    let profile = match format.codec_config().and_then(|asc| asc.first()) {
        Some(byte) => AudioObjectType::try_from(byte >> 3)
            .map_err(|e| Error::unsupported(format!("aac object type: {e}")))?,
        None => AudioObjectType::AacLowComplexity,
    };

    Ok(AacConfig {
        bitrate: 0,
        profile,
        freq_index: freq_index(sample_rate)?,
        chan_conf: channel_config(channels)?,
    })
}

fn freq_index(sample_rate: u32) -> Result<SampleFreqIndex> {
    let index = match sample_rate {
        96_000 => SampleFreqIndex::Freq96000,
        88_200 => SampleFreqIndex::Freq88200,
        64_000 => SampleFreqIndex::Freq64000,
        48_000 => SampleFreqIndex::Freq48000,
        44_100 => SampleFreqIndex::Freq44100,
        32_000 => SampleFreqIndex::Freq32000,
        24_000 => SampleFreqIndex::Freq24000,
        22_050 => SampleFreqIndex::Freq22050,
        16_000 => SampleFreqIndex::Freq16000,
        12_000 => SampleFreqIndex::Freq12000,
        11_025 => SampleFreqIndex::Freq11025,
        8_000 => SampleFreqIndex::Freq8000,
        7_350 => SampleFreqIndex::Freq7350,
        other => {
            return Err(Error::unsupported(format!(
                "aac sample rate {other} Hz has no frequency index"
            )));
        }
    };
    Ok(index)
}

fn channel_config(channels: u16) -> Result<ChannelConfig> {
    let code = match channels {
        1..=6 => channels as u8,
        8 => 7,
        other => {
            return Err(Error::unsupported(format!(
                "aac channel count {other} has no channel configuration"
            )));
        }
    };
    ChannelConfig::try_from(code).map_err(|e| Error::unsupported(e.to_string()))
}

fn fourcc(code: &str) -> Result<FourCC> {
    code.parse::<FourCC>()
        .map_err(|e| Error::ContainerFinalize(format!("bad brand {code:?}: {e}")))
}

fn mp4_write_error(err: mp4::Error) -> Error {
    match err {
        mp4::Error::IoError(io) => Error::OutputWrite(io),
        other => Error::OutputWrite(std::io::Error::other(other.to_string())),
    }
}
