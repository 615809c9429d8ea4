// src/demux.rs

//! Demux helpers for Symphonia.
//!
//! This module keeps container probing and sample iteration isolated from the
//! remux and transcode paths.
//!
//! Responsibilities:
//! - Probe a `MediaSource` and describe every track as a [`TrackFormat`]
//! - Pick the first audio track (media type starting with `audio/`)
//! - Iterate compressed samples of the selected track only, with timestamps in microseconds

use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::CodecParameters;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use tracing::debug;

use crate::error::{Error, Result};
use crate::media::{Sample, SampleInfo, TrackFormat};

/// A container reader positioned on one selected track.
///
/// The cursor is pull-based: each `read_sample` call yields the next sample of the
/// selected track, or `None` once the track is exhausted.
pub trait Demuxer {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> Option<&TrackFormat>;

    /// Restrict the cursor to one track. Samples of other tracks are skipped.
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Copy the next sample of the selected track into `buf` (replacing its contents).
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleInfo>>;

    /// Owned variant of [`Demuxer::read_sample`].
    fn next_sample(&mut self) -> Result<Option<Sample>> {
        let mut data = Vec::new();
        Ok(self
            .read_sample(&mut data)?
            .map(|info| Sample { data, info }))
    }
}

/// Scan tracks in source order, select the first audio track and return its index and format.
pub fn open_audio_track(demuxer: &mut dyn Demuxer) -> Result<(usize, TrackFormat)> {
    let found = (0..demuxer.track_count()).find_map(|index| {
        demuxer
            .track_format(index)
            .filter(|format| format.is_audio())
            .map(|format| (index, format.clone()))
    });

    let (index, format) = found.ok_or(Error::NoAudioTrack)?;
    demuxer.select_track(index)?;

    debug!(track = index, mime = %format.mime, "selected audio track");
    Ok((index, format))
}

struct TrackEntry {
    id: u32,
    format: TrackFormat,
    time_base: Option<TimeBase>,
}

/// [`Demuxer`] backed by Symphonia's format readers.
pub struct SymphoniaDemuxer {
    reader: Box<dyn FormatReader>,
    tracks: Vec<TrackEntry>,
    selected: Option<usize>,
}

impl SymphoniaDemuxer {
    /// Probe a media source.
    ///
    /// `hint_extension` can improve probe accuracy for ambiguous inputs
    /// (e.g. "mp4", "mkv", "webm", "ts").
    pub fn open(source: Box<dyn MediaSource>, hint_extension: Option<&str>) -> Result<Self> {
        let mss_opts = MediaSourceStreamOptions {
            // Symphonia expects a power-of-two buffer > 32KiB for good probing behavior.
            buffer_len: 256 * 1024,
        };
        let mss = MediaSourceStream::new(source, mss_opts);

        let mut hint = Hint::new();
        if let Some(ext) = hint_extension {
            hint.with_extension(ext);
        }

        let format_opts: FormatOptions = Default::default();
        let metadata_opts: MetadataOptions = Default::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| Error::SourceOpen(format!("failed to probe media stream: {e}")))?;

        let reader = probed.format;
        let tracks = reader
            .tracks()
            .iter()
            .map(|t| {
                let mut format = TrackFormat::from_codec_params(t.codec_params.clone());
                if let Some(size) = declared_max_input_size(&t.codec_params) {
                    format = format.with_max_input_size(size);
                }
                TrackEntry {
                    id: t.id,
                    format,
                    time_base: t.codec_params.time_base,
                }
            })
            .collect();

        Ok(Self {
            reader,
            tracks,
            selected: None,
        })
    }

    /// Open a file on disk, using its extension as the probe hint.
    pub fn open_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::SourceOpen(format!("{}: {e}", path.display())))?;
        let ext = path.extension().and_then(|e| e.to_str());
        Self::open(Box::new(file), ext)
    }

    fn to_micros(&self, entry: usize, ts: u64) -> i64 {
        let entry = &self.tracks[entry];
        let time_base = entry.time_base.or_else(|| {
            entry
                .format
                .sample_rate()
                .filter(|rate| *rate > 0)
                .map(|rate| TimeBase::new(1, rate))
        });

        match time_base {
            Some(tb) if tb.denom > 0 => {
                (ts as i128 * 1_000_000 * tb.numer as i128 / tb.denom as i128) as i64
            }
            _ => ts as i64,
        }
    }

    fn duration_micros(&self, entry: usize, dur: u64) -> u64 {
        self.to_micros(entry, dur).max(0) as u64
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Option<&TrackFormat> {
        self.tracks.get(index).map(|t| &t.format)
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(Error::Demux(format!("track {index} does not exist")));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleInfo>> {
        let selected = self
            .selected
            .ok_or_else(|| Error::Demux("no track selected".to_owned()))?;
        let track_id = self.tracks[selected].id;

        loop {
            let Some(packet) = next_packet(&mut self.reader)? else {
                return Ok(None);
            };

            // Other tracks are skipped, never buffered.
            if packet.track_id() != track_id {
                continue;
            }

            buf.clear();
            buf.extend_from_slice(packet.buf());

            return Ok(Some(SampleInfo {
                size: buf.len(),
                pts_us: self.to_micros(selected, packet.ts()),
                duration_us: self.duration_micros(selected, packet.dur()),
                // Symphonia only demuxes audio, where every access unit is a sync sample.
                is_sync: true,
            }));
        }
    }
}

/// Largest packet a track can produce, when its container fixes it.
///
/// Only uncompressed layouts (one frame per block, fixed bits per coded sample) declare it;
/// Symphonia does not surface `stsz` maxima for compressed tracks.
fn declared_max_input_size(params: &CodecParameters) -> Option<usize> {
    if params.frames_per_block != Some(1) {
        return None;
    }
    let frames = params.max_frames_per_packet?;
    let bytes_per_sample = u64::from(params.bits_per_coded_sample?).div_ceil(8);
    let channels = params.channels?.count() as u64;

    let size = frames.checked_mul(channels)?.checked_mul(bytes_per_sample)?;
    usize::try_from(size).ok().filter(|size| *size > 0)
}

/// Read the next packet, treating IO errors as "end of stream".
///
/// - `Ok(None)` means EOF or stream ended
/// - other errors are surfaced as [`Error::Demux`]
fn next_packet(reader: &mut Box<dyn FormatReader>) -> Result<Option<Packet>> {
    match reader.next_packet() {
        Ok(p) => Ok(Some(p)),
        Err(SymphoniaError::IoError(_)) => Ok(None),
        Err(e) => Err(Error::Demux(format!("failed reading packet: {e}"))),
    }
}
