// src/remux.rs

//! Remux path: copy compressed samples from the source track into an M4A container.
//!
//! No decoding happens here. Samples flow one at a time through a single reusable
//! buffer sized to the track's declared maximum sample size.

use std::io::{Read, Seek, Write};

use tracing::debug;

use crate::demux::Demuxer;
use crate::error::{Error, Result};
use crate::media::TrackFormat;
use crate::mux::M4aMuxer;

/// Stream every remaining sample of the selected track into `muxer`.
///
/// Registers the output track first, so `muxer` must not have been started. Returns the
/// number of samples copied. The caller finalizes the container.
pub fn remux<W: Read + Write + Seek>(
    source: &mut dyn Demuxer,
    format: &TrackFormat,
    muxer: &mut M4aMuxer<W>,
    default_buffer_size: usize,
) -> Result<u64> {
    let track = muxer.start_output(format)?;

    let capacity = format.max_input_size.unwrap_or(default_buffer_size);
    let mut buf = Vec::with_capacity(capacity);
    let mut copied = 0u64;

    while let Some(info) = source.read_sample(&mut buf)? {
        if info.size > capacity {
            return Err(Error::Demux(format!(
                "sample of {} bytes exceeds the {capacity}-byte sample buffer",
                info.size
            )));
        }

        muxer.write_sample(track, &buf[..info.size], &info)?;
        copied += 1;
    }

    debug!(samples = copied, "remux copied all samples");
    Ok(copied)
}
