//! `vidaudio`: extract the audio track of a video file.
//!
//! This crate provides:
//! - Container demuxing (Symphonia) and M4A muxing (`mp4`)
//! - Lossless AAC remux into M4A
//! - Decode + MP3 re-encode through a polled codec pump
//! - A batch runner that tries M4A first and falls back to MP3
//! - Filesystem output destinations with commit/rollback
//!
//! The library is designed to be driven by a CLI or any other frontend; every stage is
//! synchronous and single-threaded.

// High-level API (most consumers should start here).
pub mod batch;
pub mod extractor;
pub mod opts;

// Error taxonomy.
pub mod error;

// Media model and container plumbing.
pub mod demux;
pub mod media;
pub mod mux;

// Codec sessions and the transcode pump.
pub mod codec;
pub mod pump;
pub mod remux;

// Inputs, outputs and persisted settings.
pub mod destination;
pub mod input;
pub mod settings;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

pub use batch::{BatchEvent, BatchExtractor, BatchOutcome, InputOutcome, OutputResult};
pub use destination::{AudioOutputDestination, CreatedOutput, CustomTree, MediaDirectory};
pub use error::{Error, Result};
pub use extractor::{AudioExtractor, MediaAudioExtractor, OutputSink};
pub use media::OutputFormat;
pub use opts::ExtractOpts;
pub use settings::{OutputDirectory, Settings};
