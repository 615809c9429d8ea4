use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use mp4::{
    AacConfig, AudioObjectType, AvcConfig, ChannelConfig, MediaConfig, Mp4Config, Mp4Reader,
    Mp4Sample, Mp4Writer, SampleFreqIndex, TrackConfig, TrackType,
};

use vidaudio::mux::patch_sl_config;
use vidaudio::{AudioExtractor, MediaAudioExtractor};

const FRAME: u64 = 1024;
const SAMPLES: u32 = 40;

fn payload(i: u32) -> Vec<u8> {
    // Varying sizes so misplaced samples show up as byte mismatches.
    (0..(20 + i * 3)).map(|b| (b as u8).wrapping_mul(7) ^ i as u8).collect()
}

fn aac_track() -> TrackConfig {
    TrackConfig {
        track_type: TrackType::Audio,
        timescale: 48_000,
        language: "und".to_owned(),
        media_conf: MediaConfig::AacConfig(AacConfig {
            bitrate: 128_000,
            profile: AudioObjectType::AacLowComplexity,
            freq_index: SampleFreqIndex::Freq48000,
            chan_conf: ChannelConfig::Stereo,
        }),
    }
}

fn avc_track() -> TrackConfig {
    TrackConfig {
        track_type: TrackType::Video,
        timescale: 90_000,
        language: "und".to_owned(),
        media_conf: MediaConfig::AvcConfig(AvcConfig {
            width: 320,
            height: 240,
            seq_param_set: vec![0x67, 0x42, 0xc0, 0x1e, 0xd9, 0x01, 0x40, 0x7b, 0x20],
            pic_param_set: vec![0x68, 0xce, 0x3c, 0x80],
        }),
    }
}

fn sample(start_time: u64, duration: u32, bytes: Vec<u8>) -> Mp4Sample {
    Mp4Sample {
        start_time,
        duration,
        rendering_offset: 0,
        is_sync: true,
        bytes: Bytes::from(bytes),
    }
}

fn config() -> Result<Mp4Config> {
    Ok(Mp4Config {
        major_brand: "isom".parse()?,
        minor_version: 512,
        compatible_brands: vec!["isom".parse()?, "mp41".parse()?],
        timescale: 1000,
    })
}

fn create(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

/// Write an MP4 holding `video_samples` AVC samples on track 1 (when non-zero) followed by
/// the AAC track, with a conformant `esds`.
fn write_source(path: &Path, video_samples: u32) -> Result<()> {
    let mut writer = Mp4Writer::write_start(create(path)?, &config()?)?;

    let audio_track = if video_samples > 0 {
        writer.add_track(&avc_track())?;
        2
    } else {
        1
    };
    writer.add_track(&aac_track())?;

    for i in 0..SAMPLES.max(video_samples) {
        if i < video_samples {
            writer.write_sample(1, &sample(u64::from(i) * 3000, 3000, vec![0x65; 64]))?;
        }
        if i < SAMPLES {
            writer.write_sample(
                audio_track,
                &sample(u64::from(i) * FRAME, FRAME as u32, payload(i)),
            )?;
        }
    }
    writer.write_end()?;

    let mut file = writer.into_writer();
    patch_sl_config(&mut file)?;
    Ok(())
}

fn open_reader(path: &Path) -> Result<Mp4Reader<BufReader<File>>> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    Ok(Mp4Reader::read_header(BufReader::new(file), size)?)
}

fn remux_and_check(source: &Path, output: &Path) -> Result<()> {
    let mut out = create(output)?;
    MediaAudioExtractor::default().extract_audio(source, &mut out, "audio/mp4")?;
    drop(out);

    let mut reader = open_reader(output)?;
    assert_eq!(reader.major_brand().to_string(), "M4A ");
    assert_eq!(reader.tracks().len(), 1);

    let track_id = *reader.tracks().keys().next().context("no track in output")?;
    let track = &reader.tracks()[&track_id];
    assert_eq!(track.track_type()?, TrackType::Audio);
    assert_eq!(track.timescale(), 48_000);

    assert_eq!(reader.sample_count(track_id)?, SAMPLES);
    for i in 0..SAMPLES {
        let sample = reader
            .read_sample(track_id, i + 1)?
            .with_context(|| format!("sample {i} missing"))?;
        assert_eq!(sample.start_time, u64::from(i) * FRAME, "sample {i}");
        assert_eq!(sample.duration, FRAME as u32, "sample {i}");
        assert!(sample.is_sync);
        assert_eq!(sample.bytes.as_ref(), payload(i).as_slice(), "sample {i}");
    }
    Ok(())
}

#[test]
fn aac_source_is_remuxed_sample_for_sample() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("movie.mp4");
    write_source(&source, 0)?;

    remux_and_check(&source, &dir.path().join("movie.m4a"))
}

#[test]
fn audio_track_after_video_track_is_selected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("clip.mp4");
    write_source(&source, 12)?;

    remux_and_check(&source, &dir.path().join("clip.m4a"))
}

#[test]
fn remuxed_output_can_be_remuxed_again() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("movie.mp4");
    let first = dir.path().join("first.m4a");
    write_source(&source, 0)?;
    remux_and_check(&source, &first)?;

    // Only a conformant esds survives a second pass through the demuxer.
    remux_and_check(&first, &dir.path().join("second.m4a"))
}
