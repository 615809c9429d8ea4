use std::f32::consts::PI;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use vidaudio::codec::mp3::MP3_FRAME_SAMPLES;
use vidaudio::{
    AudioExtractor, BatchEvent, BatchExtractor, CustomTree, Error, MediaAudioExtractor,
};

const SAMPLE_RATE: u32 = 44_100;

fn write_tone(dir: &Path, name: &str, channels: u16, frames: u32) -> Result<PathBuf> {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec)?;
    for n in 0..frames {
        let t = n as f32 / SAMPLE_RATE as f32;
        let value = ((2.0 * PI * 440.0 * t).sin() * 0.4 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }
    writer.finalize()?;
    Ok(path)
}

/// Decode an MP3 file and return (frames, sample rate, channels).
fn decode_mp3(path: &Path) -> Result<(u64, u32, usize)> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut reader = probed.format;
    let track = reader.default_track().context("mp3 has no track")?;
    let track_id = track.id;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut frames = 0u64;
    let mut rate = 0;
    let mut channels = 0;
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                frames += decoded.frames() as u64;
                rate = decoded.spec().rate;
                channels = decoded.spec().channels.count();
            }
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok((frames, rate, channels))
}

#[test]
fn wav_transcodes_to_mp3_of_matching_duration() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source_frames = SAMPLE_RATE;
    let wav = write_tone(dir.path(), "tone.wav", 2, source_frames)?;
    let mp3 = dir.path().join("tone.mp3");

    let extractor = MediaAudioExtractor::default();
    let mut out = File::create(&mp3)?;
    extractor.extract_audio(&wav, &mut out, "audio/mpeg")?;
    drop(out);

    assert!(fs::metadata(&mp3)?.len() > 0);

    let (frames, rate, channels) = decode_mp3(&mp3)?;
    assert_eq!(rate, SAMPLE_RATE);
    assert_eq!(channels, 2);

    // Encoder delay and final-frame padding add at most a few frames.
    let slack = 4 * MP3_FRAME_SAMPLES as u64;
    let source = u64::from(source_frames);
    assert!(
        frames + slack >= source && frames <= source + slack,
        "decoded {frames} frames from {source} source frames"
    );
    Ok(())
}

#[test]
fn mono_source_stays_mono() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wav = write_tone(dir.path(), "mono.wav", 1, SAMPLE_RATE / 2)?;
    let mp3 = dir.path().join("mono.mp3");

    let mut out = File::create(&mp3)?;
    MediaAudioExtractor::default().extract_audio(&wav, &mut out, "audio/mpeg")?;
    drop(out);

    let (_, _, channels) = decode_mp3(&mp3)?;
    assert_eq!(channels, 1);
    Ok(())
}

#[test]
fn non_aac_source_cannot_be_remuxed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wav = write_tone(dir.path(), "tone.wav", 2, 4410)?;

    let mut out = tempfile::tempfile()?;
    let err = MediaAudioExtractor::default()
        .extract_audio(&wav, &mut out, "audio/mp4")
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedCodec(_)), "got {err:?}");
    Ok(())
}

#[test]
fn batch_falls_back_to_mp3_for_pcm_sources() -> Result<()> {
    let inputs = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let wav = write_tone(inputs.path(), "tone.wav", 2, SAMPLE_RATE / 4)?;

    let extractor = MediaAudioExtractor::default();
    let destination = CustomTree::new(out.path());
    let mut events = Vec::new();
    let outcome =
        BatchExtractor::new(&extractor, &destination).run(&[wav], &mut |e| events.push(e));

    assert_eq!((outcome.success_count, outcome.total), (1, 1));
    assert!(outcome.results[0].fell_back);
    assert!(events.contains(&BatchEvent::FallbackToMp3 {
        input_name: "tone.wav".to_owned()
    }));

    // The failed M4A attempt was rolled back.
    assert!(!out.path().join("tone.m4a").exists());
    assert!(fs::metadata(out.path().join("tone.mp3"))?.len() > 0);
    Ok(())
}
