use anyhow::{Context, Result, bail};
use clap::Parser;

use std::path::PathBuf;

use vidaudio::logging;
use vidaudio::{
    BatchEvent, BatchExtractor, ExtractOpts, MediaAudioExtractor, OutputDirectory, OutputFormat,
    Settings,
};

fn main() -> Result<()> {
    logging::init();
    let params = Params::parse();

    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("HOME is not set")?;
    let settings_path = params
        .settings
        .clone()
        .unwrap_or_else(|| Settings::default_path(&home));
    let mut settings = Settings::load(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;

    if let Some(dir) = &params.output_dir {
        settings.pick_output_directory(dir, &home);
    } else if params.pictures {
        settings.output_directory = OutputDirectory::DefaultPictures;
    }

    if params.save_settings {
        settings
            .save(&settings_path)
            .with_context(|| format!("failed to save settings to {}", settings_path.display()))?;
    }

    let destination = settings.output_directory.destination(&home);
    let opts = ExtractOpts {
        preferred_format: params.format,
        mp3_bitrate: params.bitrate_kbps * 1000,
        ..ExtractOpts::default()
    };
    let extractor = MediaAudioExtractor::new(opts.clone());

    eprintln!("Writing to {}", destination.label());

    let batch = BatchExtractor::new(&extractor, destination.as_ref())
        .with_preferred_format(opts.preferred_format);
    let outcome = batch.run(&params.inputs, &mut |event| match event {
        BatchEvent::Succeeded(output) => println!("{}", output.output_path.display()),
        BatchEvent::FallbackToMp3 { input_name } => {
            eprintln!("M4A extraction failed for {input_name}; falling back to MP3")
        }
        BatchEvent::Failed { input_name, reason } => {
            eprintln!("Failed to extract audio from {input_name}: {reason}")
        }
        BatchEvent::Finished {
            success_count,
            total,
        } => eprintln!("Done: {success_count}/{total} succeeded"),
    });

    if outcome.success_count < outcome.total {
        bail!(
            "{} of {} inputs failed",
            outcome.total - outcome.success_count,
            outcome.total
        );
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "vidaudio")]
#[command(about = "Extract the audio track of video files")]
struct Params {
    /// Video files to extract audio from, processed in order.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Write into this directory instead of the configured one.
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Write into ~/Pictures/VideoUtils instead of ~/Documents/VideoUtils.
    #[arg(long = "pictures", default_value_t = false, conflicts_with = "output_dir")]
    pub pictures: bool,

    #[arg(
        short = 'f',
        long = "format",
        value_enum,
        default_value_t = OutputFormat::M4a
    )]
    pub format: OutputFormat,

    /// MP3 bitrate in kbps.
    #[arg(short = 'b', long = "bitrate", default_value_t = 128)]
    pub bitrate_kbps: u32,

    /// Settings file (defaults to ~/.config/vidaudio/settings.json).
    #[arg(long = "settings")]
    pub settings: Option<PathBuf>,

    /// Persist the chosen output directory.
    #[arg(long = "save-settings", default_value_t = false)]
    pub save_settings: bool,
}
