// src/batch.rs

//! Batch runner and output format selection policy.
//!
//! Responsibilities:
//! - process inputs strictly one after another, in order
//! - try M4A first and fall back to MP3 once per failing input
//! - announce the fallback at most once per batch
//! - isolate failures: one bad input never stops the batch
//! - commit successful outputs, roll back everything else
//! - stop at the next input boundary when cancelled

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};

use crate::destination::AudioOutputDestination;
use crate::error::Result;
use crate::extractor::AudioExtractor;
use crate::input::{ResolvedInput, output_base_name, resolve_input};
use crate::media::OutputFormat;

/// A committed output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputResult {
    pub display_name: String,
    pub output_path: PathBuf,
}

/// Progress notifications emitted while a batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Succeeded(OutputResult),

    /// M4A failed for some input and MP3 is being tried. Emitted at most once per batch.
    FallbackToMp3 { input_name: String },

    Failed { input_name: String, reason: String },

    Finished { success_count: usize, total: usize },
}

/// What happened to one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputOutcome {
    pub input: PathBuf,
    pub input_name: String,
    pub result: std::result::Result<OutputResult, String>,

    /// True when the M4A attempt failed and MP3 was tried.
    pub fell_back: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub total: usize,

    /// One entry per processed input, in input order.
    pub results: Vec<InputOutcome>,

    /// The batch stopped early; inputs after the last result were never started.
    pub cancelled: bool,
}

pub struct BatchExtractor<'a> {
    extractor: &'a dyn AudioExtractor,
    destination: &'a dyn AudioOutputDestination,
    preferred: OutputFormat,
    cancel: Arc<AtomicBool>,
}

impl<'a> BatchExtractor<'a> {
    pub fn new(
        extractor: &'a dyn AudioExtractor,
        destination: &'a dyn AudioOutputDestination,
    ) -> Self {
        Self {
            extractor,
            destination,
            preferred: OutputFormat::M4a,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Format tried first. Forcing `Mp3` disables the fallback.
    pub fn with_preferred_format(mut self, format: OutputFormat) -> Self {
        self.preferred = format;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Flag that stops the batch before its next input once set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn run(&self, inputs: &[PathBuf], on_event: &mut dyn FnMut(BatchEvent)) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            total: inputs.len(),
            ..BatchOutcome::default()
        };
        let mut fallback_notified = false;

        for input in inputs {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(
                    remaining = inputs.len() - outcome.results.len(),
                    "batch cancelled"
                );
                outcome.cancelled = true;
                break;
            }

            let result = self.extract_one(input, &mut fallback_notified, on_event);
            match &result.result {
                Ok(output) => {
                    outcome.success_count += 1;
                    on_event(BatchEvent::Succeeded(output.clone()));
                }
                Err(reason) => on_event(BatchEvent::Failed {
                    input_name: result.input_name.clone(),
                    reason: reason.clone(),
                }),
            }
            outcome.results.push(result);
        }

        info!(
            success = outcome.success_count,
            total = outcome.total,
            "batch finished"
        );
        on_event(BatchEvent::Finished {
            success_count: outcome.success_count,
            total: outcome.total,
        });
        outcome
    }

    fn extract_one(
        &self,
        path: &Path,
        fallback_notified: &mut bool,
        on_event: &mut dyn FnMut(BatchEvent),
    ) -> InputOutcome {
        let mut outcome = InputOutcome {
            input: path.to_path_buf(),
            input_name: path.display().to_string(),
            result: Err(String::new()),
            fell_back: false,
        };

        let input = match resolve_input(path) {
            Ok(input) => input,
            Err(err) => {
                error!(input = %path.display(), error = %err, "input rejected");
                outcome.result = Err(err.to_string());
                return outcome;
            }
        };
        outcome.input_name = input.display_name.clone();

        // Inputs without audio fail before any output exists.
        if let Err(err) = self.extractor.probe(&input.path) {
            error!(input = %input.display_name, error = %err, "probe failed");
            outcome.result = Err(err.to_string());
            return outcome;
        }

        let base = output_base_name(Some(&input.display_name));
        let first = self.attempt(&input, &base, self.preferred);

        outcome.result = match first {
            Ok(output) => Ok(output),
            Err(err) if self.preferred == OutputFormat::M4a => {
                warn!(input = %input.display_name, error = %err, "m4a failed, falling back to mp3");
                outcome.fell_back = true;
                if !*fallback_notified {
                    *fallback_notified = true;
                    on_event(BatchEvent::FallbackToMp3 {
                        input_name: input.display_name.clone(),
                    });
                }
                self.attempt(&input, &base, OutputFormat::Mp3)
                    .map_err(|e| e.to_string())
            }
            Err(err) => Err(err.to_string()),
        };

        if let Err(reason) = &outcome.result {
            error!(input = %input.display_name, reason = %reason, "extraction failed");
        }
        outcome
    }

    fn attempt(
        &self,
        input: &ResolvedInput,
        base: &str,
        format: OutputFormat,
    ) -> Result<OutputResult> {
        let requested = format!("{base}.{}", format.extension());
        let mut created = self
            .destination
            .create(&requested, format.mime())
            .inspect_err(|err| {
                error!(name = %requested, mime = format.mime(), error = %err, "create output failed");
            })?;

        match self
            .extractor
            .extract_audio(&input.path, &mut created.file, format.mime())
        {
            Ok(()) => {
                let result = OutputResult {
                    display_name: created.display_name.clone(),
                    output_path: created.output_path.clone(),
                };
                created.commit()?;
                info!(output = %result.output_path.display(), "extraction committed");
                Ok(result)
            }
            Err(err) => {
                error!(
                    input = %input.path.display(),
                    output = %created.output_path.display(),
                    error = %err,
                    "extract failed"
                );
                let output = created.output_path.clone();
                if let Err(rollback_err) = created.rollback() {
                    error!(output = %output.display(), error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
