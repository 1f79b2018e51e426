//! Per-paragraph synthesis loop.
//!
//! The driver turns an ordered list of paragraphs into `audio_{N}.wav` files
//! (N is the 1-based paragraph position), keeps going past individual
//! failures, and writes one `.docx` report listing every paragraph that failed
//! or was flagged as possibly truncated.

use std::path::{Path, PathBuf};

use crate::config::{Language, DEFAULT_LENGTH_LIMIT_MARKER};
use crate::document::DocxBuilder;
use crate::text::{split_sentences, KeepSentences, SentenceProcessor};
use crate::{Error, SynthesisEngine, SynthesisParams, SynthesisResult};

/// Suffix given to outputs whose synthesis hit the engine's length limit.
pub const FLAGGED_SUFFIX: &str = "__possible_error";

const FLAG_REASON: &str =
    "Flag: audio may be incomplete; the text exceeded the model's length limit";

/// Output file name for the paragraph at 1-based `index`.
pub fn audio_file_name(index: usize) -> String {
    format!("audio_{index}.wav")
}

/// Output file name for a flagged paragraph at 1-based `index`.
pub fn flagged_file_name(index: usize) -> String {
    format!("audio_{index}{FLAGGED_SUFFIX}.wav")
}

/// Report file name for a run writing into `output_folder`.
pub fn report_file_name(output_folder: &Path) -> String {
    let stem = output_folder
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("run");
    format!("{stem}_errors.docx")
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Pending,
    Succeeded,
    /// No usable audio. `length_exceeded` is set when the error text carries
    /// the engine's length-limit marker.
    Failed {
        message: String,
        length_exceeded: bool,
    },
    /// Audio was written but the engine reported the text was too long.
    Flagged { diagnostics: String },
}

/// One paragraph of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphJob {
    /// 1-based position in the source document.
    pub index: usize,
    pub text: String,
    pub output_path: PathBuf,
    pub outcome: JobOutcome,
}

impl ParagraphJob {
    /// Whether an audio file exists for this paragraph.
    pub fn produced_audio(&self) -> bool {
        matches!(self.outcome, JobOutcome::Succeeded | JobOutcome::Flagged { .. })
    }

    /// Whether the paragraph belongs in the error report.
    pub fn needs_review(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed { .. } | JobOutcome::Flagged { .. })
    }
}

/// Aggregate of all paragraphs processed for one document.
#[derive(Debug, Clone)]
pub struct SynthesisRun {
    pub output_folder: PathBuf,
    pub language: Language,
    pub voice: PathBuf,
    pub jobs: Vec<ParagraphJob>,
    /// Set when a report was written.
    pub report_path: Option<PathBuf>,
}

impl SynthesisRun {
    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    /// Paragraphs with an audio file, flagged ones included.
    pub fn generated(&self) -> usize {
        self.jobs.iter().filter(|job| job.produced_audio()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ParagraphJob> {
        self.jobs
            .iter()
            .filter(|job| matches!(job.outcome, JobOutcome::Failed { .. }))
    }

    pub fn flagged(&self) -> impl Iterator<Item = &ParagraphJob> {
        self.jobs
            .iter()
            .filter(|job| matches!(job.outcome, JobOutcome::Flagged { .. }))
    }

    pub fn is_clean(&self) -> bool {
        !self.jobs.iter().any(ParagraphJob::needs_review)
    }
}

/// Receives progress updates while a run is processing.
pub trait ProgressObserver {
    fn on_paragraph_start(&mut self, _index: usize, _total: usize) {}
    fn on_paragraph_finished(&mut self, _job: &ParagraphJob, _total: usize) {}
}

/// Observer that ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Synthesizes paragraphs one by one with a borrowed engine.
pub struct SynthesisDriver<'e, E: SynthesisEngine + ?Sized> {
    engine: &'e mut E,
    params: SynthesisParams,
    processor: Box<dyn SentenceProcessor + 'e>,
    length_limit_marker: String,
}

impl<'e, E: SynthesisEngine + ?Sized> SynthesisDriver<'e, E> {
    /// Driver with no sentence post-processing and the XTTS length-limit marker.
    pub fn new(engine: &'e mut E, params: SynthesisParams) -> Self {
        Self {
            engine,
            params,
            processor: Box::new(KeepSentences),
            length_limit_marker: DEFAULT_LENGTH_LIMIT_MARKER.to_string(),
        }
    }

    pub fn with_processor(mut self, processor: Box<dyn SentenceProcessor + 'e>) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_length_limit_marker(mut self, marker: impl Into<String>) -> Self {
        self.length_limit_marker = marker.into();
        self
    }

    /// Synthesize every paragraph into `output_folder`.
    ///
    /// Individual paragraph failures are recorded on their job. Only failing
    /// to create the folder or to write the report aborts the run.
    pub fn run(
        &mut self,
        paragraphs: &[String],
        output_folder: &Path,
        observer: &mut dyn ProgressObserver,
    ) -> Result<SynthesisRun, Error> {
        std::fs::create_dir_all(output_folder)?;

        let total = paragraphs.len();
        let mut jobs: Vec<ParagraphJob> = paragraphs
            .iter()
            .enumerate()
            .map(|(i, text)| ParagraphJob {
                index: i + 1,
                text: text.clone(),
                output_path: output_folder.join(audio_file_name(i + 1)),
                outcome: JobOutcome::Pending,
            })
            .collect();

        log::info!(
            "Synthesizing {total} paragraphs into {}",
            output_folder.display()
        );

        for job in jobs.iter_mut() {
            observer.on_paragraph_start(job.index, total);
            log::info!("Processing paragraph {}/{total}", job.index);
            self.process_job(job, output_folder);
            observer.on_paragraph_finished(job, total);
        }

        let mut run = SynthesisRun {
            output_folder: output_folder.to_path_buf(),
            language: self.params.language,
            voice: self.params.voice.clone(),
            jobs,
            report_path: None,
        };

        let report_path = output_folder.join(report_file_name(output_folder));
        if run.is_clean() {
            remove_stale(&report_path);
        } else {
            write_report(&run.jobs, &report_path)?;
            log::warn!(
                "{} paragraphs need review, listed in {}",
                run.jobs.iter().filter(|job| job.needs_review()).count(),
                report_path.display()
            );
            run.report_path = Some(report_path);
        }

        log::info!(
            "Completed! {}/{} files generated",
            run.generated(),
            run.total()
        );
        Ok(run)
    }

    /// Synthesize one piece of text into a single clip.
    ///
    /// The text is split into sentences and post-processed, then handed to
    /// the engine as one paragraph request.
    pub fn synthesize_text(&mut self, text: &str) -> Result<SynthesisResult, Error> {
        let sentences: Vec<String> = self
            .processor
            .process(split_sentences(text))
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if sentences.is_empty() {
            return Err(Error::Engine("no speakable text".to_string()));
        }

        let clip = self
            .engine
            .synthesize_sentences(&sentences, &self.params)
            .map_err(Error::from_engine)?;
        if clip.samples.is_empty() {
            return Err(Error::Engine(
                format!("engine produced no audio. {}", clip.diagnostics)
                    .trim_end()
                    .to_string(),
            ));
        }
        Ok(clip)
    }

    fn process_job(&mut self, job: &mut ParagraphJob, output_folder: &Path) {
        let flagged = output_folder.join(flagged_file_name(job.index));
        remove_stale(&job.output_path);
        remove_stale(&flagged);

        let result = self
            .synthesize_text(&job.text)
            .and_then(|clip| write_output(&clip, &job.output_path).map(|()| clip));

        job.outcome = match result {
            Ok(clip) if self.mentions_length_limit(&clip.diagnostics) => {
                match std::fs::rename(&job.output_path, &flagged) {
                    Ok(()) => job.output_path = flagged,
                    Err(e) => log::error!(
                        "Could not rename {} to {}: {e}",
                        job.output_path.display(),
                        flagged.display()
                    ),
                }
                log::warn!("Paragraph {} may contain errors", job.index);
                JobOutcome::Flagged {
                    diagnostics: clip.diagnostics,
                }
            }
            Ok(_) => {
                log::info!("Audio {} written: {}", job.index, job.output_path.display());
                JobOutcome::Succeeded
            }
            Err(e) => {
                let message = e.report_message();
                log::error!("Paragraph {} failed: {message}", job.index);
                JobOutcome::Failed {
                    length_exceeded: self.mentions_length_limit(&message),
                    message,
                }
            }
        };
    }

    fn mentions_length_limit(&self, text: &str) -> bool {
        !self.length_limit_marker.is_empty()
            && text
                .to_lowercase()
                .contains(&self.length_limit_marker.to_lowercase())
    }
}

/// Write `clip` to `path` through a `.part` file so a failed write leaves no
/// truncated WAV under the final name.
fn write_output(clip: &SynthesisResult, path: &Path) -> Result<(), Error> {
    let partial = path.with_extension("wav.part");
    let written = clip
        .write_wav(&partial)
        .and_then(|()| std::fs::rename(&partial, path).map_err(Error::from));
    if written.is_err() {
        remove_stale(&partial);
    }
    written
}

/// Remove a file left by an earlier run into the same folder.
fn remove_stale(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed stale {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove stale {}: {e}", path.display()),
    }
}

/// Write the review report for every failed or flagged job.
pub fn write_report(jobs: &[ParagraphJob], path: &Path) -> Result<(), Error> {
    let mut doc = DocxBuilder::new();
    doc.heading("Paragraphs with errors", 0);
    for job in jobs.iter().filter(|job| job.needs_review()) {
        doc.heading(format!("Paragraph {}", job.index), 1);
        doc.paragraph(job.text.as_str());
        match &job.outcome {
            JobOutcome::Failed {
                message,
                length_exceeded,
            } => {
                doc.paragraph(format!("Error: {message}"));
                if *length_exceeded {
                    doc.paragraph(FLAG_REASON);
                }
            }
            JobOutcome::Flagged { .. } => {
                doc.paragraph(FLAG_REASON);
            }
            JobOutcome::Pending | JobOutcome::Succeeded => {}
        }
    }
    doc.save(path)
}
