//! # narrate-rs
//!
//! A Rust library for narrating Word documents with voice-cloning
//! text-to-speech engines.
//!
//! ## Features
//!
//! - **Batch narration**: one WAV file per paragraph of a `.docx` document
//! - **Best-effort runs**: failing paragraphs are collected into a `.docx` report
//! - **Usage lock**: a marker file serializes runs that share one GPU-backed engine
//! - **Pluggable engines**: anything implementing [`SynthesisEngine`]
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! narrate-rs = { version = "2026.2", features = ["command"] }
//! ```
//!
//! ```ignore
//! use std::path::Path;
//! use narrate_rs::{engines::command::CommandEngine, Narrator, NoProgress, SynthesisConfig};
//!
//! let config = SynthesisConfig::default();
//! let engine = CommandEngine::from_config(&config.engine);
//! let mut narrator = Narrator::new(config, engine);
//!
//! let run = narrator.narrate_document(
//!     Path::new("chapter.docx"),
//!     Path::new("voices/narrator.wav"),
//!     &mut NoProgress,
//! )?;
//! println!("{}/{} files generated", run.generated(), run.total());
//! # Ok::<(), narrate_rs::Error>(())
//! ```

pub mod audio;
pub mod config;
pub mod document;
pub mod driver;
pub mod engines;
pub mod error;
pub mod lock;
pub mod narrator;
pub mod text;
pub mod voices;

use std::path::{Path, PathBuf};

pub use config::{Device, EngineConfig, Language, SynthesisConfig, SynthesisConfigBuilder};
pub use driver::{
    JobOutcome, NoProgress, ParagraphJob, ProgressObserver, SynthesisDriver, SynthesisRun,
};
pub use error::Error;
pub use lock::{UsageLock, UsageLockGuard};
pub use narrator::Narrator;
pub use voices::VoiceSample;

/// Boxed error returned by engine implementations.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// The result of a synthesis (text-to-speech) operation.
///
/// Contains raw f32 audio samples, the sample rate of the output audio and
/// whatever diagnostic text the engine printed while producing it.
#[derive(Debug, Clone, Default)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio
    pub sample_rate: u32,
    /// Captured engine output (warnings, progress lines)
    pub diagnostics: String,
}

impl SynthesisResult {
    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), Error> {
        audio::write_wav(path, &self.samples, self.sample_rate)
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Identifies the model an engine should load and where to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    /// Engine-specific model identifier (e.g. `tts_models/multilingual/multi-dataset/xtts_v2`)
    pub name: String,
    /// Compute device for inference
    pub device: Device,
}

/// Parameters for a single synthesis request.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    /// Reference voice sample used to clone the speaker identity.
    pub voice: PathBuf,
    /// Output language.
    pub language: Language,
    /// Speech speed multiplier.
    pub speed: f32,
}

/// Common interface for text-to-speech synthesis engines.
///
/// An engine is an exclusively owned, expensive-to-initialize resource: the
/// first run loads it, later runs reuse it. Callers must not drive one engine
/// from two runs at once.
pub trait SynthesisEngine {
    /// Load the given model, replacing any currently loaded one.
    fn load_model(&mut self, model: &ModelSpec) -> Result<(), EngineError>;

    /// Unload the currently loaded model and free associated resources.
    fn unload_model(&mut self);

    /// Whether a model is currently loaded.
    fn is_loaded(&self) -> bool;

    /// Synthesize speech from the given text.
    fn synthesize(
        &mut self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<SynthesisResult, EngineError>;

    /// Synthesize the sentences of one paragraph into a single clip.
    ///
    /// Default implementation calls [`synthesize_each`]. Engines with a high
    /// per-request cost override it to send the paragraph in one request.
    fn synthesize_sentences(
        &mut self,
        sentences: &[String],
        params: &SynthesisParams,
    ) -> Result<SynthesisResult, EngineError> {
        synthesize_each(self, sentences, params)
    }

    /// Synthesize speech from the given text and write to a WAV file.
    ///
    /// Default implementation calls `synthesize()` then `SynthesisResult::write_wav()`.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        wav_path: &Path,
        params: &SynthesisParams,
    ) -> Result<SynthesisResult, EngineError> {
        let result = self.synthesize(text, params)?;
        result.write_wav(wav_path)?;
        Ok(result)
    }
}

/// Synthesize every sentence separately and join the clips with a short
/// crossfade. Diagnostics of all sentences are concatenated.
///
/// Clips without samples are skipped; a clip whose sample rate differs from
/// the first non-empty one is an error.
pub fn synthesize_each<E: SynthesisEngine + ?Sized>(
    engine: &mut E,
    sentences: &[String],
    params: &SynthesisParams,
) -> Result<SynthesisResult, EngineError> {
    let mut combined = SynthesisResult::default();
    for sentence in sentences {
        log::debug!("Synthesizing sentence: {sentence:?}");
        let clip = engine.synthesize(sentence, params)?;

        if !clip.diagnostics.trim().is_empty() {
            if !combined.diagnostics.is_empty() {
                combined.diagnostics.push('\n');
            }
            combined.diagnostics.push_str(clip.diagnostics.trim_end());
        }
        if clip.samples.is_empty() {
            continue;
        }
        if combined.samples.is_empty() {
            combined.sample_rate = clip.sample_rate;
            combined.samples = clip.samples;
        } else if clip.sample_rate != combined.sample_rate {
            return Err(Error::Engine(format!(
                "engine changed sample rate mid-paragraph ({} Hz then {} Hz)",
                combined.sample_rate, clip.sample_rate
            ))
            .into());
        } else {
            let fade = audio::crossfade_samples(combined.sample_rate);
            audio::append_with_crossfade(&mut combined.samples, &clip.samples, fade);
        }
    }
    Ok(combined)
}
