use std::path::{Path, PathBuf};

use crate::document::load_paragraphs;
use crate::driver::{ProgressObserver, SynthesisDriver, SynthesisRun};
use crate::text::{processor_for, sanitize_name};
use crate::voices::{list_voices, VoiceSample};
use crate::{Error, SynthesisConfig, SynthesisEngine, SynthesisParams, SynthesisResult, UsageLock};

/// Front-end independent narration service.
///
/// Owns the engine and the usage lock. Every operation that touches the
/// engine holds the lock for its whole duration and releases it before
/// returning, whatever the outcome.
pub struct Narrator<E: SynthesisEngine> {
    config: SynthesisConfig,
    engine: E,
    lock: UsageLock,
    /// Voice the loaded model was last used with.
    active_voice: Option<PathBuf>,
}

impl<E: SynthesisEngine> Narrator<E> {
    /// Create a narrator. When `config.clear_stale_lock` is set, a lock marker
    /// left by a previous process is removed.
    pub fn new(config: SynthesisConfig, engine: E) -> Self {
        let lock = UsageLock::new(&config.lock_path);
        if config.clear_stale_lock {
            lock.cleanup_stale();
        }
        Self {
            config,
            engine,
            lock,
            active_voice: None,
        }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    pub fn lock(&self) -> &UsageLock {
        &self.lock
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Voice samples in the configured voice folder.
    pub fn voices(&self) -> Vec<VoiceSample> {
        list_voices(&self.config.voice_dir)
    }

    /// Output folder for a document: `{output_root}/{language}_{sanitized stem}`.
    pub fn output_folder_for(&self, document: &Path) -> PathBuf {
        let file_name = document
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sanitized = sanitize_name(&file_name);
        let stem = Path::new(&sanitized)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(sanitized.clone());
        self.config
            .output_root
            .join(format!("{}_{}", self.config.language, stem))
    }

    /// Narrate a whole document with the given reference voice.
    ///
    /// Fails with [`Error::LockContention`] before doing anything if another
    /// run holds the lock. Folder and document errors abort the run; failures
    /// of single paragraphs are recorded in the returned run.
    pub fn narrate_document(
        &mut self,
        document: &Path,
        voice: &Path,
        observer: &mut dyn ProgressObserver,
    ) -> Result<SynthesisRun, Error> {
        let lock = self.lock.clone();
        let _guard = lock.acquire()?;

        let output_folder = self.output_folder_for(document);
        std::fs::create_dir_all(&output_folder)?;
        log::info!("Output folder: {}", output_folder.display());

        if self.config.copy_source {
            copy_source(document, &output_folder)?;
        }

        let paragraphs = load_paragraphs(document)?;
        self.prepare_engine(voice)?;

        let params = SynthesisParams {
            voice: voice.to_path_buf(),
            language: self.config.language,
            speed: self.config.speed,
        };
        let mut driver = SynthesisDriver::new(&mut self.engine, params)
            .with_processor(processor_for(self.config.remove_trailing_dots))
            .with_length_limit_marker(self.config.length_limit_marker.clone());
        driver.run(&paragraphs, &output_folder, observer)
    }

    /// Synthesize a short test sentence with the preview speed and write it to `out`.
    pub fn preview_sample(
        &mut self,
        text: &str,
        voice: &Path,
        out: &Path,
    ) -> Result<SynthesisResult, Error> {
        let lock = self.lock.clone();
        let _guard = lock.acquire()?;

        self.prepare_engine(voice)?;
        let params = SynthesisParams {
            voice: voice.to_path_buf(),
            language: self.config.language,
            speed: self.config.sample_speed,
        };
        let clip = SynthesisDriver::new(&mut self.engine, params)
            .with_processor(processor_for(self.config.remove_trailing_dots))
            .synthesize_text(text)?;
        clip.write_wav(out)?;
        log::info!(
            "Sample of {:.1}s written to {}",
            clip.duration_secs(),
            out.display()
        );
        Ok(clip)
    }

    /// Load the model on first use; reload it when the reference voice changes.
    fn prepare_engine(&mut self, voice: &Path) -> Result<(), Error> {
        if !voice.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("voice sample not found: {}", voice.display()),
            )));
        }

        let voice_changed = self
            .active_voice
            .as_deref()
            .is_some_and(|active| active != voice);
        if voice_changed && self.engine.is_loaded() {
            log::info!("Voice changed, flushing loaded model");
            self.engine.unload_model();
        }

        if !self.engine.is_loaded() {
            self.engine
                .load_model(&self.config.model_spec())
                .map_err(Error::from_engine)?;
        }
        self.active_voice = Some(voice.to_path_buf());
        Ok(())
    }
}

/// Copy the source document into the output folder unless it already lives there.
fn copy_source(document: &Path, output_folder: &Path) -> Result<(), Error> {
    let Some(file_name) = document.file_name() else {
        return Ok(());
    };
    let sanitized = sanitize_name(&file_name.to_string_lossy());
    let destination = output_folder.join(sanitized);

    let same_file = match (document.canonicalize(), destination.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if !same_file {
        std::fs::copy(document, &destination)?;
        log::debug!("Copied source to {}", destination.display());
    }
    Ok(())
}
