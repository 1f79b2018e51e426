#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use narrate_rs::document::DocxBuilder;
use narrate_rs::{
    EngineError, Error, ModelSpec, SynthesisEngine, SynthesisParams, SynthesisResult,
};

pub const SAMPLE_RATE: u32 = 16_000;

/// Engine double with scripted behaviour per input text.
#[derive(Default)]
pub struct ScriptedEngine {
    pub failures: HashMap<String, String>,
    pub warnings: HashMap<String, String>,
    pub silent: Vec<String>,
    pub rates: HashMap<String, u32>,
    pub calls: Vec<(String, SynthesisParams)>,
    pub loads: usize,
    pub unloads: usize,
    loaded: bool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any request whose text contains `needle`.
    pub fn failing_on(mut self, needle: &str, message: &str) -> Self {
        self.failures.insert(needle.to_string(), message.to_string());
        self
    }

    /// Emit `diagnostics` for any request whose text contains `needle`.
    pub fn warning_on(mut self, needle: &str, diagnostics: &str) -> Self {
        self.warnings.insert(needle.to_string(), diagnostics.to_string());
        self
    }

    /// Return a clip without samples for any request whose text contains `needle`.
    pub fn silent_on(mut self, needle: &str) -> Self {
        self.silent.push(needle.to_string());
        self
    }

    /// Answer at `sample_rate` for any request whose text contains `needle`.
    pub fn rate_on(mut self, needle: &str, sample_rate: u32) -> Self {
        self.rates.insert(needle.to_string(), sample_rate);
        self
    }

    pub fn spoken_texts(&self) -> Vec<&str> {
        self.calls.iter().map(|(text, _)| text.as_str()).collect()
    }
}

impl SynthesisEngine for ScriptedEngine {
    fn load_model(&mut self, _model: &ModelSpec) -> Result<(), EngineError> {
        self.loads += 1;
        self.loaded = true;
        Ok(())
    }

    fn unload_model(&mut self) {
        self.unloads += 1;
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn synthesize(
        &mut self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<SynthesisResult, EngineError> {
        self.calls.push((text.to_string(), params.clone()));
        if let Some((_, message)) = self.failures.iter().find(|(k, _)| text.contains(k.as_str())) {
            return Err(message.clone().into());
        }
        let diagnostics = self
            .warnings
            .iter()
            .find(|(k, _)| text.contains(k.as_str()))
            .map(|(_, d)| d.clone())
            .unwrap_or_default();
        let samples = if self.silent.iter().any(|k| text.contains(k.as_str())) {
            Vec::new()
        } else {
            vec![0.1; 1_600]
        };
        let sample_rate = self
            .rates
            .iter()
            .find(|(k, _)| text.contains(k.as_str()))
            .map_or(SAMPLE_RATE, |(_, rate)| *rate);
        Ok(SynthesisResult {
            samples,
            sample_rate,
            diagnostics,
        })
    }
}

pub fn write_docx(path: &Path, paragraphs: &[&str]) -> Result<(), Error> {
    let mut doc = DocxBuilder::new();
    for text in paragraphs {
        doc.paragraph(*text);
    }
    doc.save(path)
}

pub fn write_voice(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    narrate_rs::audio::write_wav(&path, &[0.0; 160], SAMPLE_RATE).unwrap();
    path
}

pub fn wav_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".wav"))
        .collect();
    names.sort();
    names
}
