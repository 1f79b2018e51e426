use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Default model: Coqui XTTS v2, multilingual with speaker cloning.
pub const DEFAULT_MODEL: &str = "tts_models/multilingual/multi-dataset/xtts_v2";

/// Diagnostic text XTTS prints when a sentence is longer than it can speak in one pass.
pub const DEFAULT_LENGTH_LIMIT_MARKER: &str = "exceeds the character limit";

/// Narration language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    #[default]
    Pt,
    Es,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::En, Language::Pt, Language::Es];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Pt => "pt",
            Language::Es => "es",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unsupported language '{s}' (expected en, pt or es)")))
    }
}

/// Compute device handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(Error::Config(format!(
                "unsupported device '{other}' (expected cpu or cuda)"
            ))),
        }
    }
}

/// External synthesis program and its argument template.
///
/// Each argument may contain the placeholders `{text}`, `{voice}`,
/// `{language}`, `{speed}`, `{model}`, `{device}` and `{output}`. A
/// persistent worker is started once with `{model}` and `{device}` filled in
/// and receives the other values per request on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for every engine process.
    pub env: BTreeMap<String, String>,
    /// Keep one worker process (and its loaded model) alive between requests.
    pub persistent: bool,
}

impl Default for EngineConfig {
    /// The Coqui `tts` CLI. It has no speed flag, so `{speed}` is not forwarded.
    fn default() -> Self {
        let args = [
            "--model_name",
            "{model}",
            "--text",
            "{text}",
            "--speaker_wav",
            "{voice}",
            "--language_idx",
            "{language}",
            "--device",
            "{device}",
            "--out_path",
            "{output}",
        ];
        Self {
            program: "tts".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            // Coqui asks for license agreement on first download and would read EOF.
            env: BTreeMap::from([("COQUI_TOS_AGREED".to_string(), "1".to_string())]),
            persistent: false,
        }
    }
}

/// Everything a narration run needs, passed explicitly to the narrator,
/// driver and lock at construction time.
///
/// ```
/// use narrate_rs::{Language, SynthesisConfigBuilder};
///
/// let config = SynthesisConfigBuilder::default()
///     .language(Language::Es)
///     .speed(1.0_f32)
///     .build()
///     .unwrap();
/// assert_eq!(config.lock_path.to_str(), Some("app_in_use.lock"));
/// ```
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct SynthesisConfig {
    pub language: Language,
    pub device: Device,
    pub model_name: String,
    /// Speed for document runs.
    pub speed: f32,
    /// Speed for the quick voice-sample preview.
    pub sample_speed: f32,
    /// Drop a single trailing period from each sentence before synthesis.
    pub remove_trailing_dots: bool,
    pub lock_path: PathBuf,
    /// Remove a lock marker left behind by a previous process when the narrator starts.
    pub clear_stale_lock: bool,
    pub output_root: PathBuf,
    pub voice_dir: PathBuf,
    /// Copy the source document into the run's output folder.
    pub copy_source: bool,
    pub length_limit_marker: String,
    pub engine: EngineConfig,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            language: Language::default(),
            device: Device::default(),
            model_name: DEFAULT_MODEL.to_string(),
            speed: 0.85,
            sample_speed: 0.9,
            remove_trailing_dots: true,
            lock_path: PathBuf::from("app_in_use.lock"),
            clear_stale_lock: false,
            output_root: PathBuf::from("TTS_Output"),
            voice_dir: PathBuf::from("voices"),
            copy_source: true,
            length_limit_marker: DEFAULT_LENGTH_LIMIT_MARKER.to_string(),
            engine: EngineConfig::default(),
        }
    }
}

impl SynthesisConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        let config: SynthesisConfig = serde_json::from_str(&content)?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (name, value) in [("speed", self.speed), ("sample_speed", self.sample_speed)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if self.model_name.trim().is_empty() {
            return Err(Error::Config("model_name must not be empty".to_string()));
        }
        if self.engine.program.trim().is_empty() {
            return Err(Error::Config("engine.program must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn model_spec(&self) -> crate::ModelSpec {
        crate::ModelSpec {
            name: self.model_name.clone(),
            device: self.device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_batch_and_preview_speeds() {
        let config = SynthesisConfig::default();
        assert_eq!(config.language, Language::Pt);
        assert_eq!(config.speed, 0.85);
        assert_eq!(config.sample_speed, 0.9);
        assert!(config.remove_trailing_dots);
        assert_eq!(config.model_name, DEFAULT_MODEL);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SynthesisConfig =
            serde_json::from_str(r#"{"language": "es", "device": "cuda", "speed": 1.1}"#).unwrap();
        assert_eq!(config.language, Language::Es);
        assert_eq!(config.device, Device::Cuda);
        assert_eq!(config.speed, 1.1);
        assert_eq!(config.sample_speed, 0.9);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn rejects_unknown_language() {
        assert!(serde_json::from_str::<SynthesisConfig>(r#"{"language": "fr"}"#).is_err());
        assert!("fr".parse::<Language>().is_err());
        assert_eq!("EN".parse::<Language>().unwrap(), Language::En);
    }

    #[test]
    fn validate_rejects_non_positive_speed() {
        let config = SynthesisConfigBuilder::default().speed(0.0_f32).build().unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narrate.json");
        std::fs::write(
            &path,
            r#"{"model_name": "custom", "engine": {"program": "my-tts"}}"#,
        )
        .unwrap();

        let config = SynthesisConfig::from_json_file(&path).unwrap();
        assert_eq!(config.model_name, "custom");
        assert_eq!(config.engine.program, "my-tts");
        assert_eq!(config.engine.args, EngineConfig::default().args);
    }

    #[test]
    fn engine_env_agrees_to_coqui_license_by_default() {
        let engine = EngineConfig::default();
        assert_eq!(engine.env.get("COQUI_TOS_AGREED").map(String::as_str), Some("1"));
        assert!(!engine.persistent);

        let engine: EngineConfig =
            serde_json::from_str(r#"{"env": {"CUDA_VISIBLE_DEVICES": "1"}, "persistent": true}"#)
                .unwrap();
        assert_eq!(engine.env.len(), 1);
        assert!(engine.persistent);
        assert_eq!(engine.program, "tts");
    }
}
