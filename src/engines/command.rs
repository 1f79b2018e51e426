//! Engine that runs an external synthesis program.
//!
//! The program is described by an argument template; each argument may
//! contain placeholders that are filled in per request:
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{text}` | text to speak |
//! | `{voice}` | reference voice sample path |
//! | `{language}` | language code (`en`, `pt`, `es`) |
//! | `{speed}` | speed multiplier |
//! | `{model}` | model identifier |
//! | `{device}` | `cpu` or `cuda` |
//! | `{output}` | WAV path the program must write |
//!
//! In one-shot mode the program is started for every paragraph and whatever
//! it prints on stdout and stderr becomes the result's diagnostics, so
//! warnings such as XTTS's character-limit notice reach the driver.
//!
//! In persistent mode the program is started once by `load_model` and keeps
//! its model in memory until `unload_model`. It reads one JSON request per
//! line on stdin, one per sentence:
//!
//! ```json
//! {"text": "Olá.", "voice": "voices/a.wav", "language": "pt", "speed": 0.85, "output": "/tmp/narrate-x/utterance_1.wav"}
//! ```
//!
//! and answers each with one JSON line on stdout after writing `output`:
//!
//! ```json
//! {"ok": true, "diagnostics": "..."}
//! {"ok": false, "error": "..."}
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use narrate_rs::engines::command::CommandEngine;
//! use narrate_rs::{Device, Language, ModelSpec, SynthesisEngine, SynthesisParams};
//! use std::path::{Path, PathBuf};
//!
//! let mut engine = CommandEngine::new(
//!     "piper-clone",
//!     ["--voice", "{voice}", "--lang", "{language}", "--rate", "{speed}", "-o", "{output}", "{text}"],
//! );
//! engine.load_model(&ModelSpec { name: "default".into(), device: Device::Cpu })?;
//!
//! let params = SynthesisParams {
//!     voice: PathBuf::from("voices/narrator.wav"),
//!     language: Language::En,
//!     speed: 1.0,
//! };
//! engine.synthesize_to_file("Hello, world!", Path::new("hello.wav"), &params)?;
//! # Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::audio::read_wav;
use crate::config::EngineConfig;
use crate::{
    synthesize_each, EngineError, Error, ModelSpec, SynthesisEngine, SynthesisParams,
    SynthesisResult,
};

/// External-program synthesis engine.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    persistent: bool,
    model: Option<ModelSpec>,
    scratch: Option<TempDir>,
    worker: Option<Worker>,
    requests: u64,
}

impl CommandEngine {
    /// One-shot engine with no extra environment.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            persistent: false,
            model: None,
            scratch: None,
            worker: None,
            requests: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let mut engine = Self::new(config.program.clone(), config.args.iter().cloned());
        engine.env = config.env.clone();
        engine.persistent = config.persistent;
        engine
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Switch to persistent mode: one worker process per loaded model.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    fn forwards_speed(&self) -> bool {
        self.args.iter().any(|arg| arg.contains("{speed}"))
    }

    fn spawn_error(&self, e: std::io::Error) -> Error {
        if e.kind() == ErrorKind::NotFound {
            Error::EngineNotFound(self.program.clone())
        } else {
            Error::Io(e)
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.envs(&self.env);
        cmd
    }

    fn expand_args<'a, F>(&self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<Cow<'a, str>>,
    {
        self.args
            .iter()
            .map(|template| expand_placeholders(template, &lookup))
            .collect()
    }

    fn next_output(&mut self) -> Result<PathBuf, Error> {
        let scratch = self.scratch.as_ref().ok_or(Error::ModelNotLoaded)?;
        self.requests += 1;
        Ok(scratch.path().join(format!("utterance_{}.wav", self.requests)))
    }

    fn spawn_worker(&self, model: &ModelSpec) -> Result<Worker, Error> {
        let args = self.expand_args(|name| match name {
            "model" => Some(Cow::Borrowed(model.name.as_str())),
            "device" => Some(Cow::Borrowed(model.device.as_str())),
            _ => None,
        });
        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(Error::Engine(format!("{} started without pipes", self.program)));
        };
        log::info!("Started synthesis worker '{}' (pid {})", self.program, child.id());
        Ok(Worker {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }

    /// Start the program for one request and return what it printed.
    fn run_once(
        &self,
        model: &ModelSpec,
        text: &str,
        params: &SynthesisParams,
        output: &Path,
    ) -> Result<String, Error> {
        let voice = params.voice.to_string_lossy();
        let speed = params.speed.to_string();
        let output_str = output.to_string_lossy();
        let args = self.expand_args(|name| match name {
            "text" => Some(Cow::Borrowed(text)),
            "voice" => Some(Cow::Borrowed(voice.as_ref())),
            "language" => Some(Cow::Borrowed(params.language.as_str())),
            "speed" => Some(Cow::Borrowed(speed.as_str())),
            "model" => Some(Cow::Borrowed(model.name.as_str())),
            "device" => Some(Cow::Borrowed(model.device.as_str())),
            "output" => Some(Cow::Borrowed(output_str.as_ref())),
            _ => None,
        });

        log::debug!("Running {} for {} chars", self.program, text.chars().count());
        let result = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = String::from_utf8_lossy(&result.stdout);
        let stderr = String::from_utf8_lossy(&result.stderr);
        if !result.status.success() {
            return Err(Error::Engine(format!(
                "{} exited with code {:?}: {}",
                self.program,
                result.status.code(),
                stderr.trim()
            )));
        }
        Ok(join_output(&stdout, &stderr))
    }

    /// Send one request to the worker, starting it again if it went away.
    fn ask_worker(
        &mut self,
        model: &ModelSpec,
        text: &str,
        params: &SynthesisParams,
        output: &Path,
    ) -> Result<String, Error> {
        if self.worker.is_none() {
            log::warn!("Synthesis worker is not running, starting it again");
            self.worker = Some(self.spawn_worker(model)?);
        }
        let voice = params.voice.to_string_lossy();
        let output_str = output.to_string_lossy();
        let request = WorkerRequest {
            text,
            voice: &voice,
            language: params.language.as_str(),
            speed: params.speed,
            output: &output_str,
        };

        let response = match self.worker.as_mut() {
            Some(worker) => worker.request(&request),
            None => Err(Error::ModelNotLoaded),
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.stop_worker();
                return Err(e);
            }
        };

        if response.ok {
            Ok(response.diagnostics)
        } else {
            let error = response
                .error
                .unwrap_or_else(|| "worker reported a failure".to_string());
            Err(Error::Engine(
                join_output(&error, &response.diagnostics).trim().to_string(),
            ))
        }
    }
}

impl Drop for CommandEngine {
    fn drop(&mut self) {
        self.unload_model();
    }
}

impl SynthesisEngine for CommandEngine {
    /// Start the worker (persistent mode) or check that the program can be
    /// started (one-shot mode), and prepare a scratch folder.
    fn load_model(&mut self, model: &ModelSpec) -> Result<(), EngineError> {
        log::info!(
            "Loading model {} on {} via '{}'",
            model.name,
            model.device,
            self.program
        );
        self.stop_worker();

        if self.persistent {
            self.worker = Some(self.spawn_worker(model)?);
        } else {
            self.command()
                .arg("--help")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(|e| self.spawn_error(e))?;

            if !self.forwards_speed() {
                log::warn!(
                    "Argument template for '{}' has no {{speed}} placeholder; speed settings are ignored",
                    self.program
                );
            }
        }

        self.scratch = Some(tempfile::Builder::new().prefix("narrate-").tempdir()?);
        self.model = Some(model.clone());
        Ok(())
    }

    fn unload_model(&mut self) {
        self.stop_worker();
        self.model = None;
        self.scratch = None;
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn synthesize(
        &mut self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<SynthesisResult, EngineError> {
        let model = self.model.clone().ok_or(Error::ModelNotLoaded)?;
        let output = self.next_output()?;

        let diagnostics = if self.persistent {
            self.ask_worker(&model, text, params, &output)?
        } else {
            self.run_once(&model, text, params, &output)?
        };

        if !output.exists() {
            return Err(Error::Engine(format!(
                "{} finished but wrote no audio to {}: {}",
                self.program,
                output.display(),
                diagnostics.trim()
            ))
            .into());
        }

        let (samples, sample_rate) = read_wav(&output)?;
        if let Err(e) = std::fs::remove_file(&output) {
            log::debug!("Could not remove {}: {e}", output.display());
        }

        Ok(SynthesisResult {
            samples,
            sample_rate,
            diagnostics,
        })
    }

    /// A worker keeps its model loaded, so sentences go one by one. A one-shot
    /// program pays the model load per start, so the paragraph goes in one
    /// request.
    fn synthesize_sentences(
        &mut self,
        sentences: &[String],
        params: &SynthesisParams,
    ) -> Result<SynthesisResult, EngineError> {
        if self.persistent {
            synthesize_each(self, sentences, params)
        } else {
            self.synthesize(&sentences.join(" "), params)
        }
    }
}

#[derive(Serialize)]
struct WorkerRequest<'a> {
    text: &'a str,
    voice: &'a str,
    language: &'a str,
    speed: f32,
    output: &'a str,
}

#[derive(Deserialize)]
struct WorkerResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    diagnostics: String,
}

/// Running persistent worker process.
struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    fn request(&mut self, request: &WorkerRequest<'_>) -> Result<WorkerResponse, Error> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.flush()?;

        let mut reply = String::new();
        if self.stdout.read_line(&mut reply)? == 0 {
            return Err(Error::Engine("synthesis worker exited".to_string()));
        }
        Ok(serde_json::from_str(reply.trim())?)
    }

    /// Close stdin so the worker can exit, then make sure it is gone.
    fn stop(self) {
        let Worker {
            mut child, stdin, ..
        } = self;
        drop(stdin);
        if let Err(e) = child.kill() {
            log::debug!("Could not kill synthesis worker: {e}");
        }
        match child.wait() {
            Ok(status) => log::debug!("Synthesis worker stopped ({status})"),
            Err(e) => log::warn!("Could not wait for synthesis worker: {e}"),
        }
    }
}

fn join_output(stdout: &str, stderr: &str) -> String {
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, true) => String::new(),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{stdout}\n{stderr}"),
    }
}

/// Replace `{name}` placeholders in a single pass.
///
/// Unknown placeholders are kept verbatim, and substituted values are never
/// expanded again, so text containing `{voice}` is passed through literally.
pub fn expand_placeholders<'a, F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<Cow<'a, str>>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{NoProgress, SynthesisDriver};
    use crate::{Device, Language};

    fn lookup(name: &str) -> Option<Cow<'static, str>> {
        match name {
            "text" => Some(Cow::Borrowed("say {voice}")),
            "voice" => Some(Cow::Borrowed("v.wav")),
            _ => None,
        }
    }

    fn model() -> ModelSpec {
        ModelSpec {
            name: "xtts".to_string(),
            device: Device::Cpu,
        }
    }

    fn params() -> SynthesisParams {
        SynthesisParams {
            voice: PathBuf::from("v.wav"),
            language: Language::Pt,
            speed: 0.85,
        }
    }

    #[test]
    fn expands_known_placeholders_once() {
        assert_eq!(expand_placeholders("--voice={voice}", lookup), "--voice=v.wav");
        assert_eq!(expand_placeholders("{text}", lookup), "say {voice}");
    }

    #[test]
    fn keeps_unknown_and_unclosed_braces() {
        assert_eq!(expand_placeholders("{nope}-{voice}", lookup), "{nope}-v.wav");
        assert_eq!(expand_placeholders("open {voice", lookup), "open {voice");
    }

    #[test]
    fn synthesize_requires_loaded_model() {
        let mut engine = CommandEngine::new("tts", ["{text}"]);
        let err = engine.synthesize("hi", &params()).unwrap_err();
        assert!(matches!(Error::from_engine(err), Error::ModelNotLoaded));
    }

    #[test]
    fn missing_program_is_reported() {
        let mut engine = CommandEngine::new("narrate-rs-no-such-program", ["{text}"]);
        let err = engine.load_model(&model()).unwrap_err();
        assert!(matches!(Error::from_engine(err), Error::EngineNotFound(_)));
        assert!(!engine.is_loaded());
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_carries_stderr() {
        let mut engine = CommandEngine::new(
            "sh",
            ["-c", "echo 'text exceeds the character limit' >&2; exit 3", "{text}"],
        );
        engine.load_model(&model()).unwrap();

        let err = Error::from_engine(engine.synthesize("hi", &params()).unwrap_err());
        let message = err.report_message();
        assert!(message.contains("code Some(3)"));
        assert!(message.contains("exceeds the character limit"));
    }

    #[cfg(unix)]
    #[test]
    fn program_without_output_is_an_error() {
        let mut engine = CommandEngine::new("sh", ["-c", "echo spoke {text}"]);
        engine.load_model(&model()).unwrap();

        let err = Error::from_engine(engine.synthesize("hi", &params()).unwrap_err());
        assert!(err.report_message().contains("wrote no audio"));
    }

    /// A valid WAV the test programs copy to `{output}`.
    fn template_wav(dir: &Path) -> PathBuf {
        let path = dir.join("template.wav");
        crate::audio::write_wav(&path, &[0.2; 800], 16_000).unwrap();
        path
    }

    fn log_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn two_paragraphs() -> Vec<String> {
        vec!["One. Two. Three.".to_string(), "Four. Five.".to_string()]
    }

    #[cfg(unix)]
    #[test]
    fn configured_environment_reaches_the_program() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "test \"$COQUI_TOS_AGREED\" = 1 && cp '{}' \"$1\"",
            template_wav(dir.path()).display()
        );
        let config = EngineConfig {
            program: "sh".to_string(),
            args: vec!["-c".into(), script, "sh".into(), "{output}".into()],
            ..EngineConfig::default()
        };

        let mut engine = CommandEngine::from_config(&config);
        engine.load_model(&model()).unwrap();
        let clip = engine.synthesize("Olá.", &params()).unwrap();
        assert_eq!(clip.sample_rate, 16_000);
        assert_eq!(clip.samples.len(), 800);
    }

    #[cfg(unix)]
    #[test]
    fn one_shot_program_starts_once_per_paragraph() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("starts.log");
        let script = format!(
            "echo \"$2\" >> '{}'; cp '{}' \"$1\"",
            log.display(),
            template_wav(dir.path()).display()
        );
        let mut engine = CommandEngine::new("sh", ["-c", script.as_str(), "sh", "{output}", "{text}"]);
        engine.load_model(&model()).unwrap();

        let run = SynthesisDriver::new(&mut engine, params())
            .run(&two_paragraphs(), &dir.path().join("out"), &mut NoProgress)
            .unwrap();

        assert_eq!(run.generated(), 2);
        assert_eq!(log_lines(&log), vec!["One. Two. Three.", "Four. Five."]);
    }

    const WORKER: &str = r#"echo start >> 'STARTS'
while IFS= read -r line; do
  out=$(printf '%s\n' "$line" | sed 's/.*"output":"\([^"]*\)".*/\1/')
  cp 'TEMPLATE' "$out"
  printf '{"ok":true,"diagnostics":""}\n'
done"#;

    #[cfg(unix)]
    #[test]
    fn persistent_worker_starts_once_for_many_sentences() {
        let dir = tempfile::tempdir().unwrap();
        let starts = dir.path().join("starts.log");
        let script = WORKER
            .replace("STARTS", &starts.to_string_lossy())
            .replace("TEMPLATE", &template_wav(dir.path()).to_string_lossy());
        let mut engine = CommandEngine::new("sh", ["-c", script.as_str()]).persistent();
        engine.load_model(&model()).unwrap();

        let run = SynthesisDriver::new(&mut engine, params())
            .run(&two_paragraphs(), &dir.path().join("out"), &mut NoProgress)
            .unwrap();

        assert_eq!(run.generated(), 2);
        assert_eq!(log_lines(&starts), vec!["start"]);
        assert_eq!(engine.requests, 5);

        engine.unload_model();
        assert!(!engine.is_loaded());
        assert!(engine.worker.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn worker_error_reply_becomes_engine_error() {
        let script = r#"while IFS= read -r line; do
  printf '{"ok":false,"error":"text exceeds the character limit"}\n'
done"#;
        let mut engine = CommandEngine::new("sh", ["-c", script]).persistent();
        engine.load_model(&model()).unwrap();

        let err = Error::from_engine(engine.synthesize("hi", &params()).unwrap_err());
        assert_eq!(err.report_message(), "text exceeds the character limit");
        assert!(engine.worker.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn exited_worker_is_started_again() {
        let dir = tempfile::tempdir().unwrap();
        let starts = dir.path().join("starts.log");
        let script = format!("echo start >> '{}'; exit 0", starts.display());
        let mut engine = CommandEngine::new("sh", ["-c", script.as_str()]).persistent();
        engine.load_model(&model()).unwrap();

        assert!(engine.synthesize("hi", &params()).is_err());
        assert!(engine.worker.is_none());
        assert!(engine.synthesize("hi", &params()).is_err());
        assert_eq!(log_lines(&starts).len(), 2);
    }
}
