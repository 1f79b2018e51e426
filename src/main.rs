use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use narrate_rs::document::load_paragraphs;
use narrate_rs::engines::command::CommandEngine;
use narrate_rs::voices::list_voices;
use narrate_rs::{
    Device, Error, JobOutcome, Language, Narrator, ParagraphJob, ProgressObserver,
    SynthesisConfig, UsageLock,
};

/// Exit code for "another run holds the lock".
const EXIT_BUSY: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "narrate", version)]
#[command(about = "Narrate Word documents paragraph by paragraph with a cloned voice")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log engine calls and per-sentence progress
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Remove a lock marker left behind by a crashed run before starting
    #[arg(long, global = true)]
    clear_stale_lock: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List reference voices (.wav) in a folder
    Voices {
        /// Folder to list; defaults to voice_dir from the config
        dir: Option<PathBuf>,
    },
    /// Print the paragraphs that would be narrated
    Paragraphs { document: PathBuf },
    /// Generate one audio file per paragraph of a document
    Generate(GenerateArgs),
    /// Generate a short test sample with the preview speed
    Sample(SampleArgs),
    /// Inspect or clear the usage lock
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
}

#[derive(Debug, Args)]
struct SynthesisOverrides {
    /// Reference voice sample
    #[arg(long)]
    voice: PathBuf,
    /// Narration language (en, pt, es)
    #[arg(long)]
    language: Option<Language>,
    /// Compute device (cpu, cuda)
    #[arg(long)]
    device: Option<Device>,
    /// Model identifier passed to the engine
    #[arg(long)]
    model: Option<String>,
    /// Keep a single trailing period on each sentence
    #[arg(long)]
    keep_trailing_dots: bool,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Word document to narrate
    document: PathBuf,
    #[command(flatten)]
    synthesis: SynthesisOverrides,
    /// Folder that receives the {language}_{document} output folder
    #[arg(long)]
    output: Option<PathBuf>,
    /// Speed multiplier for the run
    #[arg(long)]
    speed: Option<f32>,
}

#[derive(Debug, Args)]
struct SampleArgs {
    /// Text to speak
    #[arg(default_value = "This is a narration test.")]
    text: String,
    #[command(flatten)]
    synthesis: SynthesisOverrides,
    /// Where to write the sample
    #[arg(long, default_value = "sample.wav")]
    out: PathBuf,
    /// Speed multiplier for the sample
    #[arg(long)]
    speed: Option<f32>,
}

#[derive(Debug, Subcommand)]
enum LockAction {
    /// Show whether a run currently holds the lock
    Status,
    /// Remove the lock marker unconditionally
    Release,
}

/// Logs progress lines for a document run.
struct ConsoleProgress {
    started: Instant,
}

impl ProgressObserver for ConsoleProgress {
    fn on_paragraph_start(&mut self, index: usize, total: usize) {
        let percent = index as f64 / total.max(1) as f64 * 100.0;
        log::info!("Generating paragraph {index}/{total} ({percent:.1}%)");
    }

    fn on_paragraph_finished(&mut self, job: &ParagraphJob, _total: usize) {
        match &job.outcome {
            JobOutcome::Succeeded => log::info!(
                "Audio {} generated in {:.1?}",
                job.index,
                self.started.elapsed()
            ),
            JobOutcome::Flagged { .. } => {
                log::warn!("Paragraph {} may contain errors", job.index)
            }
            JobOutcome::Failed { message, .. } => {
                log::error!("Paragraph {} failed: {message}", job.index)
            }
            JobOutcome::Pending => {}
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            if let Some(Error::LockContention(_)) = err.downcast_ref::<Error>() {
                eprintln!("Another run is generating audio right now. Try again later.");
                return ExitCode::from(EXIT_BUSY);
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => SynthesisConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SynthesisConfig::default(),
    };
    if cli.clear_stale_lock {
        config.clear_stale_lock = true;
    }

    match cli.command {
        Commands::Voices { dir } => {
            let dir = dir.unwrap_or_else(|| config.voice_dir.clone());
            let voices = list_voices(&dir);
            if voices.is_empty() {
                eprintln!("No .wav files found in {}", dir.display());
            }
            for voice in voices {
                println!("{}", voice.name);
            }
        }
        Commands::Paragraphs { document } => {
            let paragraphs = load_paragraphs(&document)
                .with_context(|| format!("reading {}", document.display()))?;
            for (i, text) in paragraphs.iter().enumerate() {
                println!("{:>4}  {text}", i + 1);
            }
        }
        Commands::Generate(args) => {
            apply_overrides(&mut config, &args.synthesis);
            if let Some(output) = args.output {
                config.output_root = output;
            }
            if let Some(speed) = args.speed {
                config.speed = speed;
            }
            config.validate()?;

            let engine = CommandEngine::from_config(&config.engine);
            let mut narrator = Narrator::new(config, engine);
            let mut progress = ConsoleProgress {
                started: Instant::now(),
            };
            let run = narrator
                .narrate_document(&args.document, &args.synthesis.voice, &mut progress)
                .with_context(|| format!("narrating {}", args.document.display()))?;

            println!(
                "Completed! {}/{} files generated in {}",
                run.generated(),
                run.total(),
                run.output_folder.display()
            );
            if let Some(report) = &run.report_path {
                println!("Paragraphs needing review saved to {}", report.display());
            }
        }
        Commands::Sample(args) => {
            apply_overrides(&mut config, &args.synthesis);
            if let Some(speed) = args.speed {
                config.sample_speed = speed;
            }
            config.validate()?;

            let engine = CommandEngine::from_config(&config.engine);
            let mut narrator = Narrator::new(config, engine);
            let clip = narrator.preview_sample(&args.text, &args.synthesis.voice, &args.out)?;
            println!(
                "Sample of {:.1}s saved to {}",
                clip.duration_secs(),
                args.out.display()
            );
        }
        Commands::Lock { action } => {
            let lock = UsageLock::new(&config.lock_path);
            if config.clear_stale_lock {
                lock.cleanup_stale();
            }
            match action {
                LockAction::Status => {
                    if lock.is_held() {
                        println!("busy ({})", lock.path().display());
                        return Ok(ExitCode::from(EXIT_BUSY));
                    }
                    println!("free");
                }
                LockAction::Release => {
                    lock.release();
                    println!("released");
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn apply_overrides(config: &mut SynthesisConfig, overrides: &SynthesisOverrides) {
    if let Some(language) = overrides.language {
        config.language = language;
    }
    if let Some(device) = overrides.device {
        config.device = device;
    }
    if let Some(model) = &overrides.model {
        config.model_name = model.clone();
    }
    if overrides.keep_trailing_dots {
        config.remove_trailing_dots = false;
    }
}
