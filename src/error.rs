use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(
        "another run is generating audio right now (lock marker {}). Try again later.",
        .0.display()
    )]
    LockContention(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid document {}: {reason}", .path.display())]
    Document { path: PathBuf, reason: String },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Synthesis program '{0}' not found. Install it or set engine.program in the config.")]
    EngineNotFound(String),
    #[error("Synthesis failed: {0}")]
    Engine(String),
    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,
}

impl Error {
    /// Recover a crate error from a boxed engine error, or wrap its text.
    pub fn from_engine(err: crate::EngineError) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => *err,
            Err(other) => Error::Engine(other.to_string()),
        }
    }

    /// Message suitable for a report line: engine errors without their prefix.
    pub fn report_message(&self) -> String {
        match self {
            Error::Engine(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
