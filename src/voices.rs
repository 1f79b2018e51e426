use std::path::{Path, PathBuf};

/// Extension of reference voice samples.
pub const VOICE_EXTENSION: &str = "wav";

/// A reference voice sample on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VoiceSample {
    /// File name, e.g. `narrator.wav`
    pub name: String,
    /// Folder the sample was listed from
    pub folder: PathBuf,
}

impl VoiceSample {
    pub fn path(&self) -> PathBuf {
        self.folder.join(&self.name)
    }

    /// File name without the extension, for display.
    pub fn display_name(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }
}

/// List the voice samples in `folder`, sorted by file name.
///
/// A missing or unreadable folder yields an empty list.
pub fn list_voices(folder: &Path) -> Vec<VoiceSample> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("Cannot list voices in {}: {e}", folder.display());
            return Vec::new();
        }
    };

    let mut voices: Vec<VoiceSample> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let path = entry.path();
            let is_voice = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(VOICE_EXTENSION));
            if !is_voice {
                return None;
            }
            let name = path.file_name()?.to_str()?.to_string();
            Some(VoiceSample {
                name,
                folder: folder.to_path_buf(),
            })
        })
        .collect();

    voices.sort_unstable_by(|a, b| a.name.cmp(&b.name));
    log::info!("Found {} voices in {}", voices.len(), folder.display());
    voices
}
