//! Job identity, artifact paths and the metadata hand-off file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// One end-to-end pipeline run. The id namespaces every artifact on disk.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub topic: String,
    pub voice: String,
}

impl Job {
    pub fn new(topic: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            voice: voice.into(),
        }
    }

    pub fn paths(&self, asset_dir: &Path, output_dir: &Path) -> JobPaths {
        JobPaths {
            id: self.id.to_string(),
            asset_dir: asset_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobPaths {
    id: String,
    asset_dir: PathBuf,
    output_dir: PathBuf,
}

impl JobPaths {
    pub fn audio_name(&self) -> String {
        format!("{}-audio.wav", self.id)
    }

    pub fn audio(&self) -> PathBuf {
        self.asset_dir.join(self.audio_name())
    }

    pub fn image_name(&self, index: usize) -> String {
        format!("{}-image-{}.png", self.id, index)
    }

    pub fn image(&self, index: usize) -> PathBuf {
        self.asset_dir.join(self.image_name(index))
    }

    /// Reference stored in the metadata file, rooted at the asset directory.
    pub fn image_reference(&self, index: usize) -> String {
        format!("/{}", self.image_name(index))
    }

    pub fn metadata(&self) -> PathBuf {
        self.asset_dir.join(format!("{}-metadata.json", self.id))
    }

    pub fn video(&self) -> PathBuf {
        self.output_dir.join(format!("{}.mp4", self.id))
    }
}

/// Sidecar path holding the prompt actually sent for an image.
pub fn prompt_path(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    image_path.with_file_name(format!("{stem}_prompt.txt"))
}

/// One transcribed word with its timing in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    #[serde(rename = "punctuated_word")]
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl Word {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Rejects word lists the scheduler cannot time. Overlapping neighbours are
/// accepted; the scheduler clamps their gaps to zero.
pub fn validate_words(words: &[Word]) -> Result<()> {
    if words.is_empty() {
        return Err(Error::InvalidWords("word list is empty".into()));
    }
    for (i, word) in words.iter().enumerate() {
        if !word.start.is_finite() || !word.end.is_finite() {
            return Err(Error::InvalidWords(format!(
                "word {i} ({:?}) has a non-finite timestamp",
                word.text
            )));
        }
        if word.start < 0.0 {
            return Err(Error::InvalidWords(format!(
                "word {i} ({:?}) starts before zero",
                word.text
            )));
        }
        if word.start > word.end {
            return Err(Error::InvalidWords(format!(
                "word {i} ({:?}) ends at {} before it starts at {}",
                word.text, word.end, word.start
            )));
        }
    }
    Ok(())
}

/// Hand-off between asset generation and rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub audio_url: String,
    pub images: Vec<String>,
    pub words: Vec<Word>,
}

impl Metadata {
    pub fn validate(&self) -> Result<()> {
        validate_words(&self.words)
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(self)?).await?;
        Ok(())
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        let metadata: Metadata = serde_json::from_str(&content)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Resolves a stored reference (`/x.png` or `x.wav`) against the asset directory.
    pub fn resolve(asset_dir: &Path, reference: &str) -> PathBuf {
        asset_dir.join(reference.trim_start_matches('/'))
    }

    pub fn audio_path(&self, asset_dir: &Path) -> PathBuf {
        Self::resolve(asset_dir, &self.audio_url)
    }

    pub fn image_paths(&self, asset_dir: &Path) -> Vec<PathBuf> {
        self.images
            .iter()
            .map(|image| Self::resolve(asset_dir, image))
            .collect()
    }
}
