use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::caption::CaptionSettings;
use crate::error::{Error, Result};
use crate::upload::Privacy;

pub const DEFAULT_CONFIG_FILE: &str = "shortsmith.toml";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub captions: CaptionSettings,
    pub render: RenderConfig,
    pub assets: AssetsConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Where generated audio, images and metadata land.
    pub asset_dir: PathBuf,
    pub output_dir: PathBuf,
    pub slides_data: PathBuf,
    pub client_secret: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub title: Option<String>,
    /// Background music mixed under the voiceover.
    pub music: Option<PathBuf>,
    pub music_volume: f64,
    pub fonts_dir: Option<PathBuf>,
    pub attempts: u32,
    pub backoff_ms: u64,
    pub transient_signatures: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeechEngine {
    #[default]
    ElevenLabs,
    OpenAi,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionEngine {
    #[default]
    Deepgram,
    Whisper,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssetsConfig {
    pub image_count: usize,
    pub speech: SpeechEngine,
    pub transcription: TranscriptionEngine,
}

/// Upload defaults, overridden per upload by CLI flags or slides data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub title: String,
    pub tags: Vec<String>,
    pub privacy: Privacy,
    pub shorts: bool,
    /// Token cache directory, `~/.credentials` when unset.
    pub token_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            title: "AI Generated Shorts".to_string(),
            tags: vec!["shorts".to_string(), "ai".to_string()],
            privacy: Privacy::Public,
            shorts: true,
            token_dir: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            asset_dir: PathBuf::from("public"),
            output_dir: PathBuf::from("out"),
            slides_data: PathBuf::from("src/data/slides.json"),
            client_secret: PathBuf::from("client_secret.json"),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
            title: None,
            music: None,
            music_volume: 0.1,
            fonts_dir: None,
            attempts: 3,
            backoff_ms: 1500,
            transient_signatures: vec![
                "Navigating frame was detached".to_string(),
                "Target closed".to_string(),
                "Navigation".to_string(),
                "Resource temporarily unavailable".to_string(),
            ],
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            image_count: 5,
            speech: SpeechEngine::default(),
            transcription: TranscriptionEngine::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// An explicit path must exist. Without one, `shortsmith.toml` in the
    /// working directory is used when present, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) if !p.exists() => {
                return Err(Error::NotFound {
                    path: p.to_path_buf(),
                })
            }
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.captions.validate()?;
        if self.render.fps == 0 || self.render.width < 2 || self.render.height < 2 {
            return Err(Error::InvalidSettings(
                "render size and fps must be positive".into(),
            ));
        }
        if self.render.attempts == 0 {
            return Err(Error::InvalidSettings(
                "render attempts must be at least 1".into(),
            ));
        }
        if self.assets.image_count == 0 {
            return Err(Error::InvalidSettings(
                "image_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn flag(value: Option<String>) -> bool {
    matches!(value.as_deref().map(str::trim), Some("1") | Some("true"))
}

/// Behaviour switches read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flags {
    pub skip_prompt_enhancement: bool,
    pub unsplash_fallback: bool,
    pub picsum_fallback: bool,
    pub language: String,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            skip_prompt_enhancement: false,
            unsplash_fallback: false,
            picsum_fallback: false,
            language: "ko".to_string(),
        }
    }
}

impl Flags {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            skip_prompt_enhancement: flag(lookup("SKIP_GEMINI_PROMPT")),
            unsplash_fallback: flag(lookup("ENABLE_UNSPLASH_FALLBACK")),
            picsum_fallback: flag(lookup("ENABLE_PICSUM_FALLBACK")),
            language: lookup("DEEPGRAM_LANGUAGE")
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| "ko".to_string()),
        }
    }
}

/// API keys, all optional until a stage needs one.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub perplexity: Option<String>,
    pub openai: Option<String>,
    pub gemini: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let get = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            perplexity: get("PERPLEXITY_API_KEY"),
            openai: get("OPENAI_API_KEY"),
            gemini: get("GEMINI_API_KEY"),
            elevenlabs: get("ELEVEN_API_KEY"),
            deepgram: get("DEEPGRAM_API_KEY"),
        }
    }

    pub fn require(value: &Option<String>, var: &'static str) -> Result<String> {
        value.clone().ok_or(Error::MissingCredential {
            var,
            hint: "export it or add it to a .env file in the working directory",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_shorts_pipeline() {
        let config = Config::default();
        assert_eq!(config.assets.image_count, 5);
        assert_eq!(config.render.attempts, 3);
        assert_eq!(config.render.backoff_ms, 1500);
        assert_eq!(config.paths.asset_dir, PathBuf::from("public"));
        assert_eq!(config.upload.tags, vec!["shorts", "ai"]);
        config.validate().unwrap();
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [captions]
            num_simultaneous_words = 2

            [render]
            title = "Eclipses"

            [assets]
            speech = "openai"
            transcription = "whisper"
            "#,
        )
        .unwrap();
        assert_eq!(config.captions.num_simultaneous_words, 2);
        assert_eq!(config.render.title.as_deref(), Some("Eclipses"));
        assert_eq!(config.assets.speech, SpeechEngine::OpenAi);
        assert_eq!(config.assets.transcription, TranscriptionEngine::Whisper);
        assert_eq!(config.render.fps, 30);
    }

    #[test]
    fn load_rejects_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn load_validates_captions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[captions]\nnum_simultaneous_words = 0\n").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(Error::InvalidSettings(_))
        ));
    }

    #[test]
    fn flags_accept_one_or_true() {
        let flags = Flags::from_lookup(|key| match key {
            "SKIP_GEMINI_PROMPT" => Some("true".into()),
            "ENABLE_UNSPLASH_FALLBACK" => Some("1".into()),
            "ENABLE_PICSUM_FALLBACK" => Some("yes".into()),
            "DEEPGRAM_LANGUAGE" => Some("en".into()),
            _ => None,
        });
        assert!(flags.skip_prompt_enhancement);
        assert!(flags.unsplash_fallback);
        assert!(!flags.picsum_fallback);
        assert_eq!(flags.language, "en");
        assert_eq!(Flags::from_lookup(|_| None), Flags::default());
    }

    #[test]
    fn missing_credential_is_reported_by_name() {
        let err = Credentials::require(&None, "ELEVEN_API_KEY").unwrap_err();
        assert!(err.to_string().starts_with("ELEVEN_API_KEY is not set"));
    }
}
