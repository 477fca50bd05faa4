//! Publishing a rendered video as a YouTube Short.

pub mod oauth;
pub mod youtube;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use oauth::{Authenticator, ClientSecret, Token};
pub use youtube::{Snippet, Status, UploadedVideo, VideoResource, YouTube};

use crate::config::UploadConfig;
use crate::error::{Error, Result};

pub const DEFAULT_DESCRIPTION: &str = "🤖 AI로 자동 생성된 쇼츠입니다.";
const SHORTS_TAG: &str = "#Shorts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Private,
    #[default]
    Public,
    Unlisted,
}

impl FromStr for Privacy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_matches('"') {
            "private" => Ok(Privacy::Private),
            "public" => Ok(Privacy::Public),
            "unlisted" => Ok(Privacy::Unlisted),
            other => Err(Error::InvalidSettings(format!(
                "privacy must be private, public or unlisted, not {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Privacy::Private => "private",
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    pub title: String,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub privacy: Option<Privacy>,
    pub shorts: bool,
}

impl UploadOptions {
    pub fn new(defaults: &UploadConfig) -> Self {
        Self {
            title: defaults.title.clone(),
            description: None,
            tags: None,
            privacy: None,
            shorts: defaults.shorts,
        }
    }

    /// Request body with the Shorts marker applied to title, tags and description.
    pub fn resource(&self, defaults: &UploadConfig) -> VideoResource {
        let mut title = self.title.clone();
        let mut tags = self.tags.clone().unwrap_or_else(|| defaults.tags.clone());
        if self.shorts {
            title = format!("{SHORTS_TAG} {title}");
            if !tags.iter().any(|t| t == "shorts") {
                tags.push("shorts".to_string());
            }
        }
        VideoResource {
            snippet: Snippet {
                title,
                description: generate_description(self),
                tags,
            },
            status: Status {
                privacy_status: self.privacy.unwrap_or(defaults.privacy),
                made_for_kids: false,
            },
        }
    }
}

pub fn generate_description(options: &UploadOptions) -> String {
    let mut description = options
        .description
        .clone()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    if options.shorts && !description.contains(SHORTS_TAG) {
        description.push_str("\n\n");
        description.push_str(SHORTS_TAG);
    }
    description
}

/// Comma-separated tag list; blanks are dropped.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().trim_matches('"').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Slide {
    #[serde(default)]
    pub texts: Vec<String>,
}

/// Title and narration of a slide deck, used as upload metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct SlidesData {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub slides: Option<Vec<Slide>>,
}

impl SlidesData {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| Error::NotFound {
                path: path.to_path_buf(),
            })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Slide texts joined by spaces, slides by blank lines, else the script.
    pub fn description(&self) -> Option<String> {
        let from_slides = self
            .slides
            .as_ref()
            .map(|slides| {
                slides
                    .iter()
                    .map(|s| s.texts.join(" "))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })
            .filter(|d| !d.is_empty());
        from_slides.or_else(|| self.script.clone().filter(|s| !s.is_empty()))
    }

    pub fn options(&self, defaults: &UploadConfig) -> UploadOptions {
        UploadOptions {
            title: self
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| defaults.title.clone()),
            description: self.description(),
            shorts: true,
            ..UploadOptions::new(defaults)
        }
    }
}

/// Where the upload credentials live.
#[derive(Debug, Clone)]
pub struct UploadAuth {
    pub client_secret: PathBuf,
    pub token_dir: PathBuf,
}

/// Authorizes (interactively on first use) and uploads `video_path`.
pub async fn upload_shorts(
    video_path: &Path,
    options: &UploadOptions,
    defaults: &UploadConfig,
    auth: &UploadAuth,
) -> Result<UploadedVideo> {
    if !video_path.is_file() {
        return Err(Error::NotFound {
            path: video_path.to_path_buf(),
        });
    }
    let resource = options.resource(defaults);
    info!(
        video = %video_path.display(),
        title = %resource.snippet.title,
        tags = ?resource.snippet.tags,
        privacy = %resource.status.privacy_status,
        "uploading short"
    );

    let http = reqwest::Client::new();
    let secret = ClientSecret::load(&auth.client_secret).await?;
    let token_path = oauth::token_path(&auth.token_dir, &auth.client_secret);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let access_token = Authenticator::new(http.clone(), secret, token_path)
        .access_token(stdin)
        .await?;

    let video = YouTube::new(http, access_token)
        .upload(video_path, &resource)
        .await?;
    println!("Video ID: {}", video.id);
    println!("YouTube link: {}", video.watch_url());
    Ok(video)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> UploadConfig {
        UploadConfig::default()
    }

    #[test]
    fn shorts_mode_marks_title_tags_and_description() {
        let options = UploadOptions {
            tags: Some(vec!["space".into()]),
            ..UploadOptions::new(&defaults())
        };
        let resource = options.resource(&defaults());
        assert_eq!(resource.snippet.title, "#Shorts AI Generated Shorts");
        assert_eq!(resource.snippet.tags, vec!["space", "shorts"]);
        assert_eq!(
            resource.snippet.description,
            format!("{DEFAULT_DESCRIPTION}\n\n#Shorts")
        );
        assert_eq!(resource.status.privacy_status, Privacy::Public);
        assert!(!resource.status.made_for_kids);
    }

    #[test]
    fn plain_mode_leaves_metadata_alone() {
        let options = UploadOptions {
            title: "Eclipses".into(),
            description: Some("Why the moon turns red".into()),
            privacy: Some(Privacy::Private),
            shorts: false,
            tags: None,
        };
        let resource = options.resource(&defaults());
        assert_eq!(resource.snippet.title, "Eclipses");
        assert_eq!(resource.snippet.description, "Why the moon turns red");
        assert_eq!(resource.snippet.tags, vec!["shorts", "ai"]);
        assert_eq!(resource.status.privacy_status, Privacy::Private);
    }

    #[test]
    fn existing_shorts_hashtag_is_not_repeated() {
        let options = UploadOptions {
            description: Some("moon facts #Shorts".into()),
            ..UploadOptions::new(&defaults())
        };
        assert_eq!(generate_description(&options), "moon facts #Shorts");
    }

    #[test]
    fn privacy_parses_known_values() {
        assert_eq!("unlisted".parse::<Privacy>().unwrap(), Privacy::Unlisted);
        assert_eq!("\"private\"".parse::<Privacy>().unwrap(), Privacy::Private);
        assert!("friends".parse::<Privacy>().is_err());
    }

    #[test]
    fn tags_are_split_on_commas() {
        assert_eq!(parse_tags("\"moon, space,,science\""), vec!["moon", "space", "science"]);
    }

    #[test]
    fn slides_supply_title_and_description() {
        let slides: SlidesData = serde_json::from_str(
            r#"{"title": "Eclipses", "script": "unused",
                "slides": [{"texts": ["The moon", "turns red."]}, {"texts": ["Why?"]}]}"#,
        )
        .unwrap();
        let options = slides.options(&defaults());
        assert_eq!(options.title, "Eclipses");
        assert_eq!(options.description.as_deref(), Some("The moon turns red.\n\nWhy?"));
        assert!(options.shorts);
    }

    #[test]
    fn slides_fall_back_to_script_and_default_title() {
        let slides: SlidesData =
            serde_json::from_str(r#"{"title": "", "script": "A story", "slides": []}"#).unwrap();
        let options = slides.options(&defaults());
        assert_eq!(options.title, "AI Generated Shorts");
        assert_eq!(options.description.as_deref(), Some("A story"));
    }

    #[tokio::test]
    async fn missing_slides_file_is_reported() {
        let err = SlidesData::load(Path::new("/nonexistent/slides.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
