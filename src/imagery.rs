//! Background image generation with layered fallbacks.
//!
//! The chain is: optional prompt enhancement, DALL-E 3 with the final prompt,
//! DALL-E 3 again with the raw prompt, then the stock-photo providers when
//! they are switched on. Failures are logged and reported as `false`.

use std::future::Future;
use std::path::Path;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    CreateImageRequestArgs, Image, ImageModel, ImageQuality, ImageResponseFormat, ImageSize,
};
use async_openai::Client;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::config::Flags;
use crate::error::{Error, Result};
use crate::metadata::prompt_path;

const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent";
const UNSPLASH_BASE: &str = "https://source.unsplash.com/1024x1792/";
pub const PICSUM_URL: &str = "https://picsum.photos/1024/1792";
const IMAGE_TIMEOUT: Duration = Duration::from_secs(180);
const UNSPLASH_ATTEMPTS: u32 = 3;

pub fn enhancement_prompt(prompt: &str) -> String {
    format!(
        "Create a detailed, high-quality image generation prompt for the following description: \"{prompt}\".\n\
         The prompt should be optimized for AI image generation models like DALL-E, Midjourney, or Stable Diffusion.\n\
         Include specific details about style, composition, lighting, and visual elements.\n\
         Make it suitable for YouTube Shorts background images.\n\
         Return only the improved prompt, nothing else."
    )
}

fn is_hangul(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

/// Stock-photo search URL built from the first 80 characters of the prompt,
/// punctuation replaced by spaces.
pub fn unsplash_url(prompt: &str) -> String {
    let query: String = prompt
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c.is_whitespace() || is_hangul(c) {
                c
            } else {
                ' '
            }
        })
        .take(80)
        .collect();
    format!("{UNSPLASH_BASE}?{}", urlencoding::encode(&query))
}

/// Decodes `bytes` as an image and stores it as PNG.
pub fn save_png(bytes: &[u8], path: &Path) -> Result<()> {
    let image = image::load_from_memory(bytes)?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    image.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

/// [`save_png`] on the blocking pool.
pub async fn store_png(bytes: Vec<u8>, path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || save_png(&bytes, &path))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

/// The remote calls the chain is built from.
pub trait ImageBackend: Send + Sync {
    fn enhance(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;

    fn generate(&self, prompt: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn download(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Which stages of the chain run.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub enhance: bool,
    pub primary: bool,
    pub unsplash: bool,
    pub picsum: bool,
    pub unsplash_backoff: Duration,
}

impl ChainOptions {
    pub fn new(flags: &Flags, has_gemini: bool, has_openai: bool) -> Self {
        if !flags.skip_prompt_enhancement && !has_gemini {
            warn!("GEMINI_API_KEY is not set; using image prompts as they are");
        }
        if !has_openai {
            warn!("OPENAI_API_KEY is not set; skipping primary image generation");
        }
        Self {
            enhance: !flags.skip_prompt_enhancement && has_gemini,
            primary: has_openai,
            unsplash: flags.unsplash_fallback,
            picsum: flags.picsum_fallback,
            unsplash_backoff: Duration::from_secs(1),
        }
    }
}

pub struct ImageChain<B> {
    backend: B,
    options: ChainOptions,
}

impl<B: ImageBackend> ImageChain<B> {
    pub fn new(backend: B, options: ChainOptions) -> Self {
        Self { backend, options }
    }

    /// Produces one image at `save_path`. Returns whether any stage succeeded.
    pub async fn generate(&self, prompt: &str, save_path: &Path) -> bool {
        if self.options.primary {
            match self.primary(prompt, save_path).await {
                Ok(()) => {
                    info!(path = %save_path.display(), "image saved");
                    return true;
                }
                Err(e) => warn!(error = %e, "image generation failed"),
            }
            match self.store(self.backend.generate(prompt).await, save_path).await {
                Ok(()) => {
                    info!(path = %save_path.display(), "image saved with the raw prompt");
                    return true;
                }
                Err(e) => warn!(error = %e, "image generation with the raw prompt failed"),
            }
        }

        if self.options.unsplash {
            let url = unsplash_url(prompt);
            for attempt in 1..=UNSPLASH_ATTEMPTS {
                debug!(%url, attempt, "trying stock photo fallback");
                match self.store(self.backend.download(&url).await, save_path).await {
                    Ok(()) => {
                        info!(path = %save_path.display(), "image saved from unsplash");
                        return true;
                    }
                    Err(e) => {
                        warn!(error = %e, attempt, "unsplash attempt failed");
                        sleep(self.options.unsplash_backoff * attempt).await;
                    }
                }
            }
        }

        if self.options.picsum {
            match self.store(self.backend.download(PICSUM_URL).await, save_path).await {
                Ok(()) => {
                    info!(path = %save_path.display(), "image saved from picsum");
                    return true;
                }
                Err(e) => warn!(error = %e, "picsum fallback failed"),
            }
        }

        warn!(path = %save_path.display(), "no image produced");
        false
    }

    async fn primary(&self, prompt: &str, save_path: &Path) -> Result<()> {
        let prompt = if self.options.enhance {
            let enhanced = self.backend.enhance(prompt).await?;
            let sidecar = prompt_path(save_path);
            tokio::fs::write(&sidecar, &enhanced).await?;
            info!(prompt = %enhanced, path = %sidecar.display(), "image prompt enhanced");
            enhanced
        } else {
            prompt.to_string()
        };
        self.store(self.backend.generate(&prompt).await, save_path).await
    }

    async fn store(&self, bytes: Result<Vec<u8>>, save_path: &Path) -> Result<()> {
        store_png(bytes?, save_path).await
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

pub fn parse_gemini(body: &str) -> Result<String> {
    let response: GeminiResponse = serde_json::from_str(body)?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .map(|c| c.content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::EmptyResponse {
            service: "prompt enhancement",
        });
    }
    Ok(text.to_string())
}

/// Gemini, DALL-E 3 and plain HTTP downloads.
pub struct RemoteImages {
    http: reqwest::Client,
    openai: Option<Client<OpenAIConfig>>,
    gemini_key: Option<String>,
}

impl RemoteImages {
    pub fn new(
        http: reqwest::Client,
        openai: Option<Client<OpenAIConfig>>,
        gemini_key: Option<String>,
    ) -> Self {
        Self {
            http,
            openai,
            gemini_key,
        }
    }
}

impl ImageBackend for RemoteImages {
    async fn enhance(&self, prompt: &str) -> Result<String> {
        let key = self.gemini_key.as_deref().ok_or(Error::MissingCredential {
            var: "GEMINI_API_KEY",
            hint: "set it or SKIP_GEMINI_PROMPT=1",
        })?;
        let body = json!({
            "contents": [{ "parts": [{ "text": enhancement_prompt(prompt) }] }]
        });
        let response = timeout(
            IMAGE_TIMEOUT,
            self.http
                .post(GEMINI_ENDPOINT)
                .query(&[("key", key)])
                .json(&body)
                .send(),
        )
        .await??;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::api("prompt enhancement", format!("{status}: {text}")));
        }
        parse_gemini(&text)
    }

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        let client = self.openai.as_ref().ok_or(Error::MissingCredential {
            var: "OPENAI_API_KEY",
            hint: "image generation needs an OpenAI key",
        })?;
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(ImageModel::DallE3)
            .size(ImageSize::S1024x1792)
            .quality(ImageQuality::Standard)
            .response_format(ImageResponseFormat::B64Json)
            .n(1)
            .build()?;

        let response = timeout(IMAGE_TIMEOUT, client.images().create(request)).await??;
        let image = response.data.into_iter().next().ok_or(Error::EmptyResponse {
            service: "image generation",
        })?;
        match image.as_ref() {
            Image::B64Json { b64_json, .. } => BASE64_STANDARD
                .decode(b64_json.as_bytes())
                .map_err(|e| Error::api("image generation", e.to_string())),
            Image::Url { url, .. } => self.download(url).await,
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = timeout(IMAGE_TIMEOUT, self.http.get(url).send())
            .await??
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Tiny PNG used by tests across the crate.
#[cfg(test)]
pub(crate) fn sample_png() -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbImage::from_pixel(4, 6, image::Rgb([200, 120, 40]))
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        enhance_ok: bool,
        generate_ok: Vec<bool>,
        download_ok: Vec<(&'static str, bool)>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn log(&self, entry: String) -> usize {
            let mut calls = self.calls.lock().unwrap();
            calls.push(entry);
            calls.len()
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ImageBackend for Scripted {
        async fn enhance(&self, prompt: &str) -> Result<String> {
            self.log(format!("enhance:{prompt}"));
            if self.enhance_ok {
                Ok(format!("{prompt}, cinematic lighting"))
            } else {
                Err(Error::api("prompt enhancement", "quota"))
            }
        }

        async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
            let n = self
                .calls()
                .iter()
                .filter(|c| c.starts_with("generate"))
                .count();
            self.log(format!("generate:{prompt}"));
            if self.generate_ok.get(n).copied().unwrap_or(false) {
                Ok(sample_png())
            } else {
                Err(Error::api("image generation", "content policy"))
            }
        }

        async fn download(&self, url: &str) -> Result<Vec<u8>> {
            self.log(format!("download:{url}"));
            let ok = self
                .download_ok
                .iter()
                .any(|(prefix, ok)| *ok && url.starts_with(prefix));
            if ok {
                Ok(sample_png())
            } else {
                Err(Error::api("download", "503"))
            }
        }
    }

    fn options(enhance: bool, unsplash: bool, picsum: bool) -> ChainOptions {
        ChainOptions {
            enhance,
            primary: true,
            unsplash,
            picsum,
            unsplash_backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn enhanced_prompt_is_used_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job-image-0.png");
        let backend = Scripted {
            enhance_ok: true,
            generate_ok: vec![true],
            ..Default::default()
        };
        let chain = ImageChain::new(backend, options(true, false, false));

        assert!(chain.generate("a full moon", &path).await);
        assert!(image::open(&path).is_ok());
        let sidecar = std::fs::read_to_string(dir.path().join("job-image-0_prompt.txt")).unwrap();
        assert_eq!(sidecar, "a full moon, cinematic lighting");
        assert_eq!(
            chain.backend.calls(),
            vec!["enhance:a full moon", "generate:a full moon, cinematic lighting"]
        );
    }

    #[tokio::test]
    async fn failed_enhancement_retries_with_raw_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let backend = Scripted {
            generate_ok: vec![true],
            ..Default::default()
        };
        let chain = ImageChain::new(backend, options(true, false, false));

        assert!(chain.generate("eclipse", &path).await);
        assert_eq!(chain.backend.calls(), vec!["enhance:eclipse", "generate:eclipse"]);
        assert!(!dir.path().join("img_prompt.txt").exists());
    }

    #[tokio::test]
    async fn all_stages_failing_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let chain = ImageChain::new(Scripted::default(), options(false, true, true));

        assert!(!chain.generate("eclipse", &path).await);
        assert!(!path.exists());
        let calls = chain.backend.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("generate")).count(), 2);
        assert_eq!(
            calls
                .iter()
                .filter(|c| c.starts_with("download:https://source.unsplash.com"))
                .count(),
            3
        );
        assert_eq!(calls.last().unwrap(), &format!("download:{PICSUM_URL}"));
    }

    #[tokio::test]
    async fn picsum_runs_without_unsplash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let backend = Scripted {
            download_ok: vec![(PICSUM_URL, true)],
            ..Default::default()
        };
        let chain = ImageChain::new(backend, options(false, false, true));

        assert!(chain.generate("eclipse", &path).await);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn fallbacks_stay_off_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let flags = Flags::default();
        let chain = ImageChain::new(Scripted::default(), ChainOptions::new(&flags, true, true));

        assert!(!chain.generate("eclipse", &dir.path().join("img.png")).await);
        assert!(chain
            .backend
            .calls()
            .iter()
            .all(|c| !c.starts_with("download")));
    }

    #[test]
    fn unsplash_query_strips_punctuation() {
        assert_eq!(
            unsplash_url("The moon, at night"),
            "https://source.unsplash.com/1024x1792/?The%20moon%20%20at%20night"
        );
        assert_eq!(
            unsplash_url("월식!"),
            "https://source.unsplash.com/1024x1792/?%EC%9B%94%EC%8B%9D%20"
        );
        let long = "a".repeat(200);
        assert_eq!(unsplash_url(&long).len(), UNSPLASH_BASE.len() + 1 + 80);
    }

    #[test]
    fn gemini_text_parts_are_joined() {
        let body = r#"{"candidates": [{"content": {"role": "model", "parts": [
            {"text": "A glowing moon "}, {"text": "over the sea\n"}
        ]}}]}"#;
        assert_eq!(parse_gemini(body).unwrap(), "A glowing moon over the sea");
        assert!(parse_gemini(r#"{"candidates": []}"#).is_err());
    }

    #[test]
    fn non_images_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.png");
        assert!(matches!(
            save_png(b"<html>rate limited</html>", &path),
            Err(Error::Image(_))
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stored_images_are_png_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/x.png");
        store_png(sample_png(), &path).await.unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(
            image::guess_format(&written).unwrap(),
            image::ImageFormat::Png
        );
    }

    #[test]
    fn enhancement_prompt_quotes_description() {
        let p = enhancement_prompt("a red fox");
        assert!(p.starts_with("Create a detailed, high-quality image generation prompt for the following description: \"a red fox\"."));
        assert!(p.ends_with("Return only the improved prompt, nothing else."));
    }
}
