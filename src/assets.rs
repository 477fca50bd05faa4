//! Asset generation: script, voiceover, word timings, images, metadata.

use std::future::Future;
use std::path::PathBuf;

use futures_util::future::join_all;
use tracing::info;

use crate::ai::{self, ChatModel};
use crate::config::{Config, Credentials, Flags, SpeechEngine, TranscriptionEngine};
use crate::error::Result;
use crate::imagery::{ChainOptions, ImageBackend, ImageChain, RemoteImages};
use crate::metadata::{Job, JobPaths, Metadata};
use crate::speech::Synthesizer;
use crate::transcribe::Transcriber;

/// Clients for one pipeline run, built up front and passed to each stage.
pub struct Services<B> {
    pub chat: ChatModel,
    pub synthesizer: Synthesizer,
    pub transcriber: Transcriber,
    pub images: ImageChain<B>,
}

impl Services<RemoteImages> {
    /// Fails on the first credential a configured stage needs but lacks.
    pub fn from_credentials(
        config: &Config,
        credentials: &Credentials,
        flags: &Flags,
    ) -> Result<Self> {
        let http = reqwest::Client::new();
        let openai = credentials.openai.as_deref().map(ai::openai_client);
        let require_openai = || -> Result<_> {
            let key = Credentials::require(&credentials.openai, "OPENAI_API_KEY")?;
            Ok(ai::openai_client(&key))
        };

        let chat = ChatModel::perplexity(&Credentials::require(
            &credentials.perplexity,
            "PERPLEXITY_API_KEY",
        )?);
        let synthesizer = match config.assets.speech {
            SpeechEngine::ElevenLabs => Synthesizer::elevenlabs(
                http.clone(),
                Credentials::require(&credentials.elevenlabs, "ELEVEN_API_KEY")?,
            ),
            SpeechEngine::OpenAi => Synthesizer::OpenAi(require_openai()?),
        };
        let transcriber = match config.assets.transcription {
            TranscriptionEngine::Deepgram => Transcriber::deepgram(
                http.clone(),
                Credentials::require(&credentials.deepgram, "DEEPGRAM_API_KEY")?,
            ),
            TranscriptionEngine::Whisper => Transcriber::Whisper(require_openai()?),
        };
        let options = ChainOptions::new(
            flags,
            credentials.gemini.is_some(),
            credentials.openai.is_some(),
        );
        let images = ImageChain::new(
            RemoteImages::new(http, openai, credentials.gemini.clone()),
            options,
        );

        Ok(Self {
            chat,
            synthesizer,
            transcriber,
            images,
        })
    }
}

/// Generates `count` images concurrently, one prompt per image.
///
/// A prompt failure is fatal. An image that no provider could produce is
/// left out, so the returned references may be fewer than `count`, in index
/// order.
pub async fn image_batch<B, F, Fut>(
    chain: &ImageChain<B>,
    paths: &JobPaths,
    count: usize,
    prompt_for: F,
) -> Result<Vec<String>>
where
    B: ImageBackend,
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let tasks = (0..count).map(|index| {
        let prompt = prompt_for(index);
        async move {
            let prompt = prompt.await?;
            let ok = chain.generate(&prompt, &paths.image(index)).await;
            Ok(ok.then(|| paths.image_reference(index)))
        }
    });
    let results: Vec<Result<Option<String>>> = join_all(tasks).await;

    let mut references = Vec::with_capacity(count);
    for result in results {
        if let Some(reference) = result? {
            references.push(reference);
        }
    }
    Ok(references)
}

/// Runs the asset stages for `job` and returns the metadata file path.
pub async fn create_assets<B: ImageBackend>(
    job: &Job,
    config: &Config,
    flags: &Flags,
    services: &Services<B>,
) -> Result<PathBuf> {
    let paths = job.paths(&config.paths.asset_dir, &config.paths.output_dir);
    tokio::fs::create_dir_all(&config.paths.asset_dir).await?;
    info!(job = %job.id, topic = %job.topic, "generating assets");

    let script = services.chat.video_script(&job.topic).await?;
    info!(%script, "script");

    services
        .synthesizer
        .synthesize(&script, &job.voice, &paths.audio())
        .await?;
    let words = services
        .transcriber
        .words(&paths.audio(), &flags.language)
        .await?;

    info!(count = config.assets.image_count, "generating images");
    let images = image_batch(
        &services.images,
        &paths,
        config.assets.image_count,
        |_| services.chat.image_prompt(&script),
    )
    .await?;
    if images.len() < config.assets.image_count {
        info!(
            requested = config.assets.image_count,
            produced = images.len(),
            "continuing with fewer images"
        );
    }

    let metadata = Metadata {
        audio_url: paths.audio_name(),
        images,
        words,
    };
    metadata.write(&paths.metadata()).await?;
    info!(path = %paths.metadata().display(), "metadata written");
    Ok(paths.metadata())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::imagery::sample_png;
    use crate::metadata::Word;
    use std::path::Path;
    use tokio::time::Duration;

    /// Generates for every prompt except the ones containing "fail".
    struct Picky;

    impl ImageBackend for Picky {
        async fn enhance(&self, prompt: &str) -> Result<String> {
            Ok(prompt.to_string())
        }

        async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
            if prompt.contains("fail") {
                Err(Error::api("image generation", "rejected"))
            } else {
                Ok(sample_png())
            }
        }

        async fn download(&self, _url: &str) -> Result<Vec<u8>> {
            Err(Error::api("download", "offline"))
        }
    }

    fn chain() -> ImageChain<Picky> {
        ImageChain::new(
            Picky,
            ChainOptions {
                enhance: false,
                primary: true,
                unsplash: false,
                picsum: false,
                unsplash_backoff: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn failed_images_are_dropped_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new("eclipses", "Sarah");
        let paths = job.paths(dir.path(), Path::new("out"));

        let refs = image_batch(&chain(), &paths, 5, |i| async move {
            Ok(if i == 1 || i == 3 {
                format!("fail {i}")
            } else {
                format!("moon {i}")
            })
        })
        .await
        .unwrap();

        assert_eq!(
            refs,
            vec![
                paths.image_reference(0),
                paths.image_reference(2),
                paths.image_reference(4)
            ]
        );
        assert!(paths.image(0).exists());
        assert!(!paths.image(1).exists());

        let metadata = Metadata {
            audio_url: paths.audio_name(),
            images: refs,
            words: vec![Word::new("Did", 0.0, 0.3)],
        };
        metadata.write(&paths.metadata()).await.unwrap();
        let read = Metadata::read(&paths.metadata()).await.unwrap();
        assert_eq!(read.images.len(), 3);
        assert_eq!(read.image_paths(dir.path())[1], paths.image(2));
    }

    #[tokio::test]
    async fn prompt_errors_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Job::new("t", "v").paths(dir.path(), Path::new("out"));

        let result = image_batch(&chain(), &paths, 2, |i| async move {
            if i == 1 {
                Err(Error::EmptyResponse {
                    service: "script model",
                })
            } else {
                Ok("moon".to_string())
            }
        })
        .await;
        assert!(matches!(result, Err(Error::EmptyResponse { .. })));
    }

    #[test]
    fn missing_keys_are_reported_before_any_call() {
        let credentials = Credentials {
            perplexity: Some("pplx".into()),
            ..Default::default()
        };
        let err = Services::from_credentials(&Config::default(), &credentials, &Flags::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::MissingCredential {
                var: "ELEVEN_API_KEY",
                ..
            }
        ));
    }
}
