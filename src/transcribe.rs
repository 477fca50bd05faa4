//! Word-level transcription of the voiceover.

use std::path::Path;

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use serde::Deserialize;
use tokio::time::{timeout, Duration};
use tracing::info;

use crate::ai;
use crate::error::{Error, Result};
use crate::metadata::{validate_words, Word};

const DEEPGRAM_LISTEN: &str = "https://api.deepgram.com/v1/listen";
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    results: Option<DeepgramResults>,
}

#[derive(Debug, Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    #[serde(default)]
    words: Vec<DeepgramWord>,
}

#[derive(Debug, Deserialize)]
struct DeepgramWord {
    word: String,
    punctuated_word: Option<String>,
    start: f64,
    end: f64,
}

/// Pulls the first alternative's words out of a prerecorded response.
pub fn parse_deepgram(body: &str) -> Result<Vec<Word>> {
    let response: DeepgramResponse = serde_json::from_str(body)?;
    let empty = || Error::EmptyResponse {
        service: "transcription",
    };
    let alternative = response
        .results
        .ok_or_else(empty)?
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .ok_or_else(empty)?;
    Ok(alternative
        .words
        .into_iter()
        .map(|w| Word::new(w.punctuated_word.unwrap_or(w.word), w.start, w.end))
        .collect())
}

pub enum Transcriber {
    Deepgram {
        http: reqwest::Client,
        api_key: String,
    },
    Whisper(Client<OpenAIConfig>),
}

impl Transcriber {
    pub fn deepgram(http: reqwest::Client, api_key: String) -> Self {
        Transcriber::Deepgram { http, api_key }
    }

    pub async fn words(&self, audio_path: &Path, language: &str) -> Result<Vec<Word>> {
        let words = match self {
            Transcriber::Deepgram { http, api_key } => {
                let audio = tokio::fs::read(audio_path).await?;
                let response = timeout(
                    TRANSCRIBE_TIMEOUT,
                    http.post(DEEPGRAM_LISTEN)
                        .query(&[
                            ("model", "nova-2"),
                            ("smart_format", "true"),
                            ("language", language),
                        ])
                        .header("Authorization", format!("Token {api_key}"))
                        .header("Content-Type", "audio/wav")
                        .body(audio)
                        .send(),
                )
                .await??;
                let status = response.status();
                let body = response.text().await?;
                if !status.is_success() {
                    return Err(Error::api("transcription", format!("{status}: {body}")));
                }
                parse_deepgram(&body)?
            }
            Transcriber::Whisper(client) => ai::whisper_words(client, audio_path, language).await?,
        };
        validate_words(&words)?;
        info!(count = words.len(), "transcribed words");
        Ok(words)
    }
}
