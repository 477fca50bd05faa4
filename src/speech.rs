//! Voiceover synthesis.

use std::path::Path;

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use crate::ai;
use crate::error::{Error, Result};

const ELEVENLABS_API: &str = "https://api.elevenlabs.io/v1";
const ELEVENLABS_MODEL: &str = "eleven_multilingual_v2";
const SPEECH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
pub struct VoiceList {
    pub voices: Vec<VoiceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceEntry {
    pub name: String,
    pub voice_id: String,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model_id: &'a str,
    text: &'a str,
}

/// Looks a voice up by exact name. Unknown names fail instead of falling
/// back to some default voice.
pub fn find_voice_id(voices: &[VoiceEntry], name: &str) -> Result<String> {
    voices
        .iter()
        .find(|v| v.name == name)
        .map(|v| v.voice_id.clone())
        .ok_or_else(|| Error::VoiceNotFound {
            name: name.to_string(),
            available: voices.iter().map(|v| v.name.clone()).collect(),
        })
}

pub enum Synthesizer {
    ElevenLabs {
        http: reqwest::Client,
        api_key: String,
    },
    OpenAi(Client<OpenAIConfig>),
}

impl Synthesizer {
    pub fn elevenlabs(http: reqwest::Client, api_key: String) -> Self {
        Synthesizer::ElevenLabs { http, api_key }
    }

    /// Speaks `text` with the named voice and writes the audio to `output_path`.
    pub async fn synthesize(&self, text: &str, voice: &str, output_path: &Path) -> Result<()> {
        if let Some(dir) = output_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        match self {
            Synthesizer::ElevenLabs { http, api_key } => {
                let voices = list_voices(http, api_key).await?;
                let voice_id = find_voice_id(&voices, voice)?;
                debug!(%voice, %voice_id, "resolved voice");

                let response = timeout(
                    SPEECH_TIMEOUT,
                    http.post(format!("{ELEVENLABS_API}/text-to-speech/{voice_id}"))
                        .header("xi-api-key", api_key)
                        .json(&SpeechRequest {
                            model_id: ELEVENLABS_MODEL,
                            text,
                        })
                        .send(),
                )
                .await??;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::api("text-to-speech", format!("{status}: {body}")));
                }
                let audio = response.bytes().await?;
                if audio.is_empty() {
                    return Err(Error::EmptyResponse {
                        service: "text-to-speech",
                    });
                }
                tokio::fs::write(output_path, &audio).await?;
            }
            Synthesizer::OpenAi(client) => {
                ai::audio_speech(client, text, voice, output_path).await?;
            }
        }
        info!(path = %output_path.display(), "voiceover written");
        Ok(())
    }
}

async fn list_voices(http: &reqwest::Client, api_key: &str) -> Result<Vec<VoiceEntry>> {
    let response = http
        .get(format!("{ELEVENLABS_API}/voices"))
        .header("xi-api-key", api_key)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::api("voice lookup", format!("HTTP error! status: {status}")));
    }
    Ok(response.json::<VoiceList>().await?.voices)
}
