use std::path::Path;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    AudioInput, AudioResponseFormat, ChatCompletionRequestMessage,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    CreateSpeechRequestArgs, CreateTranscriptionRequestArgs, SpeechModel, SpeechResponseFormat,
    TimestampGranularity, Voice,
};
use async_openai::Client;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::metadata::Word;

const PERPLEXITY_API_BASE: &str = "https://api.perplexity.ai";
const CHAT_TIMEOUT: Duration = Duration::from_secs(300);
const SPEECH_TIMEOUT: Duration = Duration::from_secs(120);
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(300);

pub fn script_prompt(topic: &str) -> String {
    format!(
        "Create a script for a youtube short. The script should be around 60 to 80 words long and be an interesting text about the provided topic, and it should start with a catchy headline, something like \"Did you know that?\" or \"This will blow your mind\". Remember that this is for a voiceover that should be read, so things like hashtags should not be included. Now write the script for the following topic: \"{topic}\". Now return the script and nothing else, also no meta-information - ONLY THE VOICEOVER."
    )
}

pub fn image_prompt_request(script: &str) -> String {
    format!(
        "My goal is to create a Youtube Short based on the following script. To create a background image for the video, I am using a text-to-video AI model. Please write a short (not longer than a single sentence), suitable prompt for such a model based on this script: {script}.\n\nNow return the prompt and nothing else."
    )
}

/// Chat-completion model behind an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct ChatModel {
    client: Client<OpenAIConfig>,
    model: String,
    service: &'static str,
}

impl ChatModel {
    pub fn perplexity(api_key: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(PERPLEXITY_API_BASE)
            .with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: "sonar".to_string(),
            service: "script model",
        }
    }

    #[allow(deprecated)]
    async fn complete(&self, prompt: String, max_tokens: u32, temperature: f32) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(max_tokens)
            .temperature(temperature)
            .messages([ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?,
            )])
            .build()?;

        let response = timeout(CHAT_TIMEOUT, self.client.chat().create(request)).await??;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(Error::EmptyResponse {
                service: self.service,
            })
    }

    /// Voiceover script of roughly 60 to 80 words.
    pub async fn video_script(&self, topic: &str) -> Result<String> {
        let script = self.complete(script_prompt(topic), 200, 0.7).await?;
        info!(words = script.split_whitespace().count(), "script generated");
        Ok(script)
    }

    /// One-sentence prompt for a background image.
    pub async fn image_prompt(&self, script: &str) -> Result<String> {
        // High temperature so each image in a batch differs.
        let prompt = self.complete(image_prompt_request(script), 100, 1.0).await?;
        debug!(%prompt, "image prompt");
        Ok(prompt)
    }
}

pub fn openai_client(api_key: &str) -> Client<OpenAIConfig> {
    Client::with_config(OpenAIConfig::new().with_api_key(api_key))
}

pub fn parse_voice(name: &str) -> Option<Voice> {
    let voice = match name.trim().to_ascii_lowercase().as_str() {
        "alloy" => Voice::Alloy,
        "ash" => Voice::Ash,
        "coral" => Voice::Coral,
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "onyx" => Voice::Onyx,
        "nova" => Voice::Nova,
        "sage" => Voice::Sage,
        "shimmer" => Voice::Shimmer,
        _ => return None,
    };
    Some(voice)
}

pub async fn audio_speech(
    client: &Client<OpenAIConfig>,
    text: &str,
    voice_name: &str,
    output_path: &Path,
) -> Result<()> {
    let voice = parse_voice(voice_name).ok_or_else(|| Error::VoiceNotFound {
        name: voice_name.to_string(),
        available: [
            "alloy", "ash", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer",
        ]
        .map(String::from)
        .to_vec(),
    })?;
    let request = CreateSpeechRequestArgs::default()
        .input(text)
        .voice(voice)
        .model(SpeechModel::Tts1Hd)
        .response_format(SpeechResponseFormat::Wav)
        .build()?;

    let response = timeout(SPEECH_TIMEOUT, client.audio().speech(request)).await??;
    response.save(output_path).await?;
    Ok(())
}

pub async fn whisper_words(
    client: &Client<OpenAIConfig>,
    audio_path: &Path,
    language: &str,
) -> Result<Vec<Word>> {
    let bytes = tokio::fs::read(audio_path).await?;
    let filename = audio_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio.wav".to_string());
    let request = CreateTranscriptionRequestArgs::default()
        .file(AudioInput::from_vec_u8(filename, bytes))
        .model("whisper-1")
        .language(language)
        .response_format(AudioResponseFormat::VerboseJson)
        .timestamp_granularities(vec![TimestampGranularity::Word])
        .build()?;

    let response = timeout(
        TRANSCRIBE_TIMEOUT,
        client.audio().transcribe_verbose_json(request),
    )
    .await??;
    let words = response.words.ok_or(Error::EmptyResponse {
        service: "whisper",
    })?;
    Ok(words
        .into_iter()
        .map(|w| Word::new(w.word, w.start as f64, w.end as f64))
        .collect())
}
