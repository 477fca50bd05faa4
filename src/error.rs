//! Error types for shortsmith.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{var} is not set: {hint}")]
    MissingCredential { var: &'static str, hint: &'static str },

    #[error("{service} request failed: {message}")]
    Api {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned an empty result")]
    EmptyResponse { service: &'static str },

    #[error("voice \"{name}\" not found (available: {})", available.join(", "))]
    VoiceNotFound { name: String, available: Vec<String> },

    #[error("invalid word timings: {0}")]
    InvalidWords(String),

    #[error("invalid caption settings: {0}")]
    InvalidSettings(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("render failed with a transient error: {0}")]
    TransientRender(String),

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenAI error: {0}")]
    OpenAi(#[from] async_openai::error::OpenAIError),

    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn api(service: &'static str, message: impl Into<String>) -> Self {
        Error::Api {
            service,
            message: message.into(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout("upstream service")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_names_variable_and_remedy() {
        let e = Error::MissingCredential {
            var: "DEEPGRAM_API_KEY",
            hint: "add it to .env",
        };
        assert_eq!(e.to_string(), "DEEPGRAM_API_KEY is not set: add it to .env");
    }

    #[test]
    fn voice_not_found_lists_alternatives() {
        let e = Error::VoiceNotFound {
            name: "Sarha".into(),
            available: vec!["Sarah".into(), "Adam".into()],
        };
        assert_eq!(
            e.to_string(),
            "voice \"Sarha\" not found (available: Sarah, Adam)"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("gone"));
    }
}
