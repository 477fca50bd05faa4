//! OAuth2 authorization-code flow for an installed application, with a
//! per-credential token cache.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

use crate::error::{Error, Result};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/youtube.upload",
    "https://www.googleapis.com/auth/youtube",
];
/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_MS: i64 = 60_000;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn parse(content: &str) -> Result<Self> {
        let file: ClientSecretFile = serde_json::from_str(content)?;
        file.installed
            .or(file.web)
            .ok_or_else(|| Error::Auth("client secret has no \"installed\" or \"web\" section".into()))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Auth(format!(
                "client secret file not found: {} (download it from the Google Cloud console)",
                path.display()
            )));
        }
        Self::parse(&tokio::fs::read_to_string(path).await?)
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or("urn:ietf:wg:oauth:2.0:oob")
    }

    pub fn authorization_url(&self) -> Result<Url> {
        let scope = SCOPES.join(" ");
        Url::parse_with_params(
            AUTH_URL,
            &[
                ("access_type", "offline"),
                ("scope", scope.as_str()),
                ("prompt", "consent"),
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri()),
            ],
        )
        .map_err(|e| Error::Auth(e.to_string()))
    }
}

/// Cached credentials, in the token file layout other Google client
/// libraries write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    scope: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, now_ms: i64, previous_refresh: Option<String>) -> Token {
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            scope: self.scope,
            token_type: self.token_type,
            expiry_date: self.expires_in.map(|s| now_ms + s * 1000),
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

impl Token {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_date
            .is_some_and(|expiry| expiry <= now_ms + EXPIRY_MARGIN_MS)
    }
}

/// `client_secret_foo.json` caches under `youtube-upload-foo.json`.
pub fn token_path(token_dir: &Path, client_secret: &Path) -> PathBuf {
    let name = client_secret
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_prefix("client_secret_").unwrap_or(&name);
    let suffix = name.strip_suffix(".json").unwrap_or(name);
    token_dir.join(format!("youtube-upload-{suffix}.json"))
}

pub fn default_token_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".credentials")
}

/// Accepts a bare code or a pasted redirect URL carrying `code=`.
pub fn extract_code(input: &str) -> Option<String> {
    let input = input.trim();
    let code = match input.split_once("code=") {
        Some((_, rest)) => rest.split('&').next().unwrap_or_default(),
        None => input,
    };
    (!code.is_empty()).then(|| code.to_string())
}

pub struct Authenticator {
    http: reqwest::Client,
    secret: ClientSecret,
    token_path: PathBuf,
}

impl Authenticator {
    pub fn new(http: reqwest::Client, secret: ClientSecret, token_path: PathBuf) -> Self {
        Self {
            http,
            secret,
            token_path,
        }
    }

    /// A usable access token: cached, refreshed, or freshly authorized with
    /// a code read from `input`.
    pub async fn access_token<R>(&self, input: R) -> Result<String>
    where
        R: AsyncBufRead + Unpin,
    {
        match self.cached().await? {
            Some(token) if !token.is_expired(now_ms()) => {
                info!("using cached authorization");
                Ok(token.access_token)
            }
            Some(Token {
                refresh_token: Some(refresh),
                ..
            }) => {
                info!("refreshing expired authorization");
                let token = self.refresh(&refresh).await?;
                self.save(&token).await?;
                Ok(token.access_token)
            }
            _ => {
                let token = self.authorize(input).await?;
                self.save(&token).await?;
                Ok(token.access_token)
            }
        }
    }

    async fn cached(&self) -> Result<Option<Token>> {
        match tokio::fs::read_to_string(&self.token_path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(token) => Ok(Some(token)),
                Err(e) => {
                    debug!(error = %e, "ignoring unreadable token cache");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, token: &Token) -> Result<()> {
        if let Some(dir) = self.token_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.token_path, serde_json::to_string(token)?).await?;
        info!(path = %self.token_path.display(), "authorization saved");
        Ok(())
    }

    async fn authorize<R>(&self, mut input: R) -> Result<Token>
    where
        R: AsyncBufRead + Unpin,
    {
        let url = self.secret.authorization_url()?;
        println!("Authorize this app by visiting this URL:");
        println!("\x1b[36m{url}\x1b[0m");
        println!("Sign in, allow access, then paste the code shown by the browser.");
        println!("If the browser cannot reach localhost, copy the value after \"code=\" from its address bar.");
        println!("Enter the code: ");

        let mut line = String::new();
        input.read_line(&mut line).await?;
        let code = extract_code(&line).ok_or_else(|| Error::Auth("no authorization code entered".into()))?;

        let now = now_ms();
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("redirect_uri", self.secret.redirect_uri()),
            ])
            .send()
            .await?;
        Ok(token_response(response).await?.into_token(now, None))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let now = now_ms();
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
            ])
            .send()
            .await?;
        Ok(token_response(response)
            .await?
            .into_token(now, Some(refresh_token.to_string())))
    }
}

async fn token_response(response: reqwest::Response) -> Result<TokenResponse> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(Error::Auth(format!(
            "token request rejected ({status}): {body}; the code may be wrong or expired, rerun to try again"
        )));
    }
    Ok(serde_json::from_str(&body)?)
}
