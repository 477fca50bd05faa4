//! Resumable upload to the YouTube Data API.

use std::path::Path;

use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Privacy;
use crate::error::{Error, Result};

const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub privacy_status: Privacy,
    pub made_for_kids: bool,
}

/// The `videos.insert` request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoResource {
    pub snippet: Snippet,
    pub status: Status,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedVideo {
    pub id: String,
}

impl UploadedVideo {
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

/// The video file, streamed as the upload body, and its length.
async fn open_video(path: &Path) -> Result<(tokio::fs::File, u64)> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            Error::Io(e)
        }
    })?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}

pub struct YouTube {
    http: reqwest::Client,
    access_token: String,
}

impl YouTube {
    pub fn new(http: reqwest::Client, access_token: String) -> Self {
        Self { http, access_token }
    }

    pub async fn upload(&self, video_path: &Path, resource: &VideoResource) -> Result<UploadedVideo> {
        let (video, size) = open_video(video_path).await?;

        let session = self
            .http
            .post(UPLOAD_ENDPOINT)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", size)
            .json(resource)
            .send()
            .await?;
        let status = session.status();
        if !status.is_success() {
            let body = session.text().await.unwrap_or_default();
            return Err(Error::Upload(format!("could not start upload ({status}): {body}")));
        }
        let location = session
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Upload("upload session has no location".into()))?
            .to_string();
        debug!(%location, "upload session opened");

        info!(bytes = size, "uploading video");
        let response = self
            .http
            .put(&location)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header(CONTENT_TYPE, "video/*")
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::from(video))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Upload(format!("video upload failed ({status}): {body}")));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_serializes_in_api_shape() {
        let resource = VideoResource {
            snippet: Snippet {
                title: "#Shorts Moon".into(),
                description: "desc".into(),
                tags: vec!["shorts".into()],
            },
            status: Status {
                privacy_status: Privacy::Unlisted,
                made_for_kids: false,
            },
        };
        assert_eq!(
            serde_json::to_value(&resource).unwrap(),
            serde_json::json!({
                "snippet": {"title": "#Shorts Moon", "description": "desc", "tags": ["shorts"]},
                "status": {"privacyStatus": "unlisted", "madeForKids": false}
            })
        );
    }

    #[test]
    fn watch_url_uses_video_id() {
        let video: UploadedVideo =
            serde_json::from_str(r#"{"kind": "youtube#video", "id": "dQw4w9WgXcQ"}"#).unwrap();
        assert_eq!(video.watch_url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn video_is_opened_with_its_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.mp4");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        let (_, size) = open_video(&path).await.unwrap();
        assert_eq!(size, 4096);
    }

    #[tokio::test]
    async fn missing_video_fails_before_any_request() {
        let yt = YouTube::new(reqwest::Client::new(), "token".into());
        let resource = VideoResource {
            snippet: Snippet {
                title: "t".into(),
                description: "d".into(),
                tags: Vec::new(),
            },
            status: Status {
                privacy_status: Privacy::Public,
                made_for_kids: false,
            },
        };
        let err = yt
            .upload(Path::new("/nonexistent/video.mp4"), &resource)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
