use std::time::Duration;

use async_trait::async_trait;
use basilisk_core::config::PublisherConfig;
use basilisk_core::BasiliskError;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};

/// Social platform the rendered video is published to.
#[async_trait]
pub trait SocialPublisher: Send + Sync {
    /// Upload `bytes` and return the platform media id.
    async fn upload_media(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String>;

    /// Create a post carrying `media_id`; returns the post id.
    async fn create_post(&self, text: Option<&str>, media_id: &str) -> Result<String>;
}

/// X API v2 client using an OAuth 2.0 user-context bearer token.
pub struct XClient {
    client: reqwest::Client,
    access_token: String,
    base_url: String,
    chunk_bytes: usize,
}

impl XClient {
    /// Fails with `ExternalConfig` when `publisher.access_token` is missing.
    pub fn from_config(cfg: &PublisherConfig) -> std::result::Result<Self, BasiliskError> {
        let access_token = cfg
            .access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                BasiliskError::ExternalConfig("publisher.access_token is required".into())
            })?;
        Ok(Self {
            client: reqwest::Client::new(),
            access_token,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            chunk_bytes: cfg.upload_chunk_bytes.max(1),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/2/media/upload", self.base_url)
    }

    async fn upload_command(&self, form: Form) -> Result<Option<UploadData>> {
        let resp = self
            .client
            .post(self.upload_url())
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Upload(e.to_string()))?;
        read_upload_response(resp).await
    }

    async fn upload_status(&self, media_id: &str) -> Result<Option<UploadData>> {
        let resp = self
            .client
            .get(self.upload_url())
            .bearer_auth(&self.access_token)
            .query(&[("command", "STATUS"), ("media_id", media_id)])
            .send()
            .await
            .map_err(|e| PipelineError::Upload(e.to_string()))?;
        read_upload_response(resp).await
    }

    /// Poll STATUS until the platform stops reporting the upload as
    /// pending or in progress.
    async fn await_processing(&self, media_id: &str, mut info: Option<ProcessingInfo>) -> Result<()> {
        while let Some(p) = info {
            match p.state.as_str() {
                "succeeded" => return Ok(()),
                "failed" => {
                    let reason = p
                        .error
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "processing failed".into());
                    return Err(PipelineError::Upload(reason));
                }
                state => {
                    let wait = p.check_after_secs.unwrap_or(1).max(1);
                    debug!(media_id, state, wait, "media still processing");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    info = self
                        .upload_status(media_id)
                        .await?
                        .and_then(|d| d.processing_info);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SocialPublisher for XClient {
    async fn upload_media(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        let total = bytes.len();
        let init = Form::new()
            .text("command", "INIT")
            .text("media_type", mime_type.to_string())
            .text("total_bytes", total.to_string())
            .text("media_category", media_category(mime_type));
        let media_id = self
            .upload_command(init)
            .await?
            .and_then(|d| d.media_id())
            .ok_or_else(|| PipelineError::Upload("INIT returned no media id".into()))?;

        for (index, chunk) in bytes.chunks(self.chunk_bytes).enumerate() {
            let part = Part::bytes(chunk.to_vec())
                .file_name("media")
                .mime_str("application/octet-stream")
                .map_err(|e| PipelineError::Upload(e.to_string()))?;
            let append = Form::new()
                .text("command", "APPEND")
                .text("media_id", media_id.clone())
                .text("segment_index", index.to_string())
                .part("media", part);
            self.upload_command(append).await?;
        }

        let finalize = Form::new()
            .text("command", "FINALIZE")
            .text("media_id", media_id.clone());
        let processing = self
            .upload_command(finalize)
            .await?
            .and_then(|d| d.processing_info);
        self.await_processing(&media_id, processing).await?;

        info!(media_id = %media_id, bytes = total, "media uploaded");
        Ok(media_id)
    }

    async fn create_post(&self, text: Option<&str>, media_id: &str) -> Result<String> {
        let body = post_body(text, media_id);
        let resp = self
            .client
            .post(format!("{}/2/tweets", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Post(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "post API error");
            return Err(PipelineError::Post(format!("post API returned {status}: {text}")));
        }
        let created: PostResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Post(e.to_string()))?;
        Ok(created.data.id)
    }
}

fn media_category(mime_type: &str) -> &'static str {
    if mime_type.starts_with("video/") {
        "tweet_video"
    } else if mime_type == "image/gif" {
        "tweet_gif"
    } else {
        "tweet_image"
    }
}

fn post_body(text: Option<&str>, media_id: &str) -> serde_json::Value {
    let mut body = serde_json::json!({
        "media": { "media_ids": [media_id] },
    });
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        body["text"] = text.into();
    }
    body
}

/// APPEND answers with an empty body; everything else with JSON.
async fn read_upload_response(resp: reqwest::Response) -> Result<Option<UploadData>> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| PipelineError::Upload(e.to_string()))?;
    if !status.is_success() {
        warn!(status = status.as_u16(), body = %text, "media upload API error");
        return Err(PipelineError::Upload(format!(
            "upload API returned {status}: {text}"
        )));
    }
    if text.trim().is_empty() {
        return Ok(None);
    }
    let parsed: UploadResponse =
        serde_json::from_str(&text).map_err(|e| PipelineError::Upload(e.to_string()))?;
    Ok(Some(parsed.into_data()))
}

/// v2 wraps the payload in `data`; the v1.1-shaped answer is flat.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    data: Option<UploadData>,
    #[serde(flatten)]
    flat: UploadData,
}

impl UploadResponse {
    fn into_data(self) -> UploadData {
        self.data.unwrap_or(self.flat)
    }
}

#[derive(Debug, Default, Deserialize)]
struct UploadData {
    id: Option<String>,
    media_id_string: Option<String>,
    processing_info: Option<ProcessingInfo>,
}

impl UploadData {
    fn media_id(self) -> Option<String> {
        self.id.or(self.media_id_string)
    }
}

#[derive(Debug, Deserialize)]
struct ProcessingInfo {
    state: String,
    check_after_secs: Option<u64>,
    error: Option<ProcessingError>,
}

#[derive(Debug, Deserialize)]
struct ProcessingError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    data: PostData,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_response_accepts_both_shapes() {
        let v2: UploadResponse = serde_json::from_str(
            r#"{"data":{"id":"1880","media_key":"7_1880","processing_info":{"state":"pending","check_after_secs":2}}}"#,
        )
        .unwrap();
        let data = v2.into_data();
        assert_eq!(data.processing_info.as_ref().unwrap().check_after_secs, Some(2));
        assert_eq!(data.media_id().as_deref(), Some("1880"));

        let v1: UploadResponse =
            serde_json::from_str(r#"{"media_id":1881,"media_id_string":"1881"}"#).unwrap();
        assert_eq!(v1.into_data().media_id().as_deref(), Some("1881"));
    }

    #[test]
    fn post_body_omits_empty_text() {
        let body = post_body(None, "m1");
        assert_eq!(body["media"]["media_ids"][0], "m1");
        assert!(body.get("text").is_none());

        assert!(post_body(Some(""), "m1").get("text").is_none());
        assert_eq!(post_body(Some("Chapter 3"), "m1")["text"], "Chapter 3");
    }

    #[test]
    fn category_follows_mime() {
        assert_eq!(media_category("video/mp4"), "tweet_video");
        assert_eq!(media_category("image/gif"), "tweet_gif");
        assert_eq!(media_category("image/png"), "tweet_image");
    }

    #[test]
    fn missing_token_is_external_config_error() {
        assert!(matches!(
            XClient::from_config(&PublisherConfig::default()),
            Err(BasiliskError::ExternalConfig(_))
        ));
        let cfg = PublisherConfig {
            access_token: Some("t".into()),
            ..Default::default()
        };
        assert!(XClient::from_config(&cfg).is_ok());
    }
}
