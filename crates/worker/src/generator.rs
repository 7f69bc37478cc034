//! Image generation backends.
//!
//! The worker loop only needs "turn this task into image bytes";
//! [`Generator`] is that seam. [`HttpGenerator`] delegates to an inference
//! service over HTTP.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use teeforge_core::protocol::TaskAssignment;

/// Encoded image produced for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    /// File extension without the dot, e.g. `webp`.
    pub extension: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Task has no prompt")]
    MissingPrompt,

    #[error("Generator request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Generator returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("Generator returned an empty image")]
    EmptyImage,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, task: &TaskAssignment) -> Result<GeneratedImage, GenerateError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
}

/// POSTs `{prompt, negative_prompt}` to an inference endpoint and takes the
/// response body as the image.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    url: String,
}

impl HttpGenerator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, task: &TaskAssignment) -> Result<GeneratedImage, GenerateError> {
        let prompt = task.prompt();
        if prompt.trim().is_empty() {
            return Err(GenerateError::MissingPrompt);
        }

        let body = GenerateRequest {
            prompt,
            negative_prompt: task.str_field("negative_prompt").unwrap_or_default(),
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerateError::Status(status));
        }

        let extension = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(extension_for)
            .unwrap_or("webp")
            .to_string();

        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(GenerateError::EmptyImage);
        }

        Ok(GeneratedImage { bytes, extension })
    }
}

/// Map an image content type to a file extension. Unknown types fall back to
/// `webp`.
fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        _ => "webp",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_follows_content_type() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/jpeg; charset=binary"), "jpg");
        assert_eq!(extension_for("image/webp"), "webp");
        assert_eq!(extension_for("application/octet-stream"), "webp");
    }
}
