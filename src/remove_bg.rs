use crate::config::RemoveBgConfig;
use crate::transform::TransformError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::{debug, instrument, warn};

/// Background removal collaborator.
///
/// The production implementation talks to the remove.bg HTTP API; tests
/// substitute their own.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Replace the image background with transparency, returning the
    /// re-encoded bytes.
    async fn remove_background(&self, image: &[u8]) -> Result<Vec<u8>, TransformError>;
}

/// HTTP client for the remove.bg background removal API
pub struct RemoveBgClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl RemoveBgClient {
    /// Create a new client with the configured request timeout.
    pub fn new(config: &RemoveBgConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl BackgroundRemover for RemoveBgClient {
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    async fn remove_background(&self, image: &[u8]) -> Result<Vec<u8>, TransformError> {
        let part = Part::bytes(image.to_vec())
            .file_name("image.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("image_file", part).text("size", "auto");

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Background removal API rejected the request");
            return Err(TransformError::UpstreamRejected(format!(
                "status {status}: {body}"
            )));
        }

        let bytes = response.bytes().await?;

        debug!(response_bytes = bytes.len(), "Background removal completed");

        Ok(bytes.to_vec())
    }
}
