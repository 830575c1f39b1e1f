use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Which variant of an image an object holds; selects the key prefix so
/// the two never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRole {
    /// The bytes as uploaded
    Original,
    /// The background-removed, flipped output
    Processed,
}

impl ObjectRole {
    pub fn prefix(self) -> &'static str {
        match self {
            ObjectRole::Original => "original",
            ObjectRole::Processed => "processed",
        }
    }
}

/// Key and public address of a stored object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub public_url: String,
}

/// Object storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to upload {key} to object storage: {message}")]
    Upload { key: String, message: String },

    #[error("failed to delete {key} from object storage: {message}")]
    Delete { key: String, message: String },
}

/// Object storage for image bytes.
///
/// Objects are externally fetchable at the returned URL as soon as `put`
/// returns; there is no rollback if a later pipeline step fails.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a freshly generated role-prefixed key.
    async fn put(
        &self,
        bytes: &[u8],
        filename_hint: &str,
        role: ObjectRole,
    ) -> Result<StoredObject, StorageError>;

    /// Delete an object by key. Store errors propagate as-is, with no
    /// special-casing for missing keys.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    config: S3Config,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config).timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(config.operation_timeout())
                .build(),
        );

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Object store initialized"
        );

        Self {
            client,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len(), role = ?role))]
    async fn put(
        &self,
        bytes: &[u8],
        filename_hint: &str,
        role: ObjectRole,
    ) -> Result<StoredObject, StorageError> {
        let key = object_key(filename_hint, role);
        let content_type = content_type_for(&file_extension(filename_hint));

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let public_url = public_object_url(&self.config, &key);

        debug!(key = %key, "Object uploaded");

        Ok(StoredObject { key, public_url })
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(key = %key, "Object deleted");

        Ok(())
    }
}

/// Generate a globally unique, role-prefixed object key.
/// Format: images/{role}-{uuid}.{ext}
pub fn object_key(filename_hint: &str, role: ObjectRole) -> String {
    format!(
        "images/{}-{}.{}",
        role.prefix(),
        Uuid::new_v4(),
        file_extension(filename_hint)
    )
}

/// Extension derived from the uploader's filename, defaulting to png
fn file_extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "png".to_string())
}

/// Content type for an image file extension
fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Public address for a stored key
pub fn public_object_url(config: &S3Config, key: &str) -> String {
    if let Some(ref base) = config.public_base_url {
        format!("{}/{}", base.trim_end_matches('/'), key)
    } else if let Some(ref endpoint) = config.endpoint_url {
        format!("{}/{}/{}", endpoint.trim_end_matches('/'), config.bucket, key)
    } else {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            config.bucket, config.region, key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> S3Config {
        S3Config {
            bucket: "test-bucket".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: None,
            operation_timeout_secs: 30,
        }
    }

    #[test]
    fn test_object_key_role_prefixes() {
        let original = object_key("photo.jpg", ObjectRole::Original);
        let processed = object_key("photo.jpg", ObjectRole::Processed);

        assert!(original.starts_with("images/original-"));
        assert!(processed.starts_with("images/processed-"));
        assert!(original.ends_with(".jpg"));
        assert!(processed.ends_with(".jpg"));
    }

    #[test]
    fn test_object_keys_are_unique_per_call() {
        let a = object_key("photo.png", ObjectRole::Processed);
        let b = object_key("photo.png", ObjectRole::Processed);
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_extension_derivation() {
        assert_eq!(file_extension("photo.JPG"), "jpg");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("noext"), "png");
        assert_eq!(file_extension(""), "png");
        assert_eq!(file_extension("trailing."), "png");
    }

    #[test]
    fn test_content_type_for_extension() {
        assert_eq!(content_type_for("jpg"), "image/jpeg");
        assert_eq!(content_type_for("jpeg"), "image/jpeg");
        assert_eq!(content_type_for("png"), "image/png");
        assert_eq!(content_type_for("svg"), "application/octet-stream");
    }

    #[test]
    fn test_public_url_aws_form() {
        let url = public_object_url(&test_config(), "images/processed-abc.png");
        assert_eq!(
            url,
            "https://test-bucket.s3.us-east-1.amazonaws.com/images/processed-abc.png"
        );
    }

    #[test]
    fn test_public_url_custom_endpoint() {
        let config = S3Config {
            endpoint_url: Some("http://localhost:9000/".to_string()),
            ..test_config()
        };
        let url = public_object_url(&config, "images/original-abc.png");
        assert_eq!(url, "http://localhost:9000/test-bucket/images/original-abc.png");
    }

    #[test]
    fn test_public_url_base_override_wins() {
        let config = S3Config {
            endpoint_url: Some("http://localhost:9000".to_string()),
            public_base_url: Some("https://cdn.example.com".to_string()),
            ..test_config()
        };
        let url = public_object_url(&config, "images/original-abc.png");
        assert_eq!(url, "https://cdn.example.com/images/original-abc.png");
    }
}
