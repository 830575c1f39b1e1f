use crate::metadata_store::{ImageRecord, MetadataError, MetadataStore, NewImageRecord};
use crate::object_store::{ObjectRole, ObjectStore, StorageError};
use crate::transform::{FlipMode, TransformError, Transformer};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

/// One upload request as handed to the pipeline
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
    pub flip: FlipMode,
}

/// Pipeline failures, carrying the failing adapter's context
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error("image {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("metadata store failure: {0}")]
    Metadata(MetadataError),
}

impl From<MetadataError> for PipelineError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(id) => PipelineError::NotFound(id),
            other => PipelineError::Metadata(other),
        }
    }
}

/// Orchestrates the upload and delete sequences over the three adapters.
///
/// Upload: validate, store original, transform, store processed, persist
/// metadata. Delete: lookup, delete processed, delete original, delete
/// record. Any failure is terminal for its request; steps already
/// completed are not undone, so a mid-sequence failure can leave orphaned
/// objects behind.
pub struct ImagePipeline {
    transformer: Transformer,
    object_store: Arc<dyn ObjectStore>,
    metadata_store: Arc<dyn MetadataStore>,
    max_upload_bytes: usize,
}

impl ImagePipeline {
    pub fn new(
        transformer: Transformer,
        object_store: Arc<dyn ObjectStore>,
        metadata_store: Arc<dyn MetadataStore>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            transformer,
            object_store,
            metadata_store,
            max_upload_bytes,
        }
    }

    /// Reject bad uploads before any network call is made
    fn validate(&self, upload: &UploadRequest) -> Result<(), PipelineError> {
        if !upload.content_type.starts_with("image/") {
            return Err(PipelineError::Validation(
                "only image uploads are accepted".to_string(),
            ));
        }

        if upload.bytes.len() > self.max_upload_bytes {
            return Err(PipelineError::Validation(format!(
                "image exceeds the {} byte upload limit",
                self.max_upload_bytes
            )));
        }

        Ok(())
    }

    #[instrument(
        skip(self, upload),
        fields(filename = %upload.filename, flip = ?upload.flip, size_bytes = upload.bytes.len())
    )]
    pub async fn process_upload(&self, upload: UploadRequest) -> Result<ImageRecord, PipelineError> {
        self.validate(&upload)?;

        let original = self
            .object_store
            .put(&upload.bytes, &upload.filename, ObjectRole::Original)
            .await?;

        info!(key = %original.key, "Original image stored");

        let processed_bytes = self
            .transformer
            .transform(&upload.bytes, upload.flip)
            .await?;

        let processed = self
            .object_store
            .put(&processed_bytes, &upload.filename, ObjectRole::Processed)
            .await?;

        info!(key = %processed.key, "Processed image stored");

        let record = self
            .metadata_store
            .insert(NewImageRecord {
                original_filename: upload.filename,
                storage_path: processed.key,
                public_url: processed.public_url,
                original_storage_path: Some(original.key),
                original_public_url: Some(original.public_url),
            })
            .await?;

        metrics::counter!("images.uploads.completed").increment(1);

        info!(id = %record.id, "Upload pipeline completed");

        Ok(record)
    }

    pub async fn get_image(&self, id: Uuid) -> Result<ImageRecord, PipelineError> {
        self.metadata_store
            .get(id)
            .await?
            .ok_or(PipelineError::NotFound(id))
    }

    pub async fn list_images(&self) -> Result<Vec<ImageRecord>, PipelineError> {
        Ok(self.metadata_store.list().await?)
    }

    #[instrument(skip(self))]
    pub async fn delete_image(&self, id: Uuid) -> Result<(), PipelineError> {
        let record = self
            .metadata_store
            .get(id)
            .await?
            .ok_or(PipelineError::NotFound(id))?;

        self.object_store.delete(&record.storage_path).await?;

        if let Some(ref original_key) = record.original_storage_path {
            self.object_store.delete(original_key).await?;
        }

        self.metadata_store.delete(id).await?;

        metrics::counter!("images.deleted").increment(1);

        info!(id = %id, "Image deleted");

        Ok(())
    }
}
