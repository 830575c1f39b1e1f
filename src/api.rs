use crate::config::{ApiConfig, Config};
use crate::metadata_store::{ImageRecord, MetadataStore};
use crate::pipeline::{ImagePipeline, PipelineError, UploadRequest};
use crate::transform::FlipMode;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Slack on top of the image ceiling for multipart framing and the flip
/// field
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ImagePipeline>,
    pub metadata_store: Arc<dyn MetadataStore>,
}

/// Image record in API responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub id: Uuid,
    pub original_filename: String,
    pub public_url: String,
    pub original_public_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ImageRecord> for ImageResponse {
    fn from(r: ImageRecord) -> Self {
        Self {
            id: r.id,
            original_filename: r.original_filename,
            public_url: r.public_url,
            original_public_url: r.original_public_url,
            created_at: r.created_at,
        }
    }
}

/// Single-record response wrapper
#[derive(Debug, Serialize)]
pub struct ImageEnvelope {
    pub success: bool,
    pub image: ImageResponse,
}

/// List response wrapper
#[derive(Debug, Serialize)]
pub struct ImageListEnvelope {
    pub success: bool,
    pub images: Vec<ImageResponse>,
}

/// Delete confirmation
#[derive(Debug, Serialize)]
pub struct MessageEnvelope {
    pub success: bool,
    pub message: String,
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// API-level error: a status code plus a short label, with the underlying
/// message carried alongside
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    label: &'static str,
    message: String,
}

impl ApiError {
    fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            label: "Invalid request",
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let (status, label) = match &err {
            PipelineError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
            PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, "Image not found"),
            PipelineError::Transform(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to process image")
            }
            PipelineError::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store image")
            }
            PipelineError::Metadata(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to save image metadata",
            ),
        };

        Self {
            status,
            label,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "Request failed");
        }

        (
            self.status,
            Json(ErrorResponse {
                error: self.label.to_string(),
                message: self.message,
            }),
        )
            .into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &Config) -> Router {
    let cors = cors_layer(&config.api);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/images", get(list_images).post(upload_image))
        .route("/images/:id", get(get_image).delete(delete_image))
        .layer(DefaultBodyLimit::max(
            config.upload.max_size_bytes + MULTIPART_OVERHEAD_BYTES,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    if !config.cors_enabled {
        return CorsLayer::new();
    }

    if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "flip-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.metadata_store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Upload and process an image
#[instrument(skip(state, multipart))]
async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ImageEnvelope>, ApiError> {
    let mut image: Option<(String, String, Bytes)> = None;
    let mut flip = FlipMode::Horizontal;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("invalid multipart request: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::validation(format!("failed to read image field: {e}")))?;
                image = Some((filename, content_type, bytes));
            }
            Some("flip_direction") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::validation(format!("failed to read flip field: {e}")))?;
                flip = text
                    .parse()
                    .map_err(|e: crate::transform::InvalidFlipMode| {
                        ApiError::validation(e.to_string())
                    })?;
            }
            _ => {}
        }
    }

    let (filename, content_type, bytes) =
        image.ok_or_else(|| ApiError::validation("No image file provided"))?;

    let record = match state
        .pipeline
        .process_upload(UploadRequest {
            filename,
            content_type,
            bytes,
            flip,
        })
        .await
    {
        Ok(record) => record,
        Err(err) => {
            metrics::counter!("images.uploads.failed").increment(1);
            return Err(err.into());
        }
    };

    Ok(Json(ImageEnvelope {
        success: true,
        image: record.into(),
    }))
}

/// List all images, newest first
async fn list_images(State(state): State<AppState>) -> Result<Json<ImageListEnvelope>, ApiError> {
    let images = state.pipeline.list_images().await?;

    Ok(Json(ImageListEnvelope {
        success: true,
        images: images.into_iter().map(Into::into).collect(),
    }))
}

/// Get a single image by id
async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ImageEnvelope>, ApiError> {
    let record = state.pipeline.get_image(id).await?;

    Ok(Json(ImageEnvelope {
        success: true,
        image: record.into(),
    }))
}

/// Delete an image pair and its record
async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageEnvelope>, ApiError> {
    state.pipeline.delete_image(id).await?;

    Ok(Json(MessageEnvelope {
        success: true,
        message: "Image deleted successfully".to_string(),
    }))
}

/// Start the API server
pub async fn serve(
    state: AppState,
    config: &Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.api.host, config.api.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::MetadataError;
    use crate::object_store::StorageError;
    use crate::transform::TransformError;

    #[test]
    fn test_error_status_mapping() {
        let err = ApiError::from(PipelineError::Validation("bad".to_string()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = ApiError::from(PipelineError::NotFound(Uuid::new_v4()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.label, "Image not found");

        let err = ApiError::from(PipelineError::Transform(TransformError::EmptyInput));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);

        let err = ApiError::from(PipelineError::Storage(StorageError::Upload {
            key: "k".to_string(),
            message: "m".to_string(),
        }));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);

        let err = ApiError::from(PipelineError::Metadata(MetadataError::Database(
            sqlx::Error::PoolClosed,
        )));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_image_response_uses_camel_case() {
        let response = ImageResponse {
            id: Uuid::new_v4(),
            original_filename: "photo.jpg".to_string(),
            public_url: "https://cdn.test/p.png".to_string(),
            original_public_url: Some("https://cdn.test/o.png".to_string()),
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("originalFilename").is_some());
        assert!(json.get("publicUrl").is_some());
        assert!(json.get("originalPublicUrl").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("original_filename").is_none());
    }
}
