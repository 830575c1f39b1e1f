use crate::config::DatabaseConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Stored metadata describing one processed image pair
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImageRecord {
    /// Unique record ID, assigned at insert
    pub id: Uuid,
    /// Filename as supplied by the uploader
    pub original_filename: String,
    /// Object key of the processed image
    pub storage_path: String,
    /// Public address of the processed image
    pub public_url: String,
    /// Object key of the pre-processing image, when its upload succeeded
    pub original_storage_path: Option<String>,
    /// Public address of the pre-processing image
    pub original_public_url: Option<String>,
    /// Set by the store at insert time; sole ordering key for listing
    pub created_at: DateTime<Utc>,
}

/// Record fields supplied by the pipeline; id and created_at are assigned
/// by the store.
#[derive(Debug, Clone)]
pub struct NewImageRecord {
    pub original_filename: String,
    pub storage_path: String,
    pub public_url: String,
    pub original_storage_path: Option<String>,
    pub original_public_url: Option<String>,
}

/// Metadata store failures. A missing row on delete is typed; a missing
/// row on get is a normal `None`, not an error.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("image {0} not found")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to run database migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Metadata store for image records
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a record; the store assigns id and created_at.
    async fn insert(&self, record: NewImageRecord) -> Result<ImageRecord, MetadataError>;

    /// Fetch a record by id; absence is a normal outcome.
    async fn get(&self, id: Uuid) -> Result<Option<ImageRecord>, MetadataError>;

    /// Delete a record by id; a missing row is `MetadataError::NotFound`,
    /// never a silent success.
    async fn delete(&self, id: Uuid) -> Result<(), MetadataError>;

    /// All records, newest created_at first.
    async fn list(&self) -> Result<Vec<ImageRecord>, MetadataError>;

    /// Connectivity probe for readiness checks.
    async fn ping(&self) -> Result<(), MetadataError>;
}

/// PostgreSQL-backed metadata store
pub struct PostgresMetadataStore {
    pool: PgPool,
}

impl PostgresMetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, MetadataError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), MetadataError> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    #[instrument(skip(self, record), fields(filename = %record.original_filename))]
    async fn insert(&self, record: NewImageRecord) -> Result<ImageRecord, MetadataError> {
        let id = Uuid::new_v4();

        let inserted = sqlx::query_as::<_, ImageRecord>(
            r#"
            INSERT INTO images (
                id, original_filename, storage_path, public_url,
                original_storage_path, original_public_url
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, original_filename, storage_path, public_url,
                      original_storage_path, original_public_url, created_at
            "#,
        )
        .bind(id)
        .bind(&record.original_filename)
        .bind(&record.storage_path)
        .bind(&record.public_url)
        .bind(&record.original_storage_path)
        .bind(&record.original_public_url)
        .fetch_one(&self.pool)
        .await?;

        debug!(id = %inserted.id, "Image record inserted");

        Ok(inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ImageRecord>, MetadataError> {
        let record = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, original_filename, storage_path, public_url,
                   original_storage_path, original_public_url, created_at
            FROM images
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<(), MetadataError> {
        let result = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(id));
        }

        debug!(id = %id, "Image record deleted");

        Ok(())
    }

    async fn list(&self) -> Result<Vec<ImageRecord>, MetadataError> {
        let records = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, original_filename, storage_path, public_url,
                   original_storage_path, original_public_url, created_at
            FROM images
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn ping(&self) -> Result<(), MetadataError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_roundtrips_through_json() {
        let record = ImageRecord {
            id: Uuid::new_v4(),
            original_filename: "photo.jpg".to_string(),
            storage_path: "images/processed-abc.jpg".to_string(),
            public_url: "https://cdn.test/images/processed-abc.jpg".to_string(),
            original_storage_path: Some("images/original-def.jpg".to_string()),
            original_public_url: Some("https://cdn.test/images/original-def.jpg".to_string()),
            created_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap(),
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: ImageRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, record.id);
        assert_eq!(back.original_storage_path, record.original_storage_path);
        assert_eq!(back.created_at, record.created_at);
    }

    #[test]
    fn test_not_found_is_distinct_from_database_errors() {
        let id = Uuid::new_v4();
        let err = MetadataError::NotFound(id);
        assert!(matches!(err, MetadataError::NotFound(found) if found == id));

        let err = MetadataError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, MetadataError::Database(_)));
    }
}
