// Storage backend abstraction
// Whole-document persistence for accounts, contact messages, newsletter
// subscriptions, emotion records and image analyses.

pub mod memory;
pub mod mongo;

use crate::config::StorageConfig;
use crate::models::{
    Account, ContactMessage, EmotionRecord, ImageAnalysis, NewsletterSubscription,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Storage backend trait for persisting application documents
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // Account operations
    async fn insert_account(&self, account: Account) -> Result<(), StorageError>;

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StorageError>;

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError>;

    /// Versioned whole-document update. The write is accepted only when the
    /// stored version still matches `account.version`; the stored copy then
    /// carries `version + 1`. Returns the updated document.
    async fn update_account(&self, account: Account) -> Result<Account, StorageError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StorageError>;

    // Contact messages
    async fn insert_contact(&self, contact: ContactMessage) -> Result<(), StorageError>;

    async fn list_contacts(&self) -> Result<Vec<ContactMessage>, StorageError>;

    async fn mark_contact_read(&self, id: Uuid) -> Result<ContactMessage, StorageError>;

    // Newsletter subscriptions
    async fn insert_subscription(
        &self,
        subscription: NewsletterSubscription,
    ) -> Result<(), StorageError>;

    async fn list_subscriptions(&self) -> Result<Vec<NewsletterSubscription>, StorageError>;

    // Emotion records
    async fn insert_emotion_record(&self, record: EmotionRecord) -> Result<(), StorageError>;

    /// Records for one account inside [start, end], oldest first
    async fn emotion_records_between(
        &self,
        account_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EmotionRecord>, StorageError>;

    /// Most recent records for one account, newest first
    async fn recent_emotion_records(
        &self,
        account_id: Uuid,
        limit: usize,
    ) -> Result<Vec<EmotionRecord>, StorageError>;

    // Image analyses
    async fn insert_image_analysis(&self, analysis: ImageAnalysis) -> Result<(), StorageError>;

    async fn find_image_analysis(&self, id: Uuid) -> Result<Option<ImageAnalysis>, StorageError>;

    /// One page of an account's analyses (newest first) plus the total count
    async fn list_image_analyses(
        &self,
        account_id: Uuid,
        limit: usize,
        skip: usize,
    ) -> Result<(Vec<ImageAnalysis>, u64), StorageError>;

    /// Every analysis for one account, for aggregate statistics
    async fn image_analyses_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<ImageAnalysis>, StorageError>;

    async fn delete_image_analysis(&self, id: Uuid) -> Result<(), StorageError>;
}

/// Storage errors
#[derive(Debug, Clone)]
pub enum StorageError {
    NotFound,
    AlreadyExists,
    /// The document changed under an optimistic versioned write
    VersionConflict,
    ConnectionError(String),
    InvalidData(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::NotFound => write!(f, "Item not found"),
            StorageError::AlreadyExists => write!(f, "Item already exists"),
            StorageError::VersionConflict => write!(f, "Document version conflict"),
            StorageError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            StorageError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// Factory function to create a storage backend based on configuration
pub async fn create_storage_backend(
    config: &StorageConfig,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(memory::MemoryStorage::new())),
        StorageConfig::Mongo { uri, database } => {
            let storage = mongo::MongoStorage::connect(uri, database).await?;
            Ok(Arc::new(storage))
        }
    }
}
