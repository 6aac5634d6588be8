// In-memory storage backend implementation
// Uses HashMap with Mutex for thread-safe access

use super::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory storage backend
/// Thread-safe storage using HashMap and Mutex; the default backend and the
/// one the test suite runs against
pub struct MemoryStorage {
    accounts: Arc<Mutex<HashMap<Uuid, Account>>>,
    email_index: Arc<Mutex<HashMap<String, Uuid>>>,
    contacts: Arc<Mutex<HashMap<Uuid, ContactMessage>>>,
    subscriptions: Arc<Mutex<HashMap<Uuid, NewsletterSubscription>>>,
    emotion_records: Arc<Mutex<Vec<EmotionRecord>>>,
    image_analyses: Arc<Mutex<HashMap<Uuid, ImageAnalysis>>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(Mutex::new(HashMap::new())),
            email_index: Arc::new(Mutex::new(HashMap::new())),
            contacts: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            emotion_records: Arc::new(Mutex::new(Vec::new())),
            image_analyses: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> StorageError {
    StorageError::ConnectionError(format!("Lock poisoned: {}", err))
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    // Account operations
    async fn insert_account(&self, account: Account) -> Result<(), StorageError> {
        let mut accounts = self.accounts.lock().map_err(poisoned)?;
        let mut email_index = self.email_index.lock().map_err(poisoned)?;

        if email_index.contains_key(&account.email) {
            return Err(StorageError::AlreadyExists);
        }

        email_index.insert(account.email.clone(), account.id);
        accounts.insert(account.id, account);
        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StorageError> {
        let accounts = self.accounts.lock().map_err(poisoned)?;
        Ok(accounts.get(&id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError> {
        let email_index = self.email_index.lock().map_err(poisoned)?;
        let id = match email_index.get(email) {
            Some(id) => *id,
            None => return Ok(None),
        };
        drop(email_index);

        let accounts = self.accounts.lock().map_err(poisoned)?;
        Ok(accounts.get(&id).cloned())
    }

    async fn update_account(&self, mut account: Account) -> Result<Account, StorageError> {
        let mut accounts = self.accounts.lock().map_err(poisoned)?;
        let mut email_index = self.email_index.lock().map_err(poisoned)?;

        let stored = accounts.get(&account.id).ok_or(StorageError::NotFound)?;

        if stored.version != account.version {
            return Err(StorageError::VersionConflict);
        }

        // Keep the unique-email index in step when the address changes
        if stored.email != account.email {
            if let Some(other) = email_index.get(&account.email) {
                if *other != account.id {
                    return Err(StorageError::AlreadyExists);
                }
            }
            email_index.remove(&stored.email);
            email_index.insert(account.email.clone(), account.id);
        }

        account.version += 1;
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let accounts = self.accounts.lock().map_err(poisoned)?;
        Ok(accounts.values().cloned().collect())
    }

    // Contact messages
    async fn insert_contact(&self, contact: ContactMessage) -> Result<(), StorageError> {
        let mut contacts = self.contacts.lock().map_err(poisoned)?;
        contacts.insert(contact.id, contact);
        Ok(())
    }

    async fn list_contacts(&self) -> Result<Vec<ContactMessage>, StorageError> {
        let contacts = self.contacts.lock().map_err(poisoned)?;
        Ok(contacts.values().cloned().collect())
    }

    async fn mark_contact_read(&self, id: Uuid) -> Result<ContactMessage, StorageError> {
        let mut contacts = self.contacts.lock().map_err(poisoned)?;
        let contact = contacts.get_mut(&id).ok_or(StorageError::NotFound)?;
        contact.read = true;
        Ok(contact.clone())
    }

    // Newsletter subscriptions
    async fn insert_subscription(
        &self,
        subscription: NewsletterSubscription,
    ) -> Result<(), StorageError> {
        let mut subscriptions = self.subscriptions.lock().map_err(poisoned)?;

        if subscriptions.values().any(|s| s.email == subscription.email) {
            return Err(StorageError::AlreadyExists);
        }

        subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<Vec<NewsletterSubscription>, StorageError> {
        let subscriptions = self.subscriptions.lock().map_err(poisoned)?;
        Ok(subscriptions.values().cloned().collect())
    }

    // Emotion records
    async fn insert_emotion_record(&self, record: EmotionRecord) -> Result<(), StorageError> {
        let mut records = self.emotion_records.lock().map_err(poisoned)?;
        records.push(record);
        Ok(())
    }

    async fn emotion_records_between(
        &self,
        account_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EmotionRecord>, StorageError> {
        let records = self.emotion_records.lock().map_err(poisoned)?;
        let mut matched: Vec<EmotionRecord> = records
            .iter()
            .filter(|r| r.account_id == account_id && r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.timestamp);
        Ok(matched)
    }

    async fn recent_emotion_records(
        &self,
        account_id: Uuid,
        limit: usize,
    ) -> Result<Vec<EmotionRecord>, StorageError> {
        let records = self.emotion_records.lock().map_err(poisoned)?;
        let mut matched: Vec<EmotionRecord> = records
            .iter()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit);
        Ok(matched)
    }

    // Image analyses
    async fn insert_image_analysis(&self, analysis: ImageAnalysis) -> Result<(), StorageError> {
        let mut analyses = self.image_analyses.lock().map_err(poisoned)?;
        analyses.insert(analysis.id, analysis);
        Ok(())
    }

    async fn find_image_analysis(&self, id: Uuid) -> Result<Option<ImageAnalysis>, StorageError> {
        let analyses = self.image_analyses.lock().map_err(poisoned)?;
        Ok(analyses.get(&id).cloned())
    }

    async fn list_image_analyses(
        &self,
        account_id: Uuid,
        limit: usize,
        skip: usize,
    ) -> Result<(Vec<ImageAnalysis>, u64), StorageError> {
        let analyses = self.image_analyses.lock().map_err(poisoned)?;
        let mut matched: Vec<ImageAnalysis> = analyses
            .values()
            .filter(|a| a.account_id == account_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matched.len() as u64;
        let page = matched.into_iter().skip(skip).take(limit).collect();
        Ok((page, total))
    }

    async fn image_analyses_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<ImageAnalysis>, StorageError> {
        let analyses = self.image_analyses.lock().map_err(poisoned)?;
        Ok(analyses
            .values()
            .filter(|a| a.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn delete_image_analysis(&self, id: Uuid) -> Result<(), StorageError> {
        let mut analyses = self.image_analyses.lock().map_err(poisoned)?;
        analyses.remove(&id).ok_or(StorageError::NotFound)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountRole, EmotionLabel};
    use chrono::Duration;

    fn account(email: &str) -> Account {
        Account::new(
            "Test User".to_string(),
            email.to_string(),
            "hash".to_string(),
            AccountRole::User,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_account_insert_and_find() {
        let storage = MemoryStorage::new();
        let account = account("user@example.com");
        let id = account.id;

        storage.insert_account(account).await.unwrap();

        let by_id = storage.find_account(id).await.unwrap();
        assert!(by_id.is_some());

        let by_email = storage
            .find_account_by_email("user@example.com")
            .await
            .unwrap();
        assert_eq!(by_email.unwrap().id, id);

        let missing = storage.find_account(Uuid::new_v4()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let storage = MemoryStorage::new();
        storage
            .insert_account(account("dup@example.com"))
            .await
            .unwrap();

        let result = storage.insert_account(account("dup@example.com")).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists)));
    }

    #[tokio::test]
    async fn test_versioned_update_bumps_version() {
        let storage = MemoryStorage::new();
        let account = account("v@example.com");
        let id = account.id;
        storage.insert_account(account).await.unwrap();

        let mut loaded = storage.find_account(id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 0);

        loaded.total_time_secs = 30;
        let updated = storage.update_account(loaded).await.unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.total_time_secs, 30);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let storage = MemoryStorage::new();
        let account = account("race@example.com");
        let id = account.id;
        storage.insert_account(account).await.unwrap();

        // Two concurrent readers load the same version
        let mut first = storage.find_account(id).await.unwrap().unwrap();
        let mut second = storage.find_account(id).await.unwrap().unwrap();

        // First writer lands; the account goes offline
        first.is_online = false;
        storage.update_account(first).await.unwrap();

        // Second writer would resurrect the online flag; the version check
        // rejects it instead of losing the offline transition
        second.is_online = true;
        let result = storage.update_account(second).await;
        assert!(matches!(result, Err(StorageError::VersionConflict)));

        let stored = storage.find_account(id).await.unwrap().unwrap();
        assert!(!stored.is_online);
    }

    #[tokio::test]
    async fn test_update_missing_account() {
        let storage = MemoryStorage::new();
        let result = storage.update_account(account("ghost@example.com")).await;
        assert!(matches!(result, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn test_email_change_updates_index() {
        let storage = MemoryStorage::new();
        let original = account("old@example.com");
        let id = original.id;
        storage.insert_account(original).await.unwrap();
        storage
            .insert_account(account("taken@example.com"))
            .await
            .unwrap();

        // Changing to a taken address is rejected
        let mut loaded = storage.find_account(id).await.unwrap().unwrap();
        loaded.email = "taken@example.com".to_string();
        let result = storage.update_account(loaded).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists)));

        // Changing to a free address moves the index entry
        let mut loaded = storage.find_account(id).await.unwrap().unwrap();
        loaded.email = "new@example.com".to_string();
        storage.update_account(loaded).await.unwrap();

        assert!(storage
            .find_account_by_email("old@example.com")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            storage
                .find_account_by_email("new@example.com")
                .await
                .unwrap()
                .unwrap()
                .id,
            id
        );
    }

    #[tokio::test]
    async fn test_contact_read_flag() {
        let storage = MemoryStorage::new();
        let contact = ContactMessage::new(
            "Visitor".to_string(),
            "visitor@example.com".to_string(),
            "Hello".to_string(),
            "A question".to_string(),
            Utc::now(),
        );
        let id = contact.id;
        storage.insert_contact(contact).await.unwrap();

        let updated = storage.mark_contact_read(id).await.unwrap();
        assert!(updated.read);

        let missing = storage.mark_contact_read(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn test_subscription_uniqueness() {
        let storage = MemoryStorage::new();
        let sub = NewsletterSubscription::new("news@example.com".to_string(), Utc::now());
        storage.insert_subscription(sub).await.unwrap();

        let dup = NewsletterSubscription::new("news@example.com".to_string(), Utc::now());
        let result = storage.insert_subscription(dup).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists)));
    }

    #[tokio::test]
    async fn test_emotion_record_range_query() {
        let storage = MemoryStorage::new();
        let account_id = Uuid::new_v4();
        let base = Utc::now();

        for (offset, emotion) in [
            (0, EmotionLabel::Happy),
            (60, EmotionLabel::Sad),
            (120, EmotionLabel::Neutral),
        ] {
            storage
                .insert_emotion_record(EmotionRecord {
                    id: Uuid::new_v4(),
                    account_id,
                    emotion,
                    confidence: 0.9,
                    session_id: "s1".to_string(),
                    timestamp: base + Duration::seconds(offset),
                })
                .await
                .unwrap();
        }

        // Another account's record never leaks into the result
        storage
            .insert_emotion_record(EmotionRecord {
                id: Uuid::new_v4(),
                account_id: Uuid::new_v4(),
                emotion: EmotionLabel::Anger,
                confidence: 0.5,
                session_id: "s2".to_string(),
                timestamp: base,
            })
            .await
            .unwrap();

        let records = storage
            .emotion_records_between(account_id, base, base + Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].emotion, EmotionLabel::Happy);
        assert_eq!(records[1].emotion, EmotionLabel::Sad);

        let recent = storage.recent_emotion_records(account_id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].emotion, EmotionLabel::Neutral);
    }

    #[tokio::test]
    async fn test_image_analysis_pagination() {
        let storage = MemoryStorage::new();
        let account_id = Uuid::new_v4();
        let base = Utc::now();

        for i in 0..5 {
            storage
                .insert_image_analysis(ImageAnalysis {
                    id: Uuid::new_v4(),
                    account_id,
                    image_url: format!("http://img/{}", i),
                    emotion: EmotionLabel::Happy,
                    confidence: 0.8,
                    all_emotions: Default::default(),
                    bbox: None,
                    file_name: String::new(),
                    file_size: 0,
                    timestamp: base + Duration::seconds(i),
                })
                .await
                .unwrap();
        }

        let (page, total) = storage.list_image_analyses(account_id, 2, 1).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        // Newest first, skipping one
        assert_eq!(page[0].image_url, "http://img/3");
        assert_eq!(page[1].image_url, "http://img/2");
    }

    #[tokio::test]
    async fn test_image_analysis_delete() {
        let storage = MemoryStorage::new();
        let analysis = ImageAnalysis {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            image_url: "http://img/x".to_string(),
            emotion: EmotionLabel::Fear,
            confidence: 0.7,
            all_emotions: Default::default(),
            bbox: Some([1, 2, 3, 4]),
            file_name: "x.png".to_string(),
            file_size: 1024,
            timestamp: Utc::now(),
        };
        let id = analysis.id;

        storage.insert_image_analysis(analysis).await.unwrap();
        storage.delete_image_analysis(id).await.unwrap();

        assert!(storage.find_image_analysis(id).await.unwrap().is_none());
        let result = storage.delete_image_analysis(id).await;
        assert!(matches!(result, Err(StorageError::NotFound)));
    }
}
