// MongoDB storage backend implementation
// Documents are mapped by hand so the wire shapes stay under our control;
// ids are stored as uuid strings and timestamps as native BSON dates.

use super::{StorageBackend, StorageError};
use crate::models::{
    Account, AccountRole, ContactMessage, EmotionLabel, EmotionRecord, ImageAnalysis,
    NewsletterSubscription, SessionRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    ClientOptions, FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument,
};
use mongodb::{Client, Collection, IndexModel};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// MongoDB storage backend
pub struct MongoStorage {
    accounts: Collection<Document>,
    contacts: Collection<Document>,
    subscriptions: Collection<Document>,
    emotion_records: Collection<Document>,
    image_analyses: Collection<Document>,
}

impl MongoStorage {
    /// Connect to MongoDB and prepare the collections and indexes
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StorageError> {
        let options = ClientOptions::parse(uri).await.map_err(connection_err)?;
        let client = Client::with_options(options).map_err(connection_err)?;
        let db = client.database(database);

        let storage = Self {
            accounts: db.collection::<Document>("accounts"),
            contacts: db.collection::<Document>("contacts"),
            subscriptions: db.collection::<Document>("newsletters"),
            emotion_records: db.collection::<Document>("emotion_records"),
            image_analyses: db.collection::<Document>("image_analyses"),
        };
        storage.ensure_indexes().await?;
        Ok(storage)
    }

    async fn ensure_indexes(&self) -> Result<(), StorageError> {
        let unique_email = IndexModel::builder()
            .keys(doc! {"email": 1})
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.accounts
            .create_index(unique_email.clone(), None)
            .await
            .map_err(connection_err)?;
        self.subscriptions
            .create_index(unique_email, None)
            .await
            .map_err(connection_err)?;

        let by_account_time = IndexModel::builder()
            .keys(doc! {"account_id": 1, "timestamp": -1})
            .build();
        self.emotion_records
            .create_index(by_account_time.clone(), None)
            .await
            .map_err(connection_err)?;
        self.image_analyses
            .create_index(by_account_time, None)
            .await
            .map_err(connection_err)?;

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MongoStorage {
    // Account operations
    async fn insert_account(&self, account: Account) -> Result<(), StorageError> {
        self.accounts
            .insert_one(account_to_doc(&account), None)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StorageError> {
        let doc = self
            .accounts
            .find_one(doc! {"_id": id.to_string()}, None)
            .await
            .map_err(connection_err)?;
        doc.map(account_from_doc).transpose()
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError> {
        let doc = self
            .accounts
            .find_one(doc! {"email": email}, None)
            .await
            .map_err(connection_err)?;
        doc.map(account_from_doc).transpose()
    }

    async fn update_account(&self, mut account: Account) -> Result<Account, StorageError> {
        let expected = account.version;
        account.version += 1;

        let filter = doc! {"_id": account.id.to_string(), "version": expected as i64};
        let result = self
            .accounts
            .replace_one(filter, account_to_doc(&account), None)
            .await
            .map_err(write_err)?;

        if result.matched_count == 0 {
            // Either the document is gone or a concurrent writer bumped the
            // version first; look again to tell the two apart
            let exists = self
                .accounts
                .count_documents(doc! {"_id": account.id.to_string()}, None)
                .await
                .map_err(connection_err)?
                > 0;
            return Err(if exists {
                StorageError::VersionConflict
            } else {
                StorageError::NotFound
            });
        }

        Ok(account)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let docs: Vec<Document> = self
            .accounts
            .find(None, None)
            .await
            .map_err(connection_err)?
            .try_collect()
            .await
            .map_err(connection_err)?;
        docs.into_iter().map(account_from_doc).collect()
    }

    // Contact messages
    async fn insert_contact(&self, contact: ContactMessage) -> Result<(), StorageError> {
        self.contacts
            .insert_one(contact_to_doc(&contact), None)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn list_contacts(&self) -> Result<Vec<ContactMessage>, StorageError> {
        let docs: Vec<Document> = self
            .contacts
            .find(None, None)
            .await
            .map_err(connection_err)?
            .try_collect()
            .await
            .map_err(connection_err)?;
        docs.into_iter().map(contact_from_doc).collect()
    }

    async fn mark_contact_read(&self, id: Uuid) -> Result<ContactMessage, StorageError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let doc = self
            .contacts
            .find_one_and_update(
                doc! {"_id": id.to_string()},
                doc! {"$set": {"read": true}},
                options,
            )
            .await
            .map_err(connection_err)?;
        doc.ok_or(StorageError::NotFound).and_then(contact_from_doc)
    }

    // Newsletter subscriptions
    async fn insert_subscription(
        &self,
        subscription: NewsletterSubscription,
    ) -> Result<(), StorageError> {
        self.subscriptions
            .insert_one(subscription_to_doc(&subscription), None)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<Vec<NewsletterSubscription>, StorageError> {
        let docs: Vec<Document> = self
            .subscriptions
            .find(None, None)
            .await
            .map_err(connection_err)?
            .try_collect()
            .await
            .map_err(connection_err)?;
        docs.into_iter().map(subscription_from_doc).collect()
    }

    // Emotion records
    async fn insert_emotion_record(&self, record: EmotionRecord) -> Result<(), StorageError> {
        self.emotion_records
            .insert_one(emotion_record_to_doc(&record), None)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn emotion_records_between(
        &self,
        account_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EmotionRecord>, StorageError> {
        let filter = doc! {
            "account_id": account_id.to_string(),
            "timestamp": {
                "$gte": bson::DateTime::from_chrono(start),
                "$lte": bson::DateTime::from_chrono(end),
            },
        };
        let options = FindOptions::builder().sort(doc! {"timestamp": 1}).build();
        let docs: Vec<Document> = self
            .emotion_records
            .find(filter, options)
            .await
            .map_err(connection_err)?
            .try_collect()
            .await
            .map_err(connection_err)?;
        docs.into_iter().map(emotion_record_from_doc).collect()
    }

    async fn recent_emotion_records(
        &self,
        account_id: Uuid,
        limit: usize,
    ) -> Result<Vec<EmotionRecord>, StorageError> {
        let options = FindOptions::builder()
            .sort(doc! {"timestamp": -1})
            .limit(limit as i64)
            .build();
        let docs: Vec<Document> = self
            .emotion_records
            .find(doc! {"account_id": account_id.to_string()}, options)
            .await
            .map_err(connection_err)?
            .try_collect()
            .await
            .map_err(connection_err)?;
        docs.into_iter().map(emotion_record_from_doc).collect()
    }

    // Image analyses
    async fn insert_image_analysis(&self, analysis: ImageAnalysis) -> Result<(), StorageError> {
        self.image_analyses
            .insert_one(analysis_to_doc(&analysis), None)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn find_image_analysis(&self, id: Uuid) -> Result<Option<ImageAnalysis>, StorageError> {
        let doc = self
            .image_analyses
            .find_one(doc! {"_id": id.to_string()}, None)
            .await
            .map_err(connection_err)?;
        doc.map(analysis_from_doc).transpose()
    }

    async fn list_image_analyses(
        &self,
        account_id: Uuid,
        limit: usize,
        skip: usize,
    ) -> Result<(Vec<ImageAnalysis>, u64), StorageError> {
        let filter = doc! {"account_id": account_id.to_string()};
        let total = self
            .image_analyses
            .count_documents(filter.clone(), None)
            .await
            .map_err(connection_err)?;

        let options = FindOptions::builder()
            .sort(doc! {"timestamp": -1})
            .skip(skip as u64)
            .limit(limit as i64)
            .build();
        let docs: Vec<Document> = self
            .image_analyses
            .find(filter, options)
            .await
            .map_err(connection_err)?
            .try_collect()
            .await
            .map_err(connection_err)?;

        let analyses = docs
            .into_iter()
            .map(analysis_from_doc)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((analyses, total))
    }

    async fn image_analyses_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<ImageAnalysis>, StorageError> {
        let docs: Vec<Document> = self
            .image_analyses
            .find(doc! {"account_id": account_id.to_string()}, None)
            .await
            .map_err(connection_err)?
            .try_collect()
            .await
            .map_err(connection_err)?;
        docs.into_iter().map(analysis_from_doc).collect()
    }

    async fn delete_image_analysis(&self, id: Uuid) -> Result<(), StorageError> {
        let result = self
            .image_analyses
            .delete_one(doc! {"_id": id.to_string()}, None)
            .await
            .map_err(connection_err)?;
        if result.deleted_count == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

// ---- Error mapping ----

fn connection_err(err: mongodb::error::Error) -> StorageError {
    StorageError::ConnectionError(err.to_string())
}

/// Duplicate-key violations on the unique indexes come back as write
/// error 11000; everything else is a connection-level failure
fn write_err(err: mongodb::error::Error) -> StorageError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
        if write_error.code == 11000 {
            return StorageError::AlreadyExists;
        }
    }
    StorageError::ConnectionError(err.to_string())
}

impl From<bson::document::ValueAccessError> for StorageError {
    fn from(err: bson::document::ValueAccessError) -> Self {
        StorageError::InvalidData(err.to_string())
    }
}

// ---- Document mapping ----

fn role_str(role: AccountRole) -> &'static str {
    match role {
        AccountRole::User => "user",
        AccountRole::Admin => "admin",
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(value)
        .map_err(|err| StorageError::InvalidData(format!("Bad uuid '{}': {}", value, err)))
}

fn optional_datetime(doc: &Document, key: &str) -> Option<DateTime<Utc>> {
    match doc.get(key) {
        Some(Bson::DateTime(dt)) => Some(dt.to_chrono()),
        _ => None,
    }
}

fn optional_string(doc: &Document, key: &str) -> Option<String> {
    doc.get_str(key).ok().map(|s| s.to_string())
}

fn session_record_to_doc(record: &SessionRecord) -> Document {
    doc! {
        "login_time": bson::DateTime::from_chrono(record.login_time),
        "logout_time": record.logout_time.map(bson::DateTime::from_chrono),
        "session_duration_secs": record.session_duration_secs.map(|d| d as i64),
        "client_address": record.client_address.clone(),
        "client_agent": record.client_agent.clone(),
    }
}

fn session_record_from_bson(value: &Bson) -> Result<SessionRecord, StorageError> {
    let doc = value.as_document().ok_or_else(|| {
        StorageError::InvalidData("login_history entry is not a document".to_string())
    })?;
    Ok(SessionRecord {
        login_time: doc.get_datetime("login_time")?.to_chrono(),
        logout_time: optional_datetime(doc, "logout_time"),
        session_duration_secs: doc.get_i64("session_duration_secs").ok().map(|d| d.max(0) as u64),
        client_address: optional_string(doc, "client_address"),
        client_agent: optional_string(doc, "client_agent"),
    })
}

fn account_to_doc(account: &Account) -> Document {
    let history: Vec<Document> = account
        .login_history
        .iter()
        .map(session_record_to_doc)
        .collect();
    doc! {
        "_id": account.id.to_string(),
        "email": account.email.clone(),
        "name": account.name.clone(),
        "password_hash": account.password_hash.clone(),
        "role": role_str(account.role),
        "is_online": account.is_online,
        "current_session_start": account.current_session_start.map(bson::DateTime::from_chrono),
        "total_time_secs": account.total_time_secs as i64,
        "session_credited_secs": account.session_credited_secs as i64,
        "last_activity": bson::DateTime::from_chrono(account.last_activity),
        "last_login": account.last_login.map(bson::DateTime::from_chrono),
        "last_logout": account.last_logout.map(bson::DateTime::from_chrono),
        "login_history": history,
        "created_at": bson::DateTime::from_chrono(account.created_at),
        "updated_at": bson::DateTime::from_chrono(account.updated_at),
        "version": account.version as i64,
    }
}

fn account_from_doc(doc: Document) -> Result<Account, StorageError> {
    let login_history = doc
        .get_array("login_history")?
        .iter()
        .map(session_record_from_bson)
        .collect::<Result<Vec<_>, _>>()?;

    let role = match doc.get_str("role")? {
        "admin" => AccountRole::Admin,
        _ => AccountRole::User,
    };

    Ok(Account {
        id: parse_uuid(doc.get_str("_id")?)?,
        email: doc.get_str("email")?.to_string(),
        name: doc.get_str("name")?.to_string(),
        password_hash: doc.get_str("password_hash")?.to_string(),
        role,
        is_online: doc.get_bool("is_online")?,
        current_session_start: optional_datetime(&doc, "current_session_start"),
        total_time_secs: doc.get_i64("total_time_secs")?.max(0) as u64,
        session_credited_secs: doc.get_i64("session_credited_secs")?.max(0) as u64,
        last_activity: doc.get_datetime("last_activity")?.to_chrono(),
        last_login: optional_datetime(&doc, "last_login"),
        last_logout: optional_datetime(&doc, "last_logout"),
        login_history,
        created_at: doc.get_datetime("created_at")?.to_chrono(),
        updated_at: doc.get_datetime("updated_at")?.to_chrono(),
        version: doc.get_i64("version")?.max(0) as u64,
    })
}

fn contact_to_doc(contact: &ContactMessage) -> Document {
    doc! {
        "_id": contact.id.to_string(),
        "name": contact.name.clone(),
        "email": contact.email.clone(),
        "subject": contact.subject.clone(),
        "message": contact.message.clone(),
        "read": contact.read,
        "created_at": bson::DateTime::from_chrono(contact.created_at),
    }
}

fn contact_from_doc(doc: Document) -> Result<ContactMessage, StorageError> {
    Ok(ContactMessage {
        id: parse_uuid(doc.get_str("_id")?)?,
        name: doc.get_str("name")?.to_string(),
        email: doc.get_str("email")?.to_string(),
        subject: doc.get_str("subject")?.to_string(),
        message: doc.get_str("message")?.to_string(),
        read: doc.get_bool("read")?,
        created_at: doc.get_datetime("created_at")?.to_chrono(),
    })
}

fn subscription_to_doc(subscription: &NewsletterSubscription) -> Document {
    doc! {
        "_id": subscription.id.to_string(),
        "email": subscription.email.clone(),
        "subscribed_at": bson::DateTime::from_chrono(subscription.subscribed_at),
    }
}

fn subscription_from_doc(doc: Document) -> Result<NewsletterSubscription, StorageError> {
    Ok(NewsletterSubscription {
        id: parse_uuid(doc.get_str("_id")?)?,
        email: doc.get_str("email")?.to_string(),
        subscribed_at: doc.get_datetime("subscribed_at")?.to_chrono(),
    })
}

fn parse_emotion(value: &str) -> Result<EmotionLabel, StorageError> {
    EmotionLabel::from_str(value)
        .map_err(|_| StorageError::InvalidData(format!("Unknown emotion label '{}'", value)))
}

fn emotion_record_to_doc(record: &EmotionRecord) -> Document {
    doc! {
        "_id": record.id.to_string(),
        "account_id": record.account_id.to_string(),
        "emotion": record.emotion.as_str(),
        "confidence": record.confidence,
        "session_id": record.session_id.clone(),
        "timestamp": bson::DateTime::from_chrono(record.timestamp),
    }
}

fn emotion_record_from_doc(doc: Document) -> Result<EmotionRecord, StorageError> {
    Ok(EmotionRecord {
        id: parse_uuid(doc.get_str("_id")?)?,
        account_id: parse_uuid(doc.get_str("account_id")?)?,
        emotion: parse_emotion(doc.get_str("emotion")?)?,
        confidence: doc.get_f64("confidence")?,
        session_id: doc.get_str("session_id")?.to_string(),
        timestamp: doc.get_datetime("timestamp")?.to_chrono(),
    })
}

fn analysis_to_doc(analysis: &ImageAnalysis) -> Document {
    let mut all_emotions = Document::new();
    for (label, value) in &analysis.all_emotions {
        all_emotions.insert(label.clone(), *value);
    }
    doc! {
        "_id": analysis.id.to_string(),
        "account_id": analysis.account_id.to_string(),
        "image_url": analysis.image_url.clone(),
        "emotion": analysis.emotion.as_str(),
        "confidence": analysis.confidence,
        "all_emotions": all_emotions,
        "bbox": analysis.bbox.map(|b| b.to_vec()),
        "file_name": analysis.file_name.clone(),
        "file_size": analysis.file_size as i64,
        "timestamp": bson::DateTime::from_chrono(analysis.timestamp),
    }
}

fn analysis_from_doc(doc: Document) -> Result<ImageAnalysis, StorageError> {
    let mut all_emotions = HashMap::new();
    if let Ok(map) = doc.get_document("all_emotions") {
        for (label, value) in map {
            if let Some(score) = value.as_f64() {
                all_emotions.insert(label.clone(), score);
            }
        }
    }

    let bbox = match doc.get("bbox") {
        Some(Bson::Array(values)) if values.len() == 4 => {
            let mut out = [0i64; 4];
            for (slot, value) in out.iter_mut().zip(values) {
                *slot = value.as_i64().ok_or_else(|| {
                    StorageError::InvalidData("bbox entry is not an integer".to_string())
                })?;
            }
            Some(out)
        }
        _ => None,
    };

    Ok(ImageAnalysis {
        id: parse_uuid(doc.get_str("_id")?)?,
        account_id: parse_uuid(doc.get_str("account_id")?)?,
        image_url: doc.get_str("image_url")?.to_string(),
        emotion: parse_emotion(doc.get_str("emotion")?)?,
        confidence: doc.get_f64("confidence")?,
        all_emotions,
        bbox,
        file_name: doc.get_str("file_name")?.to_string(),
        file_size: doc.get_i64("file_size")?.max(0) as u64,
        timestamp: doc.get_datetime("timestamp")?.to_chrono(),
    })
}
