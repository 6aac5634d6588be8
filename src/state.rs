// Shared application state handed to handlers and middleware

use crate::config::AppConfig;
use crate::inference::InferenceClient;
use crate::storage::{create_storage_backend, StorageBackend};
use crate::tracker::{ActivityTracker, Clock, SystemClock};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn StorageBackend>,
    pub tracker: ActivityTracker,
    pub inference: InferenceClient,
}

impl AppState {
    /// Build the full state from configuration: storage backend from the
    /// factory, system clock, inference client
    pub async fn from_config(config: Arc<AppConfig>) -> Result<Self, String> {
        let store = create_storage_backend(&config.storage)
            .await
            .map_err(|err| format!("Failed to initialize storage backend: {}", err))?;
        Self::with_parts(config, store, Arc::new(SystemClock))
    }

    /// Assemble state from explicit parts. Tests use this to inject a
    /// manual clock and a fresh in-memory store.
    pub fn with_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, String> {
        let tracker = ActivityTracker::new(store.clone(), clock, config.tracker.clone());
        let inference = InferenceClient::new(&config.inference)?;
        Ok(Self {
            config,
            store,
            tracker,
            inference,
        })
    }
}
