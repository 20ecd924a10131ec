//! Shared application state

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use rag_assistant::Assistant;
use safety_store::{InMemoryStore, SafetyStore};

use crate::anchor::AnchorLedger;
use crate::auth::TokenService;
use crate::config::Config;
use crate::notify::{LogNotifier, PushNotifier, WebhookNotifier};
use crate::realtime::RealtimeHub;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn SafetyStore>,
    pub tokens: Arc<TokenService>,
    pub hub: RealtimeHub,
    pub notifier: Arc<dyn PushNotifier>,
    /// Present only when anchoring is enabled
    pub ledger: Option<Arc<AnchorLedger>>,
    pub assistant: Arc<Assistant>,
    /// Serialises location updates per tourist
    location_locks: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn SafetyStore>) -> Self {
        let notifier: Arc<dyn PushNotifier> = match &config.push_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
            None => Arc::new(LogNotifier),
        };

        Self {
            tokens: Arc::new(TokenService::new(
                &config.jwt_secret,
                config.access_token_ttl_secs,
                config.refresh_token_ttl_secs,
            )),
            hub: RealtimeHub::new(config.ws_channel_capacity),
            ledger: config.anchor_enabled.then(|| Arc::new(AnchorLedger::new())),
            assistant: Arc::new(Assistant::with_guidance()),
            location_locks: Arc::default(),
            notifier,
            store,
            config: Arc::new(config),
        }
    }

    /// In-memory store with the given config
    pub fn in_memory(config: Config) -> Self {
        Self::new(config, Arc::new(InMemoryStore::new()))
    }

    /// Held across the read-previous-zones, record-fix, raise-breach sequence
    pub async fn lock_tourist(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.location_locks.lock().entry(id).or_default().clone();
        lock.lock_owned().await
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn PushNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
}
