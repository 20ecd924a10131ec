//! Push notification delivery
//!
//! Delivery is best effort: a failed push is logged and dropped, never retried,
//! and never fails the request that triggered it.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const WEBHOOK_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    /// Device push token
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Push service returned status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), NotifyError>;

    fn name(&self) -> &'static str;
}

/// Logs messages instead of delivering them
pub struct LogNotifier;

#[async_trait]
impl PushNotifier for LogNotifier {
    async fn send(&self, message: &PushMessage) -> Result<(), NotifyError> {
        info!("Push to {}: {} - {}", message.to, message.title, message.body);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// POSTs messages in Expo push format to a configured endpoint
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build push client with timeout ({e}), using defaults");
                reqwest::Client::new()
            });

        Self { url, client }
    }
}

#[async_trait]
impl PushNotifier for WebhookNotifier {
    async fn send(&self, message: &PushMessage) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| NotifyError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Send every message on a background task, logging each failure
pub fn dispatch(notifier: Arc<dyn PushNotifier>, messages: Vec<PushMessage>) {
    if messages.is_empty() {
        return;
    }

    tokio::spawn(async move {
        let total = messages.len();
        let mut delivered = 0;
        for message in &messages {
            match notifier.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Push via {} to {} failed: {}", notifier.name(), message.to, e),
            }
        }
        debug!("Push dispatch finished: {}/{} delivered", delivered, total);
    });
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Captures messages for assertions
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<PushMessage>>,
    }

    #[async_trait]
    impl PushNotifier for RecordingNotifier {
        async fn send(&self, message: &PushMessage) -> Result<(), NotifyError> {
            self.sent.lock().push(message.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    /// Fails every send
    pub struct FailingNotifier;

    #[async_trait]
    impl PushNotifier for FailingNotifier {
        async fn send(&self, _message: &PushMessage) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected(503))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn message(to: &str) -> PushMessage {
        PushMessage {
            to: to.into(),
            title: "Alert".into(),
            body: "Panic alert raised".into(),
            data: serde_json::json!({ "alert_id": "a1" }),
        }
    }

    #[test]
    fn test_expo_payload_shape() {
        let json = serde_json::to_value(message("ExponentPushToken[x]")).unwrap();
        assert_eq!(json["to"], "ExponentPushToken[x]");
        assert_eq!(json["data"]["alert_id"], "a1");
    }

    #[tokio::test]
    async fn test_dispatch_delivers_all() {
        let recorder = Arc::new(RecordingNotifier::default());
        dispatch(recorder.clone(), vec![message("a"), message("b")]);

        for _ in 0..50 {
            if recorder.sent.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_an_error() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/push".into());
        assert!(notifier.send(&message("a")).await.is_err());
    }
}
