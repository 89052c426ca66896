#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use alertmux::config::{ApiReceiver, IntegrationConfig};
use alertmux::domain::NotifyContext;
use alertmux::error::NotifyError;
use alertmux::integrations::{NotifierDeps, Registry, SharedSender, WebhookMessage, WebhookSender};
use alertmux::notify::{IntegrationFactory, NotificationHistorian, NotificationHistoryEntry};
use alertmux::secrets::{noop_decode, plaintext_decrypt};

/// Webhook sender that records every message and tracks how many sends
/// were in flight at once.
#[derive(Default)]
pub struct CountingSender {
    sent: RwLock<Vec<WebhookMessage>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    fail_status: Option<u16>,
}

impl CountingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send takes `delay`, racing the caller's context.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<WebhookMessage> {
        self.sent.read().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookSender for CountingSender {
    async fn send_webhook(&self, ctx: &NotifyContext, msg: &WebhookMessage) -> Result<(), NotifyError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay;
        let outcome = ctx
            .run(async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome?;

        self.sent.write().await.push(msg.clone());
        match self.fail_status {
            Some(status) => Err(NotifyError::Status {
                status,
                body: "rejected".to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// History sink that keeps entries in memory.
#[derive(Default)]
pub struct MemoryHistorian {
    entries: RwLock<Vec<NotificationHistoryEntry>>,
}

impl MemoryHistorian {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<NotificationHistoryEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl NotificationHistorian for MemoryHistorian {
    async fn record(&self, entry: NotificationHistoryEntry) -> anyhow::Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}

/// Factory sending every webhook through `sender`, with plaintext secrets.
pub fn factory(sender: Arc<CountingSender>) -> IntegrationFactory {
    let deps = NotifierDeps::new(Arc::new(SharedSender(sender)));
    IntegrationFactory::new(Registry::global(), deps).with_secrets(noop_decode, Arc::new(plaintext_decrypt))
}

pub fn integration(uid: &str, ty: &str, settings: serde_json::Value) -> IntegrationConfig {
    IntegrationConfig {
        uid: uid.to_string(),
        name: uid.to_string(),
        integration_type: ty.to_string(),
        settings,
        ..Default::default()
    }
}

pub fn webhook(uid: &str) -> IntegrationConfig {
    integration(uid, "webhook", json!({ "url": format!("http://hooks.example.com/{uid}") }))
}

pub fn receiver(name: &str, integrations: Vec<IntegrationConfig>) -> ApiReceiver {
    ApiReceiver {
        name: name.to_string(),
        integrations,
    }
}
