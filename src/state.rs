use parking_lot::RwLock as SyncRwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{ApiReceiver, RateLimitConfig, Settings};
use crate::domain::NotifyContext;
use crate::error::{Error, Result};
use crate::integrations::{HttpSenderFactory, NotifierDeps, Registry};
use crate::notify::{IntegrationFactory, Receiver, ReceiverStatus, TestReceiversParams, TestReceiversResult};
use crate::observability::HistoryLogWriter;

/// Shared application state
pub struct AppState {
    pub settings: Settings,
    factory: IntegrationFactory,
    limits: Arc<SyncRwLock<RateLimitConfig>>,
    receivers: RwLock<HashMap<String, Receiver>>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        factory: IntegrationFactory,
        limits: Arc<SyncRwLock<RateLimitConfig>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            factory,
            limits,
            receivers: RwLock::new(HashMap::new()),
        })
    }

    /// Wires the HTTP sender, rate limits and history log from `settings`.
    pub fn from_settings(settings: Settings) -> anyhow::Result<Arc<Self>> {
        let webhooks = HttpSenderFactory::new(&settings.http)?;
        let deps = NotifierDeps::new(Arc::new(webhooks))
            .with_external_url(settings.dispatch.external_url.clone());

        let limits = Arc::new(SyncRwLock::new(settings.rate_limits.clone()));
        let mut factory =
            IntegrationFactory::new(Registry::global(), deps).with_rate_limits(limits.clone());
        if let Some(path) = &settings.observability.history_log_path {
            factory = factory.with_historian(Arc::new(HistoryLogWriter::new(path)?));
            tracing::info!(path = %path, "notification history enabled");
        }

        Ok(Self::new(settings, factory, limits))
    }

    pub fn factory(&self) -> &IntegrationFactory {
        &self.factory
    }

    /// Replaces the rate limits; limiters pick them up at their next recheck.
    pub fn update_rate_limits(&self, config: RateLimitConfig) {
        *self.limits.write() = config;
        tracing::info!("rate limits updated");
    }

    /// Parses and builds every receiver, then swaps the live set.
    /// Nothing is replaced if any receiver fails.
    pub async fn apply_receivers(&self, receivers: &[ApiReceiver]) -> Result<usize> {
        let mut built = HashMap::with_capacity(receivers.len());
        for api in receivers {
            if built.contains_key(&api.name) {
                return Err(Error::Config(format!("duplicate receiver name: {}", api.name)));
            }
            let config = self.factory.parse_receiver(api)?;
            let receiver = self.factory.build_receiver(&config)?;
            built.insert(api.name.clone(), receiver);
        }

        let count = built.len();
        let previous = std::mem::replace(&mut *self.receivers.write().await, built);
        tracing::info!(receivers = count, replaced = previous.len(), "receivers applied");
        Ok(count)
    }

    pub async fn receiver(&self, name: &str) -> Result<Receiver> {
        self.receivers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ReceiverNotFound(name.to_string()))
    }

    pub async fn receivers_status(&self) -> Vec<ReceiverStatus> {
        let receivers = self.receivers.read().await;
        let mut status: Vec<ReceiverStatus> = receivers.values().map(Receiver::status).collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// Sends a test alert through every integration of `params`, bounded by
    /// the configured test timeout.
    pub async fn test_receivers(&self, params: TestReceiversParams) -> Result<TestReceiversResult> {
        let ctx = NotifyContext::new().with_timeout(self.settings.dispatch.test_timeout());
        let result = crate::notify::test_receivers(&ctx, params, &self.factory).await?;
        Ok(result)
    }
}
