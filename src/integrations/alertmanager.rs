use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

use super::{
    Metadata, Notifier, NotifierBase, NotifierDeps, Vendor, WebhookMessage, WebhookSender,
    settings_from_value,
};
use crate::domain::{Alert, NotifyContext};
use crate::error::{ConfigError, NotifyError};
use crate::secrets::Decrypter;

const ALERTS_PATH: &str = "/api/v2/alerts";

pub struct Alertmanager;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerConfig {
    pub urls: Vec<String>,
    pub basic_auth_user: String,
    pub basic_auth_password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    basic_auth_user: String,
    #[serde(default)]
    basic_auth_password: String,
}

impl Vendor for Alertmanager {
    const TYPE: &'static str = "prometheus-alertmanager";
    const SECRET_KEYS: &'static [&'static str] = &["basicAuthPassword"];

    type Config = AlertmanagerConfig;

    fn parse(settings: &serde_json::Value, decrypter: &Decrypter<'_>) -> Result<AlertmanagerConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;
        if raw.url.trim().is_empty() {
            return Err(ConfigError::Required("could not find url property in settings"));
        }

        let mut urls = Vec::new();
        for candidate in raw.url.split(',').map(str::trim).filter(|u| !u.is_empty()) {
            let parsed = reqwest::Url::parse(candidate).map_err(|e| {
                ConfigError::invalid(format!("invalid url property in settings: {}", e))
            })?;
            urls.push(format!(
                "{}{}",
                parsed.as_str().trim_end_matches('/'),
                ALERTS_PATH
            ));
        }
        if urls.is_empty() {
            return Err(ConfigError::Required("could not find url property in settings"));
        }

        Ok(AlertmanagerConfig {
            urls,
            basic_auth_user: raw.basic_auth_user,
            basic_auth_password: decrypter.get("basicAuthPassword", &raw.basic_auth_password),
        })
    }

    fn build(meta: &Metadata, config: &AlertmanagerConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps.webhooks.sender_for(meta, None)?;
        Ok(Arc::new(AlertmanagerNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            sender,
        }))
    }
}

pub struct AlertmanagerNotifier {
    base: NotifierBase,
    config: AlertmanagerConfig,
    sender: Arc<dyn WebhookSender>,
}

impl AlertmanagerNotifier {
    /// Tries each configured Alertmanager until one accepts the batch.
    async fn send(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        let payload = build_payload(alerts);
        let mut last_err = None;
        for url in &self.config.urls {
            let mut msg = WebhookMessage::post_json(url, &payload)?;
            if !self.config.basic_auth_user.is_empty() {
                msg = msg.with_basic_auth(&self.config.basic_auth_user, &self.config.basic_auth_password);
            }
            match self.sender.send_webhook(ctx, &msg).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "failed to send to alertmanager");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| NotifyError::Sender("no alertmanager url configured".into())))
    }
}

#[async_trait]
impl Notifier for AlertmanagerNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        self.send(ctx, alerts).instrument(self.base.span.clone()).await
    }

    fn send_resolved(&self) -> bool {
        self.base.send_resolved()
    }
}

pub fn build_payload(alerts: &[Alert]) -> serde_json::Value {
    let items: Vec<serde_json::Value> = alerts
        .iter()
        .map(|alert| {
            let mut item = serde_json::json!({
                "labels": alert.labels,
                "annotations": alert.annotations,
                "startsAt": alert.starts_at.to_rfc3339(),
            });
            if let Some(ends_at) = alert.ends_at {
                item["endsAt"] = serde_json::json!(ends_at.to_rfc3339());
            }
            if !alert.generator_url.is_empty() {
                item["generatorURL"] = serde_json::json!(alert.generator_url);
            }
            item
        })
        .collect();
    serde_json::Value::Array(items)
}
