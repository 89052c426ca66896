use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::Instrument;

use super::{
    DEFAULT_MESSAGE, DEFAULT_MESSAGE_TITLE, Metadata, Notifier, NotifierBase, NotifierDeps,
    TemplateData, Vendor, WebhookMessage, WebhookSender, lenient, or_default, settings_from_value,
};
use crate::domain::{Alert, AlertStatus, NotifyContext};
use crate::error::{ConfigError, NotifyError};
use crate::secrets::Decrypter;

pub const DEFAULT_API_URL: &str = "https://api.opsgenie.com/v2/alerts";
const PRIORITY_LABEL: &str = "og_priority";
const MAX_MESSAGE_LEN: usize = 130;

pub struct Opsgenie;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendTagsAs {
    Tags,
    Details,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpsgenieConfig {
    pub api_key: String,
    pub api_url: String,
    pub message: String,
    pub description: String,
    pub auto_close: bool,
    pub override_priority: bool,
    pub send_tags_as: SendTagsAs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    api_url: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    description: String,
    #[serde(default, deserialize_with = "lenient::bool_opt")]
    auto_close: Option<bool>,
    #[serde(default, deserialize_with = "lenient::bool_opt")]
    override_priority: Option<bool>,
    #[serde(default)]
    send_tags_as: String,
}

impl Vendor for Opsgenie {
    const TYPE: &'static str = "opsgenie";
    const SECRET_KEYS: &'static [&'static str] = &["apiKey"];

    type Config = OpsgenieConfig;

    fn parse(settings: &serde_json::Value, decrypter: &Decrypter<'_>) -> Result<OpsgenieConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;
        let api_key = decrypter.get("apiKey", &raw.api_key);
        if api_key.trim().is_empty() {
            return Err(ConfigError::Required("could not find api key property in settings"));
        }

        let send_tags_as = match raw.send_tags_as.as_str() {
            "" | "tags" => SendTagsAs::Tags,
            "details" => SendTagsAs::Details,
            "both" => SendTagsAs::Both,
            other => {
                return Err(ConfigError::invalid(format!(
                    "invalid value for sendTagsAs: {:?}",
                    other
                )));
            }
        };

        Ok(OpsgenieConfig {
            api_key,
            api_url: or_default(raw.api_url, DEFAULT_API_URL),
            message: or_default(raw.message, DEFAULT_MESSAGE_TITLE),
            description: or_default(raw.description, DEFAULT_MESSAGE),
            auto_close: raw.auto_close.unwrap_or(true),
            override_priority: raw.override_priority.unwrap_or(true),
            send_tags_as,
        })
    }

    fn build(meta: &Metadata, config: &OpsgenieConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps.webhooks.sender_for(meta, None)?;
        Ok(Arc::new(OpsgenieNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            deps: deps.clone(),
            sender,
        }))
    }
}

pub struct OpsgenieNotifier {
    base: NotifierBase,
    config: OpsgenieConfig,
    deps: NotifierDeps,
    sender: Arc<dyn WebhookSender>,
}

impl OpsgenieNotifier {
    async fn send(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        let data = self.deps.template_data(ctx, alerts);
        let alias = alias_for(&data.group_key);

        let msg = if data.status == AlertStatus::Resolved {
            if !self.config.auto_close {
                tracing::debug!(alias = %alias, "auto close disabled, not closing alert");
                return Ok(());
            }
            let url = format!(
                "{}/{}/close?identifierType=alias",
                self.config.api_url.trim_end_matches('/'),
                alias
            );
            WebhookMessage::post_json(url, &serde_json::json!({ "source": "Grafana" }))?
        } else {
            let payload = build_payload(&self.config, &data, &self.deps, &alias);
            WebhookMessage::post_json(&self.config.api_url, &payload)?
        };

        let msg = msg.with_header("Authorization", format!("GenieKey {}", self.config.api_key));
        self.sender.send_webhook(ctx, &msg).await
    }
}

#[async_trait]
impl Notifier for OpsgenieNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        self.send(ctx, alerts).instrument(self.base.span.clone()).await
    }

    fn send_resolved(&self) -> bool {
        self.base.send_resolved()
    }
}

/// Opsgenie limits aliases to 512 characters, so the group key is hashed.
fn alias_for(group_key: &str) -> String {
    hex::encode(Sha256::digest(group_key.as_bytes()))
}

pub fn build_payload(
    config: &OpsgenieConfig,
    data: &TemplateData,
    deps: &NotifierDeps,
    alias: &str,
) -> serde_json::Value {
    let mut message = deps.render(&config.message, data);
    if message.chars().count() > MAX_MESSAGE_LEN {
        message = message.chars().take(MAX_MESSAGE_LEN - 1).collect::<String>() + "…";
    }

    let tags: Vec<String> = data
        .common_labels
        .iter()
        .filter(|(k, _)| k.as_str() != PRIORITY_LABEL)
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect();
    let mut details = serde_json::Map::new();
    details.insert("url".into(), serde_json::json!(data.external_url));

    let mut payload = serde_json::json!({
        "message": message,
        "alias": alias,
        "description": deps.render(&config.description, data),
        "source": "Grafana",
    });

    match config.send_tags_as {
        SendTagsAs::Tags => payload["tags"] = serde_json::json!(tags),
        SendTagsAs::Details => {
            for (k, v) in data.common_labels.iter() {
                details.insert(k.clone(), serde_json::json!(v));
            }
        }
        SendTagsAs::Both => {
            payload["tags"] = serde_json::json!(tags);
            for (k, v) in data.common_labels.iter() {
                details.insert(k.clone(), serde_json::json!(v));
            }
        }
    }
    payload["details"] = serde_json::Value::Object(details);

    if config.override_priority {
        if let Some(priority) = data.common_labels.get(PRIORITY_LABEL) {
            if matches!(priority, "P1" | "P2" | "P3" | "P4" | "P5") {
                payload["priority"] = serde_json::json!(priority);
            }
        }
    }
    payload
}
