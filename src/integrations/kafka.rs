use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

use super::{
    DEFAULT_MESSAGE, DEFAULT_MESSAGE_TITLE, Metadata, Notifier, NotifierBase, NotifierDeps,
    TemplateData, Vendor, WebhookMessage, WebhookSender, or_default, settings_from_value,
};
use crate::domain::{Alert, NotifyContext};
use crate::error::{ConfigError, NotifyError};
use crate::secrets::Decrypter;

pub struct Kafka;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    V2,
    V3,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaConfig {
    pub endpoint: String,
    pub topic: String,
    pub description: String,
    pub details: String,
    pub username: String,
    pub password: String,
    pub api_version: ApiVersion,
    pub cluster_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    kafka_rest_proxy: String,
    #[serde(default)]
    kafka_topic: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kafka_cluster_id: String,
}

impl Vendor for Kafka {
    const TYPE: &'static str = "kafka";
    const SECRET_KEYS: &'static [&'static str] = &["kafkaRestProxy", "password"];

    type Config = KafkaConfig;

    fn parse(settings: &serde_json::Value, decrypter: &Decrypter<'_>) -> Result<KafkaConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;

        let endpoint = decrypter.get("kafkaRestProxy", &raw.kafka_rest_proxy);
        let endpoint = endpoint.trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(ConfigError::Required(
                "could not find kafka rest proxy endpoint property in settings",
            ));
        }
        if raw.kafka_topic.trim().is_empty() {
            return Err(ConfigError::Required("could not find kafka topic property in settings"));
        }

        let api_version = match raw.api_version.to_lowercase().as_str() {
            "" | "v2" => ApiVersion::V2,
            "v3" => ApiVersion::V3,
            _ => {
                return Err(ConfigError::invalid(format!(
                    "unsupported api version: {}",
                    raw.api_version
                )));
            }
        };
        if api_version == ApiVersion::V3 && raw.kafka_cluster_id.trim().is_empty() {
            return Err(ConfigError::invalid(
                "kafka cluster id must be provided when using api version 3",
            ));
        }

        Ok(KafkaConfig {
            endpoint,
            topic: raw.kafka_topic.trim().to_string(),
            description: or_default(raw.description, DEFAULT_MESSAGE_TITLE),
            details: or_default(raw.details, DEFAULT_MESSAGE),
            username: raw.username,
            password: decrypter.get("password", &raw.password),
            api_version,
            cluster_id: raw.kafka_cluster_id.trim().to_string(),
        })
    }

    fn build(meta: &Metadata, config: &KafkaConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps.webhooks.sender_for(meta, None)?;
        Ok(Arc::new(KafkaNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            deps: deps.clone(),
            sender,
        }))
    }
}

pub struct KafkaNotifier {
    base: NotifierBase,
    config: KafkaConfig,
    deps: NotifierDeps,
    sender: Arc<dyn WebhookSender>,
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        async {
            let data = self.deps.template_data(ctx, alerts);
            let record = build_record(&self.config, &data, &self.deps);
            let topic = urlencoding::encode(&self.config.topic);
            let (url, body, content_type) = match self.config.api_version {
                ApiVersion::V2 => (
                    format!("{}/topics/{}", self.config.endpoint, topic),
                    serde_json::json!({ "records": [{ "value": record }] }),
                    "application/vnd.kafka.json.v2+json",
                ),
                ApiVersion::V3 => (
                    format!(
                        "{}/v3/clusters/{}/topics/{}/records",
                        self.config.endpoint,
                        urlencoding::encode(&self.config.cluster_id),
                        topic
                    ),
                    serde_json::json!({ "value": { "type": "JSON", "data": record } }),
                    "application/json",
                ),
            };

            let mut msg = WebhookMessage::post_json(url, &body)?;
            msg.content_type = content_type.to_string();
            msg = msg.with_header("Accept", "application/vnd.kafka.v2+json");
            if !self.config.username.is_empty() {
                msg = msg.with_basic_auth(&self.config.username, &self.config.password);
            }
            self.sender.send_webhook(ctx, &msg).await
        }
        .instrument(self.base.span.clone())
        .await
    }

    fn send_resolved(&self) -> bool {
        self.base.send_resolved()
    }
}

/// The record value written to the topic.
pub fn build_record(config: &KafkaConfig, data: &TemplateData, deps: &NotifierDeps) -> serde_json::Value {
    let event_type = match data.status {
        crate::domain::AlertStatus::Firing => "trigger",
        crate::domain::AlertStatus::Resolved => "resolve",
    };
    serde_json::json!({
        "alert_state": data.status.as_str(),
        "client": "Grafana",
        "client_url": data.external_url,
        "description": deps.render(&config.description, data),
        "details": deps.render(&config.details, data),
        "incident_key": data.group_key,
        "event_type": event_type,
    })
}
