use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::Instrument;

use super::{
    DEFAULT_MESSAGE, DEFAULT_MESSAGE_TITLE, Metadata, Notifier, NotifierBase, NotifierDeps,
    TemplateData, Vendor, WebhookMessage, WebhookSender, or_default, settings_from_value,
};
use crate::domain::{Alert, AlertStatus, NotifyContext};
use crate::error::{ConfigError, NotifyError};
use crate::secrets::Decrypter;

pub const DEFAULT_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";
const DEFAULT_CLIENT: &str = "Grafana";
const DEFAULT_SEVERITY: &str = "critical";
const MAX_SUMMARY_LEN: usize = 1024;

pub struct Pagerduty;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagerdutyConfig {
    pub key: String,
    pub url: String,
    pub severity: String,
    pub class: String,
    pub component: String,
    pub group: String,
    pub summary: String,
    pub details: String,
    pub source: String,
    pub client: String,
    pub client_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    integration_key: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    class: String,
    #[serde(default)]
    component: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    client: String,
    #[serde(default)]
    client_url: String,
}

impl Vendor for Pagerduty {
    const TYPE: &'static str = "pagerduty";
    const SECRET_KEYS: &'static [&'static str] = &["integrationKey"];

    type Config = PagerdutyConfig;

    fn parse(settings: &serde_json::Value, decrypter: &Decrypter<'_>) -> Result<PagerdutyConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;
        let key = decrypter.get("integrationKey", &raw.integration_key);
        if key.trim().is_empty() {
            return Err(ConfigError::Required(
                "could not find integration key property in settings",
            ));
        }

        Ok(PagerdutyConfig {
            key,
            url: or_default(raw.url, DEFAULT_EVENTS_URL),
            severity: or_default(raw.severity, DEFAULT_SEVERITY),
            class: raw.class,
            component: or_default(raw.component, "Grafana"),
            group: raw.group,
            summary: or_default(raw.summary, DEFAULT_MESSAGE_TITLE),
            details: or_default(raw.details, DEFAULT_MESSAGE),
            source: raw.source,
            client: or_default(raw.client, DEFAULT_CLIENT),
            client_url: raw.client_url,
        })
    }

    fn build(meta: &Metadata, config: &PagerdutyConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps.webhooks.sender_for(meta, None)?;
        Ok(Arc::new(PagerdutyNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            deps: deps.clone(),
            sender,
        }))
    }
}

pub struct PagerdutyNotifier {
    base: NotifierBase,
    config: PagerdutyConfig,
    deps: NotifierDeps,
    sender: Arc<dyn WebhookSender>,
}

#[async_trait]
impl Notifier for PagerdutyNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        async {
            let data = self.deps.template_data(ctx, alerts);
            if data.status == AlertStatus::Resolved && !self.send_resolved() {
                return Ok(());
            }
            let image_url = self.deps.first_image_url(alerts).await;
            let payload = build_payload(&self.config, &data, &self.deps, image_url);
            let msg = WebhookMessage::post_json(&self.config.url, &payload)?;
            tracing::debug!(event_action = %payload["event_action"], "sending pagerduty event");
            self.sender.send_webhook(ctx, &msg).await
        }
        .instrument(self.base.span.clone())
        .await
    }

    fn send_resolved(&self) -> bool {
        self.base.send_resolved()
    }
}

pub fn build_payload(
    config: &PagerdutyConfig,
    data: &TemplateData,
    deps: &NotifierDeps,
    image_url: Option<String>,
) -> serde_json::Value {
    let event_action = match data.status {
        AlertStatus::Firing => "trigger",
        AlertStatus::Resolved => "resolve",
    };
    let dedup_key = hex::encode(Sha256::digest(data.group_key.as_bytes()));

    let mut summary = deps.render(&config.summary, data);
    if summary.chars().count() > MAX_SUMMARY_LEN {
        summary = summary.chars().take(MAX_SUMMARY_LEN - 1).collect::<String>() + "…";
    }

    let mut custom_details = serde_json::json!({
        "firing": deps.render(&config.details, data),
        "num_firing": data.firing().count(),
        "num_resolved": data.resolved().count(),
    });
    if !data.group_labels.is_empty() {
        custom_details["group_labels"] = serde_json::json!(data.group_labels);
    }

    let source = if config.source.is_empty() {
        config.client.clone()
    } else {
        deps.render(&config.source, data)
    };

    let mut payload = serde_json::json!({
        "routing_key": config.key,
        "event_action": event_action,
        "dedup_key": dedup_key,
        "client": config.client,
        "client_url": if config.client_url.is_empty() { data.external_url.clone() } else { config.client_url.clone() },
        "payload": {
            "summary": summary,
            "source": source,
            "severity": deps.render(&config.severity, data),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "component": config.component,
            "custom_details": custom_details,
        }
    });
    if !config.class.is_empty() {
        payload["payload"]["class"] = serde_json::json!(deps.render(&config.class, data));
    }
    if !config.group.is_empty() {
        payload["payload"]["group"] = serde_json::json!(deps.render(&config.group, data));
    }
    if let Some(src) = image_url {
        payload["images"] = serde_json::json!([{ "src": src }]);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::SharedSender;
    use crate::secrets::{SecureSettings, plaintext_decrypt};
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Result<PagerdutyConfig, ConfigError> {
        Pagerduty::parse(&v, &Decrypter::new(&SecureSettings::new(), &plaintext_decrypt))
    }

    struct Nop;

    #[async_trait]
    impl WebhookSender for Nop {
        async fn send_webhook(&self, _: &NotifyContext, _: &WebhookMessage) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    fn deps() -> NotifierDeps {
        NotifierDeps::new(Arc::new(SharedSender(Arc::new(Nop))))
    }

    #[test]
    fn test_defaults() {
        let cfg = parse(json!({"integrationKey": "k"})).unwrap();
        assert_eq!(cfg.severity, "critical");
        assert_eq!(cfg.component, "Grafana");
        assert_eq!(cfg.client, "Grafana");
        assert_eq!(cfg.url, DEFAULT_EVENTS_URL);
    }

    #[test]
    fn test_missing_key() {
        let err = parse(json!({"severity": "info"})).unwrap_err();
        assert_eq!(err.to_string(), "could not find integration key property in settings");
    }

    #[test]
    fn test_trigger_payload() {
        let deps = deps();
        let cfg = parse(json!({"integrationKey": "routing", "summary": "Test Alert"})).unwrap();
        let alert = Alert::new([("alertname", "A")].into_iter().collect(), Default::default(), chrono::Utc::now());
        let data = deps.template_data(&NotifyContext::new().with_group_key("gk"), &[alert]);
        let payload = build_payload(&cfg, &data, &deps, None);
        assert_eq!(payload["routing_key"], "routing");
        assert_eq!(payload["event_action"], "trigger");
        assert_eq!(payload["payload"]["summary"], "Test Alert");
        assert_eq!(payload["payload"]["custom_details"]["num_firing"], 1);
    }

    #[test]
    fn test_resolve_payload() {
        let deps = deps();
        let cfg = parse(json!({"integrationKey": "routing"})).unwrap();
        let now = chrono::Utc::now() - chrono::Duration::minutes(5);
        let mut alert = Alert::new([("alertname", "A")].into_iter().collect(), Default::default(), now);
        alert.ends_at = Some(now);
        let data = deps.template_data(&NotifyContext::new().with_group_key("gk"), &[alert]);
        let payload = build_payload(&cfg, &data, &deps, None);
        assert_eq!(payload["event_action"], "resolve");
    }
}
