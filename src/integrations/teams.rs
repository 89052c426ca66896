use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

use super::{
    DEFAULT_MESSAGE, DEFAULT_MESSAGE_TITLE, Metadata, Notifier, NotifierBase, NotifierDeps,
    TemplateData, Vendor, WebhookMessage, WebhookSender, or_default, settings_from_value,
};
use crate::domain::{Alert, AlertStatus, NotifyContext};
use crate::error::{ConfigError, NotifyError};
use crate::secrets::Decrypter;

pub struct Teams;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsConfig {
    pub url: String,
    pub title: String,
    pub section_title: String,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    sectiontitle: String,
    #[serde(default)]
    message: String,
}

impl Vendor for Teams {
    const TYPE: &'static str = "teams";
    const SECRET_KEYS: &'static [&'static str] = &["url"];

    type Config = TeamsConfig;

    fn parse(settings: &serde_json::Value, decrypter: &Decrypter<'_>) -> Result<TeamsConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;
        let url = decrypter.get("url", &raw.url);
        if url.trim().is_empty() {
            return Err(ConfigError::Required("could not find url property in settings"));
        }
        Ok(TeamsConfig {
            url,
            title: or_default(raw.title, DEFAULT_MESSAGE_TITLE),
            section_title: raw.sectiontitle,
            message: or_default(raw.message, DEFAULT_MESSAGE),
        })
    }

    fn build(meta: &Metadata, config: &TeamsConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps.webhooks.sender_for(meta, None)?;
        Ok(Arc::new(TeamsNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            deps: deps.clone(),
            sender,
        }))
    }
}

pub struct TeamsNotifier {
    base: NotifierBase,
    config: TeamsConfig,
    deps: NotifierDeps,
    sender: Arc<dyn WebhookSender>,
}

#[async_trait]
impl Notifier for TeamsNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        async {
            let data = self.deps.template_data(ctx, alerts);
            let image_url = self.deps.first_image_url(alerts).await;
            let payload = build_payload(&self.config, &data, &self.deps, image_url);
            let msg = WebhookMessage::post_json(&self.config.url, &payload)?;
            self.sender.send_webhook(ctx, &msg).await
        }
        .instrument(self.base.span.clone())
        .await
    }

    fn send_resolved(&self) -> bool {
        self.base.send_resolved()
    }
}

/// Adaptive Card payload for Teams workflow webhooks.
pub fn build_payload(
    config: &TeamsConfig,
    data: &TemplateData,
    deps: &NotifierDeps,
    image_url: Option<String>,
) -> serde_json::Value {
    let color = match data.status {
        AlertStatus::Firing => "Attention",
        AlertStatus::Resolved => "Good",
    };

    let mut body = vec![
        serde_json::json!({
            "type": "TextBlock",
            "size": "Large",
            "weight": "Bolder",
            "text": deps.render(&config.title, data),
            "color": color,
            "wrap": true
        }),
    ];
    if !config.section_title.is_empty() {
        body.push(serde_json::json!({
            "type": "TextBlock",
            "weight": "Bolder",
            "text": deps.render(&config.section_title, data),
            "wrap": true
        }));
    }
    body.push(serde_json::json!({
        "type": "TextBlock",
        "text": deps.render(&config.message, data),
        "wrap": true
    }));
    if let Some(url) = image_url {
        body.push(serde_json::json!({ "type": "Image", "url": url }));
    }

    let mut content = serde_json::json!({
        "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
        "type": "AdaptiveCard",
        "version": "1.4",
        "msteams": { "width": "Full" },
        "body": body,
    });
    if !data.external_url.is_empty() {
        content["actions"] = serde_json::json!([{
            "type": "Action.OpenUrl",
            "title": "View URL",
            "url": data.external_url,
        }]);
    }

    serde_json::json!({
        "type": "message",
        "attachments": [{
            "contentType": "application/vnd.microsoft.card.adaptive",
            "contentUrl": null,
            "content": content,
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::SharedSender;
    use crate::secrets::{SecureSettings, plaintext_decrypt};
    use serde_json::json;

    struct Nop;

    #[async_trait]
    impl WebhookSender for Nop {
        async fn send_webhook(&self, _: &NotifyContext, _: &WebhookMessage) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    #[test]
    fn test_url_required() {
        let err = Teams::parse(&json!({"title": "x"}), &Decrypter::new(&SecureSettings::new(), &plaintext_decrypt))
            .unwrap_err();
        assert_eq!(err.to_string(), "could not find url property in settings");
    }

    #[test]
    fn test_payload_structure() {
        let deps = NotifierDeps::new(Arc::new(SharedSender(Arc::new(Nop)))).with_external_url("http://grafana");
        let cfg = Teams::parse(
            &json!({"url": "https://teams.example/hook", "sectiontitle": "Details"}),
            &Decrypter::new(&SecureSettings::new(), &plaintext_decrypt),
        )
        .unwrap();
        let alert = Alert::new([("alertname", "A")].into_iter().collect(), Default::default(), chrono::Utc::now());
        let data = deps.template_data(&NotifyContext::new(), &[alert]);
        let payload = build_payload(&cfg, &data, &deps, None);
        assert_eq!(payload["type"], "message");
        let attachments = payload["attachments"].as_array().unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0]["contentType"], "application/vnd.microsoft.card.adaptive");
        let body = attachments[0]["content"]["body"].as_array().unwrap();
        assert_eq!(body.len(), 3);
        assert_eq!(attachments[0]["content"]["actions"][0]["url"], "http://grafana");
    }
}
