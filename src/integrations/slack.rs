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

pub const API_URL: &str = "https://slack.com/api/chat.postMessage";
const DEFAULT_USERNAME: &str = "Grafana";

pub struct Slack;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    pub endpoint_url: String,
    pub url: String,
    pub token: String,
    pub recipient: String,
    pub text: String,
    pub title: String,
    pub username: String,
    pub icon_emoji: String,
    pub icon_url: String,
    pub mention_channel: String,
    pub mention_users: Vec<String>,
    pub mention_groups: Vec<String>,
    pub color: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    endpoint_url: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    recipient: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    username: String,
    #[serde(default, rename = "icon_emoji")]
    icon_emoji: String,
    #[serde(default, rename = "icon_url")]
    icon_url: String,
    #[serde(default)]
    mention_channel: String,
    #[serde(default)]
    mention_users: String,
    #[serde(default)]
    mention_groups: String,
    #[serde(default)]
    color: String,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Vendor for Slack {
    const TYPE: &'static str = "slack";
    const SECRET_KEYS: &'static [&'static str] = &["url", "token"];

    type Config = SlackConfig;

    fn parse(settings: &serde_json::Value, decrypter: &Decrypter<'_>) -> Result<SlackConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;

        let endpoint_url = or_default(raw.endpoint_url, API_URL);
        let token = decrypter.get("token", &raw.token);
        let mut url = decrypter.get("url", &raw.url);
        if url.trim().is_empty() {
            if token.is_empty() {
                return Err(ConfigError::Required(
                    "token must be specified when using the Slack chat API",
                ));
            }
            url = endpoint_url.clone();
        }
        reqwest::Url::parse(&url)
            .map_err(|e| ConfigError::invalid(format!("invalid URL {:?}: {}", url, e)))?;

        if url == endpoint_url && raw.recipient.trim().is_empty() {
            return Err(ConfigError::Required(
                "recipient must be specified when using the Slack chat API",
            ));
        }

        match raw.mention_channel.as_str() {
            "" | "here" | "channel" => {}
            other => {
                return Err(ConfigError::invalid(format!(
                    "invalid value for mentionChannel: {:?}",
                    other
                )));
            }
        }

        Ok(SlackConfig {
            endpoint_url,
            url,
            token,
            recipient: raw.recipient.trim().to_string(),
            text: or_default(raw.text, DEFAULT_MESSAGE),
            title: or_default(raw.title, DEFAULT_MESSAGE_TITLE),
            username: or_default(raw.username, DEFAULT_USERNAME),
            icon_emoji: raw.icon_emoji,
            icon_url: raw.icon_url,
            mention_channel: raw.mention_channel,
            mention_users: split_list(&raw.mention_users),
            mention_groups: split_list(&raw.mention_groups),
            color: raw.color,
        })
    }

    fn build(meta: &Metadata, config: &SlackConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps.webhooks.sender_for(meta, None)?;
        Ok(Arc::new(SlackNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            deps: deps.clone(),
            sender,
        }))
    }
}

pub struct SlackNotifier {
    base: NotifierBase,
    config: SlackConfig,
    deps: NotifierDeps,
    sender: Arc<dyn WebhookSender>,
}

impl SlackNotifier {
    fn mention_text(&self) -> String {
        let mut parts = Vec::new();
        if !self.config.mention_channel.is_empty() {
            parts.push(format!("<!{}|{}>", self.config.mention_channel, self.config.mention_channel));
        }
        for group in &self.config.mention_groups {
            parts.push(format!("<!subteam^{}>", group));
        }
        for user in &self.config.mention_users {
            parts.push(format!("<@{}>", user));
        }
        parts.join(" ")
    }

    async fn send(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        let data = self.deps.template_data(ctx, alerts);
        let image_url = self.deps.first_image_url(alerts).await;
        let payload = build_payload(&self.config, &data, &self.deps, &self.mention_text(), image_url);

        let mut msg = WebhookMessage::post_json(&self.config.url, &payload)?;
        if self.config.url == self.config.endpoint_url {
            msg = msg.with_header("Authorization", format!("Bearer {}", self.config.token));
        }

        tracing::debug!(alerts = alerts.len(), "sending slack message");
        self.sender.send_webhook(ctx, &msg).await
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        self.send(ctx, alerts).instrument(self.base.span.clone()).await
    }

    fn send_resolved(&self) -> bool {
        self.base.send_resolved()
    }
}

pub fn build_payload(
    config: &SlackConfig,
    data: &TemplateData,
    deps: &NotifierDeps,
    mention: &str,
    image_url: Option<String>,
) -> serde_json::Value {
    let title = deps.render(&config.title, data);
    let text = deps.render(&config.text, data);
    let color = if !config.color.is_empty() {
        config.color.clone()
    } else if data.status == AlertStatus::Firing {
        "#D63232".to_string()
    } else {
        "#36a64f".to_string()
    };

    let mut attachment = serde_json::json!({
        "color": color,
        "title": title,
        "title_link": data.external_url,
        "text": text,
        "fallback": title,
        "footer": "Grafana",
        "ts": chrono::Utc::now().timestamp(),
    });
    if let Some(url) = image_url {
        attachment["image_url"] = serde_json::json!(url);
    }

    let mut payload = serde_json::json!({
        "channel": config.recipient,
        "username": config.username,
        "attachments": [attachment],
    });
    if !mention.is_empty() {
        payload["text"] = serde_json::json!(mention);
    }
    if !config.icon_emoji.is_empty() {
        payload["icon_emoji"] = serde_json::json!(config.icon_emoji);
    }
    if !config.icon_url.is_empty() {
        payload["icon_url"] = serde_json::json!(config.icon_url);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{SecureSettings, plaintext_decrypt};
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Result<SlackConfig, ConfigError> {
        Slack::parse(&v, &Decrypter::new(&SecureSettings::new(), &plaintext_decrypt))
    }

    #[test]
    fn test_token_and_recipient_default_to_api_url() {
        let cfg = parse(json!({"recipient": "#ops", "token": "xoxb"})).unwrap();
        assert_eq!(cfg.url, API_URL);
        assert_eq!(cfg.username, "Grafana");
        assert_eq!(cfg.title, DEFAULT_MESSAGE_TITLE);
    }

    #[test]
    fn test_missing_token_without_url() {
        let err = parse(json!({"recipient": "#ops"})).unwrap_err();
        assert_eq!(err.to_string(), "token must be specified when using the Slack chat API");
    }

    #[test]
    fn test_missing_recipient_with_api_url() {
        let err = parse(json!({"token": "xoxb"})).unwrap_err();
        assert_eq!(err.to_string(), "recipient must be specified when using the Slack chat API");
    }

    #[test]
    fn test_incoming_webhook_needs_no_recipient() {
        let cfg = parse(json!({"url": "https://hooks.slack.com/services/x"})).unwrap();
        assert!(cfg.recipient.is_empty());
    }

    #[test]
    fn test_invalid_mention_channel() {
        let err = parse(json!({"url": "https://hooks.slack.com/x", "mentionChannel": "everyone"}))
            .unwrap_err();
        assert!(err.to_string().contains("invalid value for mentionChannel"));
    }

    #[test]
    fn test_mentions_are_split() {
        let cfg = parse(json!({
            "url": "https://hooks.slack.com/x",
            "mentionUsers": "U1, U2,",
            "mentionGroups": "G1"
        }))
        .unwrap();
        assert_eq!(cfg.mention_users, vec!["U1", "U2"]);
        assert_eq!(cfg.mention_groups, vec!["G1"]);
    }
}
