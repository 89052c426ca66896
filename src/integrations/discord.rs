use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

use super::{
    DEFAULT_MESSAGE, DEFAULT_MESSAGE_TITLE, Metadata, Notifier, NotifierBase, NotifierDeps,
    TemplateData, Vendor, WebhookMessage, WebhookSender, lenient, or_default, settings_from_value,
};
use crate::domain::{Alert, AlertStatus, NotifyContext};
use crate::error::{ConfigError, NotifyError};
use crate::secrets::Decrypter;

/// Discord rejects longer message content.
const MAX_CONTENT_LEN: usize = 2000;

pub struct Discord;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    pub url: String,
    pub title: String,
    pub message: String,
    pub avatar_url: String,
    pub use_discord_username: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    message: String,
    #[serde(default, rename = "avatar_url")]
    avatar_url: String,
    #[serde(default, rename = "use_discord_username", deserialize_with = "lenient::bool_opt")]
    use_discord_username: Option<bool>,
}

impl Vendor for Discord {
    const TYPE: &'static str = "discord";
    const SECRET_KEYS: &'static [&'static str] = &["url"];

    type Config = DiscordConfig;

    fn parse(settings: &serde_json::Value, decrypter: &Decrypter<'_>) -> Result<DiscordConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;
        let url = decrypter.get("url", &raw.url);
        if url.trim().is_empty() {
            return Err(ConfigError::Required(
                "could not find webhook url property in settings",
            ));
        }

        Ok(DiscordConfig {
            url,
            title: or_default(raw.title, DEFAULT_MESSAGE_TITLE),
            message: or_default(raw.message, DEFAULT_MESSAGE),
            avatar_url: raw.avatar_url,
            use_discord_username: raw.use_discord_username.unwrap_or(false),
        })
    }

    fn build(meta: &Metadata, config: &DiscordConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps.webhooks.sender_for(meta, None)?;
        Ok(Arc::new(DiscordNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            deps: deps.clone(),
            sender,
        }))
    }
}

pub struct DiscordNotifier {
    base: NotifierBase,
    config: DiscordConfig,
    deps: NotifierDeps,
    sender: Arc<dyn WebhookSender>,
}

#[async_trait]
impl Notifier for DiscordNotifier {
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

pub fn build_payload(
    config: &DiscordConfig,
    data: &TemplateData,
    deps: &NotifierDeps,
    image_url: Option<String>,
) -> serde_json::Value {
    let title = deps.render(&config.title, data);
    let mut content = deps.render(&config.message, data);
    if content.chars().count() > MAX_CONTENT_LEN {
        content = content.chars().take(MAX_CONTENT_LEN - 1).collect::<String>() + "…";
    }

    let color = match data.status {
        AlertStatus::Firing => 0xD63232,
        AlertStatus::Resolved => 0x36a64f,
    };

    let mut embed = serde_json::json!({
        "title": title,
        "url": data.external_url,
        "color": color,
        "footer": {"text": "Grafana"},
    });
    if let Some(url) = image_url {
        embed["image"] = serde_json::json!({ "url": url });
    }

    let mut payload = serde_json::json!({
        "content": content,
        "embeds": [embed],
    });
    if !config.use_discord_username {
        payload["username"] = serde_json::json!("Grafana");
    }
    if !config.avatar_url.is_empty() {
        payload["avatar_url"] = serde_json::json!(config.avatar_url);
    }
    payload
}
