use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

use super::{
    DEFAULT_MESSAGE, DEFAULT_MESSAGE_TITLE, Metadata, Notifier, NotifierBase, NotifierDeps,
    Vendor, WebhookMessage, WebhookSender, or_default, settings_from_value,
};
use crate::domain::{Alert, NotifyContext};
use crate::error::{ConfigError, NotifyError};
use crate::secrets::Decrypter;

pub struct GoogleChat;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoogleChatConfig {
    pub url: String,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    message: String,
}

impl Vendor for GoogleChat {
    const TYPE: &'static str = "googlechat";
    const SECRET_KEYS: &'static [&'static str] = &["url"];

    type Config = GoogleChatConfig;

    fn parse(settings: &serde_json::Value, decrypter: &Decrypter<'_>) -> Result<GoogleChatConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;
        let url = decrypter.get("url", &raw.url);
        if url.trim().is_empty() {
            return Err(ConfigError::Required("could not find url property in settings"));
        }
        Ok(GoogleChatConfig {
            url,
            title: or_default(raw.title, DEFAULT_MESSAGE_TITLE),
            message: or_default(raw.message, DEFAULT_MESSAGE),
        })
    }

    fn build(meta: &Metadata, config: &GoogleChatConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps.webhooks.sender_for(meta, None)?;
        Ok(Arc::new(GoogleChatNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            deps: deps.clone(),
            sender,
        }))
    }
}

pub struct GoogleChatNotifier {
    base: NotifierBase,
    config: GoogleChatConfig,
    deps: NotifierDeps,
    sender: Arc<dyn WebhookSender>,
}

#[async_trait]
impl Notifier for GoogleChatNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        async {
            let data = self.deps.template_data(ctx, alerts);
            let title = self.deps.render(&self.config.title, &data);
            let message = self.deps.render(&self.config.message, &data);
            let payload = serde_json::json!({
                "previewText": title,
                "fallbackText": title,
                "cardsV2": [{
                    "cardId": "alert",
                    "card": {
                        "header": {"title": title},
                        "sections": [{
                            "widgets": [{"textParagraph": {"text": message}}]
                        }]
                    }
                }]
            });
            let msg = WebhookMessage::post_json(&self.config.url, &payload)?
                .with_header("Content-Type", "application/json; charset=UTF-8");
            self.sender.send_webhook(ctx, &msg).await
        }
        .instrument(self.base.span.clone())
        .await
    }

    fn send_resolved(&self) -> bool {
        self.base.send_resolved()
    }
}
