use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

use super::{
    DEFAULT_MESSAGE, Metadata, Notifier, NotifierBase, NotifierDeps, Vendor, WebhookMessage,
    WebhookSender, lenient, or_default, settings_from_value,
};
use crate::domain::{Alert, NotifyContext};
use crate::error::{ConfigError, NotifyError};
use crate::secrets::Decrypter;

const API_URL: &str = "https://api.telegram.org/bot";
/// Telegram rejects longer messages.
const MAX_MESSAGE_LEN: usize = 4096;

pub struct Telegram;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    Markdown,
    MarkdownV2,
    None,
}

impl ParseMode {
    fn api_value(&self) -> Option<&'static str> {
        match self {
            Self::Html => Some("HTML"),
            Self::Markdown => Some("Markdown"),
            Self::MarkdownV2 => Some("MarkdownV2"),
            Self::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub message_thread_id: String,
    pub message: String,
    pub parse_mode: ParseMode,
    pub disable_web_page_preview: bool,
    pub protect_content: bool,
    pub disable_notifications: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    bottoken: String,
    #[serde(default)]
    chatid: String,
    #[serde(default)]
    message_thread_id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    parse_mode: String,
    #[serde(default, deserialize_with = "lenient::bool_opt")]
    disable_web_page_preview: Option<bool>,
    #[serde(default, deserialize_with = "lenient::bool_opt")]
    protect_content: Option<bool>,
    #[serde(default, deserialize_with = "lenient::bool_opt")]
    disable_notifications: Option<bool>,
}

impl Vendor for Telegram {
    const TYPE: &'static str = "telegram";
    const SECRET_KEYS: &'static [&'static str] = &["bottoken"];

    type Config = TelegramConfig;

    fn parse(settings: &serde_json::Value, decrypter: &Decrypter<'_>) -> Result<TelegramConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;
        let bot_token = decrypter.get("bottoken", &raw.bottoken);
        if bot_token.trim().is_empty() {
            return Err(ConfigError::Required("could not find Bot Token in settings"));
        }
        if raw.chatid.trim().is_empty() {
            return Err(ConfigError::Required("could not find Chat Id in settings"));
        }

        let parse_mode = match raw.parse_mode.to_lowercase().as_str() {
            "" | "html" => ParseMode::Html,
            "markdown" => ParseMode::Markdown,
            "markdownv2" => ParseMode::MarkdownV2,
            "none" => ParseMode::None,
            _ => {
                return Err(ConfigError::invalid(
                    "unknown parse_mode, must be Markdown, MarkdownV2, HTML or None",
                ));
            }
        };

        Ok(TelegramConfig {
            bot_token,
            chat_id: raw.chatid.trim().to_string(),
            message_thread_id: raw.message_thread_id,
            message: or_default(raw.message, DEFAULT_MESSAGE),
            parse_mode,
            disable_web_page_preview: raw.disable_web_page_preview.unwrap_or(false),
            protect_content: raw.protect_content.unwrap_or(false),
            disable_notifications: raw.disable_notifications.unwrap_or(false),
        })
    }

    fn build(meta: &Metadata, config: &TelegramConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps.webhooks.sender_for(meta, None)?;
        Ok(Arc::new(TelegramNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            deps: deps.clone(),
            sender,
        }))
    }
}

pub struct TelegramNotifier {
    base: NotifierBase,
    config: TelegramConfig,
    deps: NotifierDeps,
    sender: Arc<dyn WebhookSender>,
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        async {
            let data = self.deps.template_data(ctx, alerts);
            let text = self.deps.render(&self.config.message, &data);
            let payload = build_payload(&self.config, &text);
            let url = format!("{}{}/sendMessage", API_URL, self.config.bot_token);
            let msg = WebhookMessage::post_json(url, &payload)?;
            self.sender.send_webhook(ctx, &msg).await
        }
        .instrument(self.base.span.clone())
        .await
    }

    fn send_resolved(&self) -> bool {
        self.base.send_resolved()
    }
}

pub fn build_payload(config: &TelegramConfig, text: &str) -> serde_json::Value {
    let text = if config.parse_mode == ParseMode::Html {
        html_escape(text)
    } else {
        text.to_string()
    };
    let text = if text.chars().count() > MAX_MESSAGE_LEN {
        text.chars().take(MAX_MESSAGE_LEN - 1).collect::<String>() + "…"
    } else {
        text
    };

    let mut payload = serde_json::json!({
        "chat_id": config.chat_id,
        "text": text,
        "disable_web_page_preview": config.disable_web_page_preview,
        "protect_content": config.protect_content,
        "disable_notification": config.disable_notifications,
    });
    if let Some(mode) = config.parse_mode.api_value() {
        payload["parse_mode"] = serde_json::json!(mode);
    }
    if !config.message_thread_id.is_empty() {
        payload["message_thread_id"] = serde_json::json!(config.message_thread_id);
    }
    payload
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{SecureSettings, plaintext_decrypt};
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Result<TelegramConfig, ConfigError> {
        Telegram::parse(&v, &Decrypter::new(&SecureSettings::new(), &plaintext_decrypt))
    }

    #[test]
    fn test_required_fields() {
        let err = parse(json!({"chatid": "1"})).unwrap_err();
        assert_eq!(err.to_string(), "could not find Bot Token in settings");
        let err = parse(json!({"bottoken": "t"})).unwrap_err();
        assert_eq!(err.to_string(), "could not find Chat Id in settings");
    }

    #[test]
    fn test_parse_mode_is_case_insensitive() {
        let cfg = parse(json!({"bottoken": "t", "chatid": "1", "parse_mode": "MARKDOWNV2"})).unwrap();
        assert_eq!(cfg.parse_mode, ParseMode::MarkdownV2);
        let cfg = parse(json!({"bottoken": "t", "chatid": "1"})).unwrap();
        assert_eq!(cfg.parse_mode, ParseMode::Html);
    }

    #[test]
    fn test_unknown_parse_mode() {
        let err = parse(json!({"bottoken": "t", "chatid": "1", "parse_mode": "rtf"})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown parse_mode, must be Markdown, MarkdownV2, HTML or None"
        );
    }

    #[test]
    fn test_payload_escapes_html() {
        let cfg = parse(json!({"bottoken": "t", "chatid": "42"})).unwrap();
        let payload = build_payload(&cfg, "<script>");
        assert_eq!(payload["text"], "&lt;script&gt;");
        assert_eq!(payload["parse_mode"], "HTML");

        let cfg = parse(json!({"bottoken": "t", "chatid": "42", "parse_mode": "none"})).unwrap();
        assert!(build_payload(&cfg, "x").get("parse_mode").is_none());
    }
}
