use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

use super::{
    DEFAULT_MESSAGE, DEFAULT_MESSAGE_TITLE, EmailMessage, EmailSender, Metadata, Notifier,
    NotifierBase, NotifierDeps, Vendor, lenient, or_default, settings_from_value,
};
use crate::domain::{Alert, NotifyContext};
use crate::error::{ConfigError, NotifyError};
use crate::secrets::Decrypter;

pub struct Email;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    pub addresses: Vec<String>,
    pub single_email: bool,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    addresses: String,
    #[serde(default, deserialize_with = "lenient::bool_opt")]
    single_email: Option<bool>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    message: String,
}

fn split_addresses(raw: &str) -> Vec<String> {
    raw.split(|c| c == ';' || c == ',' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Vendor for Email {
    const TYPE: &'static str = "email";
    const SECRET_KEYS: &'static [&'static str] = &[];

    type Config = EmailConfig;

    fn parse(settings: &serde_json::Value, _decrypter: &Decrypter<'_>) -> Result<EmailConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;
        let addresses = split_addresses(&raw.addresses);
        if addresses.is_empty() {
            return Err(ConfigError::Required("could not find addresses in settings"));
        }
        Ok(EmailConfig {
            addresses,
            single_email: raw.single_email.unwrap_or(false),
            subject: or_default(raw.subject, DEFAULT_MESSAGE_TITLE),
            message: or_default(raw.message, DEFAULT_MESSAGE),
        })
    }

    fn build(meta: &Metadata, config: &EmailConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps
            .email
            .clone()
            .ok_or_else(|| "email sender is not configured".to_string())?;
        Ok(Arc::new(EmailNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            deps: deps.clone(),
            sender,
        }))
    }
}

pub struct EmailNotifier {
    base: NotifierBase,
    config: EmailConfig,
    deps: NotifierDeps,
    sender: Arc<dyn EmailSender>,
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        async {
            let data = self.deps.template_data(ctx, alerts);
            let msg = EmailMessage {
                to: self.config.addresses.clone(),
                single_email: self.config.single_email,
                subject: self.deps.render(&self.config.subject, &data),
                body: self.deps.render(&self.config.message, &data),
            };
            tracing::debug!(recipients = msg.to.len(), "sending email notification");
            self.sender.send_email(ctx, &msg).await
        }
        .instrument(self.base.span.clone())
        .await
    }

    fn send_resolved(&self) -> bool {
        self.base.send_resolved()
    }
}
