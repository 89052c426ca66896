//! Vendor integrations: typed settings, their validation, and the notifiers
//! built from them.
//!
//! Every vendor implements [`Vendor`] and is registered once in the
//! [`Registry`]. The registry is the only place that knows the full set of
//! types; nothing else branches on a vendor name.

pub mod alertmanager;
pub mod deps;
pub mod discord;
pub mod email;
pub mod googlechat;
mod http;
pub mod kafka;
pub mod opsgenie;
pub mod pagerduty;
mod registry;
pub mod slack;
pub mod teams;
pub mod telegram;
pub mod template;
pub mod webhook;

pub use deps::*;
pub use http::*;
pub use registry::*;
pub use template::{BasicTemplates, TemplateData, TemplateError, Templates};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::config::ApiReceiver;
use crate::domain::{Alert, NotifyContext};
use crate::error::{ConfigError, IntegrationValidationError, NotifyError};
use crate::secrets::{DecodeSecretsFn, Decrypter, GetDecryptedValueFn};

pub const DEFAULT_MESSAGE_TITLE: &str = r#"{{ template "default.title" . }}"#;
pub const DEFAULT_MESSAGE: &str = r#"{{ template "default.message" . }}"#;

/// A live notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one batch of alerts.
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError>;

    /// Whether resolved alerts should be delivered.
    fn send_resolved(&self) -> bool;
}

impl Debug for dyn Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("send_resolved", &self.send_resolved())
            .finish()
    }
}

/// A vendor type: how to validate its settings and build its notifier.
pub trait Vendor: Send + Sync + 'static {
    /// Lowercase type tag used in integration configurations.
    const TYPE: &'static str;

    /// Setting keys that may be supplied through secure settings.
    const SECRET_KEYS: &'static [&'static str];

    type Config: Clone + Debug + Serialize + Send + Sync + 'static;

    fn parse(
        settings: &serde_json::Value,
        decrypter: &Decrypter<'_>,
    ) -> Result<Self::Config, ConfigError>;

    fn build(
        meta: &Metadata,
        config: &Self::Config,
        deps: &NotifierDeps,
    ) -> Result<Arc<dyn Notifier>, String>;
}

/// Identity shared by every integration regardless of vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub integration_type: String,
    pub disable_resolve_message: bool,
}

/// Validated, secret-resolved settings of one integration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotifierConfig<T> {
    pub metadata: Metadata,
    pub settings: T,
}

/// One parsed integration with its settings type erased.
#[derive(Debug, Clone)]
pub struct TypedIntegration {
    pub metadata: Metadata,
    pub settings: Arc<dyn TypedSettings>,
}

/// A receiver whose integrations have all been validated.
#[derive(Debug, Clone, Default)]
pub struct ReceiverConfig {
    pub name: String,
    pub integrations: Vec<TypedIntegration>,
}

impl ReceiverConfig {
    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }
}

/// Parses settings for `integration_type` with the built-in registry.
pub fn parse(
    integration_type: &str,
    settings: &serde_json::Value,
    secure_settings: &std::collections::HashMap<String, String>,
    decode: DecodeSecretsFn,
    decrypt: &GetDecryptedValueFn,
) -> Result<Arc<dyn TypedSettings>, ConfigError> {
    Registry::global().parse(integration_type, settings, secure_settings, decode, decrypt)
}

/// Parses a whole receiver with the built-in registry.
pub fn build_receiver_configuration(
    receiver: &ApiReceiver,
    decode: DecodeSecretsFn,
    decrypt: &GetDecryptedValueFn,
) -> Result<ReceiverConfig, IntegrationValidationError> {
    Registry::global().build_receiver_configuration(receiver, decode, decrypt)
}

/// Deserializes settings, rejecting anything that is not a JSON object.
pub(crate) fn settings_from_value<T: serde::de::DeserializeOwned + Default>(
    settings: &serde_json::Value,
) -> Result<T, ConfigError> {
    match settings {
        serde_json::Value::Null => Ok(T::default()),
        serde_json::Value::Object(_) => Ok(T::deserialize(settings)?),
        _ => Err(ConfigError::invalid("settings must be a JSON object")),
    }
}

/// Fields every notifier carries.
#[derive(Debug, Clone)]
pub(crate) struct NotifierBase {
    pub meta: Metadata,
    pub span: tracing::Span,
}

impl NotifierBase {
    pub fn new(meta: &Metadata, deps: &NotifierDeps) -> Self {
        Self {
            meta: meta.clone(),
            span: deps.span_for(meta),
        }
    }

    pub fn send_resolved(&self) -> bool {
        !self.meta.disable_resolve_message
    }
}

/// Accepts JSON numbers and numeric strings, both common in stored settings.
pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    pub fn u64_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        match Option::<NumOrString>::deserialize(d)? {
            None => Ok(None),
            Some(NumOrString::Num(n)) => Ok(Some(n)),
            Some(NumOrString::Str(s)) if s.trim().is_empty() => Ok(None),
            Some(NumOrString::Str(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| serde::de::Error::custom("invalid maxAlerts value")),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    pub fn bool_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        match Option::<BoolOrString>::deserialize(d)? {
            None => Ok(None),
            Some(BoolOrString::Bool(b)) => Ok(Some(b)),
            Some(BoolOrString::Str(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid boolean value {:?}", s))),
        }
    }
}

/// Fills an empty string with `default`.
pub(crate) fn or_default(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{SecureSettings, plaintext_decrypt};
    use serde_json::json;

    /// Minimal valid settings for each built-in type, with every secret key set in plaintext.
    pub(crate) fn fixture(integration_type: &str) -> serde_json::Value {
        match integration_type {
            "prometheus-alertmanager" => json!({"url": "http://am:9093", "basicAuthPassword": "plain"}),
            "discord" => json!({"url": "https://plain.example/discord"}),
            "email" => json!({"addresses": "ops@example.com"}),
            "googlechat" => json!({"url": "https://plain.example/chat"}),
            "kafka" => json!({"kafkaRestProxy": "https://plain.example:8082", "kafkaTopic": "alerts", "password": "plain"}),
            "opsgenie" => json!({"apiKey": "plain"}),
            "pagerduty" => json!({"integrationKey": "plain"}),
            "slack" => json!({"url": "https://plain.example/slack", "token": "plain"}),
            "teams" => json!({"url": "https://plain.example/teams"}),
            "telegram" => json!({"bottoken": "plain", "chatid": "42"}),
            "webhook" => json!({
                "url": "https://plain.example/hook",
                "hmacConfig": {"secret": "plain"},
                "tlsConfig": {"insecureSkipVerify": false}
            }),
            other => panic!("no fixture for {}", other),
        }
    }

    fn secret_value(key: &str) -> String {
        match key {
            "url" | "kafkaRestProxy" => "https://secret.example/value".to_string(),
            _ => "secret-value".to_string(),
        }
    }

    #[test]
    fn test_secrets_win_for_every_vendor() {
        let registry = Registry::builtin();
        for plugin in registry.plugins() {
            let ty = plugin.integration_type();
            let raw = fixture(ty);
            let plain = plugin
                .parse(&raw, &Decrypter::new(&SecureSettings::new(), &plaintext_decrypt))
                .unwrap_or_else(|e| panic!("{}: {}", ty, e))
                .to_json()
                .to_string();

            for key in plugin.secret_keys() {
                let mut secure = SecureSettings::new();
                secure.insert(key.to_string(), secret_value(key).into_bytes());
                let parsed = plugin
                    .parse(&raw, &Decrypter::new(&secure, &plaintext_decrypt))
                    .unwrap_or_else(|e| panic!("{}.{}: {}", ty, key, e))
                    .to_json()
                    .to_string();
                assert!(
                    parsed.contains(&secret_value(key)),
                    "{}.{} did not take the secret value: {}",
                    ty,
                    key,
                    parsed
                );
                assert!(!plain.contains(&secret_value(key)));
            }
        }
    }

    #[test]
    fn test_every_vendor_declares_secrets() {
        let registry = Registry::builtin();
        for plugin in registry.plugins() {
            if plugin.integration_type() == "email" {
                continue;
            }
            assert!(
                !plugin.secret_keys().is_empty(),
                "{} has no secret keys",
                plugin.integration_type()
            );
        }
    }

    #[test]
    fn test_settings_must_be_object() {
        let err = settings_from_value::<serde_json::Map<String, serde_json::Value>>(&json!([1]))
            .unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }
}
