use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::Instrument;

use super::{
    DEFAULT_MESSAGE, DEFAULT_MESSAGE_TITLE, Metadata, Notifier, NotifierBase, NotifierDeps,
    TemplateData, TlsSettings, Vendor, WebhookMessage, WebhookSender, lenient, or_default,
    settings_from_value,
};
use crate::domain::{Alert, NotifyContext};
use crate::error::{ConfigError, NotifyError};
use crate::secrets::Decrypter;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Grafana-Alerting-Signature";

pub struct Webhook;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HmacConfig {
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub timestamp_header: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,
    pub http_method: String,
    pub user: String,
    pub password: String,
    pub authorization_scheme: String,
    pub authorization_credentials: String,
    pub max_alerts: usize,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac: Option<HmacConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    http_method: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default, rename = "authorization_scheme")]
    authorization_scheme: String,
    #[serde(default, rename = "authorization_credentials")]
    authorization_credentials: String,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    max_alerts: Option<u64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    hmac_config: Option<HmacConfig>,
    #[serde(default)]
    tls_config: Option<TlsSettings>,
}

impl Vendor for Webhook {
    const TYPE: &'static str = "webhook";
    const SECRET_KEYS: &'static [&'static str] = &[
        "url",
        "password",
        "authorization_credentials",
        "hmacConfig.secret",
        "tlsConfig.caCertificate",
    ];

    type Config = WebhookConfig;

    fn parse(settings: &serde_json::Value, decrypter: &Decrypter<'_>) -> Result<WebhookConfig, ConfigError> {
        let raw: RawSettings = settings_from_value(settings)?;

        let url = decrypter.get("url", &raw.url);
        if url.trim().is_empty() {
            return Err(ConfigError::Required("required field 'url' is not specified"));
        }

        let http_method = match raw.http_method.to_uppercase().as_str() {
            "" | "POST" => "POST".to_string(),
            "PUT" => "PUT".to_string(),
            _ => {
                return Err(ConfigError::invalid(
                    "field httpMethod should be either POST or PUT",
                ));
            }
        };

        let password = decrypter.get("password", &raw.password);
        let credentials = decrypter.get("authorization_credentials", &raw.authorization_credentials);
        if (!raw.username.is_empty() || !password.is_empty()) && !credentials.is_empty() {
            return Err(ConfigError::invalid(
                "both HTTP Basic Authentication and Authorization Header are set, only 1 is permitted",
            ));
        }
        let authorization_scheme = if credentials.is_empty() {
            String::new()
        } else {
            or_default(raw.authorization_scheme, "Bearer")
        };

        let hmac = raw.hmac_config.map(|h| HmacConfig {
            secret: decrypter.get("hmacConfig.secret", &h.secret),
            header: or_default(h.header, DEFAULT_SIGNATURE_HEADER),
            timestamp_header: h.timestamp_header,
        });
        let tls = raw.tls_config.map(|t| TlsSettings {
            insecure_skip_verify: t.insecure_skip_verify,
            ca_certificate: decrypter.get("tlsConfig.caCertificate", &t.ca_certificate),
        });

        Ok(WebhookConfig {
            url,
            http_method,
            user: raw.username,
            password,
            authorization_scheme,
            authorization_credentials: credentials,
            max_alerts: raw.max_alerts.unwrap_or(0) as usize,
            title: or_default(raw.title, DEFAULT_MESSAGE_TITLE),
            message: or_default(raw.message, DEFAULT_MESSAGE),
            hmac,
            tls,
        })
    }

    fn build(meta: &Metadata, config: &WebhookConfig, deps: &NotifierDeps) -> Result<Arc<dyn Notifier>, String> {
        let sender = deps.webhooks.sender_for(meta, config.tls.as_ref())?;
        Ok(Arc::new(WebhookNotifier {
            base: NotifierBase::new(meta, deps),
            config: config.clone(),
            deps: deps.clone(),
            sender,
        }))
    }
}

pub struct WebhookNotifier {
    base: NotifierBase,
    config: WebhookConfig,
    deps: NotifierDeps,
    sender: Arc<dyn WebhookSender>,
}

impl WebhookNotifier {
    async fn send(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        let data = self.deps.template_data(ctx, alerts);
        let payload = build_payload(&self.config, &data, &self.deps);

        let mut msg = WebhookMessage::post_json(&self.config.url, &payload)?;
        msg.http_method = self.config.http_method.clone();
        if !self.config.user.is_empty() || !self.config.password.is_empty() {
            msg = msg.with_basic_auth(&self.config.user, &self.config.password);
        }
        if !self.config.authorization_credentials.is_empty() {
            msg = msg.with_header(
                "Authorization",
                format!(
                    "{} {}",
                    self.config.authorization_scheme, self.config.authorization_credentials
                ),
            );
        }
        if let Some(hmac) = &self.config.hmac {
            msg = sign(msg, hmac, chrono::Utc::now().timestamp());
        }

        tracing::debug!(method = %msg.http_method, alerts = alerts.len(), "sending webhook");
        self.sender.send_webhook(ctx, &msg).await
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        self.send(ctx, alerts).instrument(self.base.span.clone()).await
    }

    fn send_resolved(&self) -> bool {
        self.base.send_resolved()
    }
}

/// Extended Alertmanager webhook body, truncated to `max_alerts` when set.
pub fn build_payload(config: &WebhookConfig, data: &TemplateData, deps: &NotifierDeps) -> serde_json::Value {
    let (alerts, truncated) = if config.max_alerts > 0 && data.alerts.len() > config.max_alerts {
        (
            &data.alerts[..config.max_alerts],
            data.alerts.len() - config.max_alerts,
        )
    } else {
        (&data.alerts[..], 0)
    };

    serde_json::json!({
        "receiver": data.receiver,
        "status": data.status.as_str(),
        "alerts": alerts,
        "groupLabels": data.group_labels,
        "commonLabels": data.common_labels,
        "commonAnnotations": data.common_annotations,
        "externalURL": data.external_url,
        "version": "1",
        "groupKey": data.group_key,
        "truncatedAlerts": truncated,
        "title": deps.render(&config.title, data),
        "state": match data.status {
            crate::domain::AlertStatus::Firing => "alerting",
            crate::domain::AlertStatus::Resolved => "ok",
        },
        "message": deps.render(&config.message, data),
    })
}

/// Adds the HMAC-SHA256 signature of the body, prefixed by the timestamp when
/// a timestamp header is configured.
fn sign(msg: WebhookMessage, hmac: &HmacConfig, timestamp: i64) -> WebhookMessage {
    let signature = if hmac.timestamp_header.is_empty() {
        compute_signature(hmac.secret.as_bytes(), msg.body.as_bytes())
    } else {
        let signed = format!("{}:{}", timestamp, msg.body);
        compute_signature(hmac.secret.as_bytes(), signed.as_bytes())
    };
    let header = hmac.header.clone();
    let mut msg = msg.with_header(header, signature);
    if !hmac.timestamp_header.is_empty() {
        msg = msg.with_header(hmac.timestamp_header.clone(), timestamp.to_string());
    }
    msg
}

fn compute_signature(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{SecureSettings, plaintext_decrypt};
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Result<WebhookConfig, ConfigError> {
        Webhook::parse(&v, &Decrypter::new(&SecureSettings::new(), &plaintext_decrypt))
    }

    #[test]
    fn test_url_required() {
        let err = parse(json!({})).unwrap_err();
        assert!(matches!(err, ConfigError::Required(_)));
        assert_eq!(err.to_string(), "required field 'url' is not specified");
    }

    #[test]
    fn test_http_method() {
        assert_eq!(parse(json!({"url": "http://h"})).unwrap().http_method, "POST");
        assert_eq!(parse(json!({"url": "http://h", "httpMethod": "put"})).unwrap().http_method, "PUT");
        let err = parse(json!({"url": "http://h", "httpMethod": "GET"})).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(err.to_string(), "field httpMethod should be either POST or PUT");
    }

    #[test]
    fn test_basic_auth_and_authorization_are_exclusive() {
        let err = parse(json!({
            "url": "http://h",
            "username": "u",
            "password": "p",
            "authorization_credentials": "token"
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().starts_with("both HTTP Basic Authentication"));
    }

    #[test]
    fn test_max_alerts_accepts_strings() {
        assert_eq!(parse(json!({"url": "http://h", "maxAlerts": "3"})).unwrap().max_alerts, 3);
        assert_eq!(parse(json!({"url": "http://h", "maxAlerts": 5})).unwrap().max_alerts, 5);
        let err = parse(json!({"url": "http://h", "maxAlerts": "many"})).unwrap_err();
        assert!(err.to_string().contains("invalid maxAlerts value"));
    }

    #[test]
    fn test_hmac_defaults_header() {
        let cfg = parse(json!({"url": "http://h", "hmacConfig": {"secret": "s"}})).unwrap();
        let hmac = cfg.hmac.unwrap();
        assert_eq!(hmac.header, DEFAULT_SIGNATURE_HEADER);
    }

    #[test]
    fn test_hmac_signature() {
        let sig = compute_signature(b"my-secret", b"hello world");
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, compute_signature(b"my-secret", b"hello world"));
        assert_ne!(sig, compute_signature(b"other-secret", b"hello world"));
    }

    #[test]
    fn test_sign_with_timestamp() {
        let hmac = HmacConfig {
            secret: "s".into(),
            header: "X-Sig".into(),
            timestamp_header: "X-Ts".into(),
        };
        let msg = WebhookMessage::post_json("http://h", &json!({"a": 1})).unwrap();
        let signed = sign(msg, &hmac, 1700000000);
        assert_eq!(signed.headers["X-Ts"], "1700000000");
        assert_eq!(
            signed.headers["X-Sig"],
            compute_signature(b"s", br#"1700000000:{"a":1}"#)
        );
    }
}
