use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{Metadata, TlsSettings, WebhookMessage, WebhookSender, WebhookSenderFactory};
use crate::config::HttpConfig;
use crate::domain::NotifyContext;
use crate::error::NotifyError;

/// Builds reqwest backed senders, one client per TLS override.
pub struct HttpSenderFactory {
    timeout: Duration,
    user_agent: String,
    client: reqwest::Client,
}

impl HttpSenderFactory {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            timeout: config.timeout(),
            user_agent: config.user_agent.clone(),
            client,
        })
    }

    fn client_with_tls(&self, tls: &TlsSettings) -> Result<reqwest::Client, String> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .danger_accept_invalid_certs(tls.insecure_skip_verify);
        if !tls.ca_certificate.is_empty() {
            if !tls.ca_certificate.contains("-----BEGIN CERTIFICATE-----") {
                return Err("invalid CA certificate: no PEM certificate found".to_string());
            }
            let cert = reqwest::Certificate::from_pem(tls.ca_certificate.as_bytes())
                .map_err(|e| format!("invalid CA certificate: {}", e))?;
            builder = builder.add_root_certificate(cert);
        }
        builder
            .build()
            .map_err(|e| format!("failed to build http client: {}", e))
    }
}

impl WebhookSenderFactory for HttpSenderFactory {
    fn sender_for(
        &self,
        meta: &Metadata,
        tls: Option<&TlsSettings>,
    ) -> Result<Arc<dyn WebhookSender>, String> {
        let client = match tls {
            Some(tls) if tls != &TlsSettings::default() => {
                tracing::debug!(uid = %meta.uid, "building dedicated http client");
                self.client_with_tls(tls)?
            }
            _ => self.client.clone(),
        };
        Ok(Arc::new(HttpWebhookSender { client }))
    }
}

pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send_once(&self, msg: &WebhookMessage) -> Result<(), NotifyError> {
        let method = reqwest::Method::from_bytes(msg.http_method.as_bytes())
            .map_err(|_| NotifyError::Payload(format!("invalid http method {}", msg.http_method)))?;

        let mut request = self
            .client
            .request(method, &msg.url)
            .header("Content-Type", &msg.content_type);
        for (key, value) in &msg.headers {
            request = request.header(key, value);
        }
        if let Some(user) = &msg.user {
            request = request.basic_auth(user, msg.password.as_ref());
        }

        let response = request
            .body(msg.body.clone())
            .send()
            .await
            .map_err(|e| transport_error(msg, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send_webhook(&self, ctx: &NotifyContext, msg: &WebhookMessage) -> Result<(), NotifyError> {
        ctx.run(self.send_once(msg)).await
    }
}

fn transport_error(msg: &WebhookMessage, e: reqwest::Error) -> NotifyError {
    NotifyError::Transport {
        method: msg.http_method.clone(),
        url: redact_url(&msg.url),
        message: e.to_string(),
        timeout: e.is_timeout(),
    }
}

/// Drops userinfo and query, which commonly carry credentials.
fn redact_url(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(mut url) => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.set_query(None);
            url.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("https://user:pw@hooks.example.com/path?token=abc"),
            "https://hooks.example.com/path"
        );
        assert_eq!(redact_url("::"), "<invalid url>");
    }

    #[test]
    fn test_bad_ca_fails_construction() {
        let factory = HttpSenderFactory::new(&HttpConfig::default()).unwrap();
        let tls = TlsSettings {
            insecure_skip_verify: false,
            ca_certificate: "not a certificate".into(),
        };
        let err = factory
            .sender_for(&Metadata::default(), Some(&tls))
            .err()
            .unwrap();
        assert!(err.contains("invalid CA certificate"));
    }

    #[test]
    fn test_default_tls_reuses_client() {
        let factory = HttpSenderFactory::new(&HttpConfig::default()).unwrap();
        assert!(factory.sender_for(&Metadata::default(), None).is_ok());
        assert!(
            factory
                .sender_for(&Metadata::default(), Some(&TlsSettings::default()))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let factory = HttpSenderFactory::new(&HttpConfig {
            timeout_seconds: 2,
            user_agent: "test".into(),
        })
        .unwrap();
        let sender = factory.sender_for(&Metadata::default(), None).unwrap();
        let msg = WebhookMessage::post_json("http://127.0.0.1:1/hook", &serde_json::json!({})).unwrap();
        let err = sender
            .send_webhook(&NotifyContext::new(), &msg)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport { .. }));
    }
}
