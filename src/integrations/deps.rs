use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::template::{BasicTemplates, TemplateData, Templates};
use super::Metadata;
use crate::domain::{Alert, IMAGE_TOKEN_ANNOTATION, NotifyContext};
use crate::error::NotifyError;

/// One outbound HTTP call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookMessage {
    pub url: String,
    pub http_method: String,
    pub body: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
}

impl WebhookMessage {
    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Result<Self, NotifyError> {
        Ok(Self {
            url: url.into(),
            http_method: "POST".to_string(),
            body: serde_json::to_string(body)?,
            content_type: "application/json".to_string(),
            headers: BTreeMap::new(),
            user: None,
            password: None,
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send_webhook(&self, ctx: &NotifyContext, msg: &WebhookMessage) -> Result<(), NotifyError>;
}

/// Client TLS overrides of one integration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_certificate: String,
}

/// Builds the sender of one integration. Construction may fail, for
/// instance when its TLS material is unusable.
pub trait WebhookSenderFactory: Send + Sync {
    fn sender_for(
        &self,
        meta: &Metadata,
        tls: Option<&TlsSettings>,
    ) -> Result<Arc<dyn WebhookSender>, String>;
}

/// Hands the same sender to every integration.
pub struct SharedSender(pub Arc<dyn WebhookSender>);

impl WebhookSenderFactory for SharedSender {
    fn sender_for(
        &self,
        _meta: &Metadata,
        _tls: Option<&TlsSettings>,
    ) -> Result<Arc<dyn WebhookSender>, String> {
        Ok(Arc::clone(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub single_email: bool,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, ctx: &NotifyContext, msg: &EmailMessage) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub token: String,
    pub url: Option<String>,
    pub path: Option<String>,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn get_image(&self, token: &str) -> Result<Option<Image>, String>;
}

pub struct NoopImageStore;

#[async_trait]
impl ImageStore for NoopImageStore {
    async fn get_image(&self, _token: &str) -> Result<Option<Image>, String> {
        Ok(None)
    }
}

/// Collaborators shared by every notifier of a build.
#[derive(Clone)]
pub struct NotifierDeps {
    pub templates: Arc<dyn Templates>,
    pub webhooks: Arc<dyn WebhookSenderFactory>,
    pub email: Option<Arc<dyn EmailSender>>,
    pub images: Arc<dyn ImageStore>,
    pub external_url: String,
}

impl NotifierDeps {
    pub fn new(webhooks: Arc<dyn WebhookSenderFactory>) -> Self {
        Self {
            templates: Arc::new(BasicTemplates),
            webhooks,
            email: None,
            images: Arc::new(NoopImageStore),
            external_url: String::new(),
        }
    }

    pub fn with_templates(mut self, templates: Arc<dyn Templates>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_email(mut self, email: Arc<dyn EmailSender>) -> Self {
        self.email = Some(email);
        self
    }

    pub fn with_images(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = images;
        self
    }

    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = url.into();
        self
    }

    /// Logging scope of one integration.
    pub fn span_for(&self, meta: &Metadata) -> tracing::Span {
        tracing::info_span!(
            "integration",
            integration_type = %meta.integration_type,
            uid = %meta.uid,
            name = %meta.name
        )
    }

    pub fn template_data(&self, ctx: &NotifyContext, alerts: &[Alert]) -> TemplateData {
        TemplateData::new(ctx, alerts, &self.external_url)
    }

    /// Renders `text`, falling back to the raw text when rendering fails.
    pub fn render(&self, text: &str, data: &TemplateData) -> String {
        match self.templates.render(text, data) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!(error = %e, template = %text, "failed to render template");
                text.to_string()
            }
        }
    }

    /// URL of the first image attached to the batch.
    pub async fn first_image_url(&self, alerts: &[Alert]) -> Option<String> {
        for alert in alerts {
            let Some(token) = alert.annotations.get(IMAGE_TOKEN_ANNOTATION) else {
                continue;
            };
            match self.images.get_image(token).await {
                Ok(Some(Image { url: Some(url), .. })) => return Some(url),
                Ok(_) => {}
                Err(e) => tracing::debug!(token = %token, error = %e, "failed to load image"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LabelSet;

    struct OneImage;

    #[async_trait]
    impl ImageStore for OneImage {
        async fn get_image(&self, token: &str) -> Result<Option<Image>, String> {
            Ok((token == "tok").then(|| Image {
                token: token.to_string(),
                url: Some("https://images.example/tok.png".into()),
                path: None,
            }))
        }
    }

    struct Nothing;

    #[async_trait]
    impl WebhookSender for Nothing {
        async fn send_webhook(&self, _: &NotifyContext, _: &WebhookMessage) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_image_url() {
        let deps = NotifierDeps::new(Arc::new(SharedSender(Arc::new(Nothing))))
            .with_images(Arc::new(OneImage));
        let mut annotations = LabelSet::new();
        annotations.insert(IMAGE_TOKEN_ANNOTATION, "tok");
        let alert = Alert::new(LabelSet::new(), annotations, chrono::Utc::now());
        assert_eq!(
            deps.first_image_url(&[alert]).await.as_deref(),
            Some("https://images.example/tok.png")
        );
        assert!(deps.first_image_url(&[]).await.is_none());
    }

    #[test]
    fn test_post_json_message() {
        let msg = WebhookMessage::post_json("http://x", &serde_json::json!({"a": 1}))
            .unwrap()
            .with_header("X-Test", "1");
        assert_eq!(msg.http_method, "POST");
        assert_eq!(msg.body, r#"{"a":1}"#);
        assert_eq!(msg.headers["X-Test"], "1");
    }
}
