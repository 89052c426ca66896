//! Minimal message templating.
//!
//! Hosts with a full template engine plug it in through [`Templates`].
//! [`BasicTemplates`] understands the two default templates and plain field
//! references such as `{{ .Status }}` or `{{ .CommonLabels.alertname }}`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{Alert, AlertStatus, LabelSet, NotifyContext, batch_status};

static TEMPLATE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{\{-?\s*template\s+"([^"]+)"\s+\.\s*-?\}\}"#).expect("valid regex"));
static FIELD_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{-?\s*\.(\w+)(?:\.(\w+))?\s*-?\}\}").expect("valid regex"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template: no template {0:?} associated")]
    UnknownTemplate(String),

    #[error("template: can't evaluate field {0}")]
    UnknownField(String),

    #[error("template: unsupported action in {0:?}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateData {
    pub receiver: String,
    pub status: AlertStatus,
    pub alerts: Vec<Alert>,
    pub group_labels: LabelSet,
    pub common_labels: LabelSet,
    pub common_annotations: LabelSet,
    pub external_url: String,
    pub group_key: String,
}

impl TemplateData {
    pub fn new(ctx: &NotifyContext, alerts: &[Alert], external_url: &str) -> Self {
        Self {
            receiver: ctx.receiver_name().unwrap_or_default().to_string(),
            status: batch_status(alerts),
            alerts: alerts.to_vec(),
            group_labels: ctx.group_labels().cloned().unwrap_or_default(),
            common_labels: LabelSet::common(alerts.iter().map(|a| &a.labels)),
            common_annotations: LabelSet::common(alerts.iter().map(|a| &a.annotations)),
            external_url: external_url.to_string(),
            group_key: ctx.group_key().unwrap_or_default().to_string(),
        }
    }

    pub fn firing(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| a.status() == AlertStatus::Firing)
    }

    pub fn resolved(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| a.status() == AlertStatus::Resolved)
    }
}

pub trait Templates: Send + Sync {
    fn render(&self, text: &str, data: &TemplateData) -> Result<String, TemplateError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicTemplates;

impl Templates for BasicTemplates {
    fn render(&self, text: &str, data: &TemplateData) -> Result<String, TemplateError> {
        let mut failure = None;

        let expanded = TEMPLATE_CALL.replace_all(text, |caps: &Captures| {
            match named_template(&caps[1], data) {
                Some(out) => out,
                None => {
                    failure.get_or_insert(TemplateError::UnknownTemplate(caps[1].to_string()));
                    String::new()
                }
            }
        });
        if let Some(err) = failure.take() {
            return Err(err);
        }

        let expanded = FIELD_REF.replace_all(&expanded, |caps: &Captures| {
            match field_value(&caps[1], caps.get(2).map(|m| m.as_str()), data) {
                Some(out) => out,
                None => {
                    failure.get_or_insert(TemplateError::UnknownField(caps[0].to_string()));
                    String::new()
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }

        if expanded.contains("{{") {
            return Err(TemplateError::Unsupported(text.to_string()));
        }
        Ok(expanded.into_owned())
    }
}

fn named_template(name: &str, data: &TemplateData) -> Option<String> {
    match name {
        "default.title" => Some(default_title(data)),
        "default.message" => Some(default_message(data)),
        _ => None,
    }
}

fn field_value(field: &str, key: Option<&str>, data: &TemplateData) -> Option<String> {
    let from = |set: &LabelSet| key.map(|k| set.get(k).unwrap_or_default().to_string());
    match (field, key) {
        ("Status", None) => Some(data.status.to_string()),
        ("Receiver", None) => Some(data.receiver.clone()),
        ("ExternalURL", None) => Some(data.external_url.clone()),
        ("GroupKey", None) => Some(data.group_key.clone()),
        ("CommonLabels", Some(_)) => from(&data.common_labels),
        ("GroupLabels", Some(_)) => from(&data.group_labels),
        ("CommonAnnotations", Some(_)) => from(&data.common_annotations),
        _ => None,
    }
}

/// `[FIRING:2] group values (remaining common values)`
pub fn default_title(data: &TemplateData) -> String {
    let mut title = format!("[{}", data.status.as_str().to_uppercase());
    if data.status == AlertStatus::Firing {
        title.push_str(&format!(":{}", data.firing().count()));
    }
    title.push(']');

    let group_values: Vec<&str> = data.group_labels.iter().map(|(_, v)| v.as_str()).collect();
    if !group_values.is_empty() {
        title.push(' ');
        title.push_str(&group_values.join(" "));
    }

    let extra: Vec<&str> = data
        .common_labels
        .iter()
        .filter(|(k, _)| data.group_labels.get(k).is_none())
        .map(|(_, v)| v.as_str())
        .collect();
    if !extra.is_empty() {
        title.push_str(&format!(" ({})", extra.join(" ")));
    }
    title
}

pub fn default_message(data: &TemplateData) -> String {
    let mut out = String::new();
    let sections = [("Firing", data.firing().collect::<Vec<_>>()), ("Resolved", data.resolved().collect())];
    for (heading, alerts) in sections {
        if alerts.is_empty() {
            continue;
        }
        out.push_str(&format!("**{}**\n\n", heading));
        for alert in alerts {
            out.push_str("Labels:\n");
            for (k, v) in alert.labels.iter() {
                out.push_str(&format!(" - {} = {}\n", k, v));
            }
            if !alert.annotations.is_empty() {
                out.push_str("Annotations:\n");
                for (k, v) in alert.annotations.iter() {
                    out.push_str(&format!(" - {} = {}\n", k, v));
                }
            }
            if !alert.generator_url.is_empty() {
                out.push_str(&format!("Source: {}\n", alert.generator_url));
            }
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}
