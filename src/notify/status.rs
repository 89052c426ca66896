//! Delivery status tracking and notification history.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::{Alert, LabelSet, NotifyContext};
use crate::error::{HistoryValidationError, NotifyError};
use crate::integrations::{Metadata, Notifier};
use crate::observability::{HISTORY_ENTRIES_DROPPED, NOTIFICATION_DURATION, NOTIFICATIONS_TOTAL};

/// Upper bound for one detached history write.
pub const HISTORY_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// One delivery attempt as handed to the history sink.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationHistoryEntry {
    pub alerts: Vec<Alert>,
    pub retry: bool,
    #[serde(serialize_with = "error_string")]
    pub notification_error: Option<NotifyError>,
    #[serde(serialize_with = "duration_millis")]
    pub duration: Duration,
    pub receiver_name: String,
    pub integration_name: String,
    pub integration_index: usize,
    pub group_labels: Option<LabelSet>,
    pub pipeline_time: Option<DateTime<Utc>>,
    pub group_key: String,
}

fn error_string<S: Serializer>(err: &Option<NotifyError>, s: S) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

fn duration_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl NotificationHistoryEntry {
    /// Reports every missing required field at once.
    pub fn validate(&self) -> Result<(), HistoryValidationError> {
        let mut missing = Vec::new();
        if self.receiver_name.is_empty() {
            missing.push("missing receiver name");
        }
        if self.integration_name.is_empty() {
            missing.push("missing integration name");
        }
        if self.group_labels.is_none() {
            missing.push("missing group labels");
        }
        if self.pipeline_time.is_none() {
            missing.push("missing pipeline time");
        }
        if self.group_key.is_empty() {
            missing.push("missing group key");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HistoryValidationError(missing))
        }
    }
}

/// External sink for notification history.
#[async_trait]
pub trait NotificationHistorian: Send + Sync {
    async fn record(&self, entry: NotificationHistoryEntry) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
struct Report {
    last_attempt: Option<DateTime<Utc>>,
    last_duration: Duration,
    last_error: Option<NotifyError>,
}

/// A built notifier with its identity and last delivery report.
pub struct Integration {
    notifier: Arc<dyn Notifier>,
    meta: Metadata,
    name: String,
    index: usize,
    report: ArcSwap<Report>,
    historian: Option<Arc<dyn NotificationHistorian>>,
}

impl Integration {
    pub fn new(notifier: Arc<dyn Notifier>, meta: Metadata, name: impl Into<String>, index: usize) -> Self {
        Self {
            notifier,
            meta,
            name: name.into(),
            index,
            report: ArcSwap::from_pointee(Report::default()),
            historian: None,
        }
    }

    pub fn with_historian(mut self, historian: Arc<dyn NotificationHistorian>) -> Self {
        self.historian = Some(historian);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordinal among integrations of the same type in one receiver.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    /// Last attempt time, its duration and its error.
    pub fn get_report(&self) -> (Option<DateTime<Utc>>, Duration, Option<NotifyError>) {
        let report = self.report.load_full();
        (report.last_attempt, report.last_duration, report.last_error.clone())
    }

    pub fn status(&self) -> IntegrationStatus {
        let (last_attempt, duration, error) = self.get_report();
        IntegrationStatus {
            name: self.name.clone(),
            uid: self.meta.uid.clone(),
            integration_type: self.meta.integration_type.clone(),
            index: self.index,
            send_resolved: self.notifier.send_resolved(),
            last_notify_attempt: last_attempt,
            last_notify_attempt_duration_ms: duration.as_millis() as u64,
            last_notify_attempt_error: error.map(|e| e.to_string()),
        }
    }

    fn record_history(
        &self,
        ctx: &NotifyContext,
        alerts: &[Alert],
        result: &Result<(), NotifyError>,
        duration: Duration,
    ) {
        let Some(historian) = self.historian.clone() else {
            return;
        };

        let entry = NotificationHistoryEntry {
            alerts: alerts.to_vec(),
            retry: result.as_ref().err().is_some_and(NotifyError::is_retryable),
            notification_error: result.as_ref().err().cloned(),
            duration,
            receiver_name: ctx.receiver_name().unwrap_or_default().to_string(),
            integration_name: self.name.clone(),
            integration_index: self.index,
            group_labels: ctx.group_labels().cloned(),
            pipeline_time: ctx.now(),
            group_key: ctx.group_key().unwrap_or_default().to_string(),
        };
        if let Err(e) = entry.validate() {
            HISTORY_ENTRIES_DROPPED.with_label_values(&["invalid"]).inc();
            tracing::warn!(integration = %self.name, error = %e, "dropping invalid notification history entry");
            return;
        }

        // Detached from the caller's cancellation so the write outlives the request.
        let integration = self.name.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HISTORY_WRITE_TIMEOUT, historian.record(entry)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    HISTORY_ENTRIES_DROPPED.with_label_values(&["error"]).inc();
                    tracing::warn!(integration = %integration, error = %e, "failed to record notification history");
                }
                Err(_) => {
                    HISTORY_ENTRIES_DROPPED.with_label_values(&["timeout"]).inc();
                    tracing::warn!(integration = %integration, "timed out recording notification history");
                }
            }
        });
    }
}

impl fmt::Debug for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integration")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("meta", &self.meta)
            .field("report", &self.report.load_full())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for Integration {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        let attempted_at = Utc::now();
        let start = Instant::now();
        let result = self.notifier.notify(ctx, alerts).await;
        let duration = start.elapsed();

        self.report.store(Arc::new(Report {
            last_attempt: Some(attempted_at),
            last_duration: duration,
            last_error: result.as_ref().err().cloned(),
        }));

        let status = if result.is_ok() { "success" } else { "failure" };
        NOTIFICATIONS_TOTAL
            .with_label_values(&[&self.meta.integration_type, status])
            .inc();
        NOTIFICATION_DURATION
            .with_label_values(&[&self.meta.integration_type])
            .observe(duration.as_secs_f64());

        match &result {
            Ok(()) => tracing::debug!(integration = %self.name, index = self.index, "notification sent"),
            Err(e) => tracing::warn!(
                integration = %self.name,
                index = self.index,
                retry = e.is_retryable(),
                error = %e,
                "notification failed"
            ),
        }

        self.record_history(ctx, alerts, &result, duration);
        result
    }

    fn send_resolved(&self) -> bool {
        self.notifier.send_resolved()
    }
}

/// Status page view of one integration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationStatus {
    pub name: String,
    pub uid: String,
    #[serde(rename = "type")]
    pub integration_type: String,
    pub index: usize,
    pub send_resolved: bool,
    pub last_notify_attempt: Option<DateTime<Utc>>,
    pub last_notify_attempt_duration_ms: u64,
    pub last_notify_attempt_error: Option<String>,
}

/// Status page view of one receiver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiverStatus {
    pub name: String,
    pub active: bool,
    pub integrations: Vec<IntegrationStatus>,
}

/// A named group of built integrations.
#[derive(Debug, Clone)]
pub struct Receiver {
    pub name: String,
    pub integrations: Vec<Arc<Integration>>,
    pub active: bool,
}

impl Receiver {
    pub fn new(name: impl Into<String>, integrations: Vec<Arc<Integration>>) -> Self {
        Self {
            name: name.into(),
            integrations,
            active: true,
        }
    }

    pub fn status(&self) -> ReceiverStatus {
        ReceiverStatus {
            name: self.name.clone(),
            active: self.active,
            integrations: self.integrations.iter().map(|i| i.status()).collect(),
        }
    }
}
