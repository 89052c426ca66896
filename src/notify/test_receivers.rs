//! Ad hoc test notifications.
//!
//! Every integration of the requested receivers is built on the spot and
//! sent one synthetic alert. Unlike a configuration load, an integration that
//! fails to build only marks its own result as failed.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use super::factory::IntegrationFactory;
use crate::config::{ApiReceiver, IntegrationConfig};
use crate::domain::{ALERTNAME_LABEL, Alert, LabelSet, NotifyContext};
use crate::error::{
    IntegrationError, IntegrationTimeoutError, InvalidReceiverError, NotifyError, TestReceiversError,
};
use crate::integrations::{Metadata, Notifier};
use crate::observability::TEST_DISPATCHES;

/// Upper bound of concurrent test sends.
pub const MAX_TEST_WORKERS: usize = 10;

pub const TEST_ALERT_NAME: &str = "TestAlert";
pub const TEST_ALERT_INSTANCE: &str = "Grafana";
pub const TEST_ALERT_SUMMARY: &str = "Notification test";
pub const TEST_ALERT_VALUE_STRING: &str = "[ metric='foo' labels={instance=bar} value=10 ]";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestAlertParams {
    #[serde(default)]
    pub labels: LabelSet,
    #[serde(default)]
    pub annotations: LabelSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReceiversParams {
    #[serde(default)]
    pub alert: Option<TestAlertParams>,
    #[serde(default)]
    pub receivers: Vec<ApiReceiver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Ok,
    Failed,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestIntegrationResult {
    pub name: String,
    pub uid: String,
    pub status: TestStatus,
    #[serde(serialize_with = "error_string", skip_serializing_if = "Option::is_none")]
    pub error: Option<IntegrationError>,
}

fn error_string<S: Serializer>(err: &Option<IntegrationError>, s: S) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReceiverResult {
    pub name: String,
    pub configs: Vec<TestIntegrationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReceiversResult {
    pub alert: Alert,
    pub receivers: Vec<TestReceiverResult>,
    pub notified_at: DateTime<Utc>,
}

impl TestReceiversResult {
    fn errors(&self) -> impl Iterator<Item = Option<&IntegrationError>> {
        self.receivers
            .iter()
            .flat_map(|r| r.configs.iter())
            .map(|c| c.error.as_ref())
    }

    /// HTTP-like summary: 400 when every integration was invalid, 408 when
    /// every integration timed out, 207 on mixed outcomes, 200 otherwise.
    pub fn status_code(&self) -> StatusCode {
        let errors: Vec<_> = self.errors().collect();
        if errors.iter().all(Option::is_none) {
            return StatusCode::OK;
        }
        if errors.iter().all(|e| matches!(e, Some(IntegrationError::Invalid(_)))) {
            return StatusCode::BAD_REQUEST;
        }
        if errors.iter().all(|e| matches!(e, Some(IntegrationError::Timeout(_)))) {
            return StatusCode::REQUEST_TIMEOUT;
        }
        StatusCode::MULTI_STATUS
    }
}

/// Builds notifiers for test dispatches.
pub trait TestNotifierBuilder: Send + Sync {
    fn build(&self, config: &IntegrationConfig) -> Result<(Metadata, Arc<dyn Notifier>), String>;
}

impl TestNotifierBuilder for IntegrationFactory {
    fn build(&self, config: &IntegrationConfig) -> Result<(Metadata, Arc<dyn Notifier>), String> {
        let typed = self.parse(config).map_err(|e| e.to_string())?;
        let notifier = self.build_notifier(&typed).map_err(|e| e.to_string())?;
        Ok((typed.metadata, notifier))
    }
}

/// The synthetic alert, with caller labels and annotations merged over the defaults.
pub fn new_test_alert(params: Option<&TestAlertParams>, now: DateTime<Utc>) -> Alert {
    let mut labels = LabelSet::new();
    labels.insert(ALERTNAME_LABEL, TEST_ALERT_NAME);
    labels.insert("instance", TEST_ALERT_INSTANCE);
    let mut annotations = LabelSet::new();
    annotations.insert("summary", TEST_ALERT_SUMMARY);
    annotations.insert("__value_string__", TEST_ALERT_VALUE_STRING);

    if let Some(params) = params {
        labels = labels.merge(&params.labels);
        annotations = annotations.merge(&params.annotations);
    }
    Alert::new(labels, annotations, now)
}

/// Maps timeouts to [`IntegrationTimeoutError`]; every other error passes through.
pub fn process_integration_error(meta: &Metadata, err: NotifyError) -> IntegrationError {
    if err.is_timeout() {
        IntegrationError::Timeout(IntegrationTimeoutError {
            uid: meta.uid.clone(),
            name: meta.name.clone(),
            integration_type: meta.integration_type.clone(),
            source: err,
        })
    } else {
        IntegrationError::Notify(err)
    }
}

/// Position of a result in the request, used to restore configuration order.
type Slot = (String, usize);

struct Job {
    slot: Slot,
    meta: Metadata,
    uid: String,
    name: String,
    notifier: Arc<dyn Notifier>,
}

pub async fn test_receivers(
    ctx: &NotifyContext,
    params: TestReceiversParams,
    builder: &dyn TestNotifierBuilder,
) -> Result<TestReceiversResult, TestReceiversError> {
    let now = Utc::now();
    let alert = new_test_alert(params.alert.as_ref(), now);

    let mut results: Vec<(Slot, TestIntegrationResult)> = Vec::new();
    let mut jobs = Vec::new();
    for receiver in &params.receivers {
        for (position, config) in receiver.integrations.iter().enumerate() {
            let slot = (receiver.name.clone(), position);
            match builder.build(config) {
                Ok((meta, notifier)) => jobs.push(Job {
                    slot,
                    meta,
                    uid: config.uid.clone(),
                    name: config.name.clone(),
                    notifier,
                }),
                Err(reason) => {
                    tracing::debug!(receiver = %receiver.name, uid = %config.uid, reason = %reason, "invalid test integration");
                    results.push((
                        slot,
                        TestIntegrationResult {
                            name: config.name.clone(),
                            uid: config.uid.clone(),
                            status: TestStatus::Failed,
                            error: Some(IntegrationError::Invalid(InvalidReceiverError {
                                receiver: receiver.name.clone(),
                                reason,
                            })),
                        },
                    ));
                }
            }
        }
    }

    if results.is_empty() && jobs.is_empty() {
        return Err(TestReceiversError::NoReceivers);
    }

    if !jobs.is_empty() {
        results.extend(dispatch(ctx, &alert, now, jobs).await?);
    }

    for (_, result) in &results {
        TEST_DISPATCHES.with_label_values(&[result.status.as_str()]).inc();
    }

    let mut by_receiver: BTreeMap<String, Vec<(usize, TestIntegrationResult)>> = BTreeMap::new();
    for ((receiver, position), result) in results {
        by_receiver.entry(receiver).or_default().push((position, result));
    }
    let receivers = by_receiver
        .into_iter()
        .map(|(name, mut configs)| {
            configs.sort_by_key(|(position, _)| *position);
            TestReceiverResult {
                name,
                configs: configs.into_iter().map(|(_, r)| r).collect(),
            }
        })
        .collect();

    Ok(TestReceiversResult {
        alert,
        receivers,
        notified_at: Utc::now(),
    })
}

/// Runs `jobs` on at most [`MAX_TEST_WORKERS`] tasks. The first worker error
/// cancels the others.
async fn dispatch(
    ctx: &NotifyContext,
    alert: &Alert,
    now: DateTime<Utc>,
    jobs: Vec<Job>,
) -> Result<Vec<(Slot, TestIntegrationResult)>, TestReceiversError> {
    let total = jobs.len();
    let workers = total.min(MAX_TEST_WORKERS);

    let (job_tx, job_rx) = mpsc::channel(total);
    for job in jobs {
        job_tx
            .try_send(job)
            .map_err(|e| TestReceiversError::Worker(e.to_string()))?;
    }
    drop(job_tx);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel(total);

    let group = ctx.child();
    let mut set = JoinSet::new();
    for _ in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let group = group.clone();
        let alert = alert.clone();
        set.spawn(async move {
            loop {
                let job = job_rx.lock().await.recv().await;
                let Some(job) = job else {
                    return Ok::<(), TestReceiversError>(());
                };
                let result = run_job(&group, &alert, now, &job).await;
                result_tx
                    .send((job.slot, result))
                    .await
                    .map_err(|e| TestReceiversError::Worker(e.to_string()))?;
            }
        });
    }
    drop(result_tx);

    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        let outcome = joined.map_err(|e| TestReceiversError::Worker(e.to_string())).and_then(|r| r);
        if let Err(e) = outcome {
            group.cancel();
            first_err.get_or_insert(e);
        }
    }
    if let Some(e) = first_err {
        return Err(e);
    }

    let mut results = Vec::with_capacity(total);
    while let Some(result) = result_rx.recv().await {
        results.push(result);
    }
    Ok(results)
}

async fn run_job(group: &NotifyContext, alert: &Alert, now: DateTime<Utc>, job: &Job) -> TestIntegrationResult {
    let receiver = &job.slot.0;
    let ctx = group
        .clone()
        .with_receiver_name(receiver.clone())
        .with_group_key(format!("{}-{}-{}", receiver, alert.fingerprint(), now.timestamp()))
        .with_group_labels(alert.labels.clone())
        .with_now(now);

    let outcome = match ctx.err() {
        Some(err) => Err(err),
        None => job.notifier.notify(&ctx, std::slice::from_ref(alert)).await,
    };
    match outcome {
        Ok(()) => TestIntegrationResult {
            name: job.name.clone(),
            uid: job.uid.clone(),
            status: TestStatus::Ok,
            error: None,
        },
        Err(err) => {
            tracing::info!(receiver = %receiver, uid = %job.uid, error = %err, "test notification failed");
            TestIntegrationResult {
                name: job.name.clone(),
                uid: job.uid.clone(),
                status: TestStatus::Failed,
                error: Some(process_integration_error(&job.meta, err)),
            }
        }
    }
}
