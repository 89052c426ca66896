use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::LabelSet;
use crate::error::NotifyError;

/// Values the alerting pipeline threads through a notification attempt,
/// together with its cancellation scope.
#[derive(Debug, Clone, Default)]
pub struct NotifyContext {
    group_key: Option<String>,
    group_labels: Option<LabelSet>,
    now: Option<DateTime<Utc>>,
    group_interval: Option<Duration>,
    repeat_interval: Option<Duration>,
    receiver_name: Option<String>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl NotifyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group_key(mut self, key: impl Into<String>) -> Self {
        self.group_key = Some(key.into());
        self
    }

    pub fn with_group_labels(mut self, labels: LabelSet) -> Self {
        self.group_labels = Some(labels);
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn with_group_interval(mut self, interval: Duration) -> Self {
        self.group_interval = Some(interval);
        self
    }

    pub fn with_repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = Some(interval);
        self
    }

    pub fn with_receiver_name(mut self, name: impl Into<String>) -> Self {
        self.receiver_name = Some(name.into());
        self
    }

    /// Tightens the deadline; an earlier existing deadline is kept.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A context cancelled together with `self` that can also be cancelled on its own.
    pub fn child(&self) -> Self {
        let mut child = self.clone();
        child.cancel = self.cancel.child_token();
        child
    }

    pub fn group_key(&self) -> Option<&str> {
        self.group_key.as_deref()
    }

    pub fn group_labels(&self) -> Option<&LabelSet> {
        self.group_labels.as_ref()
    }

    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.now
    }

    pub fn group_interval(&self) -> Option<Duration> {
        self.group_interval
    }

    pub fn repeat_interval(&self) -> Option<Duration> {
        self.repeat_interval
    }

    pub fn receiver_name(&self) -> Option<&str> {
        self.receiver_name.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current error state of the context, if any.
    pub fn err(&self) -> Option<NotifyError> {
        if self.cancel.is_cancelled() {
            Some(NotifyError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(NotifyError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Drives `fut` until it completes, the context is cancelled, or the deadline passes.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, NotifyError>
    where
        F: Future<Output = Result<T, NotifyError>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            res = fut => res,
            _ = self.cancel.cancelled() => Err(NotifyError::Cancelled),
            _ = deadline => Err(NotifyError::DeadlineExceeded),
        }
    }

    /// Sleeps for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), NotifyError> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
