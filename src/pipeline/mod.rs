//! Stages plugged into the alerting engine's notification pipeline.
//!
//! A stage receives the context and the alert batch and returns them,
//! possibly delayed, filtered or with an updated context.

mod coordination;
mod mock;
mod sync;
mod wait;

pub use coordination::PipelineAndStateTimestampCoordinationStage;
pub use mock::MemoryLog;
pub use sync::{DEFAULT_SYNC_MARGIN, SyncFlushStage, SyncMode};
pub use wait::WaitStage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Alert, NotifyContext};
use crate::error::StageError;

#[async_trait]
pub trait Stage: Send + Sync {
    async fn exec(
        &self,
        ctx: NotifyContext,
        alerts: Vec<Alert>,
    ) -> Result<(NotifyContext, Vec<Alert>), StageError>;
}

/// Identifies one integration of a receiver in the notification log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverKey {
    pub group_name: String,
    pub integration: String,
    pub idx: u32,
}

impl ReceiverKey {
    pub fn new(group_name: impl Into<String>, integration: impl Into<String>, idx: u32) -> Self {
        Self {
            group_name: group_name.into(),
            integration: integration.into(),
            idx,
        }
    }
}

impl std::fmt::Display for ReceiverKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.group_name, self.integration, self.idx)
    }
}

/// Record of the last flush of a group to one receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub group_key: String,
    pub receiver: ReceiverKey,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pipeline_time: Option<DateTime<Utc>>,
}

impl LogEntry {
    /// Pipeline time of the flush; older entries only carry the wall clock time.
    pub fn flush_time(&self) -> DateTime<Utc> {
        self.pipeline_time.unwrap_or(self.timestamp)
    }
}

/// The alerting engine's notification log.
#[async_trait]
pub trait NotificationLog: Send + Sync {
    async fn query(&self, group_key: &str, receiver: &ReceiverKey) -> Result<Vec<LogEntry>, StageError>;
}

/// Position of this instance among its cluster peers; 0 is the first.
pub trait Peer: Send + Sync {
    fn position(&self) -> usize;
}

/// Single instance deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPeer;

impl Peer for NoopPeer {
    fn position(&self) -> usize {
        0
    }
}

/// A peer whose position is fixed by configuration.
#[derive(Debug, Clone, Copy)]
pub struct StaticPeer(pub usize);

impl Peer for StaticPeer {
    fn position(&self) -> usize {
        self.0
    }
}

/// Reads the single log entry of `group_key`/`receiver`, if any.
async fn single_entry(
    log: &dyn NotificationLog,
    group_key: &str,
    receiver: &ReceiverKey,
) -> Result<Option<LogEntry>, StageError> {
    let mut entries = log.query(group_key, receiver).await?;
    match entries.len() {
        0 => Ok(None),
        1 => Ok(entries.pop()),
        n => Err(StageError::UnexpectedEntries(n)),
    }
}

fn required<T>(value: Option<T>, what: &'static str) -> Result<T, StageError> {
    value.ok_or(StageError::MissingContext(what))
}
