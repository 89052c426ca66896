use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::{NotificationLog, ReceiverKey, Stage, required, single_entry};
use crate::domain::{Alert, NotifyContext};
use crate::error::StageError;

pub const DEFAULT_SYNC_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Compute the aligned flush time and log it, never sleep.
    #[default]
    Log,
    /// Sleep until the aligned flush time.
    Sync,
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "sync" => Ok(Self::Sync),
            other => Err(format!("unknown sync mode: {other}")),
        }
    }
}

/// Aligns flushes of one group across replicas on the interval tick
/// implied by the last recorded flush.
pub struct SyncFlushStage {
    log: Arc<dyn NotificationLog>,
    receiver: ReceiverKey,
    mode: SyncMode,
    margin: Duration,
}

impl SyncFlushStage {
    pub fn new(log: Arc<dyn NotificationLog>, receiver: ReceiverKey, mode: SyncMode) -> Self {
        Self {
            log,
            receiver,
            mode,
            margin: DEFAULT_SYNC_MARGIN,
        }
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }
}

#[async_trait]
impl Stage for SyncFlushStage {
    async fn exec(
        &self,
        ctx: NotifyContext,
        alerts: Vec<Alert>,
    ) -> Result<(NotifyContext, Vec<Alert>), StageError> {
        let group_key = required(ctx.group_key(), "group key")?.to_string();
        let interval = required(ctx.group_interval(), "group interval")?;
        let now = ctx.now().unwrap_or_else(chrono::Utc::now);

        let Some(entry) = single_entry(self.log.as_ref(), &group_key, &self.receiver).await? else {
            return Ok((ctx, alerts));
        };

        let interval = chrono::Duration::from_std(interval)
            .map_err(|e| StageError::Log(format!("invalid group interval: {e}")))?;
        let next_flush = entry.flush_time() + interval;
        let wait = match (next_flush - now).to_std() {
            Ok(wait) if wait > self.margin => wait,
            _ => return Ok((ctx, alerts)),
        };

        match self.mode {
            SyncMode::Log => {
                tracing::info!(
                    group_key = %group_key,
                    receiver = %self.receiver,
                    next_flush = %next_flush,
                    wait_ms = wait.as_millis() as u64,
                    "flush is ahead of the aligned tick"
                );
                Ok((ctx, alerts))
            }
            SyncMode::Sync => {
                tracing::debug!(
                    group_key = %group_key,
                    receiver = %self.receiver,
                    wait_ms = wait.as_millis() as u64,
                    "delaying flush to the aligned tick"
                );
                ctx.sleep(wait).await?;
                Ok((ctx.with_now(next_flush), alerts))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{LogEntry, MemoryLog};
    use chrono::{TimeZone, Utc};
    use tokio::time::Instant;

    fn receiver() -> ReceiverKey {
        ReceiverKey::new("ops", "webhook", 0)
    }

    fn entry(pipeline_time: chrono::DateTime<Utc>) -> LogEntry {
        LogEntry {
            group_key: "g".into(),
            receiver: receiver(),
            timestamp: pipeline_time + chrono::Duration::seconds(3),
            pipeline_time: Some(pipeline_time),
        }
    }

    fn ctx(now: chrono::DateTime<Utc>) -> NotifyContext {
        NotifyContext::new()
            .with_group_key("g")
            .with_group_interval(Duration::from_secs(300))
            .with_now(now)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_flush_passes_through() {
        let stage = SyncFlushStage::new(Arc::new(MemoryLog::new()), receiver(), SyncMode::Sync);
        let start = Instant::now();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (out, _) = stage.exec(ctx(now), Vec::new()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(out.now(), Some(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_sleeps_until_aligned_tick() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let log = Arc::new(MemoryLog::new());
        log.log(entry(last)).await;
        let stage = SyncFlushStage::new(log, receiver(), SyncMode::Sync);

        let now = last + chrono::Duration::seconds(290);
        let start = Instant::now();
        let (out, _) = stage.exec(ctx(now), Vec::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(out.now(), Some(last + chrono::Duration::seconds(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_mode_never_sleeps() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let log = Arc::new(MemoryLog::new());
        log.log(entry(last)).await;
        let stage = SyncFlushStage::new(log, receiver(), SyncMode::Log);

        let now = last + chrono::Duration::seconds(10);
        let start = Instant::now();
        let (out, _) = stage.exec(ctx(now), Vec::new()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(out.now(), Some(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_margin_does_not_wait() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let log = Arc::new(MemoryLog::new());
        log.log(entry(last)).await;
        let stage = SyncFlushStage::new(log, receiver(), SyncMode::Sync);

        let now = last + chrono::Duration::milliseconds(299_500);
        let start = Instant::now();
        stage.exec(ctx(now), Vec::new()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_multiple_entries_is_an_error() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let log = Arc::new(MemoryLog::new());
        log.append(entry(last)).await;
        log.append(entry(last)).await;
        let stage = SyncFlushStage::new(log, receiver(), SyncMode::Sync);

        let err = stage.exec(ctx(last), Vec::new()).await.unwrap_err();
        assert!(matches!(err, StageError::UnexpectedEntries(2)));
    }

    #[tokio::test]
    async fn test_missing_group_key() {
        let stage = SyncFlushStage::new(Arc::new(MemoryLog::new()), receiver(), SyncMode::Sync);
        let err = stage.exec(NotifyContext::new(), Vec::new()).await.unwrap_err();
        assert!(matches!(err, StageError::MissingContext("group key")));
    }

    #[test]
    fn test_sync_mode_from_str() {
        assert_eq!("SYNC".parse::<SyncMode>().unwrap(), SyncMode::Sync);
        assert_eq!("log".parse::<SyncMode>().unwrap(), SyncMode::Log);
        assert!("later".parse::<SyncMode>().is_err());
    }
}
