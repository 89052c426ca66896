use async_trait::async_trait;
use std::sync::Arc;

use super::{NotificationLog, ReceiverKey, Stage, required, single_entry};
use crate::domain::{Alert, NotifyContext};
use crate::error::StageError;

/// Drops batches whose pipeline time is older than the flush already
/// recorded for the group, so a late replica cannot send stale state.
pub struct PipelineAndStateTimestampCoordinationStage {
    log: Arc<dyn NotificationLog>,
    receiver: ReceiverKey,
    enforce: bool,
}

impl PipelineAndStateTimestampCoordinationStage {
    pub fn new(log: Arc<dyn NotificationLog>, receiver: ReceiverKey, enforce: bool) -> Self {
        Self { log, receiver, enforce }
    }
}

#[async_trait]
impl Stage for PipelineAndStateTimestampCoordinationStage {
    async fn exec(
        &self,
        ctx: NotifyContext,
        alerts: Vec<Alert>,
    ) -> Result<(NotifyContext, Vec<Alert>), StageError> {
        let group_key = required(ctx.group_key(), "group key")?.to_string();
        let now = required(ctx.now(), "now")?;

        let Some(entry) = single_entry(self.log.as_ref(), &group_key, &self.receiver).await? else {
            return Ok((ctx, alerts));
        };

        let recorded = entry.flush_time();
        if recorded <= now {
            return Ok((ctx, alerts));
        }

        if self.enforce {
            tracing::debug!(
                group_key = %group_key,
                receiver = %self.receiver,
                recorded = %recorded,
                pipeline_time = %now,
                dropped = alerts.len(),
                "recorded state is newer than this pipeline run, dropping batch"
            );
            return Ok((ctx, Vec::new()));
        }

        tracing::warn!(
            group_key = %group_key,
            receiver = %self.receiver,
            recorded = %recorded,
            pipeline_time = %now,
            "recorded state is newer than this pipeline run"
        );
        Ok((ctx, alerts))
    }
}
