use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{Peer, Stage};
use crate::domain::{Alert, NotifyContext};
use crate::error::StageError;

/// Staggers flushes across replicas: the peer at position n waits
/// n times the per-peer timeout before passing the batch on.
pub struct WaitStage {
    peer: Arc<dyn Peer>,
    timeout: Duration,
}

impl WaitStage {
    pub fn new(peer: Arc<dyn Peer>, timeout: Duration) -> Self {
        Self { peer, timeout }
    }

    pub fn wait_for(&self) -> Duration {
        let position = u32::try_from(self.peer.position()).unwrap_or(u32::MAX);
        self.timeout.saturating_mul(position)
    }
}

#[async_trait]
impl Stage for WaitStage {
    async fn exec(
        &self,
        ctx: NotifyContext,
        alerts: Vec<Alert>,
    ) -> Result<(NotifyContext, Vec<Alert>), StageError> {
        let wait = self.wait_for();
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "waiting for peers");
            ctx.sleep(wait).await?;
        }
        Ok((ctx, alerts))
    }
}
