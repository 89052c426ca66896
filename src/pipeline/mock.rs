use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{LogEntry, NotificationLog, ReceiverKey};
use crate::error::StageError;

/// In-memory notification log for tests and single instance hosts.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: RwLock<HashMap<(String, ReceiverKey), Vec<LogEntry>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the recorded flush of the entry's group and receiver.
    pub async fn log(&self, entry: LogEntry) {
        let key = (entry.group_key.clone(), entry.receiver.clone());
        self.entries.write().await.insert(key, vec![entry]);
    }

    /// Appends without replacing, which the pipeline never does on its own.
    pub async fn append(&self, entry: LogEntry) {
        let key = (entry.group_key.clone(), entry.receiver.clone());
        self.entries.write().await.entry(key).or_default().push(entry);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl NotificationLog for MemoryLog {
    async fn query(&self, group_key: &str, receiver: &ReceiverKey) -> Result<Vec<LogEntry>, StageError> {
        let entries = self.entries.read().await;
        let found = entries
            .get(&(group_key.to_string(), receiver.clone()))
            .cloned()
            .unwrap_or_default();
        tracing::trace!(group_key = %group_key, receiver = %receiver, entries = found.len(), "notification log query");
        Ok(found)
    }
}
