use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::notify::{NotificationHistorian, NotificationHistoryEntry};

/// One line of the notification history file
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub record_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub schema_version: u32,
    pub outcome: &'static str,
    pub entry: NotificationHistoryEntry,
}

impl HistoryRecord {
    pub fn new(entry: NotificationHistoryEntry) -> Self {
        let outcome = if entry.notification_error.is_some() {
            "failed"
        } else {
            "sent"
        };
        Self {
            record_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            schema_version: 1,
            outcome,
            entry,
        }
    }
}

/// Notification history writer (JSON Lines format)
pub struct HistoryLogWriter {
    writer: Mutex<BufWriter<File>>,
}

impl HistoryLogWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn write(&self, record: &HistoryRecord) -> std::io::Result<()> {
        let json = serde_json::to_string(record)?;
        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl NotificationHistorian for HistoryLogWriter {
    async fn record(&self, entry: NotificationHistoryEntry) -> anyhow::Result<()> {
        let record = HistoryRecord::new(entry);
        self.write(&record)?;
        tracing::trace!(record_id = %record.record_id, "notification history written");
        Ok(())
    }
}
