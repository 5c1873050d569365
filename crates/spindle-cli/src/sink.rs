//! JSON-lines sink: one line per persisted record.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spindle_core::domain::{ItemId, RecordId, ValidFeedItem};
use spindle_core::ports::{Sink, SinkError};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Serialize, Deserialize)]
struct RecordLine {
    record_id: RecordId,
    item_id: ItemId,
    title: String,
    body: String,
}

/// Appends records to a file.
///
/// The record id is derived from the item id, so every sink on the same file
/// (other processes included) names an item's record the same way. Within
/// one sink a redelivered item is not written twice; lines already in the
/// file at `open` count too.
pub struct JsonLinesSink {
    path: PathBuf,
    written: Mutex<HashMap<ItemId, RecordId>>,
}

impl JsonLinesSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let mut written = HashMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(existing) => {
                for line in existing.lines().filter(|l| !l.trim().is_empty()) {
                    let record: RecordLine = serde_json::from_str(line).map_err(|e| {
                        SinkError::Unavailable(format!("{}: bad record line: {e}", path.display()))
                    })?;
                    written.insert(record.item_id, record.record_id);
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SinkError::Unavailable(format!("{}: {e}", path.display())));
            }
        }
        Ok(Self {
            path,
            written: Mutex::new(written),
        })
    }

    pub async fn recorded(&self) -> usize {
        self.written.lock().await.len()
    }
}

fn record_id_for(item_id: ItemId) -> RecordId {
    RecordId::new(format!("record-{}", item_id.get()))
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn persist(&self, item_id: ItemId, item: &ValidFeedItem) -> Result<RecordId, SinkError> {
        // held across the write so two workers cannot both append one item
        let mut written = self.written.lock().await;
        if let Some(existing) = written.get(&item_id) {
            return Ok(existing.clone());
        }

        let record = RecordLine {
            record_id: record_id_for(item_id),
            item_id,
            title: item.title().to_string(),
            body: item.body().to_string(),
        };
        let mut line =
            serde_json::to_string(&record).map_err(|e| SinkError::Rejected(e.to_string()))?;
        line.push('\n');

        let unavailable =
            |e: std::io::Error| SinkError::Unavailable(format!("{}: {e}", self.path.display()));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(unavailable)?;
        file.write_all(line.as_bytes()).await.map_err(unavailable)?;
        file.flush().await.map_err(unavailable)?;

        written.insert(item_id, record.record_id.clone());
        Ok(record.record_id)
    }
}
