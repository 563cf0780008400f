//! Event store persisted as a single JSON array file.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, DomainMessage, Metadata};
use chronicle_core::identity::Identity;
use chronicle_core::serializer::{JsonSerializer, Serializer};
use chronicle_core::store::{EventStore, InMemoryEventStore, validate_continuation};
use chronicle_core::stream::DomainEventStream;

/// One stored message. `id`, `payload` and `metadata` hold serializer
/// output; `recorded_on` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileRecord {
    id: String,
    playhead: u64,
    payload: String,
    recorded_on: i64,
    metadata: String,
}

impl FileRecord {
    fn encode<E, S>(message: &DomainMessage<E>, serializer: &S) -> Result<Self, DomainError>
    where
        E: Serialize,
        S: Serializer,
    {
        Ok(Self {
            id: serializer.serialize(&message.aggregate_id)?,
            playhead: message.playhead,
            payload: serializer.serialize(&message.payload)?,
            recorded_on: message.recorded_on.timestamp_millis(),
            metadata: serializer.serialize(&message.metadata)?,
        })
    }

    fn decode<E, S>(&self, serializer: &S) -> Result<DomainMessage<E>, DomainError>
    where
        E: DeserializeOwned,
        S: Serializer,
    {
        let recorded_on = DateTime::from_timestamp_millis(self.recorded_on).ok_or_else(|| {
            DomainError::Serialization(format!("timestamp out of range: {}", self.recorded_on))
        })?;
        Ok(DomainMessage::new(
            serializer.deserialize::<Identity>(&self.id)?,
            self.playhead,
            serializer.deserialize::<E>(&self.payload)?,
            recorded_on,
            serializer.deserialize::<Metadata>(&self.metadata)?,
        ))
    }
}

/// Event store backed by one JSON file holding every message.
///
/// The whole file is loaded into an [`InMemoryEventStore`] on open. Each
/// append is validated first, then the complete array is written to a
/// temporary file and renamed over the original, and only then committed to
/// memory. A failed write leaves both the file and memory unchanged.
///
/// `recordedOn` keeps millisecond precision. Appended messages are committed
/// to memory as decoded from their records, so loads return the same
/// timestamps before and after the file is reopened.
pub struct FileEventStore<E, S = JsonSerializer> {
    path: PathBuf,
    serializer: S,
    memory: InMemoryEventStore<E>,
    records: Mutex<Vec<FileRecord>>,
}

impl<E, S> FileEventStore<E, S>
where
    E: DomainEvent + Serialize + DeserializeOwned,
    S: Serializer,
{
    /// Opens the store at `path`, creating an empty file if none exists.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the file cannot be read or
    /// created, `DomainError::Serialization` if its contents cannot be
    /// decoded, or `DomainError::Playhead` if the stored streams have gaps.
    #[instrument(skip_all)]
    pub async fn open(path: impl AsRef<Path>, serializer: S) -> Result<Self, DomainError> {
        let path = path.as_ref().to_path_buf();
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("check", &path, &e))?;
        if !exists {
            tokio::fs::write(&path, "[]")
                .await
                .map_err(|e| io_error("create", &path, &e))?;
        }

        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error("read", &path, &e))?;
        let records: Vec<FileRecord> = serde_json::from_str(&raw).map_err(|e| {
            DomainError::Serialization(format!("malformed event file {}: {e}", path.display()))
        })?;
        let messages = records
            .iter()
            .map(|record| record.decode(&serializer))
            .collect::<Result<Vec<DomainMessage<E>>, _>>()?;
        let memory = InMemoryEventStore::from_messages(messages)?;

        info!(path = %path.display(), count = records.len(), "opened event file");
        Ok(Self {
            path,
            serializer,
            memory,
            records: Mutex::new(records),
        })
    }

    /// Returns the file backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_all(&self, records: &[FileRecord]) -> Result<(), DomainError> {
        let json = serde_json::to_string(records)
            .map_err(|e| DomainError::Serialization(format!("event file encoding failed: {e}")))?;
        let tmp_path = self.tmp_path();
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| io_error("write", &tmp_path, &e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| io_error("replace", &self.path, &e))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

fn io_error(action: &str, path: &Path, error: &std::io::Error) -> DomainError {
    DomainError::Infrastructure(format!("failed to {action} {}: {error}", path.display()))
}

impl<E, S: fmt::Debug> fmt::Debug for FileEventStore<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEventStore")
            .field("path", &self.path)
            .field("serializer", &self.serializer)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E, S> EventStore<E> for FileEventStore<E, S>
where
    E: DomainEvent + Serialize + DeserializeOwned,
    S: Serializer,
{
    async fn has(&self, id: &Identity) -> Result<bool, DomainError> {
        self.memory.has(id).await
    }

    async fn load_from_playhead(
        &self,
        id: &Identity,
        playhead: u64,
    ) -> Result<DomainEventStream<E>, DomainError> {
        self.memory.load_from_playhead(id, playhead).await
    }

    async fn load_all(&self) -> DomainEventStream<E> {
        self.memory.load_all().await
    }

    #[instrument(skip(self, stream), fields(aggregate_id = %id))]
    async fn append(&self, id: &Identity, stream: DomainEventStream<E>) -> Result<(), DomainError> {
        let messages = stream.try_collect_messages().await?;
        if messages.is_empty() {
            return Ok(());
        }

        let mut records = self.records.lock().await;
        validate_continuation(self.memory.next_playhead(id), &messages)?;
        let mut next = records.clone();
        let mut stored = Vec::with_capacity(messages.len());
        for message in &messages {
            let record = FileRecord::encode(message, &self.serializer)?;
            stored.push(record.decode::<E, S>(&self.serializer)?);
            next.push(record);
        }
        self.write_all(&next).await?;

        let count = stored.len();
        self.memory.append_messages(id, stored)?;
        *records = next;
        info!(count, "appended events to file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_record_uses_camel_case_keys_and_epoch_millis() {
        // Arrange
        let recorded_on = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let message = DomainMessage::new(
            Identity::new("a"),
            0,
            serde_json::json!({"n": 1}),
            recorded_on,
            Metadata::new(),
        );

        // Act
        let record = FileRecord::encode(&message, &JsonSerializer).unwrap();
        let json = serde_json::to_value(&record).unwrap();

        // Assert
        assert_eq!(json["id"], "\"a\"");
        assert_eq!(json["recordedOn"], recorded_on.timestamp_millis());
        assert_eq!(json["metadata"], "{}");
    }

    #[test]
    fn test_record_decodes_back_to_message() {
        let recorded_on = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("user".into(), "alice".into());
        let message = DomainMessage::new(Identity::new("a"), 4, 7_u32, recorded_on, metadata);

        let restored: DomainMessage<u32> = FileRecord::encode(&message, &JsonSerializer)
            .unwrap()
            .decode(&JsonSerializer)
            .unwrap();

        assert_eq!(restored, message);
    }
}
