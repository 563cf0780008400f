//! `PostgreSQL` implementation of the `EventStore` trait.

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{TryStreamExt, future, stream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, instrument, warn};

use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, DomainMessage, Metadata};
use chronicle_core::identity::Identity;
use chronicle_core::serializer::{JsonSerializer, Serializer};
use chronicle_core::store::{EventStore, validate_continuation};
use chronicle_core::stream::DomainEventStream;

use crate::schema::CREATE_DOMAIN_MESSAGES_TABLE;

/// Rows fetched per query while streaming a log.
pub const DEFAULT_PAGE_SIZE: i64 = 500;

const UNIQUE_VIOLATION: &str = "23505";

const LOAD_STREAM_PAGE: &str = r"
SELECT id, serialized_aggregate_id, playhead, payload, recorded_on, metadata
FROM domain_messages
WHERE aggregate_id = $1 AND playhead >= $2
ORDER BY id, playhead
LIMIT $3 OFFSET $4
";

const LOAD_ALL_PAGE: &str = r"
SELECT id, serialized_aggregate_id, playhead, payload, recorded_on, metadata
FROM domain_messages
ORDER BY id, playhead
LIMIT $1 OFFSET $2
";

const INSERT_MESSAGE: &str = r"
INSERT INTO domain_messages (
    aggregate_id, serialized_aggregate_id, event_name, playhead, payload, recorded_on, metadata
)
VALUES ($1, $2, $3, $4, $5, $6, $7)
";

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    serialized_aggregate_id: String,
    playhead: i64,
    payload: String,
    recorded_on: DateTime<Utc>,
    metadata: String,
}

impl MessageRow {
    fn into_message<E, S>(self, serializer: &S) -> Result<DomainMessage<E>, DomainError>
    where
        E: DeserializeOwned,
        S: Serializer,
    {
        let mut metadata: Metadata = serializer.deserialize(&self.metadata)?;
        metadata.insert("eventId".to_owned(), self.id.into());
        let playhead = u64::try_from(self.playhead).map_err(|_| {
            DomainError::Serialization(format!("negative playhead in row {}", self.id))
        })?;
        Ok(DomainMessage::new(
            serializer.deserialize(&self.serialized_aggregate_id)?,
            playhead,
            serializer.deserialize(&self.payload)?,
            self.recorded_on,
            metadata,
        ))
    }
}

#[derive(Debug, Clone)]
enum PageQuery {
    Stream { aggregate_id: String, playhead: i64 },
    All,
}

impl PageQuery {
    async fn fetch(
        &self,
        pool: &PgPool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRow>, sqlx::Error> {
        match self {
            Self::Stream {
                aggregate_id,
                playhead,
            } => {
                sqlx::query_as::<_, MessageRow>(LOAD_STREAM_PAGE)
                    .bind(aggregate_id)
                    .bind(playhead)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
            }
            Self::All => {
                sqlx::query_as::<_, MessageRow>(LOAD_ALL_PAGE)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
            }
        }
    }
}

/// PostgreSQL-backed event store over the `domain_messages` table.
///
/// Loads are lazy: rows are fetched one page at a time as the returned
/// stream is consumed. Appends run in a single transaction, so a rejected
/// batch writes nothing.
pub struct PgEventStore<E, S = JsonSerializer> {
    pool: PgPool,
    serializer: S,
    page_size: i64,
    _event: PhantomData<fn() -> E>,
}

impl<E, S> PgEventStore<E, S>
where
    E: DomainEvent + Serialize + DeserializeOwned,
    S: Serializer + Clone,
{
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool, serializer: S) -> Self {
        Self {
            pool,
            serializer,
            page_size: DEFAULT_PAGE_SIZE,
            _event: PhantomData,
        }
    }

    /// Sets how many rows each page query fetches. Values below 1 are
    /// raised to 1.
    #[must_use]
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Creates the `domain_messages` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        sqlx::raw_sql(CREATE_DOMAIN_MESSAGES_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", &e))?;
        Ok(())
    }

    fn paged(&self, query: PageQuery) -> DomainEventStream<E> {
        let pool = self.pool.clone();
        let page_size = self.page_size;
        let pages = stream::try_unfold(Some(0_i64), move |offset| {
            let pool = pool.clone();
            let query = query.clone();
            async move {
                let Some(offset) = offset else {
                    return Ok(None);
                };
                let rows = query
                    .fetch(&pool, page_size, offset)
                    .await
                    .map_err(|e| map_sqlx_error("load_page", &e))?;
                debug!(offset, rows = rows.len(), "fetched page");
                let full = i64::try_from(rows.len()).is_ok_and(|len| len == page_size);
                let next = full.then_some(offset + page_size);
                Ok(Some((rows, next)))
            }
        });

        let serializer = self.serializer.clone();
        let messages = pages
            .map_ok(|rows| stream::iter(rows.into_iter().map(Ok::<_, DomainError>)))
            .try_flatten()
            .and_then(move |row| future::ready(row.into_message(&serializer)));
        DomainEventStream::from_stream(messages)
    }

    async fn tail(&self, id: &Identity) -> Result<Option<i64>, DomainError> {
        sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(playhead) FROM domain_messages WHERE aggregate_id = $1",
        )
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("tail", &e))
    }
}

impl<E, S: fmt::Debug> fmt::Debug for PgEventStore<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgEventStore")
            .field("serializer", &self.serializer)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E, S> EventStore<E> for PgEventStore<E, S>
where
    E: DomainEvent + Serialize + DeserializeOwned,
    S: Serializer + Clone,
{
    async fn has(&self, id: &Identity) -> Result<bool, DomainError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM domain_messages WHERE aggregate_id = $1)",
        )
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("has", &e))
    }

    #[instrument(skip(self), fields(aggregate_id = %id))]
    async fn load_from_playhead(
        &self,
        id: &Identity,
        playhead: u64,
    ) -> Result<DomainEventStream<E>, DomainError> {
        if !self.has(id).await? {
            return Err(DomainError::StreamNotFound(id.clone()));
        }
        let playhead = i64::try_from(playhead).unwrap_or(i64::MAX);
        Ok(self.paged(PageQuery::Stream {
            aggregate_id: id.as_str().to_owned(),
            playhead,
        }))
    }

    async fn load_all(&self) -> DomainEventStream<E> {
        self.paged(PageQuery::All)
    }

    #[instrument(skip(self, stream), fields(aggregate_id = %id))]
    async fn append(&self, id: &Identity, stream: DomainEventStream<E>) -> Result<(), DomainError> {
        let messages = stream.try_collect_messages().await?;
        if messages.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", &e))?;

        let tail: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(playhead) FROM domain_messages WHERE aggregate_id = $1",
        )
        .bind(id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_tail", &e))?;
        validate_continuation(next_playhead(tail), &messages)?;

        for message in &messages {
            let playhead = i64::try_from(message.playhead).map_err(|_| {
                DomainError::playhead(id.clone(), next_playhead(tail), message.playhead)
            })?;
            let result = sqlx::query(INSERT_MESSAGE)
                .bind(id.as_str())
                .bind(self.serializer.serialize(&message.aggregate_id)?)
                .bind(message.payload.event_type())
                .bind(playhead)
                .bind(self.serializer.serialize(&message.payload)?)
                .bind(message.recorded_on)
                .bind(self.serializer.serialize(&message.metadata)?)
                .execute(&mut *tx)
                .await;
            if let Err(e) = result {
                if !is_unique_violation(&e) {
                    return Err(map_sqlx_error("insert_message", &e));
                }
                // Another writer got there first; report where the log is now.
                drop(tx);
                let expected = next_playhead(self.tail(id).await?);
                warn!(expected, actual = message.playhead, "concurrent append detected");
                return Err(DomainError::playhead(id.clone(), expected, message.playhead));
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", &e))?;
        info!(count = messages.len(), "appended events");
        Ok(())
    }
}

fn next_playhead(tail: Option<i64>) -> u64 {
    tail.and_then(|playhead| u64::try_from(playhead + 1).ok())
        .unwrap_or(0)
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

fn map_sqlx_error(operation: &str, error: &sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("database error in {operation}: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_playhead_starts_at_zero_for_missing_log() {
        assert_eq!(next_playhead(None), 0);
        assert_eq!(next_playhead(Some(0)), 1);
        assert_eq!(next_playhead(Some(41)), 42);
    }

    #[test]
    fn test_row_conversion_exposes_row_id_as_event_id() {
        // Arrange
        let recorded_on = DateTime::from_timestamp(1_768_471_200, 0).unwrap();
        let row = MessageRow {
            id: 17,
            serialized_aggregate_id: "\"cart-1\"".into(),
            playhead: 2,
            payload: "5".into(),
            recorded_on,
            metadata: r#"{"user":"alice"}"#.into(),
        };

        // Act
        let message: DomainMessage<u32> = row.into_message(&JsonSerializer).unwrap();

        // Assert
        assert_eq!(message.aggregate_id, Identity::new("cart-1"));
        assert_eq!(message.playhead, 2);
        assert_eq!(message.payload, 5);
        assert_eq!(message.metadata["eventId"], 17);
        assert_eq!(message.metadata["user"], "alice");
    }

    #[test]
    fn test_row_with_negative_playhead_is_rejected() {
        let row = MessageRow {
            id: 1,
            serialized_aggregate_id: "\"a\"".into(),
            playhead: -1,
            payload: "1".into(),
            recorded_on: Utc::now(),
            metadata: "{}".into(),
        };

        let result = row.into_message::<u32, _>(&JsonSerializer);

        assert!(matches!(result, Err(DomainError::Serialization(_))));
    }
}
