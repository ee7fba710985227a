//! Postgres-backed event store implementation.
//!
//! Events live in one append-only table, unique on
//! `(tenant_id, aggregate_type, aggregate_id, sequence_number)`. That unique key
//! is the storage-level compare-and-swap: if two writers read the same stream
//! head, the second insert violates it and the append fails as a concurrency
//! conflict.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (check constraint violation) | `23514` | `InvalidAppend` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / other | N/A | `Backend` |
//!
//! ## Thread Safety
//!
//! `PostgresEventStore` is `Send + Sync` and can be shared across threads.
//! The synchronous [`EventStore`] impl bridges into the async methods and
//! requires a multi-threaded tokio runtime.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::{Span, instrument};

use sigil_core::{AggregateId, Editor, ExpectedSequence, TenantId, UserId};

use crate::config::EngineConfig;

use super::query::EventFilter;
use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch};

/// Table and index definitions for the event log.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id        UUID        NOT NULL PRIMARY KEY,
    tenant_id       UUID        NOT NULL,
    aggregate_type  TEXT        NOT NULL,
    aggregate_id    UUID        NOT NULL,
    sequence_number BIGINT      NOT NULL CHECK (sequence_number > 0),
    event_type      TEXT        NOT NULL,
    schema_version  INTEGER     NOT NULL CHECK (schema_version > 0),
    editor_user_id  UUID        NOT NULL,
    editor_service  TEXT        NOT NULL DEFAULT '',
    payload         JSONB       NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    UNIQUE (tenant_id, aggregate_type, aggregate_id, sequence_number)
);

CREATE INDEX IF NOT EXISTS events_creator_idx
    ON events (tenant_id, aggregate_type, editor_user_id)
    WHERE sequence_number = 1;
"#;

const SELECT_COLUMNS: &str = r#"
    event_id,
    tenant_id,
    aggregate_type,
    aggregate_id,
    sequence_number,
    event_type,
    schema_version,
    editor_user_id,
    editor_service,
    payload,
    created_at
"#;

/// Postgres-backed append-only event store.
///
/// Appends always go to the primary pool. Loads and searches go to the replica
/// pool when one is configured, so they may lag behind the primary; the
/// append-time head check is what keeps that safe.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    replica: Option<Arc<PgPool>>,
}

impl PostgresEventStore {
    /// Create a new PostgresEventStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            replica: None,
        }
    }

    /// Connect the primary (and replica, if configured) from engine config.
    pub async fn connect(config: &EngineConfig) -> Result<Self, EventStoreError> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            EventStoreError::Backend("database_url is not configured".to_string())
        })?;
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let mut store = Self::new(pool);
        if let Some(replica_url) = config.replica_url.as_deref() {
            let replica = PgPool::connect(replica_url)
                .await
                .map_err(|e| map_sqlx_error("connect_replica", e))?;
            store = store.with_replica(replica);
        }
        Ok(store)
    }

    /// Serve `load_stream`/`search` from a read replica.
    pub fn with_replica(mut self, replica: PgPool) -> Self {
        self.replica = Some(Arc::new(replica));
        self
    }

    fn read_pool(&self) -> &PgPool {
        self.replica.as_deref().unwrap_or(&self.pool)
    }

    /// Create the event table if it does not exist.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Load all events for a stream, in sequence order.
    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            aggregate_id = %aggregate_id.as_uuid(),
            event_count
        ),
        err
    )]
    pub async fn load_events(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events \
             WHERE tenant_id = $1 AND aggregate_type = $2 AND aggregate_id = $3 \
             ORDER BY sequence_number ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(aggregate_type)
            .bind(aggregate_id.as_uuid())
            .fetch_all(self.read_pool())
            .await
            .map_err(|e| map_sqlx_error("load_events", e))?;

        let events = rows_to_events(rows)?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }

    /// Append a batch with a compare-and-swap on the stream head.
    ///
    /// 1. Starts a transaction on the primary
    /// 2. Reads the current head of the stream
    /// 3. Validates it against `expected`
    /// 4. Inserts the batch with contiguous sequence numbers
    /// 5. Commits
    ///
    /// A concurrent writer that committed between 2 and 4 makes the insert hit
    /// the unique key, which is reported as `EventStoreError::Concurrency`.
    #[instrument(
        skip(self, events),
        fields(event_count = events.len(), expected = ?expected),
        err
    )]
    pub async fn append_events(
        &self,
        events: Vec<UncommittedEvent>,
        expected: ExpectedSequence,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let (tenant_id, aggregate_type, aggregate_id) = validate_batch(&events)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = stream_head(&mut tx, tenant_id, &aggregate_type, aggregate_id).await?;
        if !expected.matches(current) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }

        let created_at = Utc::now();
        let mut next_sequence = current + 1;
        let mut stored_events = Vec::with_capacity(events.len());

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id,
                    tenant_id,
                    aggregate_type,
                    aggregate_id,
                    sequence_number,
                    event_type,
                    schema_version,
                    editor_user_id,
                    editor_service,
                    payload,
                    created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(event.event_id)
            .bind(tenant_id.as_uuid())
            .bind(&aggregate_type)
            .bind(aggregate_id.as_uuid())
            .bind(next_sequence as i64)
            .bind(&event.event_type)
            .bind(event.schema_version as i32)
            .bind(event.editor.user_id.as_uuid())
            .bind(&event.editor.service)
            .bind(&event.payload)
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency(format!(
                        "concurrent append detected at sequence {next_sequence}"
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            stored_events.push(StoredEvent {
                event_id: event.event_id,
                tenant_id,
                aggregate_id,
                aggregate_type: aggregate_type.clone(),
                event_type: event.event_type,
                schema_version: event.schema_version,
                sequence: next_sequence,
                created_at,
                editor: event.editor,
                payload: event.payload,
            });
            next_sequence += 1;
        }

        tx.commit().await.map_err(|e| {
            if is_unique_violation(&e) {
                EventStoreError::Concurrency("concurrent append detected at commit".to_string())
            } else {
                map_sqlx_error("commit_transaction", e)
            }
        })?;

        Ok(stored_events)
    }

    /// Filtered replay of whole streams.
    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid()), err)]
    pub async fn search_events(
        &self,
        tenant_id: TenantId,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let ids: Option<Vec<uuid::Uuid>> = filter
            .aggregate_ids
            .as_ref()
            .map(|ids| ids.iter().map(|id| *id.as_uuid()).collect());
        let creator: Option<uuid::Uuid> = filter.creator.map(|c| *c.as_uuid());

        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events e \
             WHERE e.tenant_id = $1 AND e.aggregate_type = $2 \
               AND ($3::uuid[] IS NULL OR e.aggregate_id = ANY($3)) \
               AND ($4::uuid IS NULL OR e.aggregate_id IN ( \
                     SELECT c.aggregate_id FROM events c \
                     WHERE c.tenant_id = $1 AND c.aggregate_type = $2 \
                       AND c.sequence_number = 1 AND c.editor_user_id = $4)) \
             ORDER BY e.aggregate_id ASC, e.sequence_number ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(&filter.aggregate_type)
            .bind(ids)
            .bind(creator)
            .fetch_all(self.read_pool())
            .await
            .map_err(|e| map_sqlx_error("search_events", e))?;

        rows_to_events(rows)
    }
}

/// Current head of a stream (0 if it does not exist).
async fn stream_head(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    aggregate_type: &str,
    aggregate_id: AggregateId,
) -> Result<u64, EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(sequence_number), 0) AS head
        FROM events
        WHERE tenant_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(aggregate_type)
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("stream_head", e))?;

    let head: i64 = row
        .try_get("head")
        .map_err(|e| EventStoreError::Backend(format!("failed to read stream head: {e}")))?;
    Ok(head as u64)
}

fn rows_to_events(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<StoredEvent>, EventStoreError> {
    rows.iter()
        .map(|row| {
            StoredEventRow::from_row(row)
                .map(StoredEvent::from)
                .map_err(|e| EventStoreError::CorruptStream(format!("failed to read event row: {e}")))
        })
        .collect()
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct StoredEventRow {
    event_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    aggregate_type: String,
    aggregate_id: uuid::Uuid,
    sequence_number: i64,
    event_type: String,
    schema_version: i32,
    editor_user_id: uuid::Uuid,
    editor_service: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            event_id: row.try_get("event_id")?,
            tenant_id: row.try_get("tenant_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            schema_version: row.try_get("schema_version")?,
            editor_user_id: row.try_get("editor_user_id")?,
            editor_service: row.try_get("editor_service")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            event_id: row.event_id,
            tenant_id: TenantId::from_uuid(row.tenant_id),
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            event_type: row.event_type,
            schema_version: row.schema_version as u32,
            sequence: row.sequence_number as u64,
            created_at: row.created_at,
            editor: Editor {
                user_id: UserId::from_uuid(row.editor_user_id),
                service: row.editor_service,
            },
            payload: row.payload,
        }
    }
}

/// Run an async store operation from the synchronous `EventStore` interface.
///
/// Only a multi-threaded runtime can be blocked in place; anything else is a
/// backend error instead of a panic.
fn block_on<F, T>(fut: F) -> Result<T, EventStoreError>
where
    F: std::future::Future<Output = Result<T, EventStoreError>>,
{
    const NEEDS_MULTI_THREAD: &str = "PostgresEventStore requires a multi-threaded tokio runtime";

    let handle = tokio::runtime::Handle::try_current()
        .map_err(|_| EventStoreError::Backend(NEEDS_MULTI_THREAD.to_string()))?;
    if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread {
        return Err(EventStoreError::Backend(NEEDS_MULTI_THREAD.to_string()));
    }
    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected: ExpectedSequence,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.append_events(events, expected))
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.load_events(tenant_id, aggregate_type, aggregate_id))
    }

    fn search(
        &self,
        tenant_id: TenantId,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.search_events(tenant_id, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    fn lazy_store() -> PostgresEventStore {
        PostgresEventStore::new(PgPool::connect_lazy("postgres://localhost/sigil").unwrap())
    }

    #[tokio::test]
    async fn current_thread_runtime_is_a_backend_error() {
        let err = lazy_store()
            .load_stream(TenantId::new(), "session", AggregateId::new())
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Backend(msg) if msg.contains("multi-threaded")));
    }

    #[test]
    fn no_runtime_is_a_backend_error() {
        let err = block_on(async { Ok::<_, EventStoreError>(()) }).unwrap_err();
        assert!(matches!(err, EventStoreError::Backend(_)));
    }
}
