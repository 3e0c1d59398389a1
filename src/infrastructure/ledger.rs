use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::{FromRow, PgPool};

use crate::domain::ProcessedMessageRecord;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable record of handled message ids, used for duplicate suppression.
#[async_trait]
pub trait ProcessedMessageLedger: Send + Sync {
    async fn exists(&self, message_id: &str) -> Result<bool, LedgerError>;

    /// Records are written once. A second write for the same id is ignored.
    async fn record(&self, record: &ProcessedMessageRecord) -> Result<(), LedgerError>;

    async fn find(&self, message_id: &str) -> Result<Option<ProcessedMessageRecord>, LedgerError>;

    async fn count(&self) -> Result<u64, LedgerError>;
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: DashMap<String, ProcessedMessageRecord>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedMessageLedger for InMemoryLedger {
    async fn exists(&self, message_id: &str) -> Result<bool, LedgerError> {
        Ok(self.records.contains_key(message_id))
    }

    async fn record(&self, record: &ProcessedMessageRecord) -> Result<(), LedgerError> {
        self.records
            .entry(record.message_id.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn find(&self, message_id: &str) -> Result<Option<ProcessedMessageRecord>, LedgerError> {
        Ok(self.records.get(message_id).map(|r| r.value().clone()))
    }

    async fn count(&self) -> Result<u64, LedgerError> {
        Ok(self.records.len() as u64)
    }
}

#[derive(Debug, FromRow)]
struct ProcessedMessageRow {
    message_id: String,
    topic: String,
    offset: i64,
    partition_number: i32,
    operation: String,
    entity_type: String,
    processed_timestamp: DateTime<Utc>,
}

impl From<ProcessedMessageRow> for ProcessedMessageRecord {
    fn from(row: ProcessedMessageRow) -> Self {
        Self {
            message_id: row.message_id,
            topic: row.topic,
            offset: row.offset,
            partition_number: row.partition_number,
            operation: row.operation,
            entity_type: row.entity_type,
            processed_timestamp: row.processed_timestamp,
        }
    }
}

/// Postgres-backed ledger over the `event_processing_record` table.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPool::connect(database_url).await?;
        let ledger = Self::new(pool);
        ledger.ensure_schema().await?;
        Ok(ledger)
    }

    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_processing_record (
                message_id          TEXT PRIMARY KEY,
                topic               TEXT NOT NULL,
                "offset"            BIGINT NOT NULL,
                partition_number    INTEGER NOT NULL,
                operation           TEXT NOT NULL,
                entity_type         TEXT NOT NULL,
                processed_timestamp TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        tracing::info!("PostgresLedger: event_processing_record table ready");
        Ok(())
    }
}

#[async_trait]
impl ProcessedMessageLedger for PostgresLedger {
    async fn exists(&self, message_id: &str) -> Result<bool, LedgerError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM event_processing_record WHERE message_id = $1)",
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn record(&self, record: &ProcessedMessageRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO event_processing_record
                (message_id, topic, "offset", partition_number, operation, entity_type, processed_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(&record.message_id)
        .bind(&record.topic)
        .bind(record.offset)
        .bind(record.partition_number)
        .bind(&record.operation)
        .bind(&record.entity_type)
        .bind(record.processed_timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, message_id: &str) -> Result<Option<ProcessedMessageRecord>, LedgerError> {
        let row: Option<ProcessedMessageRow> = sqlx::query_as(
            r#"
            SELECT message_id, topic, "offset", partition_number, operation, entity_type, processed_timestamp
            FROM event_processing_record
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ProcessedMessageRecord::from))
    }

    async fn count(&self) -> Result<u64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_processing_record")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_ledger_records_once() {
        let ledger = InMemoryLedger::new();
        let first = ProcessedMessageRecord::new("m-1", "user-create-json", 0, 5, "create", "user");
        let second = ProcessedMessageRecord::new("m-1", "user-create-json", 0, 9, "create", "user");

        assert!(!ledger.exists("m-1").await.unwrap());
        ledger.record(&first).await.unwrap();
        ledger.record(&second).await.unwrap();

        assert!(ledger.exists("m-1").await.unwrap());
        assert_eq!(ledger.count().await.unwrap(), 1);
        assert_eq!(ledger.find("m-1").await.unwrap().unwrap().offset, 5);
    }
}
