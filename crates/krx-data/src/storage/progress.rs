//! PostgreSQL 기반 수집 진행 상태 저장소.
//!
//! `collection_progress` 테이블에 종목당 한 행을 유지합니다.
//! 모든 쓰기는 `ON CONFLICT (stock_code) DO UPDATE` 단일 문장이므로
//! 종목 단위로 원자적이며, 동시 쓰기는 마지막 쓰기가 이깁니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use krx_core::{
    CollectionStatus, ProgressRecord, ProgressStore, StatusCounts, StorageError, StorageResult,
};
use sqlx::{FromRow, PgPool};
use tracing::{info, instrument};

/// `collection_progress` 행.
#[derive(Debug, Clone, FromRow)]
struct ProgressRow {
    stock_code: String,
    stock_name: String,
    status: String,
    attempt_count: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    record_count: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProgressRow> for ProgressRecord {
    type Error = StorageError;

    fn try_from(row: ProgressRow) -> Result<Self, Self::Error> {
        let status: CollectionStatus = row
            .status
            .parse()
            .map_err(StorageError::InvalidData)?;

        Ok(ProgressRecord {
            item_id: row.stock_code,
            display_name: row.stock_name,
            status,
            attempt_count: row.attempt_count.max(0) as u32,
            last_attempt_at: row.last_attempt_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            record_count: row.record_count.max(0) as u64,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = "stock_code, stock_name, status, attempt_count, last_attempt_at, \
     completed_at, error_message, record_count, updated_at";

/// PostgreSQL 진행 상태 저장소.
#[derive(Clone)]
pub struct PgProgressStore {
    pool: PgPool,
}

impl PgProgressStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 모든 진행 레코드 삭제 (운영자 초기화용).
    pub async fn clear_all(&self) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM collection_progress")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::DeleteError(e.to_string()))?;

        info!(deleted = result.rows_affected(), "수집 진행 상태 초기화");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ProgressStore for PgProgressStore {
    async fn get(&self, item_id: &str) -> StorageResult<Option<ProgressRecord>> {
        let row: Option<ProgressRow> = sqlx::query_as(&format!(
            "SELECT {} FROM collection_progress WHERE stock_code = $1",
            SELECT_COLUMNS
        ))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProgressRecord::try_from).transpose()
    }

    #[instrument(skip(self, record), fields(item_id = %record.item_id, status = %record.status))]
    async fn upsert(&self, record: &ProgressRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO collection_progress (
                stock_code, stock_name, status, attempt_count, last_attempt_at,
                completed_at, error_message, record_count, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (stock_code)
            DO UPDATE SET
                stock_name = CASE WHEN EXCLUDED.stock_name = '' THEN collection_progress.stock_name
                                  ELSE EXCLUDED.stock_name END,
                status = EXCLUDED.status,
                attempt_count = EXCLUDED.attempt_count,
                last_attempt_at = EXCLUDED.last_attempt_at,
                completed_at = EXCLUDED.completed_at,
                error_message = EXCLUDED.error_message,
                record_count = EXCLUDED.record_count,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.item_id)
        .bind(&record.display_name)
        .bind(record.status.as_str())
        .bind(record.attempt_count as i32)
        .bind(record.last_attempt_at)
        .bind(record.completed_at)
        .bind(&record.error_message)
        .bind(record.record_count as i64)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_status(&self, status: CollectionStatus) -> StorageResult<Vec<ProgressRecord>> {
        let rows: Vec<ProgressRow> = sqlx::query_as(&format!(
            "SELECT {} FROM collection_progress WHERE status = $1 ORDER BY stock_code",
            SELECT_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProgressRecord::try_from).collect()
    }

    async fn counts_by_status(&self) -> StorageResult<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM collection_progress
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(status, count)| {
                let status: CollectionStatus =
                    status.parse().map_err(StorageError::InvalidData)?;
                Ok((status, count.max(0) as u64))
            })
            .collect::<StorageResult<Vec<_>>>()
            .map(|pairs| pairs.into_iter().collect())
    }

    async fn latest_activity(&self) -> StorageResult<Option<ProgressRecord>> {
        let row: Option<ProgressRow> = sqlx::query_as(&format!(
            "SELECT {} FROM collection_progress \
             WHERE last_attempt_at IS NOT NULL \
             ORDER BY last_attempt_at DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProgressRecord::try_from).transpose()
    }
}
