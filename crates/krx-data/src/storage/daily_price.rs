//! PostgreSQL 기반 일봉 저장소.
//!
//! `daily_prices`는 종목코드 해시 파티션 테이블이며 (stock_code, trade_date)가 기본키입니다.
//! 한 종목의 배치는 단일 트랜잭션으로 저장하므로 일부만 저장된 상태는 커밋되지 않습니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use krx_core::{dedup_by_date, PriceRecord, PriceSink, StorageError, StorageResult};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, instrument};

/// UNNEST 한 번에 넣을 최대 행 수.
const CHUNK_SIZE: usize = 500;

/// PostgreSQL 일봉 저장소.
#[derive(Clone)]
pub struct PgPriceSink {
    pool: PgPool,
}

impl PgPriceSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceSink for PgPriceSink {
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert_records(&self, item_id: &str, records: &[PriceRecord]) -> StorageResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        if let Some(foreign) = records.iter().find(|r| r.item_id != item_id) {
            return Err(StorageError::InvalidData(format!(
                "{} 배치에 다른 종목 레코드 포함: {}",
                item_id, foreign.item_id
            )));
        }

        // 같은 거래일이 두 번 들어오면 ON CONFLICT가 한 문장에서 같은 행을 두 번 갱신하게 됨
        let records = dedup_by_date(records);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        let mut upserted = 0usize;

        for chunk in records.chunks(CHUNK_SIZE) {
            let codes: Vec<&str> = chunk.iter().map(|_| item_id).collect();
            let dates: Vec<NaiveDate> = chunk.iter().map(|r| r.date).collect();
            let opens: Vec<Decimal> = chunk.iter().map(|r| r.open).collect();
            let highs: Vec<Decimal> = chunk.iter().map(|r| r.high).collect();
            let lows: Vec<Decimal> = chunk.iter().map(|r| r.low).collect();
            let closes: Vec<Decimal> = chunk.iter().map(|r| r.close).collect();
            let volumes: Vec<i64> = chunk.iter().map(|r| r.volume).collect();
            let turnovers: Vec<Decimal> = chunk.iter().map(|r| r.turnover).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO daily_prices
                    (stock_code, trade_date, open, high, low, close, volume, turnover, fetched_at)
                SELECT *, NOW() FROM UNNEST(
                    $1::text[], $2::date[],
                    $3::numeric[], $4::numeric[], $5::numeric[], $6::numeric[],
                    $7::int8[], $8::numeric[]
                )
                ON CONFLICT (stock_code, trade_date) DO UPDATE SET
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume,
                    turnover = EXCLUDED.turnover,
                    fetched_at = NOW()
                "#,
            )
            .bind(&codes)
            .bind(&dates)
            .bind(&opens)
            .bind(&highs)
            .bind(&lows)
            .bind(&closes)
            .bind(&volumes)
            .bind(&turnovers)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::InsertError(e.to_string()))?;

            upserted += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::InsertError(e.to_string()))?;

        debug!(item_id = item_id, upserted = upserted, "일봉 저장 완료");
        Ok(upserted)
    }

    async fn latest_date(&self, item_id: &str) -> StorageResult<Option<NaiveDate>> {
        let latest: Option<NaiveDate> =
            sqlx::query_scalar("SELECT MAX(trade_date) FROM daily_prices WHERE stock_code = $1")
                .bind(item_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(latest)
    }

    async fn stored_count(&self, item_id: &str) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_prices WHERE stock_code = $1")
            .bind(item_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
