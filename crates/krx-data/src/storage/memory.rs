//! 메모리 저장소.
//!
//! 프로세스 수명 동안만 유지되므로 테스트와 `--dry-run` 실행에 사용합니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use krx_core::{
    dedup_by_date, CollectionStatus, PriceRecord, PriceSink, ProgressRecord, ProgressStore, StatusCounts,
    StorageError, StorageResult,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// 메모리 진행 상태 저장소.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: RwLock<HashMap<String, ProgressRecord>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 레코드를 미리 채워 넣습니다 (이전 실행 상태 재현용).
    pub async fn seed(&self, records: impl IntoIterator<Item = ProgressRecord>) {
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.item_id.clone(), record);
        }
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(&self, item_id: &str) -> StorageResult<Option<ProgressRecord>> {
        Ok(self.records.read().await.get(item_id).cloned())
    }

    async fn upsert(&self, record: &ProgressRecord) -> StorageResult<()> {
        self.records
            .write()
            .await
            .insert(record.item_id.clone(), record.clone());
        Ok(())
    }

    async fn list_by_status(&self, status: CollectionStatus) -> StorageResult<Vec<ProgressRecord>> {
        let mut matched: Vec<ProgressRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        Ok(matched)
    }

    async fn counts_by_status(&self) -> StorageResult<StatusCounts> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .map(|r| (r.status, 1))
            .collect())
    }

    async fn latest_activity(&self) -> StorageResult<Option<ProgressRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.last_attempt_at.is_some())
            .max_by_key(|r| r.last_attempt_at)
            .cloned())
    }
}

/// 메모리 일봉 저장소.
#[derive(Debug, Default)]
pub struct MemoryPriceSink {
    rows: RwLock<BTreeMap<(String, NaiveDate), PriceRecord>>,
}

impl MemoryPriceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 종목의 저장된 일봉 (날짜순).
    pub async fn records_for(&self, item_id: &str) -> Vec<PriceRecord> {
        self.rows
            .read()
            .await
            .values()
            .filter(|r| r.item_id == item_id)
            .cloned()
            .collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl PriceSink for MemoryPriceSink {
    async fn upsert_records(&self, item_id: &str, records: &[PriceRecord]) -> StorageResult<usize> {
        if let Some(foreign) = records.iter().find(|r| r.item_id != item_id) {
            return Err(StorageError::InvalidData(format!(
                "{} 배치에 다른 종목 레코드 포함: {}",
                item_id, foreign.item_id
            )));
        }

        let records = dedup_by_date(records);
        let mut rows = self.rows.write().await;
        for record in &records {
            rows.insert((record.item_id.clone(), record.date), record.clone());
        }
        Ok(records.len())
    }

    async fn latest_date(&self, item_id: &str) -> StorageResult<Option<NaiveDate>> {
        Ok(self
            .rows
            .read()
            .await
            .keys()
            .filter(|(code, _)| code == item_id)
            .map(|(_, date)| *date)
            .max())
    }

    async fn stored_count(&self, item_id: &str) -> StorageResult<u64> {
        Ok(self
            .rows
            .read()
            .await
            .keys()
            .filter(|(code, _)| code == item_id)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use krx_core::WorkItem;
    use rust_decimal_macros::dec;

    fn price(item_id: &str, day: u32, close: rust_decimal::Decimal) -> PriceRecord {
        PriceRecord {
            item_id: item_id.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: dec!(100),
            high: dec!(110),
            low: dec!(90),
            close,
            volume: 1_000,
            turnover: dec!(100000),
        }
    }

    #[tokio::test]
    async fn test_price_upsert_is_idempotent() {
        let sink = MemoryPriceSink::new();
        let first = vec![price("005930", 2, dec!(100)), price("005930", 3, dec!(101))];
        let second = vec![price("005930", 2, dec!(105)), price("005930", 3, dec!(106))];

        sink.upsert_records("005930", &first).await.unwrap();
        sink.upsert_records("005930", &second).await.unwrap();

        let stored = sink.records_for("005930").await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].close, dec!(105));
        assert_eq!(stored[1].close, dec!(106));
    }

    #[tokio::test]
    async fn test_price_batch_rejects_foreign_item() {
        let sink = MemoryPriceSink::new();
        let batch = vec![price("005930", 2, dec!(100)), price("000660", 2, dec!(100))];

        assert!(sink.upsert_records("005930", &batch).await.is_err());
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_price_batch_with_repeated_date_keeps_last_row() {
        let sink = MemoryPriceSink::new();
        let batch = vec![price("005930", 15, dec!(1)), price("005930", 15, dec!(2))];

        let upserted = sink.upsert_records("005930", &batch).await.unwrap();

        let stored = sink.records_for("005930").await;
        assert_eq!(upserted, 1);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].close, dec!(2));
        assert_eq!(sink.stored_count("005930").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_latest_date_per_item() {
        let sink = MemoryPriceSink::new();
        assert_eq!(sink.latest_date("005930").await.unwrap(), None);

        sink.upsert_records("005930", &[price("005930", 3, dec!(1)), price("005930", 9, dec!(1))])
            .await
            .unwrap();
        sink.upsert_records("000660", &[price("000660", 20, dec!(1))])
            .await
            .unwrap();

        assert_eq!(
            sink.latest_date("005930").await.unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 9)
        );
        assert_eq!(sink.stored_count("000660").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_progress_upsert_and_counts() {
        let store = MemoryProgressStore::new();
        let now = Utc::now();

        let mut a = ProgressRecord::pending(&WorkItem::from_code("A"));
        let mut b = ProgressRecord::pending(&WorkItem::from_code("B"));
        store.upsert(&a).await.unwrap();
        store.upsert(&b).await.unwrap();

        a.begin_attempt(now);
        a.mark_completed(5, now);
        store.upsert(&a).await.unwrap();

        b.begin_attempt(now + chrono::Duration::seconds(1));
        store.upsert(&b).await.unwrap();

        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.in_progress, 1);
        assert_eq!(counts.total(), 2);

        let latest = store.latest_activity().await.unwrap().unwrap();
        assert_eq!(latest.item_id, "B");

        let completed = store.list_by_status(CollectionStatus::Completed).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].record_count, 5);
    }
}
