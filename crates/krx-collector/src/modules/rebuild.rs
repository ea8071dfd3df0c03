//! 저장된 일봉으로 진행 상태 재구성.
//!
//! 진행 테이블을 잃었거나 다른 경로로 일봉을 적재한 경우, 이미 데이터가 있는 종목을
//! `COMPLETED`로 기록해 다음 `--resume` 실행이 다시 받지 않게 합니다.

use chrono::Utc;
use krx_core::{
    dedup_work_items, CollectionStatus, PriceSink, ProgressRecord, ProgressStore, StorageResult,
    WorkItem,
};
use serde::Serialize;
use tracing::{debug, info};

/// 재구성 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildStats {
    /// 검사한 종목 수
    pub scanned: usize,
    /// 새로 `COMPLETED`로 기록한 종목
    pub rebuilt: usize,
    /// 이미 `COMPLETED` 또는 `SKIPPED`
    pub unchanged: usize,
    /// 저장된 일봉이 없는 종목
    pub missing: usize,
}

/// 유니버스의 각 종목에 대해 저장된 일봉이 있으면 `COMPLETED` 진행 레코드를 기록합니다.
///
/// 기존 시도 횟수와 종목명은 유지하고, `record_count`는 저장된 일봉 수로 채웁니다.
/// 데이터가 없는 종목의 진행 레코드는 건드리지 않습니다.
pub async fn rebuild_progress(
    items: Vec<WorkItem>,
    progress: &dyn ProgressStore,
    sink: &dyn PriceSink,
) -> StorageResult<RebuildStats> {
    let items = dedup_work_items(items);
    let mut stats = RebuildStats {
        scanned: items.len(),
        ..Default::default()
    };

    for item in items {
        let existing = progress.get(&item.id).await?;
        if let Some(record) = &existing {
            if matches!(
                record.status,
                CollectionStatus::Completed | CollectionStatus::Skipped
            ) {
                stats.unchanged += 1;
                continue;
            }
        }

        let Some(latest) = sink.latest_date(&item.id).await? else {
            stats.missing += 1;
            continue;
        };
        let count = sink.stored_count(&item.id).await?;

        let mut record = existing.unwrap_or_else(|| ProgressRecord::pending(&item));
        if record.display_name.is_empty() {
            record.display_name = item.display_name.clone();
        }
        record.mark_completed(count, Utc::now());
        progress.upsert(&record).await?;

        debug!(item_id = %item.id, latest = %latest, records = count, "진행 상태 복구");
        stats.rebuilt += 1;
    }

    info!(
        scanned = stats.scanned,
        rebuilt = stats.rebuilt,
        unchanged = stats.unchanged,
        missing = stats.missing,
        "저장된 일봉 기준 진행 상태 재구성 완료"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use krx_core::PriceRecord;
    use krx_data::{MemoryPriceSink, MemoryProgressStore};
    use rust_decimal_macros::dec;

    fn bar(item_id: &str, day: u32) -> PriceRecord {
        PriceRecord {
            item_id: item_id.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            open: dec!(100),
            high: dec!(100),
            low: dec!(100),
            close: dec!(100),
            volume: 1,
            turnover: dec!(100),
        }
    }

    #[tokio::test]
    async fn test_rebuild_marks_stored_items_completed() {
        let store = MemoryProgressStore::new();
        let sink = MemoryPriceSink::new();
        sink.upsert_records("005930", &[bar("005930", 2), bar("005930", 3)])
            .await
            .unwrap();
        sink.upsert_records("035720", &[bar("035720", 2)]).await.unwrap();

        let mut failed = ProgressRecord::pending(&WorkItem::from_code("035720"));
        failed.begin_attempt(Utc::now());
        failed.record_failure("[TRANSIENT] timeout", Utc::now());
        failed.mark_failed(Utc::now());
        let skipped = {
            let mut r = ProgressRecord::pending(&WorkItem::from_code("999999"));
            r.mark_skipped(None, Utc::now());
            r
        };
        store.seed([failed, skipped]).await;

        let items = vec![
            WorkItem::new("005930", "삼성전자"),
            WorkItem::from_code("000660"),
            WorkItem::from_code("035720"),
            WorkItem::from_code("999999"),
        ];
        let stats = rebuild_progress(items, &store, &sink).await.unwrap();

        assert_eq!(
            stats,
            RebuildStats {
                scanned: 4,
                rebuilt: 2,
                unchanged: 1,
                missing: 1,
            }
        );

        let samsung = store.get("005930").await.unwrap().unwrap();
        assert_eq!(samsung.status, CollectionStatus::Completed);
        assert_eq!(samsung.record_count, 2);
        assert_eq!(samsung.display_name, "삼성전자");
        assert!(samsung.is_consistent());

        // 실패 기록은 복구되며 시도 횟수는 유지
        let kakao = store.get("035720").await.unwrap().unwrap();
        assert_eq!(kakao.status, CollectionStatus::Completed);
        assert_eq!(kakao.attempt_count, 1);
        assert!(kakao.error_message.is_none());

        assert!(store.get("000660").await.unwrap().is_none());
    }
}
