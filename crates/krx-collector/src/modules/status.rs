//! 수집 진행 현황 조회.

use crate::stats::RunContext;
use krx_core::{CollectionStatus, ProgressRecord, ProgressStore, StatusCounts, StorageResult};

/// 진행 상태 저장소 기준 현황.
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    pub counts: StatusCounts,
    /// 완료 비율 (%)
    pub success_rate: f64,
    /// 가장 최근 시도된 종목
    pub latest: Option<ProgressRecord>,
    /// 현황 (작업 중 종목 포함)
    pub context: RunContext,
}

/// 저장소에서 현황을 집계합니다.
pub async fn load_summary(store: &dyn ProgressStore) -> StorageResult<ProgressSummary> {
    let counts = store.counts_by_status().await?;
    let latest = store.latest_activity().await?;
    let current = store
        .list_by_status(CollectionStatus::InProgress)
        .await?
        .into_iter()
        .map(|r| r.item_id)
        .collect();

    Ok(ProgressSummary {
        success_rate: counts.success_rate(),
        context: RunContext::from_counts(&counts, current),
        counts,
        latest,
    })
}

impl ProgressSummary {
    pub fn log(&self) {
        tracing::info!(
            total = self.counts.total(),
            pending = self.counts.pending,
            in_progress = self.counts.in_progress,
            completed = self.counts.completed,
            failed = self.counts.failed,
            skipped = self.counts.skipped,
            remaining = self.context.remaining(),
            success_rate = format!("{:.1}%", self.success_rate),
            "수집 진행 현황"
        );

        if let Some(latest) = &self.latest {
            tracing::info!(
                item_id = %latest.item_id,
                name = %latest.display_name,
                status = %latest.status,
                at = ?latest.last_attempt_at,
                "최근 활동"
            );
        }

        if !self.context.current_item_ids.is_empty() {
            tracing::warn!(
                items = ?self.context.current_item_ids,
                "IN_PROGRESS로 남은 종목 (다음 --resume 실행에서 재시도)"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use krx_core::WorkItem;
    use krx_data::MemoryProgressStore;

    #[tokio::test]
    async fn test_summary_reflects_store() {
        let store = MemoryProgressStore::new();
        let now = Utc::now();

        let mut done = ProgressRecord::pending(&WorkItem::new("005930", "삼성전자"));
        done.begin_attempt(now);
        done.mark_completed(100, now);

        let mut working = ProgressRecord::pending(&WorkItem::new("000660", "SK하이닉스"));
        working.begin_attempt(now + chrono::Duration::seconds(5));

        let idle = ProgressRecord::pending(&WorkItem::from_code("035720"));

        store.seed([done, working, idle]).await;

        let summary = load_summary(&store).await.unwrap();
        assert_eq!(summary.counts.total(), 3);
        assert_eq!(summary.counts.completed, 1);
        assert_eq!(summary.context.current_item_ids, vec!["000660"]);
        assert_eq!(summary.context.remaining(), 2);
        assert_eq!(summary.latest.unwrap().item_id, "000660");
    }
}
