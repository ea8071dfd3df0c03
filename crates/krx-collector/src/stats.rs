//! 수집 실행 통계.

use chrono::{DateTime, Utc};
use krx_core::{CollectionStatus, StatusCounts};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 재시도 한도를 넘겨 실패한 종목.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub item_id: String,
    /// 누적 시도 횟수
    pub attempts: u32,
    /// 마지막 에러
    pub error: String,
}

/// 한 번의 수집 실행 결과.
///
/// 중단된 실행에서도 중단 시점까지의 집계가 채워집니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// 실행 시작 시각
    pub started_at: DateTime<Utc>,
    /// 중복 제거 후 유니버스 크기
    pub total: usize,
    /// 완료 (이어받은 종목 포함)
    pub completed: usize,
    /// 실패
    pub failed: usize,
    /// 제외
    pub skipped: usize,
    /// 종료 상태에 도달하지 못한 종목
    pub pending: usize,
    /// 이전 실행에서 이미 완료되어 건너뛴 종목
    pub resumed: usize,
    /// 저장된 최신 거래일이 조회 기간 끝 이후라 조회 없이 완료한 종목
    pub up_to_date: usize,
    /// 저장된 일봉 수
    pub records_persisted: u64,
    /// 실제 조회 호출 수
    pub fetch_attempts: u64,
    /// 실패 종목 목록
    pub failed_items: Vec<FailedItem>,
    /// 세션 만료/저장소 장애로 중단됨
    pub halted: bool,
    /// 외부 중단 요청 (SIGINT 등)
    pub cancelled: bool,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(total: usize) -> Self {
        Self {
            started_at: Utc::now(),
            total,
            completed: 0,
            failed: 0,
            skipped: 0,
            pending: 0,
            resumed: 0,
            up_to_date: 0,
            records_persisted: 0,
            fetch_attempts: 0,
            failed_items: Vec::new(),
            halted: false,
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }

    /// 실행 종료 처리: 남은 종목 수와 소요 시간 확정.
    pub fn finish(&mut self, elapsed: Duration) {
        self.pending = self
            .total
            .saturating_sub(self.completed + self.failed + self.skipped);
        self.elapsed = elapsed;
    }

    /// 모든 종목이 종료 상태에 도달했는지.
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && !self.halted && !self.cancelled
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }

    /// 실패 종목코드 목록.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed_items.iter().map(|f| f.item_id.as_str()).collect()
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            completed = self.completed,
            failed = self.failed,
            skipped = self.skipped,
            pending = self.pending,
            resumed = self.resumed,
            up_to_date = self.up_to_date,
            records = self.records_persisted,
            fetch_attempts = self.fetch_attempts,
            halted = self.halted,
            cancelled = self.cancelled,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "수집 실행 종료"
        );

        for item in &self.failed_items {
            tracing::warn!(
                item_id = %item.item_id,
                attempts = item.attempts,
                error = %item.error,
                "실패 종목"
            );
        }
    }
}

/// 진행 중 실행의 현황.
///
/// 실행 중에는 오케스트레이터가 종목 시작/종료마다 갱신하고,
/// 프로세스가 죽은 뒤에는 진행 상태 저장소의 집계로 다시 만듭니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// 실행 시작 시각 (저장소 집계로 재구성한 경우 `None`)
    pub started_at: Option<DateTime<Utc>>,
    pub total_items: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    /// 가장 최근에 시작한 작업 중 종목
    pub current_item_id: Option<String>,
    /// 작업 중인 종목 전체 (워커가 여럿이면 둘 이상)
    pub current_item_ids: Vec<String>,
}

impl RunContext {
    /// 새 실행의 현황.
    pub fn started(total_items: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(started_at),
            total_items: total_items as u64,
            ..Default::default()
        }
    }

    /// 상태 집계와 작업 중 종목으로 현황 재구성.
    pub fn from_counts(counts: &StatusCounts, current_item_ids: Vec<String>) -> Self {
        Self {
            started_at: None,
            total_items: counts.total(),
            completed_count: counts.completed,
            failed_count: counts.failed,
            skipped_count: counts.skipped,
            current_item_id: current_item_ids.last().cloned(),
            current_item_ids,
        }
    }

    /// 종목 처리 시작.
    pub fn begin_item(&mut self, item_id: &str) {
        self.current_item_ids.push(item_id.to_string());
        self.current_item_id = Some(item_id.to_string());
    }

    /// 종목 처리 종료. 종료 상태가 아니면 (중단, 보류) 작업 중 목록에서만 뺍니다.
    pub fn finish_item(&mut self, item_id: &str, status: CollectionStatus) {
        self.current_item_ids.retain(|id| id != item_id);
        if self.current_item_id.as_deref() == Some(item_id) {
            self.current_item_id = self.current_item_ids.last().cloned();
        }

        if !status.is_terminal() {
            return;
        }
        match status {
            CollectionStatus::Completed => self.completed_count += 1,
            CollectionStatus::Failed => self.failed_count += 1,
            CollectionStatus::Skipped => self.skipped_count += 1,
            CollectionStatus::Pending | CollectionStatus::InProgress => {}
        }
    }

    /// 아직 종료 상태가 아닌 종목 수.
    pub fn remaining(&self) -> u64 {
        self.total_items
            .saturating_sub(self.completed_count + self.failed_count + self.skipped_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_counts_remaining() {
        let mut report = RunReport::new(10);
        report.completed = 6;
        report.failed = 1;
        report.skipped = 1;
        report.finish(Duration::from_secs(3));

        assert_eq!(report.pending, 2);
        assert!(!report.is_complete());
        assert!((report.success_rate() - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_report() {
        let mut report = RunReport::new(0);
        report.finish(Duration::ZERO);
        assert!(report.is_complete());
        assert_eq!(report.success_rate(), 0.0);
    }

    #[test]
    fn test_context_from_counts() {
        let counts = StatusCounts {
            pending: 3,
            in_progress: 1,
            completed: 5,
            failed: 1,
            skipped: 0,
        };
        let ctx = RunContext::from_counts(&counts, vec!["005930".to_string()]);
        assert_eq!(ctx.total_items, 10);
        assert_eq!(ctx.remaining(), 4);
        assert_eq!(ctx.current_item_ids, vec!["005930"]);
        assert_eq!(ctx.current_item_id.as_deref(), Some("005930"));
        assert!(ctx.started_at.is_none());
    }

    #[test]
    fn test_context_tracks_items() {
        let mut ctx = RunContext::started(3, Utc::now());
        ctx.begin_item("A");
        ctx.begin_item("B");
        assert_eq!(ctx.current_item_id.as_deref(), Some("B"));

        ctx.finish_item("B", CollectionStatus::Completed);
        assert_eq!(ctx.current_item_id.as_deref(), Some("A"));
        assert_eq!(ctx.completed_count, 1);

        // 중단된 종목은 집계하지 않음
        ctx.finish_item("A", CollectionStatus::InProgress);
        assert!(ctx.current_item_id.is_none());
        assert!(ctx.current_item_ids.is_empty());
        assert_eq!(ctx.remaining(), 2);
        assert!(ctx.started_at.is_some());
    }
}
