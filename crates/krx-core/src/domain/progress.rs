//! 종목별 수집 진행 상태.
//!
//! 상태 전이는 `PENDING → IN_PROGRESS → {COMPLETED | FAILED | SKIPPED}` 이며,
//! 전이 메서드가 레코드 불변식을 유지합니다:
//! - `COMPLETED`이면 `completed_at`이 설정되고 `error_message`는 비어 있음
//! - `attempt_count`는 증가만 함

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::WorkItem;

/// 수집 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    /// 아직 시도하지 않음
    Pending,
    /// 시도 중 (크래시 시 진단용 표시)
    InProgress,
    /// 수집 및 저장 완료
    Completed,
    /// 재시도 한도 초과
    Failed,
    /// 정책상 제외 (상장폐지 등)
    Skipped,
}

impl CollectionStatus {
    /// 모든 상태 (집계 순서).
    pub const ALL: [CollectionStatus; 5] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
        Self::Skipped,
    ];

    /// DB 저장용 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// 같은 실행 안에서 더 이상 자동 재시도하지 않는 상태인지.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            // 구버전 진행 테이블은 "processing"을 사용
            "in_progress" | "processing" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Unknown collection status: {}", s)),
        }
    }
}

/// 종목별 진행 레코드 (종목당 정확히 하나, upsert).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// 종목코드
    pub item_id: String,
    /// 종목명
    pub display_name: String,
    /// 현재 상태
    pub status: CollectionStatus,
    /// 누적 시도 횟수
    pub attempt_count: u32,
    /// 마지막 시도 시각
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// 성공 시각
    pub completed_at: Option<DateTime<Utc>>,
    /// 마지막 실패 내용
    pub error_message: Option<String>,
    /// 마지막 성공 시 저장된 레코드 수
    pub record_count: u64,
    /// 마지막 변경 시각
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// 처음 보는 종목의 `PENDING` 레코드 생성.
    pub fn pending(item: &WorkItem) -> Self {
        Self {
            item_id: item.id.clone(),
            display_name: item.display_name.clone(),
            status: CollectionStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            completed_at: None,
            error_message: None,
            record_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// 시도 시작: `IN_PROGRESS`로 전환하고 시도 횟수를 올립니다.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = CollectionStatus::InProgress;
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.updated_at = now;
    }

    /// 수집 성공.
    pub fn mark_completed(&mut self, record_count: u64, now: DateTime<Utc>) {
        self.status = CollectionStatus::Completed;
        self.completed_at = Some(now);
        self.error_message = None;
        self.record_count = record_count;
        self.updated_at = now;
    }

    /// 시도 실패 내용 기록 (상태는 유지).
    pub fn record_failure(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.error_message = Some(message.into());
        self.updated_at = now;
    }

    /// 재시도 한도 초과로 실패 확정.
    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = CollectionStatus::Failed;
        self.updated_at = now;
    }

    /// 정책상 제외.
    pub fn mark_skipped(&mut self, reason: Option<String>, now: DateTime<Utc>) {
        self.status = CollectionStatus::Skipped;
        if reason.is_some() {
            self.error_message = reason;
        }
        self.updated_at = now;
    }

    /// 실행 중단으로 시도를 보류 (`PENDING`으로 되돌림, 시도 횟수 유지).
    pub fn revert_to_pending(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = CollectionStatus::Pending;
        self.error_message = Some(message.into());
        self.updated_at = now;
    }

    /// 레코드 불변식 확인.
    pub fn is_consistent(&self) -> bool {
        if self.status == CollectionStatus::Completed {
            return self.completed_at.is_some() && self.error_message.is_none();
        }
        true
    }
}

/// 상태별 종목 수 집계.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl StatusCounts {
    /// 특정 상태 수 증가.
    pub fn add(&mut self, status: CollectionStatus, count: u64) {
        match status {
            CollectionStatus::Pending => self.pending += count,
            CollectionStatus::InProgress => self.in_progress += count,
            CollectionStatus::Completed => self.completed += count,
            CollectionStatus::Failed => self.failed += count,
            CollectionStatus::Skipped => self.skipped += count,
        }
    }

    /// 특정 상태 수 조회.
    pub fn get(&self, status: CollectionStatus) -> u64 {
        match status {
            CollectionStatus::Pending => self.pending,
            CollectionStatus::InProgress => self.in_progress,
            CollectionStatus::Completed => self.completed,
            CollectionStatus::Failed => self.failed,
            CollectionStatus::Skipped => self.skipped,
        }
    }

    /// 전체 종목 수.
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.completed + self.failed + self.skipped
    }

    /// 완료율 (%).
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.completed as f64 / total as f64) * 100.0
        }
    }
}

impl FromIterator<(CollectionStatus, u64)> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = (CollectionStatus, u64)>>(iter: I) -> Self {
        let mut counts = StatusCounts::default();
        for (status, count) in iter {
            counts.add(status, count);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProgressRecord {
        ProgressRecord::pending(&WorkItem::new("005930", "삼성전자"))
    }

    #[test]
    fn test_status_round_trip_and_legacy_name() {
        for status in CollectionStatus::ALL {
            assert_eq!(status.as_str().parse::<CollectionStatus>().unwrap(), status);
        }
        assert_eq!(
            "processing".parse::<CollectionStatus>().unwrap(),
            CollectionStatus::InProgress
        );
        assert!("done".parse::<CollectionStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CollectionStatus::Pending.is_terminal());
        assert!(!CollectionStatus::InProgress.is_terminal());
        assert!(CollectionStatus::Completed.is_terminal());
        assert!(CollectionStatus::Failed.is_terminal());
        assert!(CollectionStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_completed_clears_error() {
        let now = Utc::now();
        let mut rec = record();

        rec.begin_attempt(now);
        rec.record_failure("timeout", now);
        assert_eq!(rec.error_message.as_deref(), Some("timeout"));

        rec.begin_attempt(now);
        rec.mark_completed(5, now);

        assert_eq!(rec.status, CollectionStatus::Completed);
        assert_eq!(rec.attempt_count, 2);
        assert_eq!(rec.record_count, 5);
        assert!(rec.error_message.is_none());
        assert!(rec.is_consistent());
    }

    #[test]
    fn test_revert_keeps_attempt_count() {
        let now = Utc::now();
        let mut rec = record();

        rec.begin_attempt(now);
        rec.revert_to_pending("session expired", now);

        assert_eq!(rec.status, CollectionStatus::Pending);
        assert_eq!(rec.attempt_count, 1);
    }

    #[test]
    fn test_status_counts() {
        let counts: StatusCounts = vec![
            (CollectionStatus::Completed, 3),
            (CollectionStatus::Failed, 1),
            (CollectionStatus::Completed, 1),
            (CollectionStatus::Skipped, 0),
        ]
        .into_iter()
        .collect();

        assert_eq!(counts.completed, 4);
        assert_eq!(counts.total(), 5);
        assert!((counts.success_rate() - 80.0).abs() < f64::EPSILON);
        assert_eq!(StatusCounts::default().success_rate(), 0.0);
    }
}
