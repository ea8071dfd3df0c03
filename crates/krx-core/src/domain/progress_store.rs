//! 진행 상태 저장소 추상화.

use async_trait::async_trait;

use super::{CollectionStatus, ProgressRecord, StatusCounts};
use crate::error::StorageResult;

/// 종목별 진행 레코드의 내구성 저장소.
///
/// 프로세스 크래시 후에도 유지되어야 하며, `upsert`는 종목 단위로 원자적이어야 합니다.
/// 서로 다른 종목에 대한 동시 upsert는 독립적입니다.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// 종목의 진행 레코드 조회.
    async fn get(&self, item_id: &str) -> StorageResult<Option<ProgressRecord>>;

    /// 진행 레코드 저장 (종목코드 기준 upsert).
    async fn upsert(&self, record: &ProgressRecord) -> StorageResult<()>;

    /// 특정 상태의 레코드 목록.
    async fn list_by_status(&self, status: CollectionStatus) -> StorageResult<Vec<ProgressRecord>>;

    /// 상태별 종목 수.
    async fn counts_by_status(&self) -> StorageResult<StatusCounts>;

    /// 가장 최근에 시도된 레코드.
    async fn latest_activity(&self) -> StorageResult<Option<ProgressRecord>>;
}
