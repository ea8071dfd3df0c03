//! 가격 저장소 추상화.

use async_trait::async_trait;
use chrono::NaiveDate;

use super::PriceRecord;
use crate::error::StorageResult;

/// 일봉 레코드 저장소.
///
/// (종목코드, 거래일) 기준 멱등 upsert이며, 배치는 전부 저장되거나 전부 실패해야 합니다.
#[async_trait]
pub trait PriceSink: Send + Sync {
    /// 종목의 일봉 배치를 저장하고 저장된 레코드 수를 반환합니다.
    ///
    /// 같은 거래일이 배치에 여러 번 있으면 마지막 행만 저장하고 한 건으로 셉니다.
    async fn upsert_records(&self, item_id: &str, records: &[PriceRecord]) -> StorageResult<usize>;

    /// 종목의 가장 최근 저장 거래일. 저장된 데이터가 없으면 `None`.
    async fn latest_date(&self, item_id: &str) -> StorageResult<Option<NaiveDate>>;

    /// 종목의 저장된 일봉 수.
    async fn stored_count(&self, item_id: &str) -> StorageResult<u64>;
}
