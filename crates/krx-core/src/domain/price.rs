//! 일봉 가격 레코드.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 종목별 일봉 레코드.
///
/// (`item_id`, `date`)가 유일 키이며, 같은 날짜를 다시 저장하면 덮어씁니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// 종목코드
    pub item_id: String,
    /// 거래일
    pub date: NaiveDate,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량
    pub volume: i64,
    /// 거래대금
    pub turnover: Decimal,
}

impl PriceRecord {
    /// 저장 키 (종목코드, 거래일).
    pub fn key(&self) -> (&str, NaiveDate) {
        (&self.item_id, self.date)
    }
}

/// 배치를 (종목코드, 거래일) 기준으로 합칩니다.
///
/// 같은 키가 여러 번 나오면 마지막 행을 남기며, 결과는 키 순서로 정렬됩니다.
/// 한 문장의 `ON CONFLICT DO UPDATE`는 같은 행을 두 번 갱신할 수 없으므로 저장 전에 호출합니다.
pub fn dedup_by_date(records: &[PriceRecord]) -> Vec<PriceRecord> {
    let mut latest: BTreeMap<(&str, NaiveDate), &PriceRecord> = BTreeMap::new();
    for record in records {
        latest.insert(record.key(), record);
    }
    latest.into_values().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(item_id: &str, date: &str, close: i64) -> PriceRecord {
        PriceRecord {
            item_id: item_id.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: Decimal::from(close),
            high: Decimal::from(close),
            low: Decimal::from(close),
            close: Decimal::from(close),
            volume: 10,
            turnover: Decimal::from(close * 10),
        }
    }

    #[test]
    fn test_dedup_keeps_last_row_per_date() {
        let batch = vec![
            bar("005930", "2024-03-15", 1),
            bar("005930", "2024-03-14", 7),
            bar("005930", "2024-03-15", 2),
        ];

        let deduped = dedup_by_date(&batch);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].date.to_string(), "2024-03-14");
        assert_eq!(deduped[1].close, Decimal::from(2));
    }

    #[test]
    fn test_dedup_empty_batch() {
        assert!(dedup_by_date(&[]).is_empty());
    }
}
