//! KRX Open API 일봉 조회 클라이언트.
//!
//! 한국거래소(KRX) Open API의 개별 종목 일별 시세(`stk_isu_ohlcv`)를 조회하여
//! `PriceRecord`로 변환합니다.
//!
//! # 에러 분류
//!
//! | HTTP 응답 | FetchError |
//! |-----------|------------|
//! | 401, 403 | `AuthExpired` |
//! | 429 | `RateLimited` |
//! | 404 | `NotFound` |
//! | 5xx, 그 외, 네트워크 오류 | `Transient` |
//! | JSON 파싱 실패 | `MalformedResponse` |
//!
//! # 사용 예제
//!
//! ```rust,ignore
//! use krx_data::KrxDailyPriceClient;
//!
//! let client = KrxDailyPriceClient::new("YOUR_AUTH_KEY")?;
//! let records = client.fetch("005930", &DateRange::full()).await?;
//! ```

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Asia::Seoul;
use krx_core::{DateRange, FetchClient, FetchError, PriceRecord};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// KRX OPEN API 기본 URL.
pub const DEFAULT_BASE_URL: &str = "https://data-dbg.krx.co.kr";

/// 시작일 미지정 시 조회 시작일 (YYYYMMDD).
const DEFAULT_HISTORY_START: &str = "19900101";

/// KRX 일봉 조회 클라이언트.
#[derive(Clone)]
pub struct KrxDailyPriceClient {
    client: reqwest::Client,
    auth_key: String,
    base_url: String,
}

/// API 응답 래퍼.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(rename = "OutBlock_1")]
    out_block: Option<Vec<RawOhlcv>>,
}

#[derive(Debug, Deserialize)]
struct RawOhlcv {
    #[serde(rename = "TRD_DD")]
    date: String,
    #[serde(rename = "TDD_OPNPRC", default)]
    open: Option<String>,
    #[serde(rename = "TDD_HGPRC", default)]
    high: Option<String>,
    #[serde(rename = "TDD_LWPRC", default)]
    low: Option<String>,
    #[serde(rename = "TDD_CLSPRC", default)]
    close: Option<String>,
    #[serde(rename = "ACC_TRDVOL", default)]
    volume: Option<String>,
    #[serde(rename = "ACC_TRDVAL", default)]
    turnover: Option<String>,
}

impl KrxDailyPriceClient {
    /// 새 클라이언트 생성.
    ///
    /// HTTP 타임아웃은 수집기가 호출 단위로 적용하므로 여기서는 연결 타임아웃만 둡니다.
    pub fn new(auth_key: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::Transient(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            auth_key: auth_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// 기본 URL 변경 (프록시, 테스트 서버).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn request_daily(
        &self,
        ticker: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<(Vec<RawOhlcv>, usize), FetchError> {
        let url = format!("{}/svc/sample/apis/stk/stk_isu_ohlcv", self.base_url);

        tracing::debug!(ticker = ticker, start_date, end_date, "KRX API 요청");

        let response = self
            .client
            .get(&url)
            .query(&[("isuCd", ticker), ("strtDd", start_date), ("endDd", end_date)])
            .header("AUTH_KEY", &self.auth_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("KRX API 요청 실패: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("KRX API 응답 수신 실패: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status, ticker, &body));
        }

        let payload_len = body.len();
        let data: ApiResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::MalformedResponse {
                detail: e.to_string(),
                payload_len,
            })?;

        Ok((data.out_block.unwrap_or_default(), payload_len))
    }
}

#[async_trait]
impl FetchClient for KrxDailyPriceClient {
    async fn fetch(
        &self,
        item_id: &str,
        range: &DateRange,
    ) -> Result<Vec<PriceRecord>, FetchError> {
        let start_date = range
            .from
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_else(|| DEFAULT_HISTORY_START.to_string());
        let end_date = range
            .to
            .unwrap_or_else(market_today)
            .format("%Y%m%d")
            .to_string();

        let (raw_rows, payload_len) = self.request_daily(item_id, &start_date, &end_date).await?;
        let raw_count = raw_rows.len();
        let records = convert_rows(item_id, raw_rows);

        if raw_count > 0 && records.is_empty() {
            return Err(FetchError::MalformedResponse {
                detail: format!("{}개 행 모두 날짜/가격 해석 불가", raw_count),
                payload_len,
            });
        }

        if records.len() < raw_count {
            tracing::debug!(
                ticker = item_id,
                dropped = raw_count - records.len(),
                "해석할 수 없는 행 제외"
            );
        }

        tracing::debug!(ticker = item_id, count = records.len(), "일별 시세 조회 완료");
        Ok(records)
    }

    fn name(&self) -> &str {
        "krx"
    }
}

/// HTTP 상태 코드를 에러 종류로 변환.
fn classify_status(status: StatusCode, ticker: &str, body: &str) -> FetchError {
    let detail = format!("KRX API 오류 [{}]: {} - {}", ticker, status, truncate(body, 200));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::AuthExpired(detail),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited(detail),
        StatusCode::NOT_FOUND => FetchError::NotFound(detail),
        _ => FetchError::Transient(detail),
    }
}

fn convert_rows(item_id: &str, rows: Vec<RawOhlcv>) -> Vec<PriceRecord> {
    rows.into_iter()
        .filter_map(|o| {
            let date = parse_date(&o.date)?;
            let close = parse_decimal_opt(&o.close)?;
            if close.is_zero() {
                return None;
            }
            Some(PriceRecord {
                item_id: item_id.to_string(),
                date,
                open: parse_decimal_opt(&o.open).unwrap_or_default(),
                high: parse_decimal_opt(&o.high).unwrap_or_default(),
                low: parse_decimal_opt(&o.low).unwrap_or_default(),
                close,
                volume: o
                    .volume
                    .as_ref()
                    .and_then(|v| v.replace(',', "").parse().ok())
                    .unwrap_or(0),
                turnover: parse_decimal_opt(&o.turnover).unwrap_or_default(),
            })
        })
        .collect()
}

/// 한국 시장 기준 오늘 날짜.
pub fn market_today() -> NaiveDate {
    Utc::now().with_timezone(&Seoul).date_naive()
}

/// 문자열을 Decimal로 파싱 (쉼표, 부호 제거).
fn parse_decimal_opt(s: &Option<String>) -> Option<Decimal> {
    s.as_ref().and_then(|v| {
        let cleaned = v.replace([',', '+'], "");
        let cleaned = cleaned.trim_start_matches('-');
        cleaned.parse().ok()
    })
}

/// YYYY/MM/DD 또는 YYYYMMDD 형식의 날짜 파싱.
fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.contains('/') {
        NaiveDate::parse_from_str(s, "%Y/%m/%d").ok()
    } else {
        NaiveDate::parse_from_str(s, "%Y%m%d").ok()
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(
            parse_decimal_opt(&Some("1,234.56".to_string())),
            Some(Decimal::new(123456, 2))
        );
        // 키움/KRX 가격 필드의 등락 부호 제거
        assert_eq!(
            parse_decimal_opt(&Some("-71,500".to_string())),
            Some(Decimal::new(71500, 0))
        );
        assert_eq!(parse_decimal_opt(&None), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15);
        assert_eq!(parse_date("2024/03/15"), expected);
        assert_eq!(parse_date("20240315"), expected);
        assert_eq!(parse_date("15-03-2024"), None);
    }

    #[test]
    fn test_convert_rows_skips_unusable() {
        let rows = vec![
            RawOhlcv {
                date: "2024/03/15".to_string(),
                open: Some("71,000".to_string()),
                high: Some("72,000".to_string()),
                low: Some("70,500".to_string()),
                close: Some("71,500".to_string()),
                volume: Some("12,345".to_string()),
                turnover: Some("882,000,000".to_string()),
            },
            RawOhlcv {
                date: "bad".to_string(),
                open: None,
                high: None,
                low: None,
                close: Some("1".to_string()),
                volume: None,
                turnover: None,
            },
            RawOhlcv {
                date: "2024/03/14".to_string(),
                open: None,
                high: None,
                low: None,
                close: Some("0".to_string()),
                volume: None,
                turnover: None,
            },
        ];

        let records = convert_rows("005930", rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].volume, 12345);
        assert_eq!(records[0].close, Decimal::new(71500, 0));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "005930", ""),
            FetchError::AuthExpired(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "005930", ""),
            FetchError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "005930", ""),
            FetchError::Transient(_)
        ));
    }
}
