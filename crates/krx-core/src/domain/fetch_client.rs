//! 외부 데이터 소스 추상화.
//!
//! 로그인/세션/전송 계층은 이 trait 뒤에 숨겨지며, 수집기는
//! "종목 X의 일봉을 가져오거나 실패" 라는 능력만 사용합니다.
//! 재인증 로직은 구현체 쪽 책임입니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::PriceRecord;

// =============================================================================
// 에러 타입
// =============================================================================

/// 데이터 소스 에러 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// 세션 만료 (실행 전체 중단)
    AuthExpired,
    /// 외부 요청 한도 초과
    RateLimited,
    /// 종목 없음
    NotFound,
    /// 일시적 오류 (네트워크, 서버, 타임아웃)
    Transient,
    /// 응답 형식 오류
    MalformedResponse,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotFound => "NOT_FOUND",
            Self::Transient => "TRANSIENT",
            Self::MalformedResponse => "MALFORMED_RESPONSE",
        };
        f.write_str(s)
    }
}

/// 데이터 소스 에러.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// 세션/인증 만료
    #[error("세션 만료: {0}")]
    AuthExpired(String),

    /// 요청 한도 초과
    #[error("요청 한도 초과: {0}")]
    RateLimited(String),

    /// 종목을 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 일시적 오류
    #[error("일시적 오류: {0}")]
    Transient(String),

    /// 응답 형식 오류
    #[error("응답 형식 오류 ({payload_len} bytes): {detail}")]
    MalformedResponse { detail: String, payload_len: usize },

    /// 호출 타임아웃
    #[error("응답 타임아웃 ({0:?})")]
    Timeout(Duration),
}

impl FetchError {
    /// 에러 종류. 타임아웃은 일시적 오류로 분류됩니다.
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::AuthExpired(_) => FetchErrorKind::AuthExpired,
            FetchError::RateLimited(_) => FetchErrorKind::RateLimited,
            FetchError::NotFound(_) => FetchErrorKind::NotFound,
            FetchError::Transient(_) | FetchError::Timeout(_) => FetchErrorKind::Transient,
            FetchError::MalformedResponse { .. } => FetchErrorKind::MalformedResponse,
        }
    }

    /// 종목 단위 재시도로 해결할 수 없어 실행을 멈춰야 하는지.
    pub fn is_session_fatal(&self) -> bool {
        self.kind() == FetchErrorKind::AuthExpired
    }
}

// =============================================================================
// FetchClient Trait
// =============================================================================

/// 조회 기간 (양 끝 포함, 비어 있으면 데이터 소스 기본값).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    /// 기간 전체 (데이터 소스가 제공하는 전체 이력).
    pub fn full() -> Self {
        Self::default()
    }
}

/// 일봉 데이터 소스.
///
/// # Errors
///
/// - `FetchError::AuthExpired`: 세션 만료, 수집 실행 전체가 멈춤
/// - 그 외: 종목 단위 재시도 대상
#[async_trait]
pub trait FetchClient: Send + Sync {
    /// 종목의 일봉 레코드를 조회합니다.
    async fn fetch(&self, item_id: &str, range: &DateRange)
        -> Result<Vec<PriceRecord>, FetchError>;

    /// 데이터 소스 이름 (로그용).
    fn name(&self) -> &str {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(30)).kind(),
            FetchErrorKind::Transient
        );
        assert_eq!(
            FetchError::MalformedResponse {
                detail: "missing OutBlock_1".to_string(),
                payload_len: 12,
            }
            .kind(),
            FetchErrorKind::MalformedResponse
        );
        assert!(FetchError::AuthExpired("token".to_string()).is_session_fatal());
        assert!(!FetchError::RateLimited("429".to_string()).is_session_fatal());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FetchErrorKind::AuthExpired.to_string(), "AUTH_EXPIRED");
        assert_eq!(FetchErrorKind::MalformedResponse.to_string(), "MALFORMED_RESPONSE");
    }
}
