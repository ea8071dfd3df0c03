//! 환경변수 기반 설정 모듈.

use crate::error::CollectorError;
use crate::modules::{
    BackoffKind, EmptyResultPolicy, InterruptedAttemptPolicy, OrchestratorConfig,
};
use crate::Result;
use chrono::NaiveDate;
use krx_core::DateRange;
use std::time::Duration;

/// Collector 전체 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 데이터베이스 URL (`--dry-run`에서는 불필요)
    pub database_url: Option<String>,
    /// KRX API 설정
    pub krx: KrxApiConfig,
    /// 일봉 수집 설정
    pub collect: CollectConfig,
}

/// KRX Open API 설정
#[derive(Debug, Clone, Default)]
pub struct KrxApiConfig {
    /// 인증키
    pub api_key: Option<String>,
    /// 기본 URL 재정의
    pub base_url: Option<String>,
}

/// 일봉 수집 설정
#[derive(Debug, Clone)]
pub struct CollectConfig {
    /// API 요청 간 딜레이 (밀리초)
    pub request_delay_ms: u64,
    /// 대기 없이 보낼 수 있는 요청 수
    pub max_burst: Option<u32>,
    /// 종목당 최대 시도 횟수
    pub max_retry_attempts: u32,
    /// 재시도 대기 (초)
    pub retry_delay_secs: f64,
    /// 재시도 대기 방식
    pub retry_backoff: BackoffKind,
    /// 지수 대기 상한 (초)
    pub retry_max_delay_secs: f64,
    /// 빈 결과 처리
    pub treat_empty_as: EmptyResultPolicy,
    /// 동시 워커 수
    pub workers: usize,
    /// 조회 타임아웃 (초)
    pub fetch_timeout_secs: u64,
    /// 이전 실행에서 중단된 시도 처리
    pub interrupted_attempts: InterruptedAttemptPolicy,
    /// 수집 시작 날짜 (YYYYMMDD)
    pub start_date: Option<String>,
    /// 수집 종료 날짜 (YYYYMMDD)
    pub end_date: Option<String>,
    /// 저장된 최신 거래일 이후만 조회
    pub incremental: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 3600,
            max_burst: None,
            max_retry_attempts: 3,
            retry_delay_secs: 3.6,
            retry_backoff: BackoffKind::Fixed,
            retry_max_delay_secs: 60.0,
            treat_empty_as: EmptyResultPolicy::Failure,
            workers: 1,
            fetch_timeout_secs: 30,
            interrupted_attempts: InterruptedAttemptPolicy::Consume,
            start_date: None,
            end_date: None,
            incremental: true,
        }
    }
}

impl CollectorConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = CollectConfig::default();

        Self {
            database_url: env_var_opt("DATABASE_URL"),
            krx: KrxApiConfig {
                api_key: env_var_opt("KRX_API_KEY"),
                base_url: env_var_opt("KRX_API_BASE_URL"),
            },
            collect: CollectConfig {
                request_delay_ms: env_var_parse("API_REQUEST_DELAY_MS", defaults.request_delay_ms),
                max_burst: env_var_opt("RATE_LIMIT_MAX_BURST").and_then(|v| v.parse().ok()),
                max_retry_attempts: env_var_parse(
                    "MAX_RETRY_ATTEMPTS",
                    defaults.max_retry_attempts,
                ),
                retry_delay_secs: env_var_parse("RETRY_DELAY_SECONDS", defaults.retry_delay_secs),
                retry_backoff: env_var_parse("RETRY_BACKOFF", defaults.retry_backoff),
                retry_max_delay_secs: env_var_parse(
                    "RETRY_MAX_DELAY_SECONDS",
                    defaults.retry_max_delay_secs,
                ),
                treat_empty_as: env_var_parse("TREAT_EMPTY_AS", defaults.treat_empty_as),
                workers: env_var_parse("COLLECT_WORKERS", defaults.workers),
                fetch_timeout_secs: env_var_parse(
                    "FETCH_TIMEOUT_SECS",
                    defaults.fetch_timeout_secs,
                ),
                interrupted_attempts: env_var_parse(
                    "INTERRUPTED_ATTEMPT_POLICY",
                    defaults.interrupted_attempts,
                ),
                start_date: env_var_opt("COLLECT_START_DATE"),
                end_date: env_var_opt("COLLECT_END_DATE"),
                incremental: env_var_parse("COLLECT_INCREMENTAL", defaults.incremental),
            },
        }
    }

    /// DB가 필요한 명령에서 URL 확인
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            CollectorError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
        })
    }

    /// KRX 인증키 확인
    pub fn require_api_key(&self) -> Result<&str> {
        self.krx.api_key.as_deref().ok_or_else(|| {
            CollectorError::Config("KRX_API_KEY 환경변수가 설정되지 않았습니다".to_string())
        })
    }
}

impl CollectConfig {
    /// API 요청 간 딜레이를 Duration으로 반환
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// 조회 기간 해석
    pub fn date_range(&self) -> Result<DateRange> {
        Ok(DateRange::new(
            parse_yyyymmdd(self.start_date.as_deref())?,
            parse_yyyymmdd(self.end_date.as_deref())?,
        ))
    }

    /// 오케스트레이터 설정으로 변환
    pub fn to_orchestrator_config(&self) -> Result<OrchestratorConfig> {
        if self.max_retry_attempts == 0 {
            return Err(CollectorError::Config(
                "MAX_RETRY_ATTEMPTS는 1 이상이어야 합니다".to_string(),
            ));
        }

        let date_range = self.date_range()?;
        if let (Some(from), Some(to)) = (date_range.from, date_range.to) {
            if from > to {
                return Err(CollectorError::Config(format!(
                    "수집 시작일({})이 종료일({})보다 늦습니다",
                    from, to
                )));
            }
        }

        let retry_base = secs_to_duration(self.retry_delay_secs, Duration::from_millis(3600));
        let retry_max = secs_to_duration(self.retry_max_delay_secs, Duration::from_secs(60));

        Ok(OrchestratorConfig {
            max_retry_attempts: self.max_retry_attempts,
            retry: self.retry_backoff.build(retry_base, retry_max),
            min_interval: self.request_delay(),
            max_burst: self.max_burst,
            treat_empty_as: self.treat_empty_as,
            workers: self.workers.max(1),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
            interrupted_attempts: self.interrupted_attempts,
            date_range,
            incremental: self.incremental,
        })
    }
}

/// YYYYMMDD 날짜 파싱 (빈 값은 None)
fn parse_yyyymmdd(value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(v, "%Y%m%d")
            .map(Some)
            .map_err(|e| CollectorError::Config(format!("잘못된 날짜 형식 '{}': {}", v, e))),
    }
}

fn secs_to_duration(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 비어 있지 않은 환경변수 값
fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::RetryBackoff;

    #[test]
    fn test_default_conversion() {
        let config = CollectConfig::default().to_orchestrator_config().unwrap();
        assert_eq!(config.min_interval, Duration::from_millis(3600));
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.retry, RetryBackoff::Fixed(Duration::from_millis(3600)));
        assert_eq!(config.date_range, DateRange::full());
        assert!(config.incremental);

        let full = CollectConfig {
            incremental: false,
            ..Default::default()
        };
        assert!(!full.to_orchestrator_config().unwrap().incremental);
    }

    #[test]
    fn test_date_range_parsing() {
        let collect = CollectConfig {
            start_date: Some("20240101".to_string()),
            end_date: Some("20241231".to_string()),
            ..Default::default()
        };
        let range = collect.date_range().unwrap();
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(range.to, NaiveDate::from_ymd_opt(2024, 12, 31));

        let bad = CollectConfig {
            start_date: Some("2024-01-01".to_string()),
            ..Default::default()
        };
        assert!(bad.date_range().is_err());
    }

    #[test]
    fn test_rejects_inverted_range_and_zero_retries() {
        let inverted = CollectConfig {
            start_date: Some("20240201".to_string()),
            end_date: Some("20240101".to_string()),
            ..Default::default()
        };
        assert!(inverted.to_orchestrator_config().is_err());

        let zero = CollectConfig {
            max_retry_attempts: 0,
            ..Default::default()
        };
        assert!(zero.to_orchestrator_config().is_err());
    }

    #[test]
    fn test_exponential_backoff_conversion() {
        let collect = CollectConfig {
            retry_backoff: BackoffKind::Exponential,
            retry_delay_secs: 2.0,
            retry_max_delay_secs: 10.0,
            ..Default::default()
        };
        let config = collect.to_orchestrator_config().unwrap();
        assert_eq!(
            config.retry,
            RetryBackoff::Exponential {
                initial: Duration::from_secs(2),
                max: Duration::from_secs(10),
            }
        );
    }
}
