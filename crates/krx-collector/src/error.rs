//! 에러 타입 정의.

use crate::modules::OrchestratorError;
use krx_core::{FetchError, StorageError};
use thiserror::Error;

/// Collector 에러 타입
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 설정 에러
    #[error("Configuration error: {0}")]
    Config(String),

    /// 저장소 에러
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// 데이터 소스 준비 에러
    #[error("Data source error: {0}")]
    DataSource(#[from] FetchError),

    /// 유니버스/제외 목록 파일 에러
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 수집 실행 중단
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;
