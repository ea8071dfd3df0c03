//! 저장소 계층 에러 타입.
//!
//! 진행 상태 저장소와 가격 저장소가 공통으로 반환하는 에러를 정의합니다.

use thiserror::Error;

/// 저장소 관련 에러.
#[derive(Debug, Error)]
pub enum StorageError {
    /// 데이터베이스 연결 에러
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// 쿼리 실행 에러
    #[error("Query error: {0}")]
    QueryError(String),

    /// 데이터 삽입 에러
    #[error("Insert error: {0}")]
    InsertError(String),

    /// 데이터 삭제 에러
    #[error("Delete error: {0}")]
    DeleteError(String),

    /// 마이그레이션 에러
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// 연결 풀 소진
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// 잘못된 데이터 형식
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// 저장소 사용 불가
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// 저장소 작업을 위한 Result 타입.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(feature = "sqlx-support")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StorageError::PoolExhausted,
            sqlx::Error::PoolClosed => StorageError::Unavailable("pool closed".to_string()),
            sqlx::Error::Io(e) => StorageError::ConnectionError(e.to_string()),
            sqlx::Error::Database(db_err) => StorageError::QueryError(db_err.message().to_string()),
            sqlx::Error::Migrate(e) => StorageError::MigrationError(e.to_string()),
            _ => StorageError::QueryError(err.to_string()),
        }
    }
}
