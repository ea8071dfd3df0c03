//! 수집 데이터 저장 및 외부 데이터 소스.
//!
//! 이 crate는 다음을 제공합니다:
//! - PostgreSQL 기반 진행 상태 저장소 / 일봉 저장소
//! - 테스트 및 dry-run용 메모리 저장소
//! - KRX Open API 일봉 조회 클라이언트

pub mod provider;
pub mod storage;

pub use provider::krx_api::{market_today, KrxDailyPriceClient};
pub use storage::daily_price::PgPriceSink;
pub use storage::database::{Database, DatabaseConfig};
pub use storage::memory::{MemoryPriceSink, MemoryProgressStore};
pub use storage::progress::PgProgressStore;
