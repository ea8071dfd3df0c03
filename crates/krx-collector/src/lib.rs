//! KRX 일봉 수집기.
//!
//! 수천 개 종목의 일봉 이력을 요청 한도가 있는 외부 데이터 소스에서 받아
//! 저장소에 적재합니다. 중단(크래시, 네트워크 단절, 세션 만료) 후에도
//! 이미 완료된 종목을 다시 받지 않고 이어서 수집할 수 있습니다.
//!
//! - [`modules::RateLimiter`]: 요청 간격/버스트 제한
//! - [`modules::Orchestrator`]: 종목별 상태 머신, 재시도, 재개
//! - [`modules::universe`]: 수집 대상 유니버스 로딩

pub mod config;
pub mod error;
pub mod modules;
pub mod stats;

pub use config::CollectorConfig;
pub use error::{CollectorError, Result};
pub use stats::{FailedItem, RunContext, RunReport};
