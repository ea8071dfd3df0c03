//! # KRX Core
//!
//! 일봉 수집 시스템의 핵심 도메인 모델과 외부 협력자 인터페이스를 제공합니다.
//!
//! - 작업 항목(종목) 및 수집 진행 상태 모델
//! - 일봉 가격 레코드
//! - 데이터 소스 / 진행 상태 저장소 / 가격 저장소 trait
//! - 로깅 인프라

pub mod domain;
pub mod error;
pub mod logging;

pub use domain::*;
pub use error::*;
pub use logging::*;
