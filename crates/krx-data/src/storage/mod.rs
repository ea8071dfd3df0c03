//! 저장소 구현.

pub mod daily_price;
pub mod database;
pub mod memory;
pub mod progress;
