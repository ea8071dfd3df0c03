//! 일봉 수집을 위한 도메인 모델.

mod fetch_client;
mod price;
mod price_sink;
mod progress;
mod progress_store;
mod work_item;

pub use fetch_client::*;
pub use price::*;
pub use price_sink::*;
pub use progress::*;
pub use progress_store::*;
pub use work_item::*;
