//! 수집 실행 모듈.

pub mod orchestrator;
pub mod rate_limiter;
pub mod rebuild;
pub mod retry;
pub mod status;
pub mod universe;

pub use orchestrator::{
    EmptyResultPolicy, InterruptedAttemptPolicy, Orchestrator, OrchestratorConfig,
    OrchestratorError, RunOptions,
};
pub use rate_limiter::RateLimiter;
pub use rebuild::{rebuild_progress, RebuildStats};
pub use retry::{BackoffKind, RetryBackoff};
pub use status::{load_summary, ProgressSummary};
pub use universe::{load_skip_list, load_universe_file, parse_symbols, parse_universe};
