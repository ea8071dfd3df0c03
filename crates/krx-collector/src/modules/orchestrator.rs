//! 수집 오케스트레이터.
//!
//! 유니버스의 각 종목을 `PENDING → IN_PROGRESS → {COMPLETED | FAILED | SKIPPED}`
//! 상태 머신으로 끝까지 진행시킵니다.
//!
//! # 처리 흐름
//!
//! 1. 계획: 진행 상태를 읽어 제외/완료 종목을 걸러내고 작업 큐를 만듭니다.
//! 2. 실행: N개 워커가 공유 큐에서 서로 다른 종목을 꺼내 처리합니다.
//!    모든 요청은 하나의 [`RateLimiter`]를 거칩니다.
//! 3. 시도마다 `IN_PROGRESS`를 먼저 저장한 뒤 조회하므로, 크래시 후에도
//!    어떤 종목이 작업 중이었는지 남습니다.
//!
//! 증분 모드에서는 종목마다 가격 저장소의 최신 거래일을 먼저 확인합니다.
//! 최신 거래일이 조회 기간 끝 이후면 조회 없이 `COMPLETED`로 기록하고,
//! 아니면 그 다음 날부터만 조회합니다.
//!
//! 종목 단위 실패는 진행 레코드에 기록되고 다음 종목으로 넘어갑니다.
//! 실행 전체를 멈추는 경우는 두 가지뿐입니다:
//! - 세션 만료 (`AUTH_EXPIRED`): 진행 중 종목은 `PENDING`으로 되돌림
//! - 진행 상태 저장소 장애: 체크포인트 없이 계속할 수 없음

use crate::modules::rate_limiter::RateLimiter;
use crate::modules::retry::RetryBackoff;
use crate::stats::{FailedItem, RunContext, RunReport};
use chrono::{NaiveDate, Utc};
use krx_core::{
    dedup_work_items, CollectionStatus, DateRange, FetchClient, FetchError, PriceSink,
    ProgressRecord, ProgressStore, StorageError, WorkItem,
};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

// =============================================================================
// 설정
// =============================================================================

/// 빈 조회 결과(0건) 처리 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyResultPolicy {
    /// 신규 상장 등 데이터가 없을 수 있는 경우: 0건으로 완료 처리
    Success,
    /// 실패로 보고 재시도
    #[default]
    Failure,
}

impl FromStr for EmptyResultPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(format!("Unknown empty result policy: {}", s)),
        }
    }
}

impl fmt::Display for EmptyResultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// 이전 실행에서 `IN_PROGRESS`로 남은 종목의 시도 예산.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptedAttemptPolicy {
    /// 중단된 시도를 소모된 것으로 계산 (예산 `max - 1`, 최소 1)
    #[default]
    Consume,
    /// 새 실행과 같은 전체 예산
    Fresh,
}

impl FromStr for InterruptedAttemptPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "consume" => Ok(Self::Consume),
            "fresh" => Ok(Self::Fresh),
            _ => Err(format!("Unknown interrupted attempt policy: {}", s)),
        }
    }
}

/// 오케스트레이터 설정.
///
/// 실행마다 명시적으로 전달되며 전역 상태를 두지 않습니다.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 종목당 실행 내 최대 시도 횟수
    pub max_retry_attempts: u32,
    /// 실패 후 재시도 대기
    pub retry: RetryBackoff,
    /// 요청 간 최소 간격
    pub min_interval: Duration,
    /// 대기 없이 보낼 수 있는 요청 수
    pub max_burst: Option<u32>,
    /// 빈 결과 처리
    pub treat_empty_as: EmptyResultPolicy,
    /// 동시 워커 수
    pub workers: usize,
    /// 조회 호출당 타임아웃
    pub fetch_timeout: Duration,
    /// 중단된 시도 처리
    pub interrupted_attempts: InterruptedAttemptPolicy,
    /// 조회 기간
    pub date_range: DateRange,
    /// 저장된 최신 거래일 이후만 조회
    pub incremental: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry: RetryBackoff::default(),
            min_interval: Duration::from_millis(3600),
            max_burst: None,
            treat_empty_as: EmptyResultPolicy::default(),
            workers: 1,
            fetch_timeout: Duration::from_secs(30),
            interrupted_attempts: InterruptedAttemptPolicy::default(),
            date_range: DateRange::full(),
            incremental: true,
        }
    }
}

/// 실행 단위 옵션.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// 이전 실행의 진행 상태를 이어받아 완료 종목 건너뛰기
    pub resume: bool,
    /// 정책상 제외할 종목코드 (`SKIPPED`로 기록)
    pub skip: HashSet<String>,
}

// =============================================================================
// 에러
// =============================================================================

/// 실행 전체를 멈추는 조건.
///
/// 두 경우 모두 중단 시점까지의 집계를 함께 돌려줍니다.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("세션 만료로 수집 중단 ({item_id}): {message}")]
    SessionExpired {
        item_id: String,
        message: String,
        report: Box<RunReport>,
    },

    #[error("진행 상태 저장소 사용 불가: {source}")]
    ProgressStoreUnavailable {
        source: StorageError,
        report: Box<RunReport>,
    },
}

impl OrchestratorError {
    /// 중단 시점까지의 실행 결과.
    pub fn report(&self) -> &RunReport {
        match self {
            Self::SessionExpired { report, .. } => report,
            Self::ProgressStoreUnavailable { report, .. } => report,
        }
    }
}

/// 한 번의 시도 실패 원인.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("[{}] {}", .0.kind(), .0)]
    Fetch(#[from] FetchError),

    #[error("빈 응답 (레코드 0건)")]
    EmptyResult,

    #[error("저장 실패: {0}")]
    Sink(#[from] StorageError),
}

/// 워커를 멈추게 한 원인 (먼저 발생한 것만 보고).
#[derive(Debug)]
enum Halt {
    SessionExpired { item_id: String, message: String },
    Store(StorageError),
}

// =============================================================================
// 실행 상태
// =============================================================================

struct Job {
    record: ProgressRecord,
    budget: u32,
}

enum ItemOutcome {
    Completed { records: usize },
    /// 저장된 데이터가 이미 조회 기간 끝까지 있음
    UpToDate,
    Failed(FailedItem),
    /// 재시도 대기 중 중단 요청 (`IN_PROGRESS` 유지)
    Interrupted,
}

impl ItemOutcome {
    fn status(&self) -> CollectionStatus {
        match self {
            Self::Completed { .. } | Self::UpToDate => CollectionStatus::Completed,
            Self::Failed(_) => CollectionStatus::Failed,
            Self::Interrupted => CollectionStatus::InProgress,
        }
    }
}

/// 종목별 조회 계획.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPlan {
    /// 조회. `incremental`이면 저장된 데이터 이후 구간만 요청
    Fetch { range: DateRange, incremental: bool },
    /// 조회 불필요
    UpToDate { latest: NaiveDate },
}

/// 워커들이 공유하는 실행 상태.
struct RunState {
    queue: Mutex<VecDeque<Job>>,
    report: Mutex<RunReport>,
    halt: Mutex<Option<Halt>>,
    /// 외부 취소 또는 내부 중단 시 취소됨
    stop: CancellationToken,
    fetch_attempts: AtomicU64,
}

impl RunState {
    async fn record(&self, outcome: ItemOutcome) {
        let mut report = self.report.lock().await;
        match outcome {
            ItemOutcome::Completed { records } => {
                report.completed += 1;
                report.records_persisted += records as u64;
            }
            ItemOutcome::UpToDate => {
                report.completed += 1;
                report.up_to_date += 1;
            }
            ItemOutcome::Failed(item) => {
                report.failed += 1;
                report.failed_items.push(item);
            }
            ItemOutcome::Interrupted => {}
        }
    }

    async fn halt(&self, halt: Halt) {
        let mut slot = self.halt.lock().await;
        if slot.is_none() {
            *slot = Some(halt);
        }
        self.stop.cancel();
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// 수집 오케스트레이터.
pub struct Orchestrator {
    fetcher: Arc<dyn FetchClient>,
    progress: Arc<dyn ProgressStore>,
    sink: Arc<dyn PriceSink>,
    limiter: RateLimiter,
    config: OrchestratorConfig,
    context: RwLock<RunContext>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        fetcher: Arc<dyn FetchClient>,
        progress: Arc<dyn ProgressStore>,
        sink: Arc<dyn PriceSink>,
    ) -> Self {
        let limiter = RateLimiter::new(config.min_interval, config.max_burst);
        Self {
            fetcher,
            progress,
            sink,
            limiter,
            config,
            context: RwLock::new(RunContext::default()),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// 현재 (또는 마지막) 실행의 현황.
    pub async fn context(&self) -> RunContext {
        self.context.read().await.clone()
    }

    /// 유니버스 전체를 수집합니다.
    ///
    /// `cancel`이 취소되면 진행 중인 시도만 마무리하고 새 종목은 시작하지 않습니다.
    /// 이 경우에도 `Ok`를 반환하며 `RunReport::cancelled`가 설정됩니다.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::SessionExpired`]: 조회 세션 만료
    /// - [`OrchestratorError::ProgressStoreUnavailable`]: 진행 상태 저장 실패
    pub async fn run(
        &self,
        items: Vec<WorkItem>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunReport, OrchestratorError> {
        let items = dedup_work_items(items);
        let started = tokio::time::Instant::now();
        let mut report = RunReport::new(items.len());
        *self.context.write().await = RunContext::started(items.len(), report.started_at);

        info!(
            source = self.fetcher.name(),
            items = items.len(),
            resume = options.resume,
            workers = self.config.workers,
            max_retry_attempts = self.config.max_retry_attempts,
            min_interval_ms = self.config.min_interval.as_millis() as u64,
            incremental = self.config.incremental,
            "수집 시작"
        );

        let jobs = match self.plan(items, &options, &mut report).await {
            Ok(jobs) => jobs,
            Err(source) => {
                error!(error = %source, "진행 상태 조회 실패, 수집 중단");
                report.halted = true;
                report.finish(started.elapsed());
                return Err(OrchestratorError::ProgressStoreUnavailable {
                    source,
                    report: Box::new(report),
                });
            }
        };

        {
            let mut context = self.context.write().await;
            context.completed_count = report.completed as u64;
            context.skipped_count = report.skipped as u64;
        }

        let workers = self.config.workers.max(1).min(jobs.len());
        debug!(jobs = jobs.len(), workers, "작업 큐 준비");

        let state = RunState {
            queue: Mutex::new(jobs),
            report: Mutex::new(report),
            halt: Mutex::new(None),
            stop: cancel.child_token(),
            fetch_attempts: AtomicU64::new(0),
        };

        futures::future::join_all((0..workers).map(|worker_id| self.worker(worker_id, &state)))
            .await;

        let mut report = state.report.into_inner();
        report.fetch_attempts = state.fetch_attempts.load(Ordering::Relaxed);
        report.cancelled = cancel.is_cancelled();
        let halt = state.halt.into_inner();
        report.halted = halt.is_some();
        report.finish(started.elapsed());
        report.log_summary("daily_prices");

        match halt {
            None => Ok(report),
            Some(Halt::SessionExpired { item_id, message }) => {
                Err(OrchestratorError::SessionExpired {
                    item_id,
                    message,
                    report: Box::new(report),
                })
            }
            Some(Halt::Store(source)) => Err(OrchestratorError::ProgressStoreUnavailable {
                source,
                report: Box::new(report),
            }),
        }
    }

    /// 진행 상태를 읽어 처리할 작업을 고릅니다.
    async fn plan(
        &self,
        items: Vec<WorkItem>,
        options: &RunOptions,
        report: &mut RunReport,
    ) -> Result<VecDeque<Job>, StorageError> {
        let mut jobs = VecDeque::with_capacity(items.len());

        for item in items {
            let existing = self.progress.get(&item.id).await?;

            if options.skip.contains(&item.id) {
                let mut record = existing.unwrap_or_else(|| ProgressRecord::pending(&item));
                if record.status != CollectionStatus::Skipped {
                    record.mark_skipped(Some("제외 목록에 포함".to_string()), Utc::now());
                    self.progress.upsert(&record).await?;
                    debug!(item_id = %item.id, "제외 목록 종목 SKIPPED 처리");
                }
                report.skipped += 1;
                continue;
            }

            let mut record = match existing {
                Some(record) => record,
                None => {
                    let record = ProgressRecord::pending(&item);
                    self.progress.upsert(&record).await?;
                    record
                }
            };
            if record.display_name.is_empty() && !item.display_name.is_empty() {
                record.display_name = item.display_name.clone();
            }

            let budget = match record.status {
                CollectionStatus::Skipped => {
                    report.skipped += 1;
                    continue;
                }
                CollectionStatus::Completed if options.resume => {
                    report.completed += 1;
                    report.resumed += 1;
                    continue;
                }
                CollectionStatus::InProgress => {
                    warn!(
                        item_id = %record.item_id,
                        attempt_count = record.attempt_count,
                        "이전 실행에서 중단된 종목"
                    );
                    self.interrupted_budget()
                }
                _ => self.config.max_retry_attempts.max(1),
            };

            jobs.push_back(Job { record, budget });
        }

        Ok(jobs)
    }

    fn interrupted_budget(&self) -> u32 {
        let max = self.config.max_retry_attempts.max(1);
        match self.config.interrupted_attempts {
            InterruptedAttemptPolicy::Consume => max.saturating_sub(1).max(1),
            InterruptedAttemptPolicy::Fresh => max,
        }
    }

    async fn worker(&self, worker_id: usize, state: &RunState) {
        loop {
            if state.stop.is_cancelled() {
                debug!(worker_id, "중단 요청, 워커 종료");
                break;
            }
            let Some(job) = state.queue.lock().await.pop_front() else {
                break;
            };

            let item_id = job.record.item_id.clone();
            self.context.write().await.begin_item(&item_id);

            let span = krx_core::collect_span!(item_id, worker_id);
            match self.process_item(job, state).instrument(span).await {
                Ok(outcome) => {
                    self.context.write().await.finish_item(&item_id, outcome.status());
                    state.record(outcome).await;
                }
                Err(halt) => {
                    let status = match &halt {
                        Halt::SessionExpired { .. } => CollectionStatus::Pending,
                        Halt::Store(_) => CollectionStatus::InProgress,
                    };
                    self.context.write().await.finish_item(&item_id, status);
                    state.halt(halt).await;
                    break;
                }
            }
        }
    }

    /// 한 종목을 종료 상태까지 진행합니다.
    async fn process_item(&self, job: Job, state: &RunState) -> Result<ItemOutcome, Halt> {
        let Job { mut record, budget } = job;
        let item_id = record.item_id.clone();

        let (range, incremental) = match self.fetch_plan(&item_id).await {
            FetchPlan::Fetch { range, incremental } => (range, incremental),
            FetchPlan::UpToDate { latest } => {
                let count = record.record_count;
                record.mark_completed(count, Utc::now());
                self.persist(&record).await?;
                info!(item_id = %item_id, latest = %latest, "이미 최신 데이터 보유, 조회 생략");
                return Ok(ItemOutcome::UpToDate);
            }
        };

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            record.begin_attempt(Utc::now());
            self.persist(&record).await?;

            debug!(
                item_id = %item_id,
                attempt,
                budget,
                attempt_count = record.attempt_count,
                "수집 시도"
            );

            self.limiter.acquire().await;
            state.fetch_attempts.fetch_add(1, Ordering::Relaxed);

            let error = match self.attempt(&item_id, &range, incremental).await {
                Ok(records) => {
                    record.mark_completed(records as u64, Utc::now());
                    self.persist(&record).await?;
                    info!(item_id = %item_id, records, attempt, "수집 완료");
                    return Ok(ItemOutcome::Completed { records });
                }
                Err(AttemptError::Fetch(e)) if e.is_session_fatal() => {
                    let message = e.to_string();
                    record.revert_to_pending(&message, Utc::now());
                    self.persist(&record).await?;
                    error!(item_id = %item_id, error = %message, "세션 만료, 수집 중단");
                    return Err(Halt::SessionExpired { item_id, message });
                }
                Err(e) => e,
            };

            if let AttemptError::Fetch(FetchError::MalformedResponse { payload_len, .. }) = &error
            {
                warn!(item_id = %item_id, payload_len, "응답 형식 오류");
            }

            let message = error.to_string();
            record.record_failure(&message, Utc::now());

            if attempt >= budget {
                record.mark_failed(Utc::now());
                self.persist(&record).await?;
                error!(
                    item_id = %item_id,
                    attempt_count = record.attempt_count,
                    error = %message,
                    "재시도 한도 초과, FAILED 처리"
                );
                return Ok(ItemOutcome::Failed(FailedItem {
                    item_id,
                    attempts: record.attempt_count,
                    error: message,
                }));
            }

            self.persist(&record).await?;

            let delay = self.config.retry.delay_for(attempt);
            warn!(
                item_id = %item_id,
                attempt,
                budget,
                error = %message,
                retry_in_ms = delay.as_millis() as u64,
                "수집 실패, 재시도 대기"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = state.stop.cancelled() => {
                    info!(item_id = %item_id, "중단 요청, 재시도 보류");
                    return Ok(ItemOutcome::Interrupted);
                }
            }
        }
    }

    /// 종목의 조회 구간 결정.
    ///
    /// 명시적 시작일이 있으면 증분 조회하지 않습니다 (백필 요청으로 봄).
    /// 저장소 조회가 실패하면 설정된 전체 구간을 조회합니다. upsert가 멱등이라 안전합니다.
    async fn fetch_plan(&self, item_id: &str) -> FetchPlan {
        let configured = self.config.date_range;
        let full = FetchPlan::Fetch {
            range: configured,
            incremental: false,
        };
        if !self.config.incremental || configured.from.is_some() {
            return full;
        }

        let latest = match self.sink.latest_date(item_id).await {
            Ok(Some(latest)) => latest,
            Ok(None) => return full,
            Err(e) => {
                warn!(item_id = %item_id, error = %e, "최신 거래일 조회 실패, 전체 구간 조회");
                return full;
            }
        };

        if configured.to.is_some_and(|to| latest >= to) {
            return FetchPlan::UpToDate { latest };
        }

        match latest.succ_opt() {
            Some(next) => {
                debug!(item_id = %item_id, latest = %latest, from = %next, "증분 조회");
                FetchPlan::Fetch {
                    range: DateRange::new(Some(next), configured.to),
                    incremental: true,
                }
            }
            None => FetchPlan::UpToDate { latest },
        }
    }

    /// 조회 한 번과 저장. 성공 시 저장된 레코드 수.
    ///
    /// 증분 조회의 빈 결과는 새 거래일이 없다는 뜻이므로 정책과 무관하게 0건 완료입니다.
    async fn attempt(
        &self,
        item_id: &str,
        range: &DateRange,
        incremental: bool,
    ) -> Result<usize, AttemptError> {
        let fetch = self.fetcher.fetch(item_id, range);
        let records = match tokio::time::timeout(self.config.fetch_timeout, fetch).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(self.config.fetch_timeout).into()),
        };

        if records.is_empty() {
            if incremental {
                return Ok(0);
            }
            return match self.config.treat_empty_as {
                EmptyResultPolicy::Success => Ok(0),
                EmptyResultPolicy::Failure => Err(AttemptError::EmptyResult),
            };
        }

        Ok(self.sink.upsert_records(item_id, &records).await?)
    }

    async fn persist(&self, record: &ProgressRecord) -> Result<(), Halt> {
        self.progress.upsert(record).await.map_err(|e| {
            error!(item_id = %record.item_id, error = %e, "진행 상태 저장 실패");
            Halt::Store(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "SUCCESS".parse::<EmptyResultPolicy>().unwrap(),
            EmptyResultPolicy::Success
        );
        assert!("maybe".parse::<EmptyResultPolicy>().is_err());
        assert_eq!(
            "fresh".parse::<InterruptedAttemptPolicy>().unwrap(),
            InterruptedAttemptPolicy::Fresh
        );
    }

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.workers, 1);
        assert_eq!(config.treat_empty_as, EmptyResultPolicy::Failure);
        assert_eq!(config.interrupted_attempts, InterruptedAttemptPolicy::Consume);
        assert_eq!(config.retry, RetryBackoff::Fixed(Duration::from_millis(3600)));
        assert!(config.incremental);
    }
}
