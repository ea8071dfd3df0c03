//! KRX 일봉 수집기 CLI.

use clap::{Parser, Subcommand};
use krx_collector::modules::{
    self, EmptyResultPolicy, Orchestrator, OrchestratorError, RunOptions,
};
use krx_collector::{CollectorConfig, CollectorError};
use krx_core::{init_logging, CollectionStatus, LogConfig, PriceSink, ProgressStore, WorkItem};
use krx_data::{
    market_today, Database, DatabaseConfig, KrxDailyPriceClient, MemoryPriceSink,
    MemoryProgressStore, PgPriceSink, PgProgressStore,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "krx-collector")]
#[command(about = "Resumable KRX daily price collector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 일봉 수집 실행
    Collect {
        /// 유니버스 파일 (한 줄에 "종목코드[,종목명]")
        #[arg(long, conflicts_with = "symbols")]
        universe: Option<PathBuf>,

        /// 특정 종목만 수집 (쉼표로 구분, 예: "005930,000660")
        #[arg(long)]
        symbols: Option<String>,

        /// 제외 목록 파일 (상장폐지 등, SKIPPED 처리)
        #[arg(long)]
        skip_list: Option<PathBuf>,

        /// 이전 진행 상태를 이어받아 완료 종목 건너뛰기
        #[arg(long)]
        resume: bool,

        /// 동시 워커 수
        #[arg(long)]
        workers: Option<usize>,

        /// 종목당 최대 시도 횟수
        #[arg(long)]
        max_retries: Option<u32>,

        /// API 요청 간 딜레이 (밀리초)
        #[arg(long)]
        delay_ms: Option<u64>,

        /// 빈 결과 처리 (success, failure)
        #[arg(long)]
        treat_empty_as: Option<EmptyResultPolicy>,

        /// 수집 시작 날짜 (YYYYMMDD)
        #[arg(long)]
        from: Option<String>,

        /// 수집 종료 날짜 (YYYYMMDD, 기본: 오늘)
        #[arg(long)]
        to: Option<String>,

        /// 저장된 최신 거래일과 무관하게 전체 구간 조회
        #[arg(long)]
        full: bool,

        /// DB 없이 메모리 저장소로 실행
        #[arg(long)]
        dry_run: bool,
    },

    /// 상태별 진행 현황
    Status,

    /// FAILED 종목 목록
    Failed,

    /// 저장된 일봉으로 진행 상태 재구성 (데이터가 있는 종목을 COMPLETED로 기록)
    Rebuild {
        /// 유니버스 파일 (한 줄에 "종목코드[,종목명]")
        #[arg(long, conflicts_with = "symbols")]
        universe: Option<PathBuf>,

        /// 특정 종목만 (쉼표로 구분)
        #[arg(long)]
        symbols: Option<String>,
    },

    /// 진행 상태 전체 삭제 (전체 재수집 준비)
    Reset {
        /// 확인 없이 삭제
        #[arg(long)]
        yes: bool,
    },

    /// DB 마이그레이션 실행
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 로깅 초기화
    let default_level = format!(
        "krx_collector={0},krx_data={0},krx_core={0}",
        cli.log_level
    );
    init_logging(LogConfig::from_env(&default_level))?;

    tracing::info!("KRX Daily Price Collector 시작");

    let mut config = CollectorConfig::from_env();

    match cli.command {
        Commands::Collect {
            universe,
            symbols,
            skip_list,
            resume,
            workers,
            max_retries,
            delay_ms,
            treat_empty_as,
            from,
            to,
            full,
            dry_run,
        } => {
            // CLI 인자가 환경변수보다 우선
            if let Some(workers) = workers {
                config.collect.workers = workers;
            }
            if let Some(max_retries) = max_retries {
                config.collect.max_retry_attempts = max_retries;
            }
            if let Some(delay_ms) = delay_ms {
                config.collect.request_delay_ms = delay_ms;
            }
            if let Some(policy) = treat_empty_as {
                config.collect.treat_empty_as = policy;
            }
            if from.is_some() {
                config.collect.start_date = from;
            }
            if to.is_some() {
                config.collect.end_date = to;
            }
            if full {
                config.collect.incremental = false;
            }

            let items = load_items(universe, symbols).await?;
            let skip = match skip_list {
                Some(path) => modules::load_skip_list(path).await?,
                None => HashSet::new(),
            };

            collect(&config, items, RunOptions { resume, skip }, dry_run).await?;
        }
        Commands::Status => {
            let db = connect(&config).await?;
            let store = PgProgressStore::new(db.pool().clone());
            let summary = modules::load_summary(&store).await?;
            summary.log();
            db.close().await;
        }
        Commands::Failed => {
            let db = connect(&config).await?;
            let store = PgProgressStore::new(db.pool().clone());
            let failed = store.list_by_status(CollectionStatus::Failed).await?;
            for record in &failed {
                tracing::info!(
                    item_id = %record.item_id,
                    name = %record.display_name,
                    attempts = record.attempt_count,
                    last_attempt_at = ?record.last_attempt_at,
                    error = record.error_message.as_deref().unwrap_or(""),
                    "FAILED"
                );
            }
            tracing::info!(count = failed.len(), "실패 종목 조회 완료");
            db.close().await;
        }
        Commands::Rebuild { universe, symbols } => {
            let items = load_items(universe, symbols).await?;
            let db = connect(&config).await?;
            let progress = PgProgressStore::new(db.pool().clone());
            let sink = PgPriceSink::new(db.pool().clone());
            let stats = modules::rebuild_progress(items, &progress, &sink).await;
            db.close().await;
            let stats = stats?;
            if stats.missing > 0 {
                tracing::info!(
                    missing = stats.missing,
                    "저장된 일봉이 없는 종목은 다음 collect 실행에서 수집됩니다"
                );
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                return Err(CollectorError::Config(
                    "진행 상태를 모두 삭제하려면 --yes를 지정하세요".to_string(),
                )
                .into());
            }
            let db = connect(&config).await?;
            let deleted = PgProgressStore::new(db.pool().clone()).clear_all().await?;
            tracing::warn!(deleted, "수집 진행 상태 초기화 완료");
            db.close().await;
        }
        Commands::Migrate => {
            let db = connect(&config).await?;
            db.migrate().await?;
            db.close().await;
        }
    }

    Ok(())
}

/// `--universe` 또는 `--symbols`에서 수집 대상 로딩.
async fn load_items(
    universe: Option<PathBuf>,
    symbols: Option<String>,
) -> krx_collector::Result<Vec<WorkItem>> {
    match (universe, symbols) {
        (Some(path), _) => Ok(modules::load_universe_file(path).await?),
        (None, Some(symbols)) => Ok(modules::parse_symbols(&symbols)),
        (None, None) => Err(CollectorError::Config(
            "--universe 또는 --symbols 중 하나가 필요합니다".to_string(),
        )),
    }
}

async fn connect(config: &CollectorConfig) -> krx_collector::Result<Database> {
    let url = config.require_database_url()?;
    let db = Database::connect(&DatabaseConfig::new(url)).await?;
    tracing::info!("데이터베이스 연결 성공");
    Ok(db)
}

/// 수집 실행 (Run Controller).
async fn collect(
    config: &CollectorConfig,
    items: Vec<WorkItem>,
    options: RunOptions,
    dry_run: bool,
) -> krx_collector::Result<()> {
    let mut orchestrator_config = config.collect.to_orchestrator_config()?;
    if orchestrator_config.incremental && orchestrator_config.date_range.to.is_none() {
        // 최신 여부 판단 기준일
        orchestrator_config.date_range.to = Some(market_today());
    }

    let mut client = KrxDailyPriceClient::new(config.require_api_key()?)?;
    if let Some(base_url) = &config.krx.base_url {
        client = client.with_base_url(base_url);
    }

    let (db, progress, sink): (Option<Database>, Arc<dyn ProgressStore>, Arc<dyn PriceSink>) =
        if dry_run {
            tracing::warn!("dry-run: 메모리 저장소 사용, 결과는 저장되지 않습니다");
            (
                None,
                Arc::new(MemoryProgressStore::new()),
                Arc::new(MemoryPriceSink::new()),
            )
        } else {
            let db = connect(config).await?;
            db.migrate().await?;
            let progress: Arc<dyn ProgressStore> = Arc::new(PgProgressStore::new(db.pool().clone()));
            let sink: Arc<dyn PriceSink> = Arc::new(PgPriceSink::new(db.pool().clone()));
            (Some(db), progress, sink)
        };

    let orchestrator = Orchestrator::new(orchestrator_config, Arc::new(client), progress, sink);

    let cancel = CancellationToken::new();
    let listener = tokio::spawn(shutdown_signal(cancel.clone()));

    let result = orchestrator.run(items, options, cancel).await;
    listener.abort();

    if let Some(db) = db {
        db.close().await;
    }

    match result {
        Ok(report) => {
            if report.cancelled {
                tracing::warn!(
                    pending = report.pending,
                    "중단 요청으로 종료, --resume으로 이어서 수집할 수 있습니다"
                );
            } else if report.failed > 0 {
                tracing::warn!(
                    failed = ?report.failed_ids(),
                    "실패 종목이 있습니다, --resume으로 재시도할 수 있습니다"
                );
            }
            Ok(())
        }
        Err(e) => {
            match &e {
                OrchestratorError::SessionExpired { item_id, .. } => {
                    tracing::error!(
                        item_id = %item_id,
                        "인증 세션 만료: 인증키를 갱신한 뒤 --resume으로 재실행하세요"
                    );
                }
                OrchestratorError::ProgressStoreUnavailable { .. } => {
                    tracing::error!("진행 상태 저장소 장애로 중단되었습니다");
                }
            }
            Err(e.into())
        }
    }
}

/// Graceful shutdown 시그널 대기.
///
/// Ctrl+C 또는 SIGTERM 수신 시 토큰을 취소합니다. 진행 중인 시도는 마무리됩니다.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C 핸들러 설치 실패");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM 핸들러 설치 실패");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Ctrl+C 수신, 진행 중인 시도 후 종료합니다");
        }
        _ = terminate => {
            tracing::warn!("SIGTERM 수신, 진행 중인 시도 후 종료합니다");
        }
    }

    cancel.cancel();
}
