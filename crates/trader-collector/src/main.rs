//! 캔들 동기화 수집기 CLI.

use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use trader_collector::modules::{self, GapScanner, JobScheduler};
use trader_collector::{CollectorConfig, CollectorError, Result, Stores};
use trader_core::{init_logging, LogConfig, LogFormat, Timeframe, UnitKey};
use trader_data::{Database, DatabaseConfig};
use trader_exchange::{AggsClient, AggsConfig, CandleFetcher};

#[derive(Parser)]
#[command(name = "trader-collector")]
#[command(about = "Incremental OHLCV candle synchronizer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error). 지정하면 RUST_LOG보다 우선
    #[arg(long)]
    log_level: Option<String>,

    /// 로그 형식 (pretty, json, compact). 생략하면 LOG_FORMAT
    #[arg(long)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 한 번의 동기화 사이클 실행
    Sync {
        /// 타임프레임 (1m, 15m, 1h, 1d). 생략하면 설정된 전체
        #[arg(long)]
        timeframe: Option<String>,

        /// 특정 심볼만 동기화 (쉼표로 구분, 예: "X:BTCUSD,AAPL")
        #[arg(long)]
        symbols: Option<String>,
    },

    /// 저장된 캔들에서 갭 감지 및 기록
    ScanGaps {
        #[arg(long)]
        timeframe: Option<String>,
    },

    /// 열린 갭 힐링
    HealGaps {
        #[arg(long)]
        timeframe: Option<String>,
    },

    /// 단위별 완결성 리포트
    CompletenessReport {
        /// 특정 심볼만 출력
        #[arg(long)]
        symbol: Option<String>,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 도래한 작업을 한 번씩 실행 (외부 cron용)
    RunDue,

    /// 데몬 모드: 작업 스케줄에 따라 계속 실행
    Daemon,

    /// UNAVAILABLE 단위 수동 리셋
    ResetUnit {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        timeframe: String,
    },

    /// 작업 실행 기록 조회
    JobStatus,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env();
    if let Some(level) = cli.log_level.clone() {
        log_config = log_config.with_level_override(level);
    }
    if let Some(raw) = cli.log_format.as_deref() {
        match LogFormat::from_str(raw) {
            Ok(format) => log_config.format = format,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    if let Err(e) = init_logging(log_config) {
        eprintln!("로깅 초기화 실패: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "실행 실패");
            ExitCode::FAILURE
        }
    }
}

/// 명령을 실행하고 성공 여부를 반환합니다.
async fn run(command: Commands) -> Result<bool> {
    tracing::info!("Candle Collector 시작");

    let config = Arc::new(CollectorConfig::from_env()?);
    tracing::debug!(
        symbols = config.sync.symbols.len(),
        timeframes = ?config.sync.timeframes,
        "설정 로드 완료"
    );

    let db_config = DatabaseConfig::new(config.database_url.clone())
        .with_max_connections(config.db_max_connections);
    let db = Database::connect(&db_config).await?;
    db.migrate().await?;
    tracing::info!("데이터베이스 연결 성공");

    let stores = Stores::postgres(db.pool().clone(), &config.upsert);

    let success = match command {
        Commands::Sync { timeframe, symbols } => {
            let scheduler = JobScheduler::new(config.clone(), build_fetcher(&config)?, stores);
            let symbols = symbols.map(|raw| trader_collector::config::parse_symbols(&raw));
            let timeframes = match timeframe {
                Some(raw) => vec![Timeframe::from_str(&raw)?],
                None => config.sync.timeframes.clone(),
            };

            let mut success = true;
            for tf in timeframes {
                let report = scheduler
                    .sync_timeframe(tf, symbols.as_deref(), Utc::now())
                    .await;
                report.log_summary(&format!("sync_{}", tf));
                success &= !report.has_failures();
            }
            success
        }
        Commands::ScanGaps { timeframe } => {
            let timeframe = parse_timeframe(timeframe)?;
            let report = GapScanner::new(&stores).scan(timeframe, Utc::now()).await?;
            report.log_summary("gap_scan");
            !report.has_failures()
        }
        Commands::HealGaps { timeframe } => {
            let timeframe = parse_timeframe(timeframe)?;
            let scheduler = JobScheduler::new(config.clone(), build_fetcher(&config)?, stores);
            let report = scheduler.healer().heal(timeframe, Utc::now()).await?;
            report.log_summary("gap_heal");
            !report.has_failures()
        }
        Commands::CompletenessReport { symbol, json } => {
            let rows = modules::completeness_report(&config, &stores, symbol.as_deref()).await?;
            if json {
                let out = serde_json::to_string_pretty(&rows)
                    .map_err(|e| CollectorError::Other(Box::new(e)))?;
                println!("{}", out);
            } else {
                print!("{}", modules::render_table(&rows));
            }
            true
        }
        Commands::RunDue => {
            let scheduler = JobScheduler::new(config.clone(), build_fetcher(&config)?, stores);
            let summary = scheduler.run_due(Utc::now()).await?;
            for job in &summary.failed {
                tracing::warn!(job = %job, "작업 실패");
            }
            !summary.has_failures()
        }
        Commands::Daemon => {
            let scheduler = JobScheduler::new(config.clone(), build_fetcher(&config)?, stores);
            scheduler.run_daemon().await?;
            true
        }
        Commands::ResetUnit { symbol, timeframe } => {
            let key = UnitKey::new(symbol, Timeframe::from_str(&timeframe)?);
            modules::reset_unit(stores.states.as_ref(), &key).await?
        }
        Commands::JobStatus => {
            let runs = stores.jobs.list().await?;
            println!(
                "{:<14} {:<10} {:<20} {:<20} {}",
                "JOB", "STATUS", "STARTED", "FINISHED", "ERROR"
            );
            for run in runs {
                println!(
                    "{:<14} {:<10} {:<20} {:<20} {}",
                    run.job_name,
                    run.status.as_str(),
                    run.last_started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.last_finished_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    run.last_error.unwrap_or_default()
                );
            }
            true
        }
    };

    db.pool().close().await;
    tracing::info!("Candle Collector 종료");

    Ok(success)
}

fn parse_timeframe(raw: Option<String>) -> Result<Option<Timeframe>> {
    raw.map(|s| Timeframe::from_str(&s))
        .transpose()
        .map_err(CollectorError::from)
}

/// 벤더 커넥터 생성 (API 키 필수).
fn build_fetcher(config: &CollectorConfig) -> Result<Arc<dyn CandleFetcher>> {
    let api_key = config.vendor.api_key.clone().ok_or_else(|| {
        CollectorError::Config("VENDOR_API_KEY 환경변수가 설정되지 않았습니다".to_string())
    })?;

    let client = AggsClient::new(
        AggsConfig::new(config.vendor.base_url.clone(), api_key)
            .with_timeout_secs(config.sync.fetch_timeout_secs),
    )?;
    Ok(Arc::new(client))
}
