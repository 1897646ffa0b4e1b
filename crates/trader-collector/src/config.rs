//! 환경변수 기반 설정 모듈.

use chrono::Duration;
use secrecy::SecretString;
use trader_core::{ClaimPolicy, Timeframe};
use trader_exchange::RetryConfig;

use crate::error::CollectorError;
use crate::Result;

/// Collector 전체 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 데이터베이스 URL
    pub database_url: String,
    /// 연결 풀 최대 연결 수
    pub db_max_connections: u32,
    /// 벤더 설정
    pub vendor: VendorConfig,
    /// 증분 동기화 설정
    pub sync: SyncConfig,
    /// 캔들 저장 설정
    pub upsert: UpsertConfig,
    /// 갭 스캔/힐링 설정
    pub gap: GapConfig,
    /// 스케줄러 설정
    pub daemon: DaemonConfig,
}

/// 벤더 설정
#[derive(Debug, Clone)]
pub struct VendorConfig {
    /// REST API 기본 URL
    pub base_url: String,
    /// API 키
    pub api_key: Option<SecretString>,
}

/// 증분 동기화 설정
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 동기화 대상 심볼
    pub symbols: Vec<String>,
    /// 동기화 대상 타임프레임
    pub timeframes: Vec<Timeframe>,
    /// 워커 풀 크기
    pub workers: usize,
    /// 단위당 사이클당 최대 조회 시도 횟수
    pub max_retries: u32,
    /// 재시도 대기 스케줄 (밀리초)
    pub backoff_ms: Vec<u64>,
    /// 벤더 Retry-After 힌트 상한 (초)
    pub max_rate_limit_wait_secs: u64,
    /// 조회 한 건의 하드 타임아웃 (초)
    pub fetch_timeout_secs: u64,
    /// SYNCING 강제 리셋 기준 (분)
    pub stale_minutes: i64,
    /// FAILED_BACKOFF 첫 쿨다운 (초)
    pub failure_cooldown_secs: i64,
    /// FAILED_BACKOFF 쿨다운 상한 (초)
    pub max_failure_cooldown_secs: i64,
}

/// 캔들 저장 설정
#[derive(Debug, Clone)]
pub struct UpsertConfig {
    /// 청크당 행 수 (500..=2000)
    pub chunk_size: usize,
    /// 청크당 최대 시도 횟수
    pub chunk_retries: u32,
}

/// 갭 스캔/힐링 설정
#[derive(Debug, Clone)]
pub struct GapConfig {
    /// 빈 응답이 이 횟수에 도달하면 갭을 수용
    pub heal_max_attempts: i32,
    /// 갭 스캔 주기 (시간)
    pub scan_interval_hours: i64,
}

/// 스케줄러 설정
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// 데몬 tick 간격 (초)
    pub tick_secs: u64,
    /// 헬스 체크 주기 (분)
    pub health_check_interval_minutes: i64,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.polygon.io".to_string(),
            api_key: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            timeframes: Timeframe::ALL.to_vec(),
            workers: 5,
            max_retries: 5,
            backoff_ms: vec![100, 500, 1000, 2000, 4000],
            max_rate_limit_wait_secs: 60,
            fetch_timeout_secs: 30,
            stale_minutes: 10,
            failure_cooldown_secs: 60,
            max_failure_cooldown_secs: 3600,
        }
    }
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_retries: 3,
        }
    }
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            heal_max_attempts: 3,
            scan_interval_hours: 24,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            health_check_interval_minutes: 15,
        }
    }
}

impl CollectorConfig {
    /// 기본값으로 설정 생성 (DB URL만 지정)
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            db_max_connections: 10,
            vendor: VendorConfig::default(),
            sync: SyncConfig::default(),
            upsert: UpsertConfig::default(),
            gap: GapConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }

    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            CollectorError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
        })?;

        let defaults = Self::new(database_url);
        let sync_defaults = &defaults.sync;

        let timeframes = match std::env::var("SYNC_TIMEFRAMES") {
            Ok(raw) => parse_timeframes(&raw)?,
            Err(_) => sync_defaults.timeframes.clone(),
        };

        let backoff_ms = std::env::var("SYNC_BACKOFF_MS")
            .ok()
            .and_then(|raw| parse_list::<u64>(&raw).ok())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| sync_defaults.backoff_ms.clone());

        Ok(Self {
            db_max_connections: env_var_parse("DB_MAX_CONNECTIONS", defaults.db_max_connections),
            vendor: VendorConfig {
                base_url: env_var_or("VENDOR_BASE_URL", &defaults.vendor.base_url),
                api_key: std::env::var("VENDOR_API_KEY")
                    .ok()
                    .filter(|k| !k.is_empty())
                    .map(SecretString::from),
            },
            sync: SyncConfig {
                symbols: std::env::var("SYNC_SYMBOLS")
                    .map(|raw| parse_symbols(&raw))
                    .unwrap_or_default(),
                timeframes,
                workers: env_var_parse("SYNC_WORKERS", sync_defaults.workers).max(1),
                max_retries: env_var_parse("SYNC_MAX_RETRIES", sync_defaults.max_retries).max(1),
                backoff_ms,
                max_rate_limit_wait_secs: env_var_parse(
                    "SYNC_MAX_RATE_LIMIT_WAIT_SECS",
                    sync_defaults.max_rate_limit_wait_secs,
                ),
                fetch_timeout_secs: env_var_parse(
                    "FETCH_TIMEOUT_SECS",
                    sync_defaults.fetch_timeout_secs,
                ),
                stale_minutes: env_var_parse("SYNC_STALE_MINUTES", sync_defaults.stale_minutes),
                failure_cooldown_secs: env_var_parse(
                    "SYNC_FAILURE_COOLDOWN_SECS",
                    sync_defaults.failure_cooldown_secs,
                ),
                max_failure_cooldown_secs: env_var_parse(
                    "SYNC_MAX_FAILURE_COOLDOWN_SECS",
                    sync_defaults.max_failure_cooldown_secs,
                ),
            },
            upsert: UpsertConfig {
                chunk_size: env_var_parse("UPSERT_CHUNK_SIZE", defaults.upsert.chunk_size)
                    .clamp(trader_data::storage::MIN_CHUNK_SIZE, trader_data::storage::MAX_CHUNK_SIZE),
                chunk_retries: env_var_parse("UPSERT_CHUNK_RETRIES", defaults.upsert.chunk_retries)
                    .max(1),
            },
            gap: GapConfig {
                heal_max_attempts: env_var_parse(
                    "GAP_HEAL_MAX_ATTEMPTS",
                    defaults.gap.heal_max_attempts,
                )
                .max(1),
                scan_interval_hours: env_var_parse(
                    "GAP_SCAN_INTERVAL_HOURS",
                    defaults.gap.scan_interval_hours,
                )
                .max(1),
            },
            daemon: DaemonConfig {
                tick_secs: env_var_parse("SCHEDULER_TICK_SECS", defaults.daemon.tick_secs).max(1),
                health_check_interval_minutes: env_var_parse(
                    "HEALTH_CHECK_INTERVAL_MINUTES",
                    defaults.daemon.health_check_interval_minutes,
                )
                .max(1),
            },
            database_url: defaults.database_url,
        })
    }

    /// 설정된 심볼 × 타임프레임 단위 목록
    pub fn units(&self) -> Vec<trader_core::UnitKey> {
        self.sync
            .timeframes
            .iter()
            .flat_map(|tf| trader_core::UnitKey::for_symbols(&self.sync.symbols, *tf))
            .collect()
    }
}

impl SyncConfig {
    /// 재시도 설정으로 변환
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries.max(1),
            delays: self
                .backoff_ms
                .iter()
                .copied()
                .map(std::time::Duration::from_millis)
                .collect(),
            max_rate_limit_wait: std::time::Duration::from_secs(self.max_rate_limit_wait_secs),
        }
    }

    /// 트리거 판단 정책으로 변환
    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            stale_after: Duration::minutes(self.stale_minutes),
            failure_cooldown: Duration::seconds(self.failure_cooldown_secs),
            max_failure_cooldown: Duration::seconds(self.max_failure_cooldown_secs),
        }
    }

    /// 조회 타임아웃을 Duration으로 반환
    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl DaemonConfig {
    /// tick 간격을 Duration으로 반환
    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_secs)
    }
}

/// 타임프레임별 동기화 정책.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeframePolicy {
    /// 매 사이클 다시 조회하는 후행 구간
    pub overlap: Duration,
    /// 한 번에 조회할 수 있는 최대 과거 구간
    pub max_lookback: Duration,
    /// 갭 판정 배수 (간격 × tolerance 이상이면 갭)
    pub tolerance: i32,
    /// 동기화 주기
    pub cadence: Duration,
    /// 갭 스캔 대상 과거 구간
    pub gap_scan_lookback: Duration,
}

impl TimeframePolicy {
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        match timeframe {
            Timeframe::M1 => Self {
                overlap: Duration::minutes(10),
                max_lookback: Duration::days(2),
                tolerance: 5,
                cadence: Duration::minutes(5),
                gap_scan_lookback: Duration::days(2),
            },
            Timeframe::M15 => Self {
                overlap: Duration::minutes(30),
                max_lookback: Duration::days(7),
                tolerance: 2,
                cadence: Duration::minutes(15),
                gap_scan_lookback: Duration::days(14),
            },
            Timeframe::H1 => Self {
                overlap: Duration::hours(2),
                max_lookback: Duration::days(5),
                tolerance: 2,
                cadence: Duration::minutes(60),
                gap_scan_lookback: Duration::days(30),
            },
            Timeframe::D1 => Self {
                overlap: Duration::days(2),
                max_lookback: Duration::days(10),
                tolerance: 2,
                cadence: Duration::hours(24),
                gap_scan_lookback: Duration::days(365),
            },
        }
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// 환경변수 문자열 (없으면 기본값)
fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// 쉼표 구분 목록 파싱
fn parse_list<T: std::str::FromStr>(raw: &str) -> std::result::Result<Vec<T>, T::Err> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// 쉼표 구분 심볼 목록 파싱 (중복 제거, 순서 유지)
pub fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
        }
    }
    symbols
}

/// 쉼표 구분 타임프레임 목록 파싱
pub fn parse_timeframes(raw: &str) -> Result<Vec<Timeframe>> {
    let mut timeframes: Vec<Timeframe> = parse_list(raw)?;
    timeframes.sort();
    timeframes.dedup();
    if timeframes.is_empty() {
        return Err(CollectorError::Config("타임프레임 목록이 비어 있습니다".to_string()));
    }
    Ok(timeframes)
}
