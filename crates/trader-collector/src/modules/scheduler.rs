//! 작업 스케줄러.
//!
//! 타임프레임별 동기화 작업(`sync_1m`, `sync_15m`, `sync_1h`, `sync_1d`), 일일
//! 갭 스캔(`gap_scan`: 스캔 후 힐링), 주기적 헬스 체크(`health_check`)를
//! 실행합니다.
//!
//! 두 실행 모드 모두 같은 영속 실행 기록(`JobRunStore`)을 check-and-set으로
//! 확인하므로, 최소 실행 간격(주기의 90%) 안의 중복 트리거는 실행되지 않습니다.
//!
//! - 데몬 모드: tick마다 도래한 작업을 별도 태스크로 실행
//! - 단발 모드(`run-due`): 도래한 작업을 한 번씩 끝까지 실행하고 종료 (외부 cron용)

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};
use trader_core::{Timeframe, UnitKey};
use trader_data::JobStatus;
use trader_exchange::CandleFetcher;

use super::gap_heal::GapHealer;
use super::gap_scan::GapScanner;
use super::health::{health_check, HealthReport};
use super::sync::SyncCoordinator;
use super::worker_pool::WorkerPool;
use crate::config::{CollectorConfig, TimeframePolicy};
use crate::stats::{CycleReport, GapScanReport, HealReport};
use crate::stores::Stores;
use crate::Result;

/// 작업 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// 타임프레임 동기화 사이클
    Sync(Timeframe),
    /// 갭 스캔 후 힐링
    GapScan,
    /// 헬스 체크
    HealthCheck,
}

impl JobKind {
    /// 실행 기록에 쓰이는 작업 이름.
    pub fn name(&self) -> String {
        match self {
            Self::Sync(tf) => format!("sync_{}", tf),
            Self::GapScan => "gap_scan".to_string(),
            Self::HealthCheck => "health_check".to_string(),
        }
    }
}

/// 작업 정의.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSpec {
    pub kind: JobKind,
    pub cadence: Duration,
}

impl JobSpec {
    /// 마지막 시작 후 다시 실행할 수 있는 최소 간격 (주기의 90%).
    pub fn min_interval(&self) -> Duration {
        Duration::seconds(self.cadence.num_seconds() * 9 / 10)
    }
}

/// 작업 실행 결과.
#[derive(Debug, Clone, Serialize)]
pub enum JobReport {
    Sync(CycleReport),
    GapScan {
        scan: GapScanReport,
        heal: HealReport,
    },
    Health(HealthReport),
}

impl JobReport {
    pub fn has_failures(&self) -> bool {
        match self {
            Self::Sync(report) => report.has_failures(),
            Self::GapScan { scan, heal } => scan.has_failures() || heal.has_failures(),
            Self::Health(_) => false,
        }
    }

    /// 실행 기록에 남길 실패 요약.
    pub fn failure_summary(&self) -> Option<String> {
        if !self.has_failures() {
            return None;
        }
        Some(match self {
            Self::Sync(report) => report.failed_units.join("; "),
            Self::GapScan { scan, heal } => format!(
                "scan errors: {}, heal failures: {}",
                scan.errors.len(),
                heal.failed
            ),
            Self::Health(_) => String::new(),
        })
    }

    pub fn log_summary(&self, operation: &str) {
        match self {
            Self::Sync(report) => report.log_summary(operation),
            Self::GapScan { scan, heal } => {
                scan.log_summary(operation);
                heal.log_summary(operation);
            }
            Self::Health(report) => report.log_summary(operation),
        }
    }
}

/// `run_due` 결과.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DueRunSummary {
    /// 실행한 작업
    pub ran: Vec<String>,
    /// 최소 간격 안이라 건너뛴 작업
    pub skipped: Vec<String>,
    /// 실패한 작업
    pub failed: Vec<String>,
}

impl DueRunSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// 작업 스케줄러.
#[derive(Clone)]
pub struct JobScheduler {
    config: Arc<CollectorConfig>,
    stores: Stores,
    pool: WorkerPool,
    scanner: GapScanner,
    healer: GapHealer,
    jobs: Vec<JobSpec>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl JobScheduler {
    pub fn new(config: Arc<CollectorConfig>, fetcher: Arc<dyn CandleFetcher>, stores: Stores) -> Self {
        let coordinator = SyncCoordinator::new(fetcher, &stores, &config.sync);
        let pool = WorkerPool::new(coordinator.clone(), config.sync.workers);
        let scanner = GapScanner::new(&stores);
        let healer = GapHealer::new(
            coordinator,
            &stores,
            config.gap.heal_max_attempts,
            config.sync.workers,
        );
        let jobs = Self::job_specs(&config);

        Self {
            config,
            stores,
            pool,
            scanner,
            healer,
            jobs,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 설정된 타임프레임에 따른 작업 목록.
    pub fn job_specs(config: &CollectorConfig) -> Vec<JobSpec> {
        let mut jobs: Vec<JobSpec> = config
            .sync
            .timeframes
            .iter()
            .map(|tf| JobSpec {
                kind: JobKind::Sync(*tf),
                cadence: TimeframePolicy::for_timeframe(*tf).cadence,
            })
            .collect();

        jobs.push(JobSpec {
            kind: JobKind::GapScan,
            cadence: Duration::hours(config.gap.scan_interval_hours),
        });
        jobs.push(JobSpec {
            kind: JobKind::HealthCheck,
            cadence: Duration::minutes(config.daemon.health_check_interval_minutes),
        });
        jobs
    }

    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn scanner(&self) -> &GapScanner {
        &self.scanner
    }

    pub fn healer(&self) -> &GapHealer {
        &self.healer
    }

    /// 타임프레임 하나의 동기화 사이클 (심볼 미지정 시 설정값 사용).
    pub async fn sync_timeframe(
        &self,
        timeframe: Timeframe,
        symbols: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let symbols = symbols.unwrap_or(self.config.sync.symbols.as_slice());
        if symbols.is_empty() {
            warn!(timeframe = %timeframe, "동기화할 심볼이 없습니다 (SYNC_SYMBOLS)");
        }
        let units = UnitKey::for_symbols(symbols, timeframe);
        self.pool.run_cycle(units, now).await
    }

    /// 작업 하나를 실행 기록 확인 없이 실행합니다.
    pub async fn run_job(&self, kind: JobKind, now: DateTime<Utc>) -> Result<JobReport> {
        match kind {
            JobKind::Sync(tf) => Ok(JobReport::Sync(self.sync_timeframe(tf, None, now).await)),
            JobKind::GapScan => {
                let scan = self.scanner.scan(None, now).await?;
                let heal = self.healer.heal(None, now).await?;
                Ok(JobReport::GapScan { scan, heal })
            }
            JobKind::HealthCheck => {
                let policy = self.pool.coordinator().claim_policy();
                Ok(JobReport::Health(health_check(&self.stores, policy, now).await?))
            }
        }
    }

    /// 실행 권한을 얻은 작업을 실행하고 결과를 기록합니다. 실패 여부를 반환합니다.
    async fn execute_claimed(&self, spec: JobSpec, now: DateTime<Utc>) -> Result<bool> {
        let name = spec.kind.name();
        info!(job = %name, "작업 시작");

        let result = self.run_job(spec.kind, now).await;
        let (status, error) = match &result {
            Ok(report) => {
                report.log_summary(&name);
                match report.failure_summary() {
                    Some(summary) => (JobStatus::Failed, Some(summary)),
                    None => (JobStatus::Completed, None),
                }
            }
            Err(e) => {
                error!(job = %name, error = %e, "작업 실패");
                (JobStatus::Failed, Some(e.to_string()))
            }
        };

        self.stores
            .jobs
            .finish(&name, Utc::now(), status, error.as_deref())
            .await?;

        Ok(status == JobStatus::Failed)
    }

    /// 도래한 작업을 한 번씩 실행합니다 (단발 모드).
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<DueRunSummary> {
        let mut summary = DueRunSummary::default();

        for spec in &self.jobs {
            let name = spec.kind.name();
            if !self.stores.jobs.try_claim(&name, now, spec.min_interval()).await? {
                debug!(job = %name, "최소 실행 간격 이내, 건너뜀");
                summary.skipped.push(name);
                continue;
            }

            let failed = self.execute_claimed(*spec, now).await?;
            if failed {
                summary.failed.push(name.clone());
            }
            summary.ran.push(name);
        }

        info!(
            ran = summary.ran.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "run-due 완료"
        );
        Ok(summary)
    }

    /// 한 tick: 이 프로세스에서 실행 중이 아니고 실행 권한을 얻은 작업을 태스크로 띄웁니다.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut spawned = Vec::new();

        for spec in &self.jobs {
            let name = spec.kind.name();
            if self.is_in_flight(&name) {
                debug!(job = %name, "이전 실행이 아직 진행 중");
                continue;
            }
            if !self.stores.jobs.try_claim(&name, now, spec.min_interval()).await? {
                continue;
            }

            self.set_in_flight(&name, true);
            let scheduler = self.clone();
            let spec = *spec;
            let job_name = name.clone();
            tokio::spawn(async move {
                if let Err(e) = scheduler.execute_claimed(spec, now).await {
                    error!(job = %job_name, error = %e, "작업 기록 실패");
                }
                scheduler.set_in_flight(&job_name, false);
            });
            spawned.push(name);
        }

        Ok(spawned)
    }

    /// 데몬 모드: ctrl-c까지 tick 간격으로 도래한 작업을 실행합니다.
    pub async fn run_daemon(&self) -> Result<()> {
        info!(
            tick_secs = self.config.daemon.tick_secs,
            jobs = self.jobs.len(),
            "=== 데몬 모드 시작 ==="
        );

        let mut interval = tokio::time::interval(self.config.daemon.tick());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("종료 신호 수신, 데몬 종료 중...");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(spawned) if !spawned.is_empty() => {
                            debug!(jobs = ?spawned, "작업 실행");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "스케줄 확인 실패"),
                    }
                }
            }
        }

        Ok(())
    }

    fn in_flight_jobs(&self) -> MutexGuard<'_, HashSet<String>> {
        // 오염되어도 집합 내용은 유효함
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_in_flight(&self, name: &str) -> bool {
        self.in_flight_jobs().contains(name)
    }

    fn set_in_flight(&self, name: &str, running: bool) {
        let mut set = self.in_flight_jobs();
        if running {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use trader_core::Candle;
    use trader_data::MemoryStore;
    use trader_exchange::FetchResult;

    struct EmptyFetcher;

    #[async_trait]
    impl CandleFetcher for EmptyFetcher {
        fn name(&self) -> &str {
            "empty"
        }

        async fn get_candles(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> FetchResult<Vec<Candle>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_poisoned_in_flight_set_still_blocks_job() {
        let config = Arc::new(CollectorConfig::new("postgres://localhost/test"));
        let stores = Stores::memory(Arc::new(MemoryStore::new()));
        let scheduler = JobScheduler::new(config, Arc::new(EmptyFetcher), stores);

        scheduler.set_in_flight("sync_1m", true);
        let set = Arc::clone(&scheduler.in_flight);
        let _ = std::thread::spawn(move || {
            let _guard = set.lock().unwrap();
            panic!("job task panicked");
        })
        .join();
        assert!(scheduler.in_flight.is_poisoned());

        assert!(scheduler.is_in_flight("sync_1m"));
        scheduler.set_in_flight("sync_1m", false);
        assert!(!scheduler.is_in_flight("sync_1m"));
    }

    #[test]
    fn test_job_names_and_intervals() {
        let mut config = CollectorConfig::new("postgres://localhost/test");
        config.sync.timeframes = vec![Timeframe::M1, Timeframe::D1];
        let jobs = JobScheduler::job_specs(&config);

        let names: Vec<String> = jobs.iter().map(|j| j.kind.name()).collect();
        assert_eq!(names, vec!["sync_1m", "sync_1d", "gap_scan", "health_check"]);

        assert_eq!(jobs[0].min_interval(), Duration::seconds(270));
        assert_eq!(jobs[2].min_interval(), Duration::hours(24) * 9 / 10);
    }
}
