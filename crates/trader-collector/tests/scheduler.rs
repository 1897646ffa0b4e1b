//! 작업 스케줄러 통합 테스트.

mod common;

use chrono::Duration;
use rust_decimal_macros::dec;
use std::sync::Arc;
use trader_collector::modules::{JobKind, JobReport, JobScheduler};
use trader_collector::CollectorConfig;
use trader_core::Timeframe;
use trader_data::{JobRunStore, JobStatus};
use trader_exchange::FetchError;

use common::{bar, memory_stores, t, ScriptedFetcher};

fn config() -> Arc<CollectorConfig> {
    let mut config = CollectorConfig::new("postgres://localhost/test");
    config.sync.symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
    config.sync.timeframes = vec![Timeframe::M1, Timeframe::H1];
    config.sync.backoff_ms = vec![1];
    config.sync.max_retries = 2;
    Arc::new(config)
}

#[tokio::test]
async fn test_run_due_respects_min_interval() {
    let (_memory, stores) = memory_stores();
    let fetcher = ScriptedFetcher::new(|symbol, timeframe, _, to| {
        Ok(vec![bar(symbol, timeframe, timeframe.align_floor(to), dec!(100))])
    });
    let scheduler = JobScheduler::new(config(), fetcher.clone(), stores.clone());

    let first = scheduler.run_due(t()).await.unwrap();
    assert_eq!(
        first.ran,
        vec!["sync_1m", "sync_1h", "gap_scan", "health_check"]
    );
    assert!(first.skipped.is_empty());
    assert!(!first.has_failures());
    assert_eq!(fetcher.call_count(), 4);

    // 같은 시각의 중복 트리거는 아무것도 실행하지 않음
    let again = scheduler.run_due(t()).await.unwrap();
    assert!(again.ran.is_empty());
    assert_eq!(again.skipped.len(), 4);
    assert_eq!(fetcher.call_count(), 4);

    // 5분 주기의 90%가 지나면 1분봉 동기화만 다시 실행
    let later = scheduler
        .run_due(t() + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(later.ran, vec!["sync_1m"]);

    let runs = stores.jobs.list().await.unwrap();
    assert_eq!(runs.len(), 4);
    assert!(runs.iter().all(|r| r.status == JobStatus::Completed));
    assert!(runs.iter().all(|r| r.last_finished_at.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_run_due_reports_failed_sync() {
    let (_memory, stores) = memory_stores();
    let fetcher = ScriptedFetcher::new(|_, _, _, _| {
        Err(FetchError::Transient("connection reset".to_string()))
    });
    let scheduler = JobScheduler::new(config(), fetcher, stores.clone());

    let summary = scheduler.run_due(t()).await.unwrap();
    assert!(summary.has_failures());
    assert_eq!(summary.failed, vec!["sync_1m", "sync_1h"]);

    let runs = stores.jobs.list().await.unwrap();
    let sync_1h = runs.iter().find(|r| r.job_name == "sync_1h").unwrap();
    assert_eq!(sync_1h.status, JobStatus::Failed);
    assert!(sync_1h
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("AAPL/1h"));
}

#[tokio::test]
async fn test_tick_claims_each_job_once() {
    let (_memory, stores) = memory_stores();
    let fetcher = ScriptedFetcher::serving(Vec::new());
    let scheduler = JobScheduler::new(config(), fetcher, stores.clone());

    let spawned = scheduler.tick(t()).await.unwrap();
    assert_eq!(spawned.len(), 4);

    let second = scheduler.tick(t() + Duration::seconds(30)).await.unwrap();
    assert!(second.is_empty());

    assert!(!stores
        .jobs
        .try_claim("sync_1h", t() + Duration::minutes(30), Duration::minutes(54))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_run_job_health_check() {
    let (_memory, stores) = memory_stores();
    let fetcher = ScriptedFetcher::serving(Vec::new());
    let scheduler = JobScheduler::new(config(), fetcher, stores);

    scheduler
        .sync_timeframe(Timeframe::H1, None, t())
        .await;

    let report = scheduler
        .run_job(JobKind::HealthCheck, t() + Duration::minutes(1))
        .await
        .unwrap();
    match report {
        // 빈 응답만 받은 단위는 아직 한 번도 진행 위치가 없으므로 지연으로 보고됨
        JobReport::Health(health) => {
            assert!(health.stuck_syncing.is_empty());
            assert_eq!(health.lagging.len(), 2);
        }
        other => panic!("unexpected report: {:?}", other),
    }
}
