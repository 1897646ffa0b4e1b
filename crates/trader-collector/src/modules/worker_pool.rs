//! 제한된 병렬성으로 여러 단위를 동기화하는 워커 풀.
//!
//! 한 사이클의 모든 단위를 `buffer_unordered(workers)`로 실행하며, 각 단위는
//! 별도 태스크에서 돌아가므로 한 단위의 패닉도 사이클을 중단시키지 않습니다.
//! 단위 간 순서는 보장하지 않고, 모든 워커가 끝나면 사이클이 끝납니다.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tracing::{error, info};
use trader_core::UnitKey;

use super::sync::{SkipReason, SyncCoordinator, UnitOutcome};
use crate::stats::CycleReport;

/// 동기화 워커 풀.
#[derive(Clone)]
pub struct WorkerPool {
    coordinator: SyncCoordinator,
    workers: usize,
}

impl WorkerPool {
    pub fn new(coordinator: SyncCoordinator, workers: usize) -> Self {
        Self {
            coordinator,
            workers: workers.max(1),
        }
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// 단위 목록에 대해 한 사이클을 실행합니다.
    pub async fn run_cycle(&self, units: Vec<UnitKey>, now: DateTime<Utc>) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport::new();

        info!(units = units.len(), workers = self.workers, "동기화 사이클 시작");

        let results: Vec<(UnitKey, Result<UnitOutcome, tokio::task::JoinError>)> =
            stream::iter(units)
                .map(|key| {
                    let coordinator = self.coordinator.clone();
                    async move {
                        let task_key = key.clone();
                        let handle =
                            tokio::spawn(async move { coordinator.sync_unit(&task_key, now).await });
                        (key, handle.await)
                    }
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;

        for (key, result) in results {
            match result {
                Ok(outcome) => record_outcome(&mut report, &key, outcome),
                Err(e) => {
                    error!(unit = %key, error = %e, "동기화 워커 비정상 종료");
                    report.total += 1;
                    report.failed += 1;
                    report.failed_units.push(format!("{}: worker panicked", key));
                }
            }
        }

        report.elapsed = start.elapsed();
        report
    }
}

/// 단위 결과를 사이클 통계에 반영.
pub fn record_outcome(report: &mut CycleReport, key: &UnitKey, outcome: UnitOutcome) {
    report.total += 1;
    match outcome {
        UnitOutcome::Synced {
            written, dropped, ..
        } => {
            report.synced += 1;
            report.candles_written += written;
            report.dropped_invalid += dropped;
        }
        UnitOutcome::Current { dropped } => {
            report.current += 1;
            report.dropped_invalid += dropped;
        }
        UnitOutcome::FailedBackoff { error } => {
            report.failed += 1;
            report.failed_units.push(format!("{}: {}", key, error));
        }
        UnitOutcome::Unavailable => report.unavailable += 1,
        UnitOutcome::Skipped(SkipReason::Running) => report.skipped_running += 1,
        UnitOutcome::Skipped(SkipReason::Unavailable) => report.skipped_unavailable += 1,
        UnitOutcome::Skipped(SkipReason::Cooldown { .. }) => report.skipped_cooldown += 1,
    }
}
