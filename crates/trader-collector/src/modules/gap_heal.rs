//! 갭 힐링.
//!
//! 열린 갭마다 정확히 `[gap_start, gap_end]` 구간을 다시 조회하여 저장합니다.
//!
//! - 갭 내부(양 끝 제외)에 캔들이 하나라도 저장되면 healed
//! - 벤더가 빈 응답(또는 NotFound)을 주면 시도 횟수를 올리고, 상한에 도달하면
//!   `accepted`로 닫아 같은 갭이 무한히 재처리되지 않게 함
//! - 재시도 소진이나 저장 실패는 빈 응답으로 세지 않음
//!
//! 단위끼리는 병렬로, 한 단위의 갭은 순서대로 처리합니다.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use trader_core::{GapRecord, Timeframe, UnitKey};
use trader_data::GapStore;

use super::sync::SyncCoordinator;
use crate::stats::HealReport;
use crate::stores::Stores;
use crate::Result;

/// 갭 하나의 힐링 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapHealOutcome {
    /// 캔들을 채움
    Healed { written: usize },
    /// 벤더에 데이터가 없음을 수용
    Accepted { attempts: i32 },
    /// 빈 응답, 아직 수용 전
    StillOpen { attempts: i32 },
    /// 재시도 소진 또는 저장 실패 (시도 횟수에 포함하지 않음)
    Failed { error: String },
}

/// 갭 힐러.
#[derive(Clone)]
pub struct GapHealer {
    coordinator: SyncCoordinator,
    gaps: Arc<dyn GapStore>,
    max_attempts: i32,
    workers: usize,
}

impl GapHealer {
    pub fn new(coordinator: SyncCoordinator, stores: &Stores, max_attempts: i32, workers: usize) -> Self {
        Self {
            coordinator,
            gaps: Arc::clone(&stores.gaps),
            max_attempts: max_attempts.max(1),
            workers: workers.max(1),
        }
    }

    /// 열린 갭을 모두 힐링합니다.
    pub async fn heal(&self, timeframe: Option<Timeframe>, now: DateTime<Utc>) -> Result<HealReport> {
        let start = Instant::now();
        let open = self.gaps.open_gaps(timeframe).await?;

        let mut by_unit: BTreeMap<UnitKey, Vec<GapRecord>> = BTreeMap::new();
        for gap in open {
            by_unit.entry(gap.unit()).or_default().push(gap);
        }

        info!(units = by_unit.len(), "갭 힐링 시작");

        let results: Vec<(UnitKey, std::result::Result<HealReport, tokio::task::JoinError>)> =
            stream::iter(by_unit)
                .map(|(key, gaps)| {
                    let healer = self.clone();
                    async move {
                        let span = trader_core::unit_span!("heal_unit", key);
                        let handle = tokio::spawn(
                            async move { healer.heal_unit(gaps, now).await }.instrument(span),
                        );
                        (key, handle.await)
                    }
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;

        let mut report = HealReport::default();
        for (key, result) in results {
            match result {
                Ok(unit_report) => report.merge(unit_report),
                Err(e) => {
                    error!(unit = %key, error = %e, "힐링 워커 비정상 종료");
                    report.failed += 1;
                }
            }
        }

        report.elapsed = start.elapsed();
        Ok(report)
    }

    async fn heal_unit(&self, gaps: Vec<GapRecord>, now: DateTime<Utc>) -> HealReport {
        let mut report = HealReport::default();
        for gap in gaps {
            report.gaps_processed += 1;
            match self.heal_gap(&gap, now).await {
                GapHealOutcome::Healed { written } => {
                    report.healed += 1;
                    report.candles_written += written;
                }
                GapHealOutcome::Accepted { .. } => report.accepted += 1,
                GapHealOutcome::StillOpen { .. } => report.still_open += 1,
                GapHealOutcome::Failed { .. } => report.failed += 1,
            }
        }
        report
    }

    /// 갭 하나를 힐링합니다.
    pub async fn heal_gap(&self, gap: &GapRecord, now: DateTime<Utc>) -> GapHealOutcome {
        let key = gap.unit();

        let candles = match self
            .coordinator
            .fetch_with_retry(&key, gap.gap_start, gap.gap_end)
            .await
        {
            Ok(candles) => candles,
            Err(e) if e.is_not_found() => return self.record_empty(gap, now).await,
            Err(e) => {
                warn!(gap_id = gap.id, error = %e, "갭 조회 재시도 소진");
                return GapHealOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let summary = match self.coordinator.write_candles(&key, candles).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(gap_id = gap.id, error = %e, "갭 캔들 저장 실패");
                return GapHealOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let filled = summary
            .open_times
            .iter()
            .filter(|t| gap.contains_inner(**t))
            .count();
        if filled == 0 {
            return self.record_empty(gap, now).await;
        }

        match self.gaps.mark_healed(gap.id, now, false).await {
            Ok(()) => {
                info!(
                    gap_id = gap.id,
                    gap_start = %gap.gap_start,
                    gap_end = %gap.gap_end,
                    filled,
                    "갭 힐링 완료"
                );
                GapHealOutcome::Healed {
                    written: summary.written,
                }
            }
            Err(e) => GapHealOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    /// 빈 응답 기록, 상한 도달 시 갭 수용.
    async fn record_empty(&self, gap: &GapRecord, now: DateTime<Utc>) -> GapHealOutcome {
        let attempts = match self.gaps.record_heal_attempt(gap.id).await {
            Ok(attempts) => attempts,
            Err(e) => {
                return GapHealOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        if attempts < self.max_attempts {
            debug!(gap_id = gap.id, attempts, "벤더 빈 응답, 갭 유지");
            return GapHealOutcome::StillOpen { attempts };
        }

        match self.gaps.mark_healed(gap.id, now, true).await {
            Ok(()) => {
                warn!(
                    gap_id = gap.id,
                    gap_start = %gap.gap_start,
                    gap_end = %gap.gap_end,
                    attempts,
                    "벤더에 데이터 없음, 갭 수용"
                );
                GapHealOutcome::Accepted { attempts }
            }
            Err(e) => GapHealOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}
