//! 주기적 헬스 체크.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use trader_core::{ClaimPolicy, UnitState};

use crate::config::TimeframePolicy;
use crate::stores::Stores;
use crate::Result;

/// 동기화 주기의 몇 배 이상 뒤처지면 지연으로 보는지.
const LAG_CADENCE_MULTIPLIER: i32 = 3;

/// 헬스 체크 결과.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    /// staleness 상한을 넘긴 SYNCING 단위
    pub stuck_syncing: Vec<String>,
    /// FAILED_BACKOFF 단위
    pub failed_backoff: Vec<String>,
    /// 동기화 주기 × 3 이상 뒤처진 단위
    pub lagging: Vec<String>,
    /// 열린 갭 수
    pub open_gaps: usize,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.stuck_syncing.is_empty() && self.failed_backoff.is_empty() && self.lagging.is_empty()
    }

    pub fn log_summary(&self, operation: &str) {
        for unit in &self.stuck_syncing {
            warn!(operation = operation, unit = %unit, "SYNCING 상태로 멈춘 단위");
        }
        for unit in &self.failed_backoff {
            warn!(operation = operation, unit = %unit, "FAILED_BACKOFF 단위");
        }
        for unit in &self.lagging {
            warn!(operation = operation, unit = %unit, "동기화 지연 단위");
        }

        if self.is_healthy() {
            info!(operation = operation, open_gaps = self.open_gaps, "헬스 체크 정상");
        } else {
            warn!(
                operation = operation,
                stuck = self.stuck_syncing.len(),
                failed = self.failed_backoff.len(),
                lagging = self.lagging.len(),
                open_gaps = self.open_gaps,
                "헬스 체크 이상 감지"
            );
        }
    }
}

/// 동기화 상태와 갭 기록을 점검합니다.
pub async fn health_check(
    stores: &Stores,
    policy: &ClaimPolicy,
    now: DateTime<Utc>,
) -> Result<HealthReport> {
    let states = stores.states.list(None).await?;
    let open_gaps = stores.gaps.open_gaps(None).await?.len();

    let mut report = HealthReport {
        open_gaps,
        ..Default::default()
    };

    for state in &states {
        let unit = state.key().to_string();
        match state.state {
            UnitState::Unavailable => continue,
            UnitState::Syncing => {
                let stuck = state
                    .last_cycle_started_at
                    .map_or(true, |started| now - started >= policy.stale_after);
                if stuck {
                    report.stuck_syncing.push(unit.clone());
                }
            }
            UnitState::FailedBackoff => report.failed_backoff.push(unit.clone()),
            UnitState::Current => {}
        }
        if state.known_unavailable {
            continue;
        }

        let cadence = TimeframePolicy::for_timeframe(state.timeframe).cadence;
        let lag_limit = cadence * LAG_CADENCE_MULTIPLIER;
        match state.last_synced_through {
            Some(through) if now - through > lag_limit => {
                report.lagging.push(format!("{} (through {})", unit, through));
            }
            None => report.lagging.push(format!("{} (never synced)", unit)),
            _ => {}
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use trader_core::{SyncState, Timeframe, UnitKey};
    use trader_data::MemoryStore;

    #[tokio::test]
    async fn test_health_findings() {
        let memory = Arc::new(MemoryStore::new());
        let stores = Stores::memory(memory.clone());
        let now = Utc.with_ymd_and_hms(2024, 8, 1, 12, 0, 0).unwrap();

        let mut fresh = SyncState::new(&UnitKey::new("AAPL", Timeframe::H1));
        fresh.last_synced_through = Some(now - Duration::hours(1));
        memory.put_state(fresh).await;

        let mut stuck = SyncState::new(&UnitKey::new("MSFT", Timeframe::H1));
        stuck.last_synced_through = Some(now - Duration::hours(1));
        stuck.begin(now - Duration::minutes(45));
        memory.put_state(stuck).await;

        let mut lagging = SyncState::new(&UnitKey::new("TSLA", Timeframe::M15));
        lagging.last_synced_through = Some(now - Duration::hours(2));
        memory.put_state(lagging).await;

        let report = health_check(&stores, &ClaimPolicy::default(), now).await.unwrap();
        assert_eq!(report.stuck_syncing, vec!["MSFT/1h".to_string()]);
        assert_eq!(report.lagging.len(), 1);
        assert!(report.lagging[0].starts_with("TSLA/15m"));
        assert!(!report.is_healthy());
    }
}
