//! 동기화 단위별 상태 머신.
//!
//! # 상태 전이
//!
//! ```text
//! CURRENT ──[트리거]──> SYNCING ──[성공]──> CURRENT
//!                          │
//!                          ├──[재시도 소진]──> FAILED_BACKOFF ──[쿨다운 경과]──> SYNCING
//!                          │
//!                          └──[NotFound]──> UNAVAILABLE (수동 리셋 전까지 종료 상태)
//! ```
//!
//! SYNCING 상태가 staleness 상한을 넘기면 죽은 워커로 간주하고 강제로 다시 시작합니다.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TraderError;
use crate::types::UnitKey;

/// 단위 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// 최신 상태 (다음 트리거에 바로 실행 가능)
    Current,
    /// 동기화 진행 중
    Syncing,
    /// 재시도 소진 후 쿨다운 중
    FailedBackoff,
    /// 벤더에 데이터가 영구적으로 없음
    Unavailable,
}

impl UnitState {
    /// DB 저장용 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Syncing => "syncing",
            Self::FailedBackoff => "failed_backoff",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitState {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => Ok(Self::Current),
            "syncing" => Ok(Self::Syncing),
            "failed_backoff" => Ok(Self::FailedBackoff),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(TraderError::InvalidInput(format!("알 수 없는 단위 상태: {}", other))),
        }
    }
}

/// 트리거 판단에 쓰이는 시간 정책.
#[derive(Debug, Clone, Copy)]
pub struct ClaimPolicy {
    /// SYNCING 상태를 죽은 워커로 간주하는 상한
    pub stale_after: Duration,
    /// FAILED_BACKOFF 첫 쿨다운
    pub failure_cooldown: Duration,
    /// 쿨다운 상한
    pub max_failure_cooldown: Duration,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::minutes(10),
            failure_cooldown: Duration::seconds(60),
            max_failure_cooldown: Duration::hours(1),
        }
    }
}

impl ClaimPolicy {
    /// 연속 실패 횟수에 따른 쿨다운 (지수 증가, 상한 적용).
    pub fn cooldown_for(&self, consecutive_failures: i32) -> Duration {
        let exponent = (consecutive_failures.max(1) - 1).min(16) as u32;
        let scaled = self
            .failure_cooldown
            .checked_mul(2_i32.pow(exponent))
            .unwrap_or(self.max_failure_cooldown);
        scaled.min(self.max_failure_cooldown)
    }
}

/// 트리거 판단 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// 동기화 시작
    Start,
    /// staleness 상한 초과로 강제 리셋 후 시작
    ForceResetStale,
    /// 이미 실행 중 (건너뜀, 큐잉하지 않음)
    SkipRunning,
    /// 영구 비가용 단위
    SkipUnavailable,
    /// 실패 쿨다운 중
    SkipCooldown { until: DateTime<Utc> },
}

impl TriggerDecision {
    /// 실행해야 하는 결정인지 확인.
    pub fn should_run(&self) -> bool {
        matches!(self, Self::Start | Self::ForceResetStale)
    }
}

/// 단위별 동기화 상태 (sync_state 테이블 한 행).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub symbol: String,
    pub timeframe: crate::types::Timeframe,
    /// 저장이 확인된 마지막 캔들 open_time
    pub last_synced_through: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub known_unavailable: bool,
    pub state: UnitState,
    /// 마지막 사이클 시작 시각 (check-and-set 토큰으로도 사용)
    pub last_cycle_started_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// 첫 사이클에서 지연 생성되는 초기 상태 (CURRENT, 즉시 실행 대상).
    pub fn new(key: &UnitKey) -> Self {
        Self {
            symbol: key.symbol.clone(),
            timeframe: key.timeframe,
            last_synced_through: None,
            consecutive_failures: 0,
            known_unavailable: false,
            state: UnitState::Current,
            last_cycle_started_at: None,
        }
    }

    pub fn key(&self) -> UnitKey {
        UnitKey::new(self.symbol.clone(), self.timeframe)
    }

    /// 트리거가 들어왔을 때 실행 여부를 판단합니다.
    pub fn evaluate_trigger(&self, now: DateTime<Utc>, policy: &ClaimPolicy) -> TriggerDecision {
        if self.known_unavailable || self.state == UnitState::Unavailable {
            return TriggerDecision::SkipUnavailable;
        }

        match self.state {
            UnitState::Syncing => match self.last_cycle_started_at {
                Some(started) if now - started < policy.stale_after => {
                    TriggerDecision::SkipRunning
                }
                _ => TriggerDecision::ForceResetStale,
            },
            UnitState::FailedBackoff => {
                let until = self
                    .last_cycle_started_at
                    .map(|started| started + policy.cooldown_for(self.consecutive_failures));
                match until {
                    Some(until) if now < until => TriggerDecision::SkipCooldown { until },
                    _ => TriggerDecision::Start,
                }
            }
            UnitState::Current | UnitState::Unavailable => TriggerDecision::Start,
        }
    }

    /// 트리거 수락 후 SYNCING으로 전이.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.state = UnitState::Syncing;
        self.last_cycle_started_at = Some(now);
    }

    /// 사이클 결과 적용.
    pub fn apply(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Synced { through } => {
                if let Some(through) = through {
                    self.last_synced_through = Some(match self.last_synced_through {
                        Some(prev) => prev.max(*through),
                        None => *through,
                    });
                }
                self.consecutive_failures = 0;
                self.state = UnitState::Current;
            }
            SyncOutcome::FailedBackoff => {
                self.consecutive_failures += 1;
                self.state = UnitState::FailedBackoff;
            }
            SyncOutcome::Unavailable => {
                self.known_unavailable = true;
                self.state = UnitState::Unavailable;
            }
        }
    }

    /// 수동 리셋 (UNAVAILABLE 해제).
    pub fn reset(&mut self) {
        self.known_unavailable = false;
        self.consecutive_failures = 0;
        self.state = UnitState::Current;
    }
}

/// 사이클 종료 시 SYNCING 행에 적용할 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 성공. `through`가 있으면 last_synced_through를 그 값까지 전진 (후퇴 없음)
    Synced { through: Option<DateTime<Utc>> },
    /// 재시도 소진 또는 저장 실패
    FailedBackoff,
    /// NotFound 응답
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn state() -> SyncState {
        SyncState::new(&UnitKey::new("X:BTCUSD", Timeframe::H1))
    }

    #[test]
    fn test_new_state_is_due_immediately() {
        let s = state();
        assert_eq!(s.state, UnitState::Current);
        assert_eq!(s.evaluate_trigger(now(), &ClaimPolicy::default()), TriggerDecision::Start);
    }

    #[test]
    fn test_running_unit_is_skipped_until_stale() {
        let policy = ClaimPolicy::default();
        let mut s = state();
        s.begin(now());

        let soon = now() + Duration::minutes(3);
        assert_eq!(s.evaluate_trigger(soon, &policy), TriggerDecision::SkipRunning);

        let later = now() + Duration::minutes(11);
        assert_eq!(s.evaluate_trigger(later, &policy), TriggerDecision::ForceResetStale);
    }

    #[test]
    fn test_failed_backoff_cooldown_grows() {
        let policy = ClaimPolicy::default();
        assert_eq!(policy.cooldown_for(1), Duration::seconds(60));
        assert_eq!(policy.cooldown_for(3), Duration::seconds(240));
        assert_eq!(policy.cooldown_for(30), Duration::hours(1));

        let mut s = state();
        s.begin(now());
        s.apply(&SyncOutcome::FailedBackoff);
        s.apply(&SyncOutcome::FailedBackoff);
        assert_eq!(s.consecutive_failures, 2);

        let decision = s.evaluate_trigger(now() + Duration::seconds(90), &policy);
        assert_eq!(
            decision,
            TriggerDecision::SkipCooldown {
                until: now() + Duration::seconds(120)
            }
        );
        assert!(s
            .evaluate_trigger(now() + Duration::seconds(120), &policy)
            .should_run());
    }

    #[test]
    fn test_unavailable_is_terminal_until_reset() {
        let mut s = state();
        s.begin(now());
        s.apply(&SyncOutcome::Unavailable);
        let far = now() + Duration::days(30);
        assert_eq!(
            s.evaluate_trigger(far, &ClaimPolicy::default()),
            TriggerDecision::SkipUnavailable
        );

        s.reset();
        assert!(s.evaluate_trigger(far, &ClaimPolicy::default()).should_run());
    }

    #[test]
    fn test_synced_never_moves_backwards() {
        let mut s = state();
        s.apply(&SyncOutcome::Synced { through: Some(now()) });
        s.apply(&SyncOutcome::Synced {
            through: Some(now() - Duration::hours(2)),
        });
        assert_eq!(s.last_synced_through, Some(now()));

        s.apply(&SyncOutcome::Synced { through: None });
        assert_eq!(s.last_synced_through, Some(now()));
        assert_eq!(s.state, UnitState::Current);
    }

    #[test]
    fn test_unit_state_round_trip() {
        for st in [
            UnitState::Current,
            UnitState::Syncing,
            UnitState::FailedBackoff,
            UnitState::Unavailable,
        ] {
            assert_eq!(st.as_str().parse::<UnitState>().unwrap(), st);
        }
        assert!("running".parse::<UnitState>().is_err());
    }
}
