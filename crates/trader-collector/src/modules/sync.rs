//! 증분 동기화 코디네이터.
//!
//! 단위(심볼 × 타임프레임)마다 다음 순서로 한 사이클을 수행합니다.
//!
//! 1. `SyncStateStore::try_begin`으로 SYNCING 획득 (실패하면 건너뜀, 큐잉하지 않음)
//! 2. 조회 구간 계산: `[last_synced_through − overlap, now]`, 최대 과거 구간으로 제한
//! 3. 재시도/백오프를 적용한 벤더 조회 (조회마다 하드 타임아웃)
//! 4. 검증 후 저장, `last_synced_through`를 저장된 최대 open_time으로 전진
//! 5. 결과를 check-and-set으로 기록
//!
//! 단위의 실패는 [`UnitOutcome`]으로 변환되어 사이클 전체로 전파되지 않습니다.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};
use trader_core::{
    Candle, ClaimPolicy, SyncOutcome, TraderError, TriggerDecision, UnitKey,
};
use trader_data::{CandleStore, SyncStateStore};
use trader_exchange::{
    normalize_candles, with_retry, CandleFetcher, FetchError, FetchResult, RetryConfig,
};

use crate::config::{SyncConfig, TimeframePolicy};
use crate::stores::Stores;
use crate::Result;

/// 벤더 조회 구간 (양 끝 포함).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// 조회 구간 계산.
///
/// 시작은 `last_synced_through − overlap`이지만 `now − max_lookback`보다 과거로
/// 가지 않으며, 타임프레임 경계로 내림합니다. 상태가 없으면 최대 과거 구간부터
/// 시작합니다.
pub fn fetch_window(
    key: &UnitKey,
    last_synced_through: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    policy: &TimeframePolicy,
) -> FetchWindow {
    let floor = now - policy.max_lookback;
    let start = match last_synced_through {
        Some(through) => (through - policy.overlap).max(floor),
        None => floor,
    };

    FetchWindow {
        from: key.timeframe.align_floor(start).min(now),
        to: now,
    }
}

/// 건너뛴 이유.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 이미 다른 워커가 실행 중
    Running,
    /// 영구 비가용 단위
    Unavailable,
    /// 실패 쿨다운 중
    Cooldown { until: DateTime<Utc> },
}

/// 단위 한 사이클의 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// 캔들을 저장함
    Synced {
        written: usize,
        dropped: usize,
        through: Option<DateTime<Utc>>,
    },
    /// 저장할 새 데이터 없음
    Current { dropped: usize },
    /// 재시도 소진 또는 저장 실패
    FailedBackoff { error: String },
    /// NotFound 응답으로 비가용 처리됨
    Unavailable,
    /// 실행하지 않음
    Skipped(SkipReason),
}

impl UnitOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FailedBackoff { .. })
    }
}

/// 검증 후 저장 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// 저장된 행 수
    pub written: usize,
    /// 검증 실패로 버린 캔들 수
    pub dropped: usize,
    /// 저장된 캔들의 open_time (오름차순)
    pub open_times: Vec<DateTime<Utc>>,
}

impl WriteSummary {
    /// 저장된 최대 open_time.
    pub fn through(&self) -> Option<DateTime<Utc>> {
        self.open_times.iter().max().copied()
    }
}

/// 증분 동기화 코디네이터.
#[derive(Clone)]
pub struct SyncCoordinator {
    fetcher: Arc<dyn CandleFetcher>,
    candles: Arc<dyn CandleStore>,
    states: Arc<dyn SyncStateStore>,
    retry: RetryConfig,
    claim_policy: ClaimPolicy,
    fetch_timeout: Duration,
}

impl SyncCoordinator {
    pub fn new(fetcher: Arc<dyn CandleFetcher>, stores: &Stores, config: &SyncConfig) -> Self {
        Self {
            fetcher,
            candles: Arc::clone(&stores.candles),
            states: Arc::clone(&stores.states),
            retry: config.retry_config(),
            claim_policy: config.claim_policy(),
            fetch_timeout: config.fetch_timeout(),
        }
    }

    pub fn claim_policy(&self) -> &ClaimPolicy {
        &self.claim_policy
    }

    /// 단위 하나를 동기화합니다.
    pub async fn sync_unit(&self, key: &UnitKey, now: DateTime<Utc>) -> UnitOutcome {
        let span = trader_core::unit_span!("sync_unit", key);
        self.run_unit(key, now).instrument(span).await
    }

    async fn run_unit(&self, key: &UnitKey, now: DateTime<Utc>) -> UnitOutcome {
        let claim = match self.states.try_begin(key, now, &self.claim_policy).await {
            Ok(claim) => claim,
            Err(e) => {
                error!(error = %e, "동기화 상태 획득 실패");
                return UnitOutcome::FailedBackoff {
                    error: e.to_string(),
                };
            }
        };

        let token = match (claim.token(), claim.decision) {
            (Some(token), _) => token,
            (None, TriggerDecision::SkipUnavailable) => {
                return UnitOutcome::Skipped(SkipReason::Unavailable)
            }
            (None, TriggerDecision::SkipCooldown { until }) => {
                debug!(until = %until, "실패 쿨다운 중");
                return UnitOutcome::Skipped(SkipReason::Cooldown { until });
            }
            (None, _) => {
                debug!("이미 실행 중, 트리거 건너뜀");
                return UnitOutcome::Skipped(SkipReason::Running);
            }
        };

        let policy = TimeframePolicy::for_timeframe(key.timeframe);
        let window = fetch_window(key, claim.state.last_synced_through, now, &policy);
        debug!(from = %window.from, to = %window.to, "조회 구간");

        let (outcome, state_outcome) = match self.fetch_with_retry(key, window.from, window.to).await
        {
            Ok(candles) => match self.write_candles(key, candles).await {
                Ok(summary) if summary.written > 0 => {
                    let through = summary.through();
                    info!(candles = summary.written, through = ?through, "동기화 완료");
                    (
                        UnitOutcome::Synced {
                            written: summary.written,
                            dropped: summary.dropped,
                            through,
                        },
                        SyncOutcome::Synced { through },
                    )
                }
                Ok(summary) => {
                    debug!("새 데이터 없음");
                    (
                        UnitOutcome::Current {
                            dropped: summary.dropped,
                        },
                        SyncOutcome::Synced { through: None },
                    )
                }
                Err(e) => {
                    error!(error = %e, "캔들 저장 실패");
                    (
                        UnitOutcome::FailedBackoff {
                            error: e.to_string(),
                        },
                        SyncOutcome::FailedBackoff,
                    )
                }
            },
            Err(e) if e.is_not_found() => {
                warn!(error = %e, "벤더에 데이터 없음, 단위를 비가용으로 표시");
                (UnitOutcome::Unavailable, SyncOutcome::Unavailable)
            }
            Err(e) => {
                warn!(error = %e, "조회 재시도 소진");
                (
                    UnitOutcome::FailedBackoff {
                        error: e.to_string(),
                    },
                    SyncOutcome::FailedBackoff,
                )
            }
        };

        match self.states.finish(key, token, state_outcome).await {
            Ok(true) => outcome,
            Ok(false) => {
                warn!("사이클 토큰을 잃어 상태를 기록하지 않음");
                outcome
            }
            Err(e) => {
                error!(error = %e, "동기화 상태 기록 실패");
                UnitOutcome::FailedBackoff {
                    error: e.to_string(),
                }
            }
        }
    }

    /// 재시도와 타임아웃을 적용하여 `[from, to]` 구간을 조회합니다.
    pub async fn fetch_with_retry(
        &self,
        key: &UnitKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> FetchResult<Vec<Candle>> {
        let label = key.to_string();
        with_retry(&self.retry, &label, |attempt| {
            let fetcher = Arc::clone(&self.fetcher);
            let symbol = key.symbol.clone();
            let timeframe = key.timeframe;
            let deadline = self.fetch_timeout;
            async move {
                debug!(attempt, vendor = fetcher.name(), "벤더 조회");
                match tokio::time::timeout(deadline, fetcher.get_candles(&symbol, timeframe, from, to))
                    .await
                {
                    Ok(result) => result,
                    Err(elapsed) => Err(FetchError::from(elapsed)),
                }
            }
        })
        .await
    }

    /// 캔들을 검증한 뒤 저장합니다.
    ///
    /// 다른 단위의 캔들이나 검증에 실패한 캔들은 버리고 개수만 셉니다. 같은
    /// open_time이 여러 번 오면 나중 값 하나만 저장합니다 (한 청크 안의 중복 키는
    /// 업서트가 거부함).
    pub async fn write_candles(
        &self,
        key: &UnitKey,
        candles: Vec<Candle>,
    ) -> trader_data::Result<WriteSummary> {
        let mut valid = Vec::with_capacity(candles.len());
        let mut dropped = 0;

        for candle in candles {
            let checked = if candle.symbol != key.symbol || candle.timeframe != key.timeframe {
                Err(TraderError::Validation(format!(
                    "다른 단위의 캔들: {}",
                    candle.unit()
                )))
            } else {
                candle.validate()
            };

            match checked {
                Ok(()) => valid.push(candle),
                Err(e) => {
                    dropped += 1;
                    warn!(open_time = %candle.open_time, error = %e, "잘못된 캔들 제외");
                }
            }
        }

        if valid.is_empty() {
            return Ok(WriteSummary {
                written: 0,
                dropped,
                open_times: Vec::new(),
            });
        }

        let received = valid.len();
        let valid = normalize_candles(valid);
        if valid.len() < received {
            debug!(duplicates = received - valid.len(), "중복 open_time 병합");
        }

        let written = self.candles.upsert_batch(&valid).await?;
        let open_times: Vec<DateTime<Utc>> = valid.iter().map(|c| c.open_time).collect();

        Ok(WriteSummary {
            written,
            dropped,
            open_times,
        })
    }
}

/// UNAVAILABLE 단위를 수동으로 리셋합니다.
pub async fn reset_unit(states: &dyn SyncStateStore, key: &UnitKey) -> Result<bool> {
    let reset = states.reset(key).await?;
    if reset {
        info!(unit = %key, "단위 리셋 완료, 다음 사이클에 다시 동기화");
    } else {
        warn!(unit = %key, "동기화 상태가 없는 단위");
    }
    Ok(reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use trader_core::Timeframe;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_window_subtracts_overlap() {
        let key = UnitKey::new("X:BTCUSD", Timeframe::H1);
        let policy = TimeframePolicy::for_timeframe(Timeframe::H1);
        let window = fetch_window(&key, Some(now() - ChronoDuration::hours(3)), now(), &policy);
        assert_eq!(window.from, now() - ChronoDuration::hours(5));
        assert_eq!(window.to, now());
    }

    #[test]
    fn test_window_is_clamped_to_max_lookback() {
        let key = UnitKey::new("X:BTCUSD", Timeframe::M1);
        let policy = TimeframePolicy::for_timeframe(Timeframe::M1);
        let stalled = now() - ChronoDuration::days(30);
        let window = fetch_window(&key, Some(stalled), now(), &policy);
        assert_eq!(window.from, now() - ChronoDuration::days(2));

        let fresh = fetch_window(&key, None, now(), &policy);
        assert_eq!(fresh.from, now() - ChronoDuration::days(2));
    }

    #[test]
    fn test_window_start_is_aligned() {
        let key = UnitKey::new("AAPL", Timeframe::M15);
        let policy = TimeframePolicy::for_timeframe(Timeframe::M15);
        let last = Utc.with_ymd_and_hms(2024, 7, 10, 11, 47, 13).unwrap();
        let window = fetch_window(&key, Some(last), now(), &policy);
        assert_eq!(window.from, Utc.with_ymd_and_hms(2024, 7, 10, 11, 15, 0).unwrap());
        assert!(Timeframe::M15.is_aligned(window.from));
    }
}
