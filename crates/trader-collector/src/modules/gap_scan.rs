//! 갭 감지 및 스캔.
//!
//! 저장된 open_time 사이 간격이 `interval × tolerance` 이상이면 갭으로 봅니다.
//! 미세한 타임프레임일수록 벤더 지터가 커서 tolerance가 느슨합니다 (1m은 5배).
//!
//! 내부 갭만 감지합니다. 구간 시작부터 아예 데이터가 없는 단위는 여기서 잡지
//! 않고 completeness 리포트의 MISSING 표시로 드러납니다.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use trader_core::{DetectedGap, Timeframe};
use trader_data::{CandleStore, GapStore, SyncStateStore};

use crate::config::TimeframePolicy;
use crate::stats::GapScanReport;
use crate::stores::Stores;
use crate::Result;

/// 오름차순 open_time 목록에서 내부 갭을 찾습니다.
///
/// 연속한 두 시각의 간격이 `interval × tolerance` 이상이면 두 시각을 양 끝으로
/// 하는 갭 하나를 만듭니다. 점이 2개 미만이면 갭이 없습니다.
pub fn detect_gaps(
    symbol: &str,
    timeframe: Timeframe,
    open_times: &[DateTime<Utc>],
    tolerance: i32,
) -> Vec<DetectedGap> {
    if open_times.len() < 2 {
        return Vec::new();
    }

    let threshold = timeframe.interval() * tolerance.max(1);

    open_times
        .windows(2)
        .filter(|pair| pair[1] - pair[0] >= threshold)
        .map(|pair| DetectedGap {
            symbol: symbol.to_string(),
            timeframe,
            gap_start: pair[0],
            gap_end: pair[1],
        })
        .collect()
}

/// 저장된 캔들을 훑어 갭을 기록하는 스캐너.
#[derive(Clone)]
pub struct GapScanner {
    candles: Arc<dyn CandleStore>,
    states: Arc<dyn SyncStateStore>,
    gaps: Arc<dyn GapStore>,
}

impl GapScanner {
    pub fn new(stores: &Stores) -> Self {
        Self {
            candles: Arc::clone(&stores.candles),
            states: Arc::clone(&stores.states),
            gaps: Arc::clone(&stores.gaps),
        }
    }

    /// 알려진 단위(비가용 제외)를 스캔하고 새 갭을 기록합니다.
    pub async fn scan(&self, timeframe: Option<Timeframe>, now: DateTime<Utc>) -> Result<GapScanReport> {
        let start = Instant::now();
        let mut report = GapScanReport::default();

        let states = self.states.list(timeframe).await?;
        info!(units = states.len(), "갭 스캔 시작");

        for state in states.iter().filter(|s| !s.known_unavailable) {
            let key = state.key();
            let policy = TimeframePolicy::for_timeframe(key.timeframe);
            let from = now - policy.gap_scan_lookback;

            let open_times = match self
                .candles
                .open_times(&key.symbol, key.timeframe, from, now)
                .await
            {
                Ok(times) => times,
                Err(e) => {
                    warn!(unit = %key, error = %e, "캔들 시각 조회 실패");
                    report.errors.push(format!("{}: {}", key, e));
                    continue;
                }
            };
            report.units_scanned += 1;

            let gaps = detect_gaps(&key.symbol, key.timeframe, &open_times, policy.tolerance);
            if gaps.is_empty() {
                continue;
            }
            report.gaps_found += gaps.len();

            match self.gaps.record_gaps(&gaps, now).await {
                Ok(recorded) => {
                    report.gaps_recorded += recorded;
                    debug!(unit = %key, found = gaps.len(), recorded, "갭 감지");
                }
                Err(e) => {
                    warn!(unit = %key, error = %e, "갭 기록 실패");
                    report.errors.push(format!("{}: {}", key, e));
                }
            }
        }

        report.elapsed = start.elapsed();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_single_gap_at_two_intervals() {
        let i = Duration::hours(1);
        let times = [t0(), t0() + i, t0() + i * 3];
        let gaps = detect_gaps("X:BTCUSD", Timeframe::H1, &times, 2);

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].gap_start, t0() + i);
        assert_eq!(gaps[0].gap_end, t0() + i * 3);
    }

    #[test]
    fn test_fewer_than_two_points() {
        assert!(detect_gaps("X:BTCUSD", Timeframe::H1, &[], 2).is_empty());
        assert!(detect_gaps("X:BTCUSD", Timeframe::H1, &[t0()], 2).is_empty());
    }

    #[test]
    fn test_minute_tolerance_absorbs_jitter() {
        let m = Duration::minutes(1);
        let times = [t0(), t0() + m * 4, t0() + m * 9];
        let gaps = detect_gaps("X:BTCUSD", Timeframe::M1, &times, 5);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].gap_start, t0() + m * 4);
    }

    proptest! {
        #[test]
        fn prop_gap_count_matches_large_deltas(steps in prop::collection::vec(1i64..8, 0..60), tolerance in 2i32..6) {
            let mut times = vec![t0()];
            for step in &steps {
                let last = *times.last().unwrap();
                times.push(last + Duration::hours(*step));
            }

            let gaps = detect_gaps("AAPL", Timeframe::H1, &times, tolerance);
            let expected = steps.iter().filter(|s| **s >= tolerance as i64).count();
            prop_assert_eq!(gaps.len(), expected);

            for gap in &gaps {
                prop_assert!(gap.gap_start < gap.gap_end);
                prop_assert!(times.contains(&gap.gap_start));
                prop_assert!(times.contains(&gap.gap_end));
                prop_assert!(gap.missing_bars() >= (tolerance - 1) as i64);
            }
        }

        #[test]
        fn prop_contiguous_series_has_no_gaps(len in 0usize..200) {
            let times: Vec<DateTime<Utc>> =
                (0..len as i64).map(|n| t0() + Duration::minutes(15 * n)).collect();
            prop_assert!(detect_gaps("AAPL", Timeframe::M15, &times, 2).is_empty());
        }
    }
}
