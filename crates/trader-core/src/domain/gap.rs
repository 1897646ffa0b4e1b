//! 데이터 갭 레코드.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Timeframe, UnitKey};

/// 갭 감지기가 찾아낸 구간 (저장 전).
///
/// `gap_start`, `gap_end`는 갭 양쪽에 실제로 존재하는 캔들의 open_time입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedGap {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub gap_start: DateTime<Utc>,
    pub gap_end: DateTime<Utc>,
}

impl DetectedGap {
    /// 갭 내부에 빠진 것으로 예상되는 캔들 수.
    pub fn missing_bars(&self) -> i64 {
        let span = (self.gap_end - self.gap_start).num_seconds();
        (span / self.timeframe.as_secs() - 1).max(0)
    }
}

/// 감사 기록으로 보존되는 갭 레코드 (gap_audit 테이블 한 행).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapRecord {
    pub id: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub gap_start: DateTime<Utc>,
    pub gap_end: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub healed: bool,
    pub healed_at: Option<DateTime<Utc>>,
    /// 벤더가 빈 응답을 준 힐링 시도 횟수
    pub heal_attempts: i32,
    /// 벤더에 데이터가 없음을 받아들인 갭
    pub accepted: bool,
}

impl GapRecord {
    pub fn unit(&self) -> UnitKey {
        UnitKey::new(self.symbol.clone(), self.timeframe)
    }

    /// 시각이 갭 내부(양 끝 제외)에 있는지 확인.
    pub fn contains_inner(&self, ts: DateTime<Utc>) -> bool {
        ts > self.gap_start && ts < self.gap_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_missing_bars() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let gap = DetectedGap {
            symbol: "X:ETHUSD".to_string(),
            timeframe: Timeframe::H1,
            gap_start: t0,
            gap_end: t0 + Duration::hours(3),
        };
        assert_eq!(gap.missing_bars(), 2);
    }

    #[test]
    fn test_contains_inner_excludes_bounds() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = GapRecord {
            id: 1,
            symbol: "X:ETHUSD".to_string(),
            timeframe: Timeframe::H1,
            gap_start: t0,
            gap_end: t0 + Duration::hours(2),
            detected_at: t0,
            healed: false,
            healed_at: None,
            heal_attempts: 0,
            accepted: false,
        };
        assert!(!record.contains_inner(t0));
        assert!(record.contains_inner(t0 + Duration::hours(1)));
        assert!(!record.contains_inner(t0 + Duration::hours(2)));
    }
}
