//! 캔들스틱 데이터를 위한 타임프레임 정의.
//!
//! 동기화 대상은 1분/15분/1시간/일봉 네 가지이며, 모든 캔들의 `open_time`은
//! 해당 타임프레임 경계(UTC)에 정렬되어 있어야 합니다.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TraderError;

/// 캔들스틱 타임프레임.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1분봉
    #[serde(rename = "1m")]
    M1,
    /// 15분봉
    #[serde(rename = "15m")]
    M15,
    /// 1시간봉
    #[serde(rename = "1h")]
    H1,
    /// 일봉
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// 지원하는 모든 타임프레임 (짧은 것부터).
    pub const ALL: [Timeframe; 4] = [Timeframe::M1, Timeframe::M15, Timeframe::H1, Timeframe::D1];

    /// 캔들 한 개의 기간.
    pub fn interval(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::D1 => Duration::days(1),
        }
    }

    /// 초 단위 기간.
    pub fn as_secs(&self) -> i64 {
        self.interval().num_seconds()
    }

    /// DB 저장 및 CLI 표기용 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        }
    }

    /// 주어진 시각이 속한 캔들의 시작 시각(경계 내림).
    pub fn align_floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.as_secs();
        let floored = ts.timestamp().div_euclid(secs) * secs;
        Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
    }

    /// 시각이 타임프레임 경계에 정렬되어 있는지 확인.
    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        ts.timestamp_subsec_nanos() == 0 && ts.timestamp().rem_euclid(self.as_secs()) == 0
    }

    /// `[from, to]` 구간에 들어가는 정렬된 캔들 수.
    pub fn bars_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        if to < from {
            return 0;
        }
        (to - from).num_seconds() / self.as_secs() + 1
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Timeframe::M1),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "1d" => Ok(Timeframe::D1),
            other => Err(TraderError::InvalidInput(format!(
                "지원하지 않는 타임프레임: {}",
                other
            ))),
        }
    }
}
