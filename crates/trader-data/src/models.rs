//! 저장소 계층에서 주고받는 값 타입.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use trader_core::{SyncState, TriggerDecision};

use crate::error::DataError;

/// 단위별 저장 현황.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoverageStats {
    pub count: i64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

/// `SyncStateStore::try_begin` 결과.
///
/// `decision.should_run()`이면 `state`는 이미 SYNCING으로 기록된 행이며
/// `state.last_cycle_started_at`이 `finish`에 넘길 토큰입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub decision: TriggerDecision,
    pub state: SyncState,
}

impl Claim {
    pub fn is_claimed(&self) -> bool {
        self.decision.should_run()
    }

    /// check-and-set 토큰.
    pub fn token(&self) -> Option<DateTime<Utc>> {
        if self.is_claimed() {
            self.state.last_cycle_started_at
        } else {
            None
        }
    }
}

/// 작업 실행 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DataError::InvalidData(format!("unknown job status: {}", other))),
        }
    }
}

/// 작업별 실행 기록 (job_runs 테이블 한 행).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRun {
    pub job_name: String,
    pub last_started_at: DateTime<Utc>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub last_error: Option<String>,
}
