//! 저장소 trait 정의.
//!
//! 수집기의 각 구성 요소는 구체 저장소 대신 이 trait에 의존합니다.
//! PostgreSQL 구현은 [`crate::storage`], 테스트용 구현은
//! [`crate::storage::memory::MemoryStore`]에 있습니다.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use trader_core::{Candle, ClaimPolicy, DetectedGap, GapRecord, SyncOutcome, SyncState, Timeframe, UnitKey};

use crate::error::Result;
use crate::models::{Claim, CoverageStats, JobRun, JobStatus};

/// 캔들 저장소. (symbol, timeframe, open_time) 키로 멱등 저장합니다.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// 캔들 일괄 저장 (같은 키는 덮어씀). 저장된 행 수를 반환합니다.
    ///
    /// 청크 단위로 커밋되며, 실패한 청크가 앞서 커밋된 청크를 되돌리지 않습니다.
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<usize>;

    /// `[from, to]` 구간 캔들 (오름차순).
    async fn query_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// 가장 최근 캔들.
    async fn get_latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>>;

    /// `[from, to]` 구간에 저장된 open_time 목록 (오름차순).
    async fn open_times(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>>;

    /// 단위 전체 저장 현황.
    async fn coverage(&self, symbol: &str, timeframe: Timeframe) -> Result<CoverageStats>;
}

/// 단위별 동기화 상태 저장소.
///
/// "이 단위가 실행 중인가"의 유일한 판단 근거이며 check-and-set으로만 변경됩니다.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get(&self, key: &UnitKey) -> Result<Option<SyncState>>;

    /// 저장된 모든 단위 상태 (타임프레임 필터 선택).
    async fn list(&self, timeframe: Option<Timeframe>) -> Result<Vec<SyncState>>;

    /// 트리거를 평가하고, 실행 대상이면 원자적으로 SYNCING으로 전이합니다.
    ///
    /// 행이 없으면 CURRENT 상태로 지연 생성합니다.
    async fn try_begin(&self, key: &UnitKey, now: DateTime<Utc>, policy: &ClaimPolicy)
        -> Result<Claim>;

    /// 사이클 결과를 적용합니다.
    ///
    /// 행이 여전히 `started_at` 토큰을 가진 SYNCING일 때만 적용하고 `true`를
    /// 반환합니다. 토큰을 잃었으면 (강제 리셋 등) 아무것도 쓰지 않고 `false`.
    async fn finish(
        &self,
        key: &UnitKey,
        started_at: DateTime<Utc>,
        outcome: SyncOutcome,
    ) -> Result<bool>;

    /// 수동 리셋 (UNAVAILABLE 해제). 행이 없으면 `false`.
    async fn reset(&self, key: &UnitKey) -> Result<bool>;
}

/// 갭 감사 기록 저장소.
#[async_trait]
pub trait GapStore: Send + Sync {
    /// 감지된 갭 저장. 이미 기록된 구간은 건너뛰며 새로 기록된 수를 반환합니다.
    async fn record_gaps(&self, gaps: &[DetectedGap], detected_at: DateTime<Utc>) -> Result<usize>;

    /// 아직 힐링되지 않은 갭 (symbol, timeframe, gap_start 순).
    async fn open_gaps(&self, timeframe: Option<Timeframe>) -> Result<Vec<GapRecord>>;

    async fn mark_healed(&self, id: i64, healed_at: DateTime<Utc>, accepted: bool) -> Result<()>;

    /// 빈 응답 힐링 시도 기록. 누적 시도 횟수를 반환합니다.
    async fn record_heal_attempt(&self, id: i64) -> Result<i32>;

    /// 단위의 열린 갭 수.
    async fn count_open(&self, key: &UnitKey) -> Result<i64>;
}

/// 작업 실행 기록 저장소 (재시작 후에도 유지).
#[async_trait]
pub trait JobRunStore: Send + Sync {
    /// 마지막 시작 후 `min_interval`이 지났으면 원자적으로 실행 권한을 얻습니다.
    async fn try_claim(&self, job: &str, now: DateTime<Utc>, min_interval: Duration) -> Result<bool>;

    async fn finish(
        &self,
        job: &str,
        finished_at: DateTime<Utc>,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()>;

    async fn list(&self) -> Result<Vec<JobRun>>;
}
