//! 인메모리 저장소.
//!
//! 네 가지 저장소 trait을 모두 구현합니다. 테스트와 DB 없는 dry run에서
//! PostgreSQL 구현과 같은 check-and-set 의미를 제공합니다.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use trader_core::{
    Candle, ClaimPolicy, DetectedGap, GapRecord, SyncOutcome, SyncState, Timeframe, UnitKey,
    UnitState,
};

use crate::error::{DataError, Result};
use crate::models::{Claim, CoverageStats, JobRun, JobStatus};
use crate::storage::chunked::upsert_in_chunks;
use crate::traits::{CandleStore, GapStore, JobRunStore, SyncStateStore};

type CandleKey = (UnitKey, DateTime<Utc>);

/// 쓰기 실패를 주입하지 않음.
const NO_FAILURE: usize = usize::MAX;

/// 인메모리 저장소.
///
/// 캔들은 PostgreSQL 구현처럼 청크 단위로 원자적으로 저장되며, 한 청크 안에
/// 같은 키가 두 번 있으면 그 청크 전체를 거부합니다.
pub struct MemoryStore {
    candles: Mutex<BTreeMap<CandleKey, Candle>>,
    states: Mutex<BTreeMap<UnitKey, SyncState>>,
    gaps: Mutex<Vec<GapRecord>>,
    jobs: Mutex<HashMap<String, JobRun>>,
    chunk_size: usize,
    chunk_retries: u32,
    fail_from_chunk: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            candles: Mutex::default(),
            states: Mutex::default(),
            gaps: Mutex::default(),
            jobs: Mutex::default(),
            chunk_size: 1000,
            chunk_retries: 1,
            fail_from_chunk: AtomicUsize::new(NO_FAILURE),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 청크 크기 설정 (범위 제한 없음).
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// 청크당 최대 시도 횟수 설정.
    pub fn with_chunk_retries(mut self, retries: u32) -> Self {
        self.chunk_retries = retries.max(1);
        self
    }

    /// 캔들 저장을 모두 실패하도록 전환 (저장 실패 경로 테스트용).
    pub fn set_fail_writes(&self, fail: bool) {
        let from = if fail { 0 } else { NO_FAILURE };
        self.fail_from_chunk.store(from, Ordering::SeqCst);
    }

    /// 배치마다 앞의 `chunks`개 청크만 커밋하고 그 뒤 청크는 실패시킵니다.
    pub fn fail_after_chunks(&self, chunks: usize) {
        self.fail_from_chunk.store(chunks, Ordering::SeqCst);
    }

    /// 저장된 전체 캔들 수.
    pub async fn candle_count(&self) -> usize {
        self.candles.lock().await.len()
    }

    /// 전체 갭 기록 (힐링된 것 포함).
    pub async fn all_gaps(&self) -> Vec<GapRecord> {
        self.gaps.lock().await.clone()
    }

    /// 상태 행을 직접 기록 (테스트 준비용).
    pub async fn put_state(&self, state: SyncState) {
        self.states.lock().await.insert(state.key(), state);
    }

    /// 청크 하나를 한 번의 잠금 안에서 전부 저장하거나 전부 거부합니다.
    async fn write_chunk(&self, index: usize, chunk: &[Candle]) -> Result<usize> {
        if index >= self.fail_from_chunk.load(Ordering::SeqCst) {
            return Err(DataError::QueryError(format!(
                "injected write failure at chunk {}",
                index
            )));
        }

        let mut seen = HashSet::with_capacity(chunk.len());
        if !chunk.iter().all(|c| seen.insert((c.unit(), c.open_time))) {
            return Err(DataError::QueryError(
                "ON CONFLICT DO UPDATE command cannot affect row a second time".to_string(),
            ));
        }

        let mut map = self.candles.lock().await;
        for candle in chunk {
            map.insert((candle.unit(), candle.open_time), candle.clone());
        }
        Ok(chunk.len())
    }

    fn unit_range(
        key: &UnitKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> std::ops::RangeInclusive<CandleKey> {
        (key.clone(), from)..=(key.clone(), to)
    }
}

#[async_trait]
impl CandleStore for MemoryStore {
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        upsert_in_chunks(
            candles,
            self.chunk_size,
            self.chunk_retries,
            move |index, chunk| self.write_chunk(index, chunk),
        )
        .await
    }

    async fn query_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        if from > to {
            return Ok(Vec::new());
        }
        let key = UnitKey::new(symbol, timeframe);
        let map = self.candles.lock().await;
        Ok(map
            .range(Self::unit_range(&key, from, to))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn get_latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>> {
        let key = UnitKey::new(symbol, timeframe);
        let map = self.candles.lock().await;
        Ok(map
            .iter()
            .filter(|((unit, _), _)| *unit == key)
            .map(|(_, c)| c)
            .next_back()
            .cloned())
    }

    async fn open_times(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        Ok(self
            .query_range(symbol, timeframe, from, to)
            .await?
            .into_iter()
            .map(|c| c.open_time)
            .collect())
    }

    async fn coverage(&self, symbol: &str, timeframe: Timeframe) -> Result<CoverageStats> {
        let key = UnitKey::new(symbol, timeframe);
        let map = self.candles.lock().await;
        let times: Vec<DateTime<Utc>> = map
            .keys()
            .filter(|(unit, _)| *unit == key)
            .map(|(_, t)| *t)
            .collect();

        Ok(CoverageStats {
            count: times.len() as i64,
            first: times.first().copied(),
            last: times.last().copied(),
        })
    }
}

#[async_trait]
impl SyncStateStore for MemoryStore {
    async fn get(&self, key: &UnitKey) -> Result<Option<SyncState>> {
        Ok(self.states.lock().await.get(key).cloned())
    }

    async fn list(&self, timeframe: Option<Timeframe>) -> Result<Vec<SyncState>> {
        let states = self.states.lock().await;
        Ok(states
            .values()
            .filter(|s| timeframe.map_or(true, |tf| s.timeframe == tf))
            .cloned()
            .collect())
    }

    async fn try_begin(
        &self,
        key: &UnitKey,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> Result<Claim> {
        let mut states = self.states.lock().await;
        let state = states
            .entry(key.clone())
            .or_insert_with(|| SyncState::new(key));

        let decision = state.evaluate_trigger(now, policy);
        if decision.should_run() {
            state.begin(now);
        }

        Ok(Claim {
            decision,
            state: state.clone(),
        })
    }

    async fn finish(
        &self,
        key: &UnitKey,
        started_at: DateTime<Utc>,
        outcome: SyncOutcome,
    ) -> Result<bool> {
        let mut states = self.states.lock().await;
        match states.get_mut(key) {
            Some(state)
                if state.state == UnitState::Syncing
                    && state.last_cycle_started_at == Some(started_at) =>
            {
                state.apply(&outcome);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset(&self, key: &UnitKey) -> Result<bool> {
        let mut states = self.states.lock().await;
        match states.get_mut(key) {
            Some(state) => {
                state.reset();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl GapStore for MemoryStore {
    async fn record_gaps(&self, gaps: &[DetectedGap], detected_at: DateTime<Utc>) -> Result<usize> {
        let mut records = self.gaps.lock().await;
        let mut recorded = 0;

        for gap in gaps {
            let exists = records.iter().any(|r| {
                r.symbol == gap.symbol
                    && r.timeframe == gap.timeframe
                    && r.gap_start == gap.gap_start
                    && r.gap_end == gap.gap_end
            });
            if exists {
                continue;
            }

            let id = records.len() as i64 + 1;
            records.push(GapRecord {
                id,
                symbol: gap.symbol.clone(),
                timeframe: gap.timeframe,
                gap_start: gap.gap_start,
                gap_end: gap.gap_end,
                detected_at,
                healed: false,
                healed_at: None,
                heal_attempts: 0,
                accepted: false,
            });
            recorded += 1;
        }

        Ok(recorded)
    }

    async fn open_gaps(&self, timeframe: Option<Timeframe>) -> Result<Vec<GapRecord>> {
        let records = self.gaps.lock().await;
        let mut open: Vec<GapRecord> = records
            .iter()
            .filter(|r| !r.healed && timeframe.map_or(true, |tf| r.timeframe == tf))
            .cloned()
            .collect();
        open.sort_by(|a, b| {
            (&a.symbol, a.timeframe, a.gap_start).cmp(&(&b.symbol, b.timeframe, b.gap_start))
        });
        Ok(open)
    }

    async fn mark_healed(&self, id: i64, healed_at: DateTime<Utc>, accepted: bool) -> Result<()> {
        let mut records = self.gaps.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DataError::NotFound(format!("gap {}", id)))?;
        record.healed = true;
        record.healed_at = Some(healed_at);
        record.accepted = accepted;
        Ok(())
    }

    async fn record_heal_attempt(&self, id: i64) -> Result<i32> {
        let mut records = self.gaps.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DataError::NotFound(format!("gap {}", id)))?;
        record.heal_attempts += 1;
        Ok(record.heal_attempts)
    }

    async fn count_open(&self, key: &UnitKey) -> Result<i64> {
        let records = self.gaps.lock().await;
        Ok(records
            .iter()
            .filter(|r| !r.healed && r.symbol == key.symbol && r.timeframe == key.timeframe)
            .count() as i64)
    }
}

#[async_trait]
impl JobRunStore for MemoryStore {
    async fn try_claim(&self, job: &str, now: DateTime<Utc>, min_interval: Duration) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        if let Some(run) = jobs.get(job) {
            if run.last_started_at > now - min_interval {
                return Ok(false);
            }
        }

        jobs.insert(
            job.to_string(),
            JobRun {
                job_name: job.to_string(),
                last_started_at: now,
                last_finished_at: None,
                status: JobStatus::Running,
                last_error: None,
            },
        );
        Ok(true)
    }

    async fn finish(
        &self,
        job: &str,
        finished_at: DateTime<Utc>,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(run) = jobs.get_mut(job) {
            run.last_finished_at = Some(finished_at);
            run.status = status;
            run.last_error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobRun>> {
        let jobs = self.jobs.lock().await;
        let mut runs: Vec<JobRun> = jobs.values().cloned().collect();
        runs.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn candle(symbol: &str, hour: i64, close: rust_decimal::Decimal) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe: Timeframe::H1,
            open_time: t0() + Duration::hours(hour),
            open: dec!(100),
            high: dec!(110),
            low: dec!(90),
            close,
            volume: dec!(5),
            vwap: None,
            trade_count: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_twice_is_idempotent() {
        let store = MemoryStore::new();
        let batch = vec![candle("X:BTCUSD", 0, dec!(101)), candle("X:BTCUSD", 1, dec!(102))];

        store.upsert_batch(&batch).await.unwrap();
        let first = store
            .query_range("X:BTCUSD", Timeframe::H1, t0(), t0() + Duration::hours(5))
            .await
            .unwrap();
        store.upsert_batch(&batch).await.unwrap();
        let second = store
            .query_range("X:BTCUSD", Timeframe::H1, t0(), t0() + Duration::hours(5))
            .await
            .unwrap();

        assert_eq!(store.candle_count().await, 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_earlier_chunks() {
        let store = MemoryStore::new().with_chunk_size(2);
        store.fail_after_chunks(1);
        let batch: Vec<Candle> = (0..5).map(|h| candle("X:BTCUSD", h, dec!(100))).collect();

        let err = store.upsert_batch(&batch).await.unwrap_err();
        assert!(matches!(
            err,
            DataError::ChunkFailed {
                chunk: 1,
                committed: 2,
                ..
            }
        ));
        assert!(err.to_string().contains("2 rows already committed"));

        let stored = store
            .open_times("X:BTCUSD", Timeframe::H1, t0(), t0() + Duration::hours(5))
            .await
            .unwrap();
        assert_eq!(stored, vec![t0(), t0() + Duration::hours(1)]);
    }

    #[tokio::test]
    async fn test_duplicate_key_in_chunk_is_rejected() {
        let store = MemoryStore::new();
        let batch = vec![
            candle("X:BTCUSD", 0, dec!(101)),
            candle("X:BTCUSD", 1, dec!(102)),
            candle("X:BTCUSD", 1, dec!(103)),
        ];

        let err = store.upsert_batch(&batch).await.unwrap_err();
        assert!(matches!(err, DataError::ChunkFailed { committed: 0, .. }));
        assert!(err.to_string().contains("cannot affect row a second time"));
        assert_eq!(store.candle_count().await, 0);
    }

    #[tokio::test]
    async fn test_latest_and_coverage_are_per_unit() {
        let store = MemoryStore::new();
        store
            .upsert_batch(&[
                candle("X:BTCUSD", 0, dec!(101)),
                candle("X:BTCUSD", 4, dec!(104)),
                candle("X:ETHUSD", 9, dec!(3)),
            ])
            .await
            .unwrap();

        let latest = store.get_latest("X:BTCUSD", Timeframe::H1).await.unwrap().unwrap();
        assert_eq!(latest.close, dec!(104));

        let coverage = store.coverage("X:BTCUSD", Timeframe::H1).await.unwrap();
        assert_eq!(coverage.count, 2);
        assert_eq!(coverage.first, Some(t0()));
        assert_eq!(coverage.last, Some(t0() + Duration::hours(4)));

        assert!(store.get_latest("X:SOLUSD", Timeframe::H1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_and_finish_needs_token() {
        let store = MemoryStore::new();
        let key = UnitKey::new("X:BTCUSD", Timeframe::H1);
        let policy = ClaimPolicy::default();

        let first = store.try_begin(&key, t0(), &policy).await.unwrap();
        assert!(first.is_claimed());
        let second = store
            .try_begin(&key, t0() + Duration::seconds(5), &policy)
            .await
            .unwrap();
        assert!(!second.is_claimed());

        let stale_token = t0() - Duration::minutes(1);
        assert!(!SyncStateStore::finish(&store, &key, stale_token, SyncOutcome::FailedBackoff)
            .await
            .unwrap());

        let token = first.token().unwrap();
        assert!(SyncStateStore::finish(&store, &key, token, SyncOutcome::Synced { through: Some(t0()) })
            .await
            .unwrap());
        let state = store.get(&key).await.unwrap().unwrap();
        assert_eq!(state.state, UnitState::Current);
        assert_eq!(state.last_synced_through, Some(t0()));
    }

    #[tokio::test]
    async fn test_gap_records_are_not_duplicated() {
        let store = MemoryStore::new();
        let gap = DetectedGap {
            symbol: "X:BTCUSD".to_string(),
            timeframe: Timeframe::H1,
            gap_start: t0(),
            gap_end: t0() + Duration::hours(3),
        };

        assert_eq!(store.record_gaps(&[gap.clone()], t0()).await.unwrap(), 1);
        let id = store.open_gaps(None).await.unwrap()[0].id;
        store.mark_healed(id, t0(), true).await.unwrap();

        assert_eq!(store.record_gaps(&[gap], t0()).await.unwrap(), 0);
        assert!(store.open_gaps(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_claim_respects_min_interval() {
        let store = MemoryStore::new();
        let interval = Duration::minutes(54);

        assert!(store.try_claim("sync_1h", t0(), interval).await.unwrap());
        assert!(!store
            .try_claim("sync_1h", t0() + Duration::minutes(10), interval)
            .await
            .unwrap());
        assert!(store
            .try_claim("sync_1h", t0() + Duration::minutes(54), interval)
            .await
            .unwrap());
    }
}
