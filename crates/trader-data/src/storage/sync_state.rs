//! 단위별 동기화 상태 저장소 (PostgreSQL).
//!
//! 모든 상태 변경은 트랜잭션 안에서 `SELECT ... FOR UPDATE`로 행을 잠근 뒤
//! 도메인 규칙(`SyncState::evaluate_trigger`, `SyncState::apply`)을 적용하는
//! check-and-set으로 이루어집니다. 여러 스케줄러 인스턴스가 같은 단위를 동시에
//! 트리거해도 한 곳만 SYNCING을 얻습니다.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::FromRow;
use tracing::{debug, info, warn};
use trader_core::{
    ClaimPolicy, SyncOutcome, SyncState, Timeframe, TriggerDecision, UnitKey, UnitState,
};

use crate::error::Result;
use crate::models::Claim;
use crate::traits::SyncStateStore;

/// sync_state 테이블 레코드.
#[derive(Debug, Clone, FromRow)]
struct SyncStateRecord {
    symbol: String,
    timeframe: String,
    last_synced_through: Option<DateTime<Utc>>,
    consecutive_failures: i32,
    known_unavailable: bool,
    state: String,
    last_cycle_started_at: Option<DateTime<Utc>>,
}

impl SyncStateRecord {
    fn into_state(self) -> Result<SyncState> {
        Ok(SyncState {
            symbol: self.symbol,
            timeframe: self.timeframe.parse()?,
            last_synced_through: self.last_synced_through,
            consecutive_failures: self.consecutive_failures,
            known_unavailable: self.known_unavailable,
            state: self.state.parse()?,
            last_cycle_started_at: self.last_cycle_started_at,
        })
    }
}

const SELECT_COLUMNS: &str = "symbol, timeframe, last_synced_through, consecutive_failures, \
     known_unavailable, state, last_cycle_started_at";

/// PostgreSQL 동기화 상태 저장소.
#[derive(Clone)]
pub struct PgSyncStateStore {
    pool: PgPool,
}

impl PgSyncStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 행을 잠그고 읽기.
    async fn lock_row(conn: &mut PgConnection, key: &UnitKey) -> Result<Option<SyncState>> {
        let query = format!(
            "SELECT {} FROM sync_state WHERE symbol = $1 AND timeframe = $2 FOR UPDATE",
            SELECT_COLUMNS
        );
        let record: Option<SyncStateRecord> = sqlx::query_as(&query)
            .bind(&key.symbol)
            .bind(key.timeframe.as_str())
            .fetch_optional(&mut *conn)
            .await?;

        record.map(SyncStateRecord::into_state).transpose()
    }

    /// 상태 전체 기록.
    async fn write_row(conn: &mut PgConnection, state: &SyncState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_state SET
                last_synced_through = $3,
                consecutive_failures = $4,
                known_unavailable = $5,
                state = $6,
                last_cycle_started_at = $7,
                updated_at = NOW()
            WHERE symbol = $1 AND timeframe = $2
            "#,
        )
        .bind(&state.symbol)
        .bind(state.timeframe.as_str())
        .bind(state.last_synced_through)
        .bind(state.consecutive_failures)
        .bind(state.known_unavailable)
        .bind(state.state.as_str())
        .bind(state.last_cycle_started_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SyncStateStore for PgSyncStateStore {
    async fn get(&self, key: &UnitKey) -> Result<Option<SyncState>> {
        let query = format!(
            "SELECT {} FROM sync_state WHERE symbol = $1 AND timeframe = $2",
            SELECT_COLUMNS
        );
        let record: Option<SyncStateRecord> = sqlx::query_as(&query)
            .bind(&key.symbol)
            .bind(key.timeframe.as_str())
            .fetch_optional(&self.pool)
            .await?;

        record.map(SyncStateRecord::into_state).transpose()
    }

    async fn list(&self, timeframe: Option<Timeframe>) -> Result<Vec<SyncState>> {
        let query = format!(
            "SELECT {} FROM sync_state WHERE ($1::text IS NULL OR timeframe = $1) \
             ORDER BY symbol, timeframe",
            SELECT_COLUMNS
        );
        let records: Vec<SyncStateRecord> = sqlx::query_as(&query)
            .bind(timeframe.map(|tf| tf.as_str()))
            .fetch_all(&self.pool)
            .await?;

        records.into_iter().map(SyncStateRecord::into_state).collect()
    }

    async fn try_begin(
        &self,
        key: &UnitKey,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> Result<Claim> {
        // timestamptz 정밀도(마이크로초)에 맞춰야 finish의 토큰 비교가 성립함
        let now = now.trunc_subsecs(6);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sync_state (symbol, timeframe, state)
            VALUES ($1, $2, 'current')
            ON CONFLICT (symbol, timeframe) DO NOTHING
            "#,
        )
        .bind(&key.symbol)
        .bind(key.timeframe.as_str())
        .execute(&mut *tx)
        .await?;

        let mut state = Self::lock_row(&mut tx, key)
            .await?
            .unwrap_or_else(|| SyncState::new(key));

        let decision = state.evaluate_trigger(now, policy);
        if decision.should_run() {
            if decision == TriggerDecision::ForceResetStale {
                warn!(
                    symbol = %key.symbol,
                    timeframe = %key.timeframe,
                    started_at = ?state.last_cycle_started_at,
                    "staleness 상한 초과, SYNCING 강제 리셋"
                );
            }
            state.begin(now);
            Self::write_row(&mut tx, &state).await?;
        }

        tx.commit().await?;

        debug!(unit = %key, decision = ?decision, "트리거 평가");
        Ok(Claim { decision, state })
    }

    async fn finish(
        &self,
        key: &UnitKey,
        started_at: DateTime<Utc>,
        outcome: SyncOutcome,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let Some(mut state) = Self::lock_row(&mut tx, key).await? else {
            tx.rollback().await?;
            return Ok(false);
        };

        if state.state != UnitState::Syncing || state.last_cycle_started_at != Some(started_at) {
            tx.rollback().await?;
            warn!(unit = %key, "사이클 토큰 불일치, 결과를 기록하지 않음");
            return Ok(false);
        }

        state.apply(&outcome);
        Self::write_row(&mut tx, &state).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn reset(&self, key: &UnitKey) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let Some(mut state) = Self::lock_row(&mut tx, key).await? else {
            tx.rollback().await?;
            return Ok(false);
        };

        state.reset();
        Self::write_row(&mut tx, &state).await?;
        tx.commit().await?;

        info!(unit = %key, "단위 상태 리셋");
        Ok(true)
    }
}
