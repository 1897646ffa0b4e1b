//! 갭 감사 기록 저장소 (PostgreSQL).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::debug;
use trader_core::{DetectedGap, GapRecord, Timeframe, UnitKey};

use crate::error::{DataError, Result};
use crate::traits::GapStore;

#[derive(Debug, Clone, FromRow)]
struct GapAuditRecord {
    id: i64,
    symbol: String,
    timeframe: String,
    gap_start: DateTime<Utc>,
    gap_end: DateTime<Utc>,
    detected_at: DateTime<Utc>,
    healed: bool,
    healed_at: Option<DateTime<Utc>>,
    heal_attempts: i32,
    accepted: bool,
}

impl GapAuditRecord {
    fn into_record(self) -> Result<GapRecord> {
        Ok(GapRecord {
            id: self.id,
            symbol: self.symbol,
            timeframe: self.timeframe.parse()?,
            gap_start: self.gap_start,
            gap_end: self.gap_end,
            detected_at: self.detected_at,
            healed: self.healed,
            healed_at: self.healed_at,
            heal_attempts: self.heal_attempts,
            accepted: self.accepted,
        })
    }
}

/// PostgreSQL 갭 저장소.
#[derive(Clone)]
pub struct PgGapStore {
    pool: PgPool,
}

impl PgGapStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GapStore for PgGapStore {
    async fn record_gaps(&self, gaps: &[DetectedGap], detected_at: DateTime<Utc>) -> Result<usize> {
        if gaps.is_empty() {
            return Ok(0);
        }

        let symbols: Vec<&str> = gaps.iter().map(|g| g.symbol.as_str()).collect();
        let timeframes: Vec<&str> = gaps.iter().map(|g| g.timeframe.as_str()).collect();
        let starts: Vec<DateTime<Utc>> = gaps.iter().map(|g| g.gap_start).collect();
        let ends: Vec<DateTime<Utc>> = gaps.iter().map(|g| g.gap_end).collect();

        // 같은 구간은 힐링/수용 여부와 관계없이 다시 기록하지 않음
        let result = sqlx::query(
            r#"
            INSERT INTO gap_audit (symbol, timeframe, gap_start, gap_end, detected_at)
            SELECT s, tf, gs, ge, $5
            FROM UNNEST($1::text[], $2::text[], $3::timestamptz[], $4::timestamptz[]) AS t(s, tf, gs, ge)
            ON CONFLICT (symbol, timeframe, gap_start, gap_end) DO NOTHING
            "#,
        )
        .bind(&symbols)
        .bind(&timeframes)
        .bind(&starts)
        .bind(&ends)
        .bind(detected_at)
        .execute(&self.pool)
        .await?;

        let recorded = result.rows_affected() as usize;
        debug!(detected = gaps.len(), recorded, "갭 기록");
        Ok(recorded)
    }

    async fn open_gaps(&self, timeframe: Option<Timeframe>) -> Result<Vec<GapRecord>> {
        let records: Vec<GapAuditRecord> = sqlx::query_as(
            r#"
            SELECT id, symbol, timeframe, gap_start, gap_end, detected_at,
                   healed, healed_at, heal_attempts, accepted
            FROM gap_audit
            WHERE healed = FALSE AND ($1::text IS NULL OR timeframe = $1)
            ORDER BY symbol, timeframe, gap_start
            "#,
        )
        .bind(timeframe.map(|tf| tf.as_str()))
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(GapAuditRecord::into_record).collect()
    }

    async fn mark_healed(&self, id: i64, healed_at: DateTime<Utc>, accepted: bool) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE gap_audit
            SET healed = TRUE, healed_at = $2, accepted = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(healed_at)
        .bind(accepted)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("gap {}", id)));
        }
        Ok(())
    }

    async fn record_heal_attempt(&self, id: i64) -> Result<i32> {
        let (attempts,): (i32,) = sqlx::query_as(
            r#"
            UPDATE gap_audit
            SET heal_attempts = heal_attempts + 1
            WHERE id = $1
            RETURNING heal_attempts
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn count_open(&self, key: &UnitKey) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM gap_audit
            WHERE symbol = $1 AND timeframe = $2 AND healed = FALSE
            "#,
        )
        .bind(&key.symbol)
        .bind(key.timeframe.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
