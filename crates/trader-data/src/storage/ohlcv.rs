//! OHLCV 캔들 저장소 (PostgreSQL).
//!
//! (symbol, timeframe, open_time) 키로 멱등 저장합니다. 오버랩 재조회나 벤더
//! 정정으로 같은 키가 다시 오면 전체 컬럼을 덮어씁니다.
//!
//! # 사용 예제
//!
//! ```rust,ignore
//! use trader_data::{CandleStore, PgCandleStore};
//!
//! let store = PgCandleStore::new(pool).with_chunk_size(1000);
//! let written = store.upsert_batch(&candles).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{debug, instrument};
use trader_core::{Candle, Timeframe};

use crate::error::{DataError, Result};
use crate::models::CoverageStats;
use crate::storage::chunked::upsert_in_chunks;
use crate::traits::CandleStore;

/// 청크 크기 허용 범위.
pub const MIN_CHUNK_SIZE: usize = 500;
pub const MAX_CHUNK_SIZE: usize = 2000;

/// candles 테이블 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct CandleRecord {
    pub symbol: String,
    pub timeframe: String,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub vwap: Option<Decimal>,
    pub trade_count: Option<i64>,
}

impl CandleRecord {
    /// 도메인 캔들로 변환.
    pub fn into_candle(self) -> Result<Candle> {
        let timeframe: Timeframe = self.timeframe.parse()?;
        Ok(Candle {
            symbol: self.symbol,
            timeframe,
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            vwap: self.vwap,
            trade_count: self.trade_count,
        })
    }
}

/// PostgreSQL 캔들 저장소.
#[derive(Clone)]
pub struct PgCandleStore {
    pool: PgPool,
    chunk_size: usize,
    chunk_retries: u32,
}

impl PgCandleStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            chunk_size: 1000,
            chunk_retries: 3,
        }
    }

    /// 청크 크기 설정 (500..=2000으로 제한).
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    /// 청크당 최대 시도 횟수 설정.
    pub fn with_chunk_retries(mut self, retries: u32) -> Self {
        self.chunk_retries = retries.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 청크 하나를 단일 문장으로 저장.
    async fn upsert_chunk(&self, chunk: &[Candle]) -> std::result::Result<u64, sqlx::Error> {
        let symbols: Vec<&str> = chunk.iter().map(|c| c.symbol.as_str()).collect();
        let timeframes: Vec<&str> = chunk.iter().map(|c| c.timeframe.as_str()).collect();
        let open_times: Vec<DateTime<Utc>> = chunk.iter().map(|c| c.open_time).collect();
        let opens: Vec<Decimal> = chunk.iter().map(|c| c.open).collect();
        let highs: Vec<Decimal> = chunk.iter().map(|c| c.high).collect();
        let lows: Vec<Decimal> = chunk.iter().map(|c| c.low).collect();
        let closes: Vec<Decimal> = chunk.iter().map(|c| c.close).collect();
        let volumes: Vec<Decimal> = chunk.iter().map(|c| c.volume).collect();
        let vwaps: Vec<Option<Decimal>> = chunk.iter().map(|c| c.vwap).collect();
        let trade_counts: Vec<Option<i64>> = chunk.iter().map(|c| c.trade_count).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO candles
                (symbol, timeframe, open_time, open, high, low, close, volume, vwap, trade_count, fetched_at)
            SELECT t.*, NOW() FROM UNNEST(
                $1::text[], $2::text[], $3::timestamptz[],
                $4::numeric[], $5::numeric[], $6::numeric[], $7::numeric[], $8::numeric[],
                $9::numeric[], $10::bigint[]
            ) AS t
            ON CONFLICT (symbol, timeframe, open_time) DO UPDATE SET
                open = EXCLUDED.open,
                high = EXCLUDED.high,
                low = EXCLUDED.low,
                close = EXCLUDED.close,
                volume = EXCLUDED.volume,
                vwap = EXCLUDED.vwap,
                trade_count = EXCLUDED.trade_count,
                fetched_at = NOW()
            "#,
        )
        .bind(&symbols)
        .bind(&timeframes)
        .bind(&open_times)
        .bind(&opens)
        .bind(&highs)
        .bind(&lows)
        .bind(&closes)
        .bind(&volumes)
        .bind(&vwaps)
        .bind(&trade_counts)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CandleStore for PgCandleStore {
    #[instrument(skip(self, candles), fields(count = candles.len()))]
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let written = upsert_in_chunks(
            candles,
            self.chunk_size,
            self.chunk_retries,
            move |_, chunk| async move {
                self.upsert_chunk(chunk)
                    .await
                    .map(|rows| rows as usize)
                    .map_err(DataError::from)
            },
        )
        .await?;

        debug!(written, "캔들 저장 완료");
        Ok(written)
    }

    async fn query_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let records: Vec<CandleRecord> = sqlx::query_as(
            r#"
            SELECT symbol, timeframe, open_time, open, high, low, close, volume, vwap, trade_count
            FROM candles
            WHERE symbol = $1 AND timeframe = $2 AND open_time >= $3 AND open_time <= $4
            ORDER BY open_time ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(CandleRecord::into_candle).collect()
    }

    async fn get_latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>> {
        let record: Option<CandleRecord> = sqlx::query_as(
            r#"
            SELECT symbol, timeframe, open_time, open, high, low, close, volume, vwap, trade_count
            FROM candles
            WHERE symbol = $1 AND timeframe = $2
            ORDER BY open_time DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .fetch_optional(&self.pool)
        .await?;

        record.map(CandleRecord::into_candle).transpose()
    }

    async fn open_times(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let times: Vec<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT open_time
            FROM candles
            WHERE symbol = $1 AND timeframe = $2 AND open_time >= $3 AND open_time <= $4
            ORDER BY open_time ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(times.into_iter().map(|(t,)| t).collect())
    }

    async fn coverage(&self, symbol: &str, timeframe: Timeframe) -> Result<CoverageStats> {
        let (count, first, last): (i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*), MIN(open_time), MAX(open_time)
                FROM candles
                WHERE symbol = $1 AND timeframe = $2
                "#,
            )
            .bind(symbol)
            .bind(timeframe.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(CoverageStats { count, first, last })
    }
}
