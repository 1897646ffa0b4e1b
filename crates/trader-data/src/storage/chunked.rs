//! 청크 단위 캔들 업서트.
//!
//! 배치를 `chunk_size`개씩 나누어 청크마다 하나의 문장(트랜잭션)으로 저장합니다.
//! 실패한 청크는 `max_attempts`번까지 다시 시도하고, 그래도 실패하면 앞서 커밋된
//! 행 수를 담은 [`DataError::ChunkFailed`]로 중단합니다. 이미 커밋된 청크는
//! 되돌리지 않습니다.

use std::future::Future;
use std::time::Duration;
use tracing::warn;
use trader_core::Candle;

use crate::error::{DataError, Result};

/// 청크 재시도 사이의 기본 대기 시간 (시도 횟수에 비례).
const RETRY_STEP: Duration = Duration::from_millis(100);

/// `write`로 청크를 하나씩 저장하고 저장된 행 수의 합을 반환합니다.
///
/// `write`는 (청크 번호, 청크)를 받아 저장된 행 수를 돌려줍니다.
pub(crate) async fn upsert_in_chunks<'a, F, Fut>(
    candles: &'a [Candle],
    chunk_size: usize,
    max_attempts: u32,
    mut write: F,
) -> Result<usize>
where
    F: FnMut(usize, &'a [Candle]) -> Fut,
    Fut: Future<Output = Result<usize>>,
{
    let max_attempts = max_attempts.max(1);
    let mut committed = 0usize;

    for (index, chunk) in candles.chunks(chunk_size.max(1)).enumerate() {
        let mut attempt = 1;
        loop {
            match write(index, chunk).await {
                Ok(rows) => {
                    committed += rows;
                    break;
                }
                Err(e) if attempt < max_attempts => {
                    warn!(chunk = index, attempt, error = %e, "청크 저장 실패, 재시도");
                    tokio::time::sleep(RETRY_STEP * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(DataError::ChunkFailed {
                        chunk: index,
                        attempts: attempt,
                        committed,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    Ok(committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use trader_core::Timeframe;

    fn batch(n: i64) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Candle {
                symbol: "AAPL".to_string(),
                timeframe: Timeframe::M1,
                open_time: t0 + ChronoDuration::minutes(i),
                open: dec!(190),
                high: dec!(191),
                low: dec!(189),
                close: dec!(190.5),
                volume: dec!(300),
                vwap: None,
                trade_count: None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_is_retried() {
        let candles = batch(5);
        let mut calls: Vec<usize> = Vec::new();

        let written = upsert_in_chunks(&candles, 2, 3, |index, chunk| {
            calls.push(index);
            let first_try_of_second_chunk =
                index == 1 && calls.iter().filter(|i| **i == 1).count() == 1;
            let rows = chunk.len();
            async move {
                if first_try_of_second_chunk {
                    Err(DataError::QueryError("deadlock detected".to_string()))
                } else {
                    Ok(rows)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(written, 5);
        assert_eq!(calls, vec![0, 1, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_chunk_reports_committed_rows() {
        let candles = batch(5);
        let mut calls = 0;

        let err = upsert_in_chunks(&candles, 2, 3, |index, chunk| {
            calls += 1;
            let rows = chunk.len();
            async move {
                if index == 1 {
                    Err(DataError::QueryError("disk full".to_string()))
                } else {
                    Ok(rows)
                }
            }
        })
        .await
        .unwrap_err();

        match err {
            DataError::ChunkFailed {
                chunk,
                attempts,
                committed,
                reason,
            } => {
                assert_eq!(chunk, 1);
                assert_eq!(attempts, 3);
                assert_eq!(committed, 2);
                assert!(reason.contains("disk full"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // 세 번째 청크는 시도하지 않음
        assert_eq!(calls, 4);
    }
}
