//! 벤더 조회 trait 정의.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trader_core::{Candle, Timeframe};

use crate::FetchError;

/// 벤더 조회 작업을 위한 Result 타입.
pub type FetchResult<T> = Result<T, FetchError>;

/// 업스트림 벤더와의 경계.
///
/// 읽기 전용이며 부수효과가 없습니다. 구현체는 `[from, to]` 구간의 캔들을
/// `open_time` 오름차순, 중복 없이 반환해야 합니다.
#[async_trait]
pub trait CandleFetcher: Send + Sync {
    /// 벤더 이름 반환.
    fn name(&self) -> &str;

    /// 구간 캔들 조회.
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> FetchResult<Vec<Candle>>;
}

/// 캔들을 `open_time` 오름차순으로 정렬하고 중복 키를 제거합니다.
///
/// 같은 `open_time`이 여러 번 오면 나중에 받은 값(정정본)을 남깁니다.
pub fn normalize_candles(mut candles: Vec<Candle>) -> Vec<Candle> {
    // 안정 정렬이므로 같은 키 사이의 수신 순서가 유지됨
    candles.sort_by_key(|c| c.open_time);

    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        if let Some(last) = out.last_mut() {
            if last.open_time == candle.open_time {
                *last = candle;
                continue;
            }
        }
        out.push(candle);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn bar(hour: i64, close: rust_decimal::Decimal) -> Candle {
        let t0 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        Candle {
            symbol: "X:BTCUSD".to_string(),
            timeframe: Timeframe::H1,
            open_time: t0 + Duration::hours(hour),
            open: dec!(10),
            high: dec!(12),
            low: dec!(9),
            close,
            volume: dec!(1),
            vwap: None,
            trade_count: None,
        }
    }

    #[test]
    fn test_normalize_sorts_and_keeps_last_duplicate() {
        let out = normalize_candles(vec![bar(2, dec!(11)), bar(0, dec!(10)), bar(2, dec!(11.5))]);
        assert_eq!(out.len(), 2);
        assert!(out[0].open_time < out[1].open_time);
        assert_eq!(out[1].close, dec!(11.5));
    }
}
