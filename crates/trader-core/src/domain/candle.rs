//! OHLCV 캔들 값 객체.
//!
//! 저장소의 고유 키는 `(symbol, timeframe, open_time)`이며, 같은 키를 다시
//! 가져오면 덮어써도 안전합니다 (결정적 집계 또는 벤더 정정).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{TraderError, TraderResult};
use crate::types::{Timeframe, UnitKey};

/// OHLCV 캔들.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 벤더 심볼
    pub symbol: String,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 캔들 시작 시각 (UTC, 타임프레임 경계)
    pub open_time: DateTime<Utc>,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량
    pub volume: Decimal,
    /// 거래량 가중 평균가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<Decimal>,
    /// 체결 건수
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_count: Option<i64>,
}

impl Candle {
    /// 이 캔들이 속한 동기화 단위.
    pub fn unit(&self) -> UnitKey {
        UnitKey::new(self.symbol.clone(), self.timeframe)
    }

    /// 캔들이 저장 가능한 형태인지 검증합니다.
    ///
    /// 실패한 캔들은 배치에서 제외되고 경고 로그만 남깁니다. `open_time`은 UTC
    /// 경계 기준으로 검사하므로 거래소 현지 자정으로 찍힌 일봉은 커넥터에서
    /// 미리 UTC 자정으로 옮겨 두어야 합니다.
    pub fn validate(&self) -> TraderResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(TraderError::Validation("빈 심볼".to_string()));
        }

        if !self.timeframe.is_aligned(self.open_time) {
            return Err(TraderError::Validation(format!(
                "open_time {}이(가) {} 경계에 정렬되지 않음",
                self.open_time, self.timeframe
            )));
        }

        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if value <= Decimal::ZERO {
                return Err(TraderError::Validation(format!(
                    "{} 가격이 양수가 아님: {}",
                    name, value
                )));
            }
        }

        if self.low > self.open.min(self.close) {
            return Err(TraderError::Validation(format!(
                "low {}가 시가/종가보다 큼",
                self.low
            )));
        }

        if self.high < self.open.max(self.close) {
            return Err(TraderError::Validation(format!(
                "high {}가 시가/종가보다 작음",
                self.high
            )));
        }

        if self.volume.is_sign_negative() {
            return Err(TraderError::Validation(format!(
                "음수 거래량: {}",
                self.volume
            )));
        }

        if let Some(vwap) = self.vwap {
            if vwap <= Decimal::ZERO {
                return Err(TraderError::Validation(format!("잘못된 vwap: {}", vwap)));
            }
        }

        if matches!(self.trade_count, Some(n) if n < 0) {
            return Err(TraderError::Validation("음수 체결 건수".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle() -> Candle {
        Candle {
            symbol: "X:BTCUSD".to_string(),
            timeframe: Timeframe::H1,
            open_time: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: dec!(12.5),
            vwap: Some(dec!(103.2)),
            trade_count: Some(42),
        }
    }

    #[test]
    fn test_valid_candle() {
        assert!(candle().validate().is_ok());
        assert_eq!(candle().unit().to_string(), "X:BTCUSD/1h");
    }

    #[test]
    fn test_rejects_misaligned_open_time() {
        let mut c = candle();
        c.open_time = c.open_time + chrono::Duration::minutes(7);
        assert!(c.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_rejects_inconsistent_range() {
        let mut c = candle();
        c.high = dec!(101);
        assert!(c.validate().is_err());

        let mut c = candle();
        c.low = dec!(102);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_volume_and_zero_price() {
        let mut c = candle();
        c.volume = dec!(-1);
        assert!(c.validate().is_err());

        let mut c = candle();
        c.open = Decimal::ZERO;
        c.low = Decimal::ZERO;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_zero_volume_is_allowed() {
        let mut c = candle();
        c.volume = Decimal::ZERO;
        c.vwap = None;
        c.trade_count = None;
        assert!(c.validate().is_ok());
    }
}
