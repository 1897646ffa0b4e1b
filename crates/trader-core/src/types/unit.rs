//! 동기화 단위 (심볼 × 타임프레임).

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Timeframe;

/// 독립적으로 동기화되는 (symbol, timeframe) 쌍.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    /// 벤더 심볼 (예: "X:BTCUSD", "AAPL")
    pub symbol: String,
    /// 타임프레임
    pub timeframe: Timeframe,
}

impl UnitKey {
    /// 새 단위 키 생성.
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }

    /// 심볼 목록과 타임프레임으로 단위 목록 생성.
    pub fn for_symbols<S: AsRef<str>>(symbols: &[S], timeframe: Timeframe) -> Vec<Self> {
        symbols
            .iter()
            .map(|s| Self::new(s.as_ref(), timeframe))
            .collect()
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.timeframe)
    }
}
