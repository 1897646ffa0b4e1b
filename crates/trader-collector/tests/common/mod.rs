//! 통합 테스트 공용 헬퍼.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use trader_collector::config::SyncConfig;
use trader_collector::Stores;
use trader_core::{Candle, Timeframe};
use trader_data::MemoryStore;
use trader_exchange::{CandleFetcher, FetchResult};

type Responder =
    dyn Fn(&str, Timeframe, DateTime<Utc>, DateTime<Utc>) -> FetchResult<Vec<Candle>> + Send + Sync;

/// 벤더 호출 한 건.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// 응답을 클로저로 정하고 호출을 기록하는 가짜 벤더.
pub struct ScriptedFetcher {
    respond: Box<Responder>,
    calls: Mutex<Vec<FetchCall>>,
}

impl ScriptedFetcher {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&str, Timeframe, DateTime<Utc>, DateTime<Utc>) -> FetchResult<Vec<Candle>>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// 벤더에 `candles`가 있는 것처럼 요청 구간만 돌려줍니다.
    pub fn serving(candles: Vec<Candle>) -> Arc<Self> {
        Self::new(move |symbol, timeframe, from, to| {
            Ok(candles
                .iter()
                .filter(|c| {
                    c.symbol == symbol
                        && c.timeframe == timeframe
                        && c.open_time >= from
                        && c.open_time <= to
                })
                .cloned()
                .collect())
        })
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CandleFetcher for ScriptedFetcher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> FetchResult<Vec<Candle>> {
        self.calls.lock().unwrap().push(FetchCall {
            symbol: symbol.to_string(),
            timeframe,
            from,
            to,
        });
        (self.respond)(symbol, timeframe, from, to)
    }
}

/// 기준 시각 T.
pub fn t() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 10, 12, 0, 0).unwrap()
}

/// 유효한 테스트 캔들.
pub fn bar(symbol: &str, timeframe: Timeframe, open_time: DateTime<Utc>, close: Decimal) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        timeframe,
        open_time,
        open: close,
        high: close + dec!(1),
        low: close - dec!(1),
        close,
        volume: dec!(5),
        vwap: None,
        trade_count: Some(12),
    }
}

/// 테스트용 동기화 설정 (짧은 백오프).
pub fn sync_config(max_retries: u32) -> SyncConfig {
    SyncConfig {
        symbols: vec!["X:BTCUSD".to_string()],
        timeframes: vec![Timeframe::H1],
        max_retries,
        backoff_ms: vec![10, 20, 40],
        ..Default::default()
    }
}

/// 인메모리 저장소 묶음.
pub fn memory_stores() -> (Arc<MemoryStore>, Stores) {
    let memory = Arc::new(MemoryStore::new());
    let stores = Stores::memory(memory.clone());
    (memory, stores)
}
