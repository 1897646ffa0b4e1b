//! REST aggregates 커넥터.
//!
//! `GET /v2/aggs/ticker/{symbol}/range/{multiplier}/{timespan}/{from_ms}/{to_ms}`
//! 형식의 집계 API를 호출합니다. 응답의 `next_url`이 있으면 페이지 상한까지
//! 따라갑니다.
//!
//! # 에러 매핑
//!
//! | 응답 | FetchError |
//! |---|---|
//! | 429 | `RateLimited` (`Retry-After` 초 단위 힌트) |
//! | 404, `status: "NOT_FOUND"` | `NotFound` |
//! | 5xx, 네트워크, 타임아웃, 디코딩 실패 | `Transient` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};
use trader_core::{Candle, Timeframe};

use crate::traits::{normalize_candles, CandleFetcher, FetchResult};
use crate::FetchError;

// ============================================================================
// 설정
// ============================================================================

/// 집계 API 클라이언트 설정.
///
/// `Debug` 구현은 API 키를 마스킹합니다.
#[derive(Clone)]
pub struct AggsConfig {
    /// REST API 기본 URL
    pub base_url: String,
    /// API 키
    pub api_key: SecretString,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 페이지당 최대 결과 수
    pub page_limit: u32,
    /// 따라갈 최대 페이지 수
    pub max_pages: usize,
}

impl fmt::Debug for AggsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggsConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"***REDACTED***")
            .field("timeout_secs", &self.timeout_secs)
            .field("page_limit", &self.page_limit)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

impl AggsConfig {
    /// 새 설정 생성.
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: 30,
            page_limit: 50_000,
            max_pages: 20,
        }
    }

    /// 요청 타임아웃 설정.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

// ============================================================================
// 응답 타입
// ============================================================================

#[derive(Debug, Deserialize)]
struct AggsResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    results: Option<Vec<AggBar>>,
    #[serde(default)]
    next_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl AggsResponse {
    /// 벤더가 `error`와 `message` 중 어느 쪽에 사유를 담든 하나로 모읍니다.
    fn reason(&mut self) -> Option<String> {
        self.error.take().or_else(|| self.message.take())
    }
}

/// 집계 캔들 한 개. 숫자는 JSON number로 옵니다.
#[derive(Debug, Deserialize)]
struct AggBar {
    /// open_time (epoch ms)
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    #[serde(default)]
    vw: Option<f64>,
    #[serde(default)]
    n: Option<i64>,
}

// ============================================================================
// 클라이언트
// ============================================================================

/// 집계 API 클라이언트.
pub struct AggsClient {
    config: AggsConfig,
    client: Client,
}

impl AggsClient {
    /// 새 클라이언트 생성.
    pub fn new(config: AggsConfig) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// 타임프레임을 (multiplier, timespan)으로 변환.
    fn timespan(timeframe: Timeframe) -> (u32, &'static str) {
        match timeframe {
            Timeframe::M1 => (1, "minute"),
            Timeframe::M15 => (15, "minute"),
            Timeframe::H1 => (1, "hour"),
            Timeframe::D1 => (1, "day"),
        }
    }

    fn range_url(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> String {
        let (multiplier, timespan) = Self::timespan(timeframe);
        format!(
            "{}/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            self.config.base_url,
            symbol,
            multiplier,
            timespan,
            from.timestamp_millis(),
            to.timestamp_millis()
        )
    }

    /// 한 페이지 요청.
    async fn get_page(&self, url: &str, first_page: bool) -> FetchResult<AggsResponse> {
        let mut request = self
            .client
            .get(url)
            .query(&[("apiKey", self.config.api_key.expose_secret())]);
        if first_page {
            let limit = self.config.page_limit.to_string();
            request = request.query(&[
                ("adjusted", "true"),
                ("sort", "asc"),
                ("limit", limit.as_str()),
            ]);
        }

        debug!(url = %url, "GET aggregates");
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// HTTP 응답 처리.
    async fn handle_response(&self, response: reqwest::Response) -> FetchResult<AggsResponse> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited { retry_after });
        }

        let body = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(body));
        }

        if status.is_server_error() {
            return Err(FetchError::Transient(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "벤더 요청 거부");
            return Err(FetchError::Transient(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let mut parsed: AggsResponse = serde_json::from_str(&body).map_err(|e| {
            error!(error = %e, body = %body, "집계 응답 파싱 실패");
            FetchError::from(e)
        })?;

        match parsed.status.as_deref() {
            Some("NOT_FOUND") => Err(FetchError::NotFound(
                parsed.reason().unwrap_or_else(|| "ticker not found".to_string()),
            )),
            Some("ERROR") => Err(FetchError::Transient(
                parsed.reason().unwrap_or_else(|| "vendor error".to_string()),
            )),
            _ => Ok(parsed),
        }
    }

    /// 집계 캔들을 도메인 캔들로 변환.
    ///
    /// 주식 일봉은 거래소 현지 자정(UTC 04:00/05:00)으로 찍혀 오므로 해당 UTC
    /// 날짜의 자정으로 내립니다. 일중 캔들은 그대로 두어 정렬 검증을 받습니다.
    fn to_candle(symbol: &str, timeframe: Timeframe, bar: AggBar) -> FetchResult<Candle> {
        let stamped = DateTime::from_timestamp_millis(bar.t)
            .ok_or_else(|| FetchError::Transient(format!("schema mismatch: bad timestamp {}", bar.t)))?;
        let open_time = match timeframe {
            Timeframe::D1 => timeframe.align_floor(stamped),
            _ => stamped,
        };

        Ok(Candle {
            symbol: symbol.to_string(),
            timeframe,
            open_time,
            open: to_decimal("o", bar.o)?,
            high: to_decimal("h", bar.h)?,
            low: to_decimal("l", bar.l)?,
            close: to_decimal("c", bar.c)?,
            volume: to_decimal("v", bar.v)?,
            vwap: bar.vw.map(|v| to_decimal("vw", v)).transpose()?,
            trade_count: bar.n,
        })
    }
}

/// f64를 Decimal로 변환 (NaN/무한대는 스키마 불일치).
fn to_decimal(field: &str, value: f64) -> FetchResult<Decimal> {
    Decimal::from_f64(value).ok_or_else(|| {
        FetchError::Transient(format!("schema mismatch: non-finite {}={}", field, value))
    })
}

#[async_trait]
impl CandleFetcher for AggsClient {
    fn name(&self) -> &str {
        "aggs"
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> FetchResult<Vec<Candle>> {
        let mut url = self.range_url(symbol, timeframe, from, to);
        let mut candles = Vec::new();
        let mut pages = 0;

        loop {
            let page = self.get_page(&url, pages == 0).await?;
            pages += 1;

            for bar in page.results.unwrap_or_default() {
                candles.push(Self::to_candle(symbol, timeframe, bar)?);
            }

            match page.next_url {
                Some(next) if pages < self.config.max_pages => url = next,
                Some(_) => {
                    warn!(
                        symbol = symbol,
                        timeframe = %timeframe,
                        pages = pages,
                        "페이지 상한 도달, 나머지는 다음 사이클에서 수집"
                    );
                    break;
                }
                None => break,
            }
        }

        let mut candles = normalize_candles(candles);
        candles.retain(|c| c.open_time >= from && c.open_time <= to);

        debug!(
            symbol = symbol,
            timeframe = %timeframe,
            count = candles.len(),
            pages = pages,
            "캔들 조회 완료"
        );

        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;
    use rust_decimal_macros::dec;

    fn client(base_url: &str) -> AggsClient {
        AggsClient::new(AggsConfig::new(base_url, SecretString::from("test-key"))).unwrap()
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (from, from + chrono::Duration::hours(3))
    }

    #[test]
    fn test_debug_masks_api_key() {
        let config = AggsConfig::new("https://vendor.test/", SecretString::from("super-secret"));
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret"));
        assert_eq!(config.base_url, "https://vendor.test");
    }

    #[tokio::test]
    async fn test_get_candles_decodes_and_sorts() {
        let mut server = mockito::Server::new_async().await;
        let (from, to) = window();
        let t1 = (from + chrono::Duration::hours(1)).timestamp_millis();
        let t0 = from.timestamp_millis();
        let body = format!(
            r#"{{"status":"OK","results":[
                {{"t":{t1},"o":101.5,"h":103,"l":100,"c":102,"v":12.25,"vw":101.9,"n":40}},
                {{"t":{t0},"o":100,"h":102,"l":99,"c":101.5,"v":8}}
            ]}}"#
        );
        let mock = server
            .mock("GET", Matcher::Regex(r"^/v2/aggs/ticker/X:BTCUSD/range/1/hour/".to_string()))
            .match_query(Matcher::UrlEncoded("apiKey".into(), "test-key".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let candles = client(&server.url())
            .get_candles("X:BTCUSD", Timeframe::H1, from, to)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, from);
        assert_eq!(candles[0].close, dec!(101.5));
        assert_eq!(candles[1].vwap, Some(dec!(101.9)));
        assert_eq!(candles[1].trade_count, Some(40));
    }

    #[tokio::test]
    async fn test_follows_next_url() {
        let mut server = mockito::Server::new_async().await;
        let (from, to) = window();
        let first = format!(
            r#"{{"status":"OK","results":[{{"t":{},"o":1,"h":1,"l":1,"c":1,"v":1}}],"next_url":"{}/v2/aggs/cursor/abc"}}"#,
            from.timestamp_millis(),
            server.url()
        );
        let second = format!(
            r#"{{"status":"OK","results":[{{"t":{},"o":2,"h":2,"l":2,"c":2,"v":2}}]}}"#,
            (from + chrono::Duration::hours(2)).timestamp_millis()
        );
        server
            .mock("GET", Matcher::Regex(r"^/v2/aggs/ticker/".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(first)
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex(r"^/v2/aggs/cursor/abc".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(second)
            .create_async()
            .await;

        let candles = client(&server.url())
            .get_candles("X:BTCUSD", Timeframe::H1, from, to)
            .await
            .unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, dec!(2));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        let (from, to) = window();

        server
            .mock("GET", Matcher::Regex(r"^/v2/aggs/ticker/LIMITED/".to_string()))
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "2")
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex(r"^/v2/aggs/ticker/GONE/".to_string()))
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("unknown ticker")
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex(r"^/v2/aggs/ticker/FLAKY/".to_string()))
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex(r"^/v2/aggs/ticker/GARBLED/".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"OK","results":[{"t":"yesterday"}]}"#)
            .create_async()
            .await;

        let c = client(&server.url());

        let err = c.get_candles("LIMITED", Timeframe::H1, from, to).await.unwrap_err();
        assert_eq!(err.retry_hint(), Some(Duration::from_secs(2)));

        let err = c.get_candles("GONE", Timeframe::H1, from, to).await.unwrap_err();
        assert!(err.is_not_found());

        let err = c.get_candles("FLAKY", Timeframe::H1, from, to).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)));

        let err = c.get_candles("GARBLED", Timeframe::H1, from, to).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)));
    }

    #[tokio::test]
    async fn test_vendor_not_found_status() {
        let mut server = mockito::Server::new_async().await;
        let (from, to) = window();
        server
            .mock("GET", Matcher::Regex(r"^/v2/aggs/ticker/".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"NOT_FOUND","message":"no such ticker"}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .get_candles("X:NOPE", Timeframe::D1, from, to)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_not_found_with_both_error_and_message() {
        let mut server = mockito::Server::new_async().await;
        let (from, to) = window();
        server
            .mock("GET", Matcher::Regex(r"^/v2/aggs/ticker/".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"status":"NOT_FOUND","error":"unknown ticker","message":"no such ticker"}"#,
            )
            .create_async()
            .await;

        let err = client(&server.url())
            .get_candles("X:NOPE", Timeframe::H1, from, to)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("unknown ticker"));
    }

    #[tokio::test]
    async fn test_daily_bars_at_exchange_midnight_are_floored() {
        let mut server = mockito::Server::new_async().await;
        let from = Utc.with_ymd_and_hms(2024, 7, 8, 0, 0, 0).unwrap();
        let to = from + chrono::Duration::days(3);
        // 7월 8일 04:00 UTC (EDT 자정), 7월 9일 04:00 UTC
        let body = format!(
            r#"{{"status":"OK","results":[
                {{"t":{},"o":190,"h":192,"l":189,"c":191,"v":1000}},
                {{"t":{},"o":191,"h":193,"l":190,"c":192,"v":1100}}
            ]}}"#,
            (from + chrono::Duration::hours(4)).timestamp_millis(),
            (from + chrono::Duration::hours(28)).timestamp_millis()
        );
        server
            .mock("GET", Matcher::Regex(r"^/v2/aggs/ticker/AAPL/range/1/day/".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let candles = client(&server.url())
            .get_candles("AAPL", Timeframe::D1, from, to)
            .await
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, from);
        assert_eq!(candles[1].open_time, from + chrono::Duration::days(1));
        assert!(candles.iter().all(|c| c.validate().is_ok()));
    }
}
