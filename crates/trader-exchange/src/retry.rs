//! 재시도 및 지수 백오프.
//!
//! 재시도 가능한 에러(`RateLimited`, `Transient`)만 재시도하며, 호출 횟수는
//! `max_attempts`를 넘지 않습니다. `RateLimited`에 벤더 힌트가 있으면 힌트를
//! (상한 적용 후) 우선 사용합니다.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::traits::FetchResult;
use crate::FetchError;

/// 재시도 설정.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 최대 호출 횟수 (첫 호출 포함)
    pub max_attempts: u32,
    /// n번째 실패 후 대기 시간 (부족하면 마지막 값 반복)
    pub delays: Vec<Duration>,
    /// 벤더 Retry-After 힌트 상한
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delays: [100, 500, 1000, 2000, 4000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            max_rate_limit_wait: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// `attempt`번째 호출이 `err`로 실패한 뒤의 대기 시간.
    pub fn delay_for(&self, attempt: u32, err: &FetchError) -> Duration {
        if let Some(hint) = err.retry_hint() {
            return hint.min(self.max_rate_limit_wait);
        }

        let idx = attempt.saturating_sub(1) as usize;
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// 재시도를 적용하여 비동기 작업을 실행합니다.
///
/// `op`는 1부터 시작하는 시도 번호를 받습니다. 모든 시도가 실패하면 마지막
/// 에러를 그대로 반환하므로, 호출자는 `is_not_found()`로 영구 실패와
/// 재시도 소진을 구분할 수 있습니다.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, label: &str, mut op: F) -> FetchResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = FetchResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label = label, attempt, "재시도 후 성공");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                warn!(label = label, attempts = attempt, error = %e, "재시도 소진");
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for(attempt, &e);
                debug!(
                    label = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "재시도 예정"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
