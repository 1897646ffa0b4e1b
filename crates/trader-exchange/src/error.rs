//! 벤더 조회 에러 타입.

use std::time::Duration;
use thiserror::Error;

/// 캔들 조회 에러.
///
/// 벤더별 응답은 모두 이 세 가지로 정규화됩니다.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// 요청 한도 초과 (쿨다운 후 재시도)
    #[error("Rate limit exceeded")]
    RateLimited {
        /// 벤더가 알려준 대기 시간 (Retry-After)
        retry_after: Option<Duration>,
    },

    /// 이 단위에 대한 데이터가 영구적으로 없음
    #[error("Not found: {0}")]
    NotFound(String),

    /// 일시적 실패 (네트워크, 5xx, 타임아웃, 스키마 불일치)
    #[error("Transient error: {0}")]
    Transient(String),
}

impl FetchError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. } | FetchError::Transient(_)
        )
    }

    /// 벤더가 제시한 재시도 대기 시간.
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// 영구 실패인지 확인.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Transient(format!("request timeout: {}", err))
        } else if err.is_connect() {
            FetchError::Transient(format!("connection failed: {}", err))
        } else {
            FetchError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Transient(format!("schema mismatch: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for FetchError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        FetchError::Transient("fetch deadline exceeded".to_string())
    }
}
