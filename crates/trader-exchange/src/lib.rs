//! 업스트림 시장 데이터 벤더 연결.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - CandleFetcher trait: 벤더 중립 캔들 조회 인터페이스
//! - REST aggregates 커넥터
//! - 재시도 및 지수 백오프

pub mod connector;
pub mod error;
pub mod retry;
pub mod traits;

pub use connector::{AggsClient, AggsConfig};
pub use error::*;
pub use retry::{with_retry, RetryConfig};
pub use traits::*;
