//! # Trader Core
//!
//! 캔들 동기화 시스템의 핵심 도메인 모델 및 타입을 제공합니다.
//!
//! - 타임프레임과 동기화 단위 (심볼 × 타임프레임)
//! - OHLCV 캔들 값 객체와 검증
//! - 단위별 동기화 상태 머신
//! - 갭 감사 레코드
//! - 로깅 인프라

pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
