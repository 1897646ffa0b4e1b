//! 캔들 동기화 수집기.
//!
//! 벤더에서 OHLCV 캔들을 증분으로 가져와 저장하는 바이너리와 라이브러리를 제공합니다:
//! - 단위(심볼 × 타임프레임)별 증분 동기화와 워커 풀
//! - 갭 스캔 및 힐링
//! - 완결성 리포트, 헬스 체크
//! - 데몬/단발 작업 스케줄러

pub mod config;
pub mod error;
pub mod modules;
pub mod stats;
pub mod stores;

pub use config::{CollectorConfig, TimeframePolicy};
pub use error::{CollectorError, Result};
pub use stats::{CycleReport, GapScanReport, HealReport};
pub use stores::Stores;
