//! 캔들 및 동기화 상태 저장.
//!
//! 이 crate는 다음을 제공합니다:
//! - 저장소 trait (캔들, 동기화 상태, 갭 감사 기록, 작업 실행 기록)
//! - PostgreSQL 구현 (UNNEST 청크 upsert, `SELECT ... FOR UPDATE` check-and-set)
//! - 테스트용 인메모리 구현
//! - 연결 풀 및 마이그레이션

pub mod database;
pub mod error;
pub mod models;
pub mod storage;
pub mod traits;

pub use database::{Database, DatabaseConfig};
pub use error::{DataError, Result};
pub use models::{Claim, CoverageStats, JobRun, JobStatus};
pub use storage::{
    MemoryStore, PgCandleStore, PgGapStore, PgJobRunStore, PgSyncStateStore,
};
pub use traits::{CandleStore, GapStore, JobRunStore, SyncStateStore};
