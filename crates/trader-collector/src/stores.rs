//! 수집기 구성 요소가 공유하는 저장소 묶음.

use sqlx::PgPool;
use std::sync::Arc;
use trader_data::{
    CandleStore, GapStore, JobRunStore, MemoryStore, PgCandleStore, PgGapStore, PgJobRunStore,
    PgSyncStateStore, SyncStateStore,
};

use crate::config::UpsertConfig;

/// 저장소 trait 객체 묶음.
#[derive(Clone)]
pub struct Stores {
    pub candles: Arc<dyn CandleStore>,
    pub states: Arc<dyn SyncStateStore>,
    pub gaps: Arc<dyn GapStore>,
    pub jobs: Arc<dyn JobRunStore>,
}

impl Stores {
    /// PostgreSQL 저장소.
    pub fn postgres(pool: PgPool, upsert: &UpsertConfig) -> Self {
        Self {
            candles: Arc::new(
                PgCandleStore::new(pool.clone())
                    .with_chunk_size(upsert.chunk_size)
                    .with_chunk_retries(upsert.chunk_retries),
            ),
            states: Arc::new(PgSyncStateStore::new(pool.clone())),
            gaps: Arc::new(PgGapStore::new(pool.clone())),
            jobs: Arc::new(PgJobRunStore::new(pool)),
        }
    }

    /// 하나의 인메모리 저장소를 네 역할로 공유.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            candles: store.clone(),
            states: store.clone(),
            gaps: store.clone(),
            jobs: store,
        }
    }
}
