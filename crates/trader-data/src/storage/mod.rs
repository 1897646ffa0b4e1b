//! 저장소 구현.

mod chunked;
pub mod gaps;
pub mod job_runs;
pub mod memory;
pub mod ohlcv;
pub mod sync_state;

pub use gaps::PgGapStore;
pub use job_runs::PgJobRunStore;
pub use memory::MemoryStore;
pub use ohlcv::{CandleRecord, PgCandleStore, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use sync_state::PgSyncStateStore;
