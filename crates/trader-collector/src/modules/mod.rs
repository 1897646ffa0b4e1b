//! 캔들 동기화 모듈.

pub mod completeness;
pub mod gap_heal;
pub mod gap_scan;
pub mod health;
pub mod scheduler;
pub mod sync;
pub mod worker_pool;

pub use completeness::{completeness_report, render_table, CompletenessRow};
pub use gap_heal::{GapHealOutcome, GapHealer};
pub use gap_scan::{detect_gaps, GapScanner};
pub use health::{health_check, HealthReport};
pub use scheduler::{DueRunSummary, JobKind, JobReport, JobScheduler, JobSpec};
pub use sync::{
    fetch_window, reset_unit, FetchWindow, SkipReason, SyncCoordinator, UnitOutcome,
    WriteSummary,
};
pub use worker_pool::WorkerPool;
