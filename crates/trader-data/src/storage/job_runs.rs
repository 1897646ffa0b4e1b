//! 작업 실행 기록 저장소 (PostgreSQL).
//!
//! 작업 이름별 마지막 시작 시각을 보관하여, 재시작이나 cron 중복 호출에도
//! 최소 실행 간격 안에서 같은 작업이 두 번 돌지 않도록 합니다.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use sqlx::postgres::PgPool;
use tracing::debug;

use crate::error::Result;
use crate::models::{JobRun, JobStatus};
use crate::traits::JobRunStore;

/// PostgreSQL 작업 실행 기록 저장소.
#[derive(Clone)]
pub struct PgJobRunStore {
    pool: PgPool,
}

impl PgJobRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRunStore for PgJobRunStore {
    async fn try_claim(&self, job: &str, now: DateTime<Utc>, min_interval: Duration) -> Result<bool> {
        let now = now.trunc_subsecs(6);
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO job_runs (job_name, last_started_at, status)
            VALUES ($1, $2, 'running')
            ON CONFLICT (job_name) DO UPDATE SET
                last_started_at = EXCLUDED.last_started_at,
                last_finished_at = NULL,
                status = 'running',
                last_error = NULL
            WHERE job_runs.last_started_at <= $3
            RETURNING job_name
            "#,
        )
        .bind(job)
        .bind(now)
        .bind(now - min_interval)
        .fetch_optional(&self.pool)
        .await?;

        debug!(job = job, claimed = claimed.is_some(), "작업 실행 권한 확인");
        Ok(claimed.is_some())
    }

    async fn finish(
        &self,
        job: &str,
        finished_at: DateTime<Utc>,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_runs
            SET last_finished_at = $2, status = $3, last_error = $4
            WHERE job_name = $1
            "#,
        )
        .bind(job)
        .bind(finished_at)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobRun>> {
        let rows: Vec<(String, DateTime<Utc>, Option<DateTime<Utc>>, String, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT job_name, last_started_at, last_finished_at, status, last_error
                FROM job_runs
                ORDER BY job_name
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(job_name, last_started_at, last_finished_at, status, last_error)| -> Result<JobRun> {
                Ok(JobRun {
                    job_name,
                    last_started_at,
                    last_finished_at,
                    status: status.parse()?,
                    last_error,
                })
            })
            .collect()
    }
}
