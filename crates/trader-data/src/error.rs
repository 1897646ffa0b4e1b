//! 저장소 계층 오류.
//!
//! sqlx 오류는 [`From`] 변환으로 이 타입에 흡수되며, 수집기는 이를
//! `CollectorError::Data`로 감싸 단위 실패로 기록합니다.

use thiserror::Error;

/// 캔들, 동기화 상태, 갭, 작업 기록 저장소에서 발생하는 오류.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    /// 조회 대상 행(갭 id 등)이 없음
    #[error("Record not found: {0}")]
    NotFound(String),

    /// 저장된 값을 도메인 타입으로 해석할 수 없음 (알 수 없는 타임프레임, 상태 문자열 등)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// 캔들 청크 업서트 실패. 앞선 청크의 `committed`행은 이미 커밋됨
    #[error("chunk {chunk} failed after {attempts} attempts ({committed} rows already committed): {reason}")]
    ChunkFailed {
        chunk: usize,
        attempts: u32,
        committed: usize,
        reason: String,
    },
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_string()),
            sqlx::Error::PoolTimedOut => Self::PoolExhausted,
            sqlx::Error::Database(db_err) => Self::QueryError(db_err.message().to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::InvalidData(err.to_string())
            }
            other => Self::QueryError(other.to_string()),
        }
    }
}

impl From<trader_core::TraderError> for DataError {
    fn from(err: trader_core::TraderError) -> Self {
        Self::InvalidData(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
