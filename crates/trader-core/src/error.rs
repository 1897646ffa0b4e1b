//! 도메인 에러 타입.

use thiserror::Error;

/// 핵심 도메인 에러.
#[derive(Debug, Error)]
pub enum TraderError {
    /// 잘못된 입력 (타임프레임/상태 문자열 파싱 등)
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    /// 캔들 검증 실패 (배치에서 제외 대상)
    #[error("캔들 검증 실패: {0}")]
    Validation(String),
}

/// 도메인 작업을 위한 Result 타입.
pub type TraderResult<T> = Result<T, TraderError>;

impl TraderError {
    /// 검증 에러인지 확인합니다.
    pub fn is_validation(&self) -> bool {
        matches!(self, TraderError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert!(TraderError::Validation("high < low".to_string()).is_validation());
        assert!(!TraderError::InvalidInput("4h".to_string()).is_validation());
    }
}
