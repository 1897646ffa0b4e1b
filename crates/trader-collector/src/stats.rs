//! 사이클/스캔/힐링 통계 구조체.

use serde::Serialize;
use std::time::Duration;

/// 동기화 사이클 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// 대상 단위 수
    pub total: usize,
    /// 새 캔들을 저장한 단위 수
    pub synced: usize,
    /// 새 데이터 없이 최신인 단위 수
    pub current: usize,
    /// FAILED_BACKOFF로 끝난 단위 수
    pub failed: usize,
    /// 이번 사이클에 NotFound를 받은 단위 수
    pub unavailable: usize,
    /// 이미 실행 중이라 건너뛴 단위 수
    pub skipped_running: usize,
    /// 영구 비가용이라 건너뛴 단위 수
    pub skipped_unavailable: usize,
    /// 실패 쿨다운 중이라 건너뛴 단위 수
    pub skipped_cooldown: usize,
    /// 저장된 총 캔들 수
    pub candles_written: usize,
    /// 검증 실패로 버린 캔들 수
    pub dropped_invalid: usize,
    /// 실패한 단위 ("SYMBOL/TF: 사유")
    pub failed_units: Vec<String>,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CycleReport {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// FAILED_BACKOFF로 끝난 단위가 있는지 확인
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// 다른 사이클 통계를 합산
    pub fn merge(&mut self, other: CycleReport) {
        self.total += other.total;
        self.synced += other.synced;
        self.current += other.current;
        self.failed += other.failed;
        self.unavailable += other.unavailable;
        self.skipped_running += other.skipped_running;
        self.skipped_unavailable += other.skipped_unavailable;
        self.skipped_cooldown += other.skipped_cooldown;
        self.candles_written += other.candles_written;
        self.dropped_invalid += other.dropped_invalid;
        self.failed_units.extend(other.failed_units);
        self.elapsed += other.elapsed;
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            synced = self.synced,
            current = self.current,
            failed = self.failed,
            unavailable = self.unavailable,
            skipped_running = self.skipped_running,
            skipped_unavailable = self.skipped_unavailable,
            skipped_cooldown = self.skipped_cooldown,
            candles_written = self.candles_written,
            dropped_invalid = self.dropped_invalid,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "동기화 사이클 완료"
        );
        for unit in &self.failed_units {
            tracing::warn!(operation = operation, unit = %unit, "단위 동기화 실패");
        }
    }
}

/// 갭 스캔 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct GapScanReport {
    /// 스캔한 단위 수
    pub units_scanned: usize,
    /// 감지된 갭 수
    pub gaps_found: usize,
    /// 새로 기록된 갭 수 (이미 기록된 구간 제외)
    pub gaps_recorded: usize,
    /// 스캔 중 에러가 난 단위
    pub errors: Vec<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl GapScanReport {
    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            units_scanned = self.units_scanned,
            gaps_found = self.gaps_found,
            gaps_recorded = self.gaps_recorded,
            errors = self.errors.len(),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "갭 스캔 완료"
        );
    }
}

/// 갭 힐링 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealReport {
    /// 처리한 열린 갭 수
    pub gaps_processed: usize,
    /// 캔들을 채워 힐링된 갭 수
    pub healed: usize,
    /// 벤더 데이터 없음을 수용한 갭 수
    pub accepted: usize,
    /// 빈 응답이었지만 아직 수용 전인 갭 수
    pub still_open: usize,
    /// 재시도 소진 또는 저장 실패한 갭 수
    pub failed: usize,
    /// 저장된 총 캔들 수
    pub candles_written: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl HealReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn merge(&mut self, other: HealReport) {
        self.gaps_processed += other.gaps_processed;
        self.healed += other.healed;
        self.accepted += other.accepted;
        self.still_open += other.still_open;
        self.failed += other.failed;
        self.candles_written += other.candles_written;
    }

    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            gaps_processed = self.gaps_processed,
            healed = self.healed,
            accepted = self.accepted,
            still_open = self.still_open,
            failed = self.failed,
            candles_written = self.candles_written,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "갭 힐링 완료"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_report_merge() {
        let mut a = CycleReport {
            total: 2,
            synced: 1,
            failed: 1,
            failed_units: vec!["AAPL/1h: rate limited".to_string()],
            ..Default::default()
        };
        let b = CycleReport {
            total: 3,
            current: 3,
            ..Default::default()
        };
        a.merge(b);
        assert_eq!(a.total, 5);
        assert_eq!(a.current, 3);
        assert!(a.has_failures());
    }
}
