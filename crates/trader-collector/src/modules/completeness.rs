//! 데이터 완결성 리포트.
//!
//! 단위별 저장 캔들 수, 처음/마지막 open_time, 그 사이 기대 캔들 수 대비
//! 커버리지, 열린 갭 수, 동기화 상태를 보여줍니다. 캔들이 하나도 없는 단위는
//! MISSING으로 표시됩니다 (내부 갭 감지가 잡지 못하는 경우).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use trader_core::{UnitKey, UnitState};

use crate::config::CollectorConfig;
use crate::stores::Stores;
use crate::Result;

/// 리포트 한 행.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletenessRow {
    pub symbol: String,
    pub timeframe: String,
    pub candles: i64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    /// first..=last 사이 기대 캔들 수
    pub expected: i64,
    pub coverage_pct: f64,
    pub open_gaps: i64,
    pub state: Option<UnitState>,
    pub last_synced_through: Option<DateTime<Utc>>,
    /// 저장된 캔들이 없음
    pub missing: bool,
}

/// 완결성 리포트 생성.
///
/// 대상은 설정된 심볼 × 타임프레임과 동기화 상태에 있는 단위의 합집합입니다.
pub async fn completeness_report(
    config: &CollectorConfig,
    stores: &Stores,
    symbol: Option<&str>,
) -> Result<Vec<CompletenessRow>> {
    let states = stores.states.list(None).await?;

    let mut units: BTreeSet<UnitKey> = config.units().into_iter().collect();
    units.extend(states.iter().map(|s| s.key()));
    if let Some(symbol) = symbol {
        units.retain(|u| u.symbol == symbol);
    }

    let mut rows = Vec::with_capacity(units.len());
    for key in units {
        let coverage = stores.candles.coverage(&key.symbol, key.timeframe).await?;
        let open_gaps = stores.gaps.count_open(&key).await?;
        let state = states
            .iter()
            .find(|s| s.symbol == key.symbol && s.timeframe == key.timeframe);

        let expected = match (coverage.first, coverage.last) {
            (Some(first), Some(last)) => key.timeframe.bars_between(first, last),
            _ => 0,
        };
        let coverage_pct = if expected > 0 {
            coverage.count as f64 / expected as f64 * 100.0
        } else {
            0.0
        };

        rows.push(CompletenessRow {
            symbol: key.symbol.clone(),
            timeframe: key.timeframe.to_string(),
            candles: coverage.count,
            first: coverage.first,
            last: coverage.last,
            expected,
            coverage_pct,
            open_gaps,
            state: state.map(|s| s.state),
            last_synced_through: state.and_then(|s| s.last_synced_through),
            missing: coverage.count == 0,
        });
    }

    Ok(rows)
}

/// 사람이 읽는 표 형식으로 출력.
pub fn render_table(rows: &[CompletenessRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<14} {:<4} {:>8} {:>8} {:>8} {:>5} {:<15} {:<20} {}",
        "SYMBOL", "TF", "CANDLES", "EXPECTED", "COVER%", "GAPS", "STATE", "LAST", "NOTE"
    );

    for row in rows {
        let last = row
            .last
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let state = row
            .state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let note = if row.missing { "MISSING" } else { "" };

        let _ = writeln!(
            out,
            "{:<14} {:<4} {:>8} {:>8} {:>7.1}% {:>5} {:<15} {:<20} {}",
            row.symbol,
            row.timeframe,
            row.candles,
            row.expected,
            row.coverage_pct,
            row.open_gaps,
            state,
            last,
            note
        );
    }

    out
}
