//! 동기화 시스템 전반에서 사용되는 공통 타입.

mod timeframe;
mod unit;

pub use timeframe::*;
pub use unit::*;
