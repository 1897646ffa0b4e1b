//! 캔들 동기화 도메인 모델.

mod candle;
mod gap;
mod sync_state;

pub use candle::*;
pub use gap::*;
pub use sync_state::*;
