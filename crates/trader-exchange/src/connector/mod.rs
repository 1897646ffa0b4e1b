//! 벤더 커넥터.

pub mod aggs;

pub use aggs::{AggsClient, AggsConfig};
