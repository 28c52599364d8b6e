//! Gate.io USDT 무기한 선물 커넥터.

pub mod client;

pub use client::{GateioClient, GateioConfig};
