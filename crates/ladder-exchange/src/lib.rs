//! 거래소 커넥터 크레이트.
//!
//! `ladder-core`의 [`FuturesExchange`](ladder_core::FuturesExchange) trait에
//! 대한 실제 구현을 제공합니다.
//!
//! - [`connector::gateio`]: Gate.io USDT 무기한 선물 REST 클라이언트
//! - [`provider::GateioExchange`]: Gate.io 커넥터의 trait 구현
//! - [`provider::MockFuturesExchange`]: 테스트용 스크립트 거래소
//! - [`retry`]: 멱등 조회성 호출용 재시도 유틸리티

pub mod connector;
pub mod provider;
pub mod retry;

pub use provider::{GateioExchange, MockFuturesExchange};
pub use retry::{with_retry, RetryConfig};
