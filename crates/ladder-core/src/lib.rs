//! LadderQuant 핵심 도메인 크레이트.
//!
//! 전략 설정, 포지션 상태, 주문 타입, 거래소 추상화, 청산가 계산 등
//! I/O가 없는 순수 도메인 로직을 제공합니다.
//! 실제 거래소 연동은 `ladder-exchange`, 주문 실행은 `ladder-execution`,
//! 전략 판단 루프는 `ladder-strategy`가 담당합니다.

pub mod domain;

pub use domain::config::{ConfigError, Direction, MarginMode, StrategyConfig};
pub use domain::exchange::{
    ExchangeError, FuturesExchange, OrderAck, OrderRequest, OrderStatusReport, OrderStatusType,
    PositionReport,
};
pub use domain::order::{OrderIntent, OrderPurpose};
pub use domain::position::{CloseOutcome, FillEvent, PositionState, ScaleKind, QTY_EPSILON};
pub use domain::risk::{liquidation_estimate, LiquidationEstimate, RiskError};
