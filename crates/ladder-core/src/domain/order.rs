//! 주문 의도 타입.
//!
//! 전략 엔진이 틱마다 결정하는 행동을 [`OrderIntent`]로 표현하고,
//! 주문 실행기가 이를 거래소 주문 요청으로 변환합니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::config::Direction;

/// 주문 목적.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPurpose {
    /// 최초 진입
    Entry,
    /// 손실 구간 분할매수 (물타기)
    Split,
    /// 수익 구간 추가 진입 (불타기)
    Pyramid,
    /// 익절
    TakeProfit,
    /// 손절
    StopLoss,
    /// 운영자 중단에 따른 긴급 청산
    EmergencyClose,
}

impl OrderPurpose {
    /// 포지션을 줄이는 목적인지 여부.
    pub fn is_closing(self) -> bool {
        matches!(
            self,
            Self::TakeProfit | Self::StopLoss | Self::EmergencyClose
        )
    }

    /// 클라이언트 주문 ID에 들어갈 문자열.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Split => "split",
            Self::Pyramid => "pyramid",
            Self::TakeProfit => "take-profit",
            Self::StopLoss => "stop-loss",
            Self::EmergencyClose => "emergency-close",
        }
    }
}

impl std::fmt::Display for OrderPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 한 틱의 결정이 만들어낸 주문 의도.
///
/// `notional_usd`는 진입성 주문에서만 의미가 있습니다. 청산성 주문은
/// 실행기가 항상 현재 보유 수량 전체 기준으로 금액을 재계산하며,
/// 여기 담긴 값은 무시합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    /// 주문 목적
    pub purpose: OrderPurpose,
    /// 요청 명목 금액 (USD, 청산성 주문에서는 무시됨)
    pub notional_usd: Decimal,
}

impl OrderIntent {
    /// 진입성 의도 생성.
    pub fn opening(purpose: OrderPurpose, notional_usd: Decimal) -> Self {
        debug_assert!(!purpose.is_closing());
        Self {
            purpose,
            notional_usd,
        }
    }

    /// 청산성 의도 생성. 금액은 실행 시점에 재계산됩니다.
    pub fn closing(purpose: OrderPurpose) -> Self {
        debug_assert!(purpose.is_closing());
        Self {
            purpose,
            notional_usd: Decimal::ZERO,
        }
    }

    /// reduce-only 플래그 (청산성 주문에서만 true).
    pub fn reduce_only(&self) -> bool {
        self.purpose.is_closing()
    }

    /// 실행 방향 — 진입성은 설정 방향, 청산성은 반대 방향.
    pub fn execution_side(&self, direction: Direction) -> Direction {
        if self.purpose.is_closing() {
            direction.opposite()
        } else {
            direction
        }
    }
}

// =============================================================================
// 테스트
// =============================================================================
