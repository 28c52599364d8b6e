//! 강제 청산가 추정.
//!
//! 격리 마진 기준의 단순 추정식을 사용합니다. 교차 마진은 계좌 전체
//! 자산에 따라 실제 청산가가 달라지므로 동일 공식을 근사치로만
//! 제공합니다.

use rust_decimal::Decimal;
use thiserror::Error;

use super::config::{Direction, MarginMode};

/// 청산가 추정 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationEstimate {
    /// 추정 청산가
    pub liq_price: Decimal,
    /// 진입가 대비 청산까지의 불리한 가격 변동 폭 (%)
    pub adverse_move_pct: Decimal,
    /// 계산된 청산가가 음수라 0으로 보정되었는지 여부
    pub clamped: bool,
    /// 교차 마진 근사치 여부
    pub cross_approximation: bool,
}

/// 청산가 계산 에러.
#[derive(Debug, Clone, Error)]
pub enum RiskError {
    /// 해당 레버리지/유지증거금 조합에서는 청산 거리가 정의되지 않음
    #[error("청산가 계산 불가: 1/{leverage} <= 유지증거금율 {maintenance_margin_rate}")]
    NotComputable {
        /// 레버리지
        leverage: u32,
        /// 유지증거금율
        maintenance_margin_rate: Decimal,
    },

    /// 입력값 위반
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),
}

/// 강제 청산가 및 진입가 대비 변동 폭 추정.
///
/// `m = 1/leverage - maintenance_margin_rate`로 두고,
/// 롱은 `entry * (1 - m)`, 숏은 `entry * (1 + m)`을 청산가로 봅니다.
///
/// # Errors
///
/// - [`RiskError::InvalidInput`]: 전제조건 위반 (원금/진입가/유지증거금율 범위)
/// - [`RiskError::NotComputable`]: `1/leverage <= maintenance_margin_rate`
pub fn liquidation_estimate(
    collateral_usd: Decimal,
    leverage: u32,
    margin_mode: MarginMode,
    entry_price: Decimal,
    direction: Direction,
    maintenance_margin_rate: Decimal,
) -> Result<LiquidationEstimate, RiskError> {
    if leverage == 0 {
        return Err(RiskError::InvalidInput(
            "레버리지는 0보다 커야 합니다".to_string(),
        ));
    }
    if entry_price <= Decimal::ZERO {
        return Err(RiskError::InvalidInput(
            "진입가는 0보다 커야 합니다".to_string(),
        ));
    }
    if collateral_usd <= Decimal::ZERO {
        return Err(RiskError::InvalidInput(
            "투입 원금은 0보다 커야 합니다".to_string(),
        ));
    }
    if maintenance_margin_rate <= Decimal::ZERO || maintenance_margin_rate >= Decimal::ONE {
        return Err(RiskError::InvalidInput(
            "유지증거금율은 0과 1 사이여야 합니다".to_string(),
        ));
    }

    let inverse_leverage = Decimal::ONE / Decimal::from(leverage);
    if inverse_leverage <= maintenance_margin_rate {
        return Err(RiskError::NotComputable {
            leverage,
            maintenance_margin_rate,
        });
    }

    let m = inverse_leverage - maintenance_margin_rate;
    let raw_liq_price = match direction {
        Direction::Long => entry_price * (Decimal::ONE - m),
        Direction::Short => entry_price * (Decimal::ONE + m),
    };

    let (liq_price, clamped) = if raw_liq_price < Decimal::ZERO {
        (Decimal::ZERO, true)
    } else {
        (raw_liq_price, false)
    };

    Ok(LiquidationEstimate {
        liq_price,
        adverse_move_pct: m * Decimal::ONE_HUNDRED,
        clamped,
        cross_approximation: margin_mode == MarginMode::Cross,
    })
}

// =============================================================================
// 테스트
// =============================================================================
