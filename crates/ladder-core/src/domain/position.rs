//! 봇 내부 포지션 상태.
//!
//! 전략 실행 단위마다 하나의 [`PositionState`]가 존재하며, 상태 변경은
//! 주문 실행기의 체결 반영 단계에서만 일어납니다. 플랫 상태에서는 모든
//! 필드가 초기값이어야 한다는 리셋 불변식을 유지합니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 계약 수량을 0으로 간주하는 기준값.
pub const QTY_EPSILON: Decimal = dec!(0.00000001);

/// 체결 이벤트.
///
/// 거래소에서 확인한 실제 체결 정보를 상태에 반영할 때 사용합니다.
/// `contracts`는 부호 있는 수량입니다 (롱 +, 숏 -).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    /// 체결 가격
    pub price: Decimal,
    /// 부호 있는 체결 수량
    pub contracts: Decimal,
    /// 체결 명목 금액 (USD)
    pub usd_value: Decimal,
}

/// 추가 진입 종류 (분할매수 / 피라미딩).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleKind {
    /// 손실 구간 분할매수 (물타기)
    Split,
    /// 수익 구간 추가 진입 (불타기)
    Pyramid,
}

/// 청산 체결 반영 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// 전량 청산 완료, 상태 리셋됨
    FullyClosed,
    /// 부분 청산, 잔여 수량 유지
    PartiallyClosed {
        /// 남은 부호 있는 수량
        remaining: Decimal,
    },
}

/// 봇 내부 추적 포지션 상태.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionState {
    /// 평균 진입가 (플랫이면 None)
    pub avg_entry_price: Option<Decimal>,
    /// 부호 있는 총 계약 수량 (롱 +, 숏 -)
    pub contracts: Decimal,
    /// 투입 원금 합계 (USD)
    pub collateral_usd: Decimal,
    /// 포지션 보유 여부
    pub in_position: bool,
    /// 체결된 분할매수 횟수
    pub splits_filled: usize,
    /// 체결된 피라미딩 횟수
    pub pyramids_filled: usize,
    /// 추적 익절 활성화 여부
    pub trailing_active: bool,
    /// 추적 익절 고점 미실현 손익 (USD, trailing_active 동안만 유효)
    pub peak_unrealized_pnl: Decimal,
}

impl Default for PositionState {
    fn default() -> Self {
        Self {
            avg_entry_price: None,
            contracts: Decimal::ZERO,
            collateral_usd: Decimal::ZERO,
            in_position: false,
            splits_filled: 0,
            pyramids_filled: 0,
            trailing_active: false,
            peak_unrealized_pnl: Decimal::ZERO,
        }
    }
}

impl PositionState {
    /// 플랫 상태로 생성.
    pub fn new() -> Self {
        Self::default()
    }

    /// 절대 계약 수량.
    pub fn abs_contracts(&self) -> Decimal {
        self.contracts.abs()
    }

    /// 모든 필드를 초기값으로 리셋.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 최초 진입 체결 반영.
    ///
    /// 플랫 상태에서만 호출되어야 하며, 평균가/수량/원금을 체결값으로
    /// 설정하고 포지션 보유 상태로 전환합니다.
    pub fn apply_entry_fill(&mut self, fill: &FillEvent) {
        debug_assert!(!self.in_position, "entry fill on non-flat state");
        self.avg_entry_price = Some(fill.price);
        self.contracts = fill.contracts;
        self.collateral_usd = fill.usd_value;
        self.in_position = true;
        info!(
            price = %fill.price,
            contracts = %fill.contracts,
            usd = %fill.usd_value,
            "진입 체결 반영, 포지션 오픈"
        );
    }

    /// 추가 진입(분할매수/피라미딩) 체결 반영.
    ///
    /// 절대 수량을 가중치로 평균 진입가를 재계산하고 해당 래더 카운터를
    /// 증가시킵니다.
    pub fn apply_scale_fill(&mut self, fill: &FillEvent, kind: ScaleKind) {
        let prev_abs = self.abs_contracts();
        let add_abs = fill.contracts.abs();
        let total_abs = prev_abs + add_abs;

        if total_abs > QTY_EPSILON {
            let prev_avg = self.avg_entry_price.unwrap_or(Decimal::ZERO);
            self.avg_entry_price =
                Some((prev_avg * prev_abs + fill.price * add_abs) / total_abs);
        }
        self.contracts += fill.contracts;
        self.collateral_usd += fill.usd_value;

        match kind {
            ScaleKind::Split => {
                self.splits_filled += 1;
                info!(
                    rung = self.splits_filled,
                    avg_price = ?self.avg_entry_price,
                    contracts = %self.contracts,
                    "분할매수 체결 반영"
                );
            }
            ScaleKind::Pyramid => {
                self.pyramids_filled += 1;
                info!(
                    rung = self.pyramids_filled,
                    avg_price = ?self.avg_entry_price,
                    contracts = %self.contracts,
                    "피라미딩 체결 반영"
                );
            }
        }
    }

    /// 청산(익절/손절/긴급 청산) 체결 반영.
    ///
    /// 잔여 수량이 [`QTY_EPSILON`] 미만이면 전량 청산으로 간주하여 상태를
    /// 리셋합니다. 잔여 수량이 남으면 부분 청산으로 기록하고 수량을
    /// 유지합니다 — 잔여분을 버리면 거래소에 살아 있는 포지션과 내부
    /// 상태가 어긋나므로 수동 확인 대상 경고만 남깁니다.
    pub fn apply_close_fill(&mut self, fill: &FillEvent) -> CloseOutcome {
        let remaining = self.contracts + fill.contracts;

        if remaining.abs() < QTY_EPSILON {
            info!(close_price = %fill.price, "전량 청산 확인, 상태 리셋");
            self.reset();
            CloseOutcome::FullyClosed
        } else {
            warn!(
                remaining = %remaining,
                close_price = %fill.price,
                "부분 청산 감지 — 잔여 수량 유지, 거래소 측 수동 확인 필요"
            );
            self.contracts = remaining;
            CloseOutcome::PartiallyClosed { remaining }
        }
    }

    /// 추적 익절 활성화.
    pub fn activate_trailing(&mut self, current_unrealized_pnl: Decimal) {
        self.trailing_active = true;
        self.peak_unrealized_pnl = current_unrealized_pnl;
    }

    /// 추적 익절 고점 갱신.
    pub fn update_peak(&mut self, current_unrealized_pnl: Decimal) {
        if current_unrealized_pnl > self.peak_unrealized_pnl {
            self.peak_unrealized_pnl = current_unrealized_pnl;
        }
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(price: Decimal, contracts: Decimal) -> FillEvent {
        FillEvent {
            price,
            contracts,
            usd_value: (price * contracts).abs(),
        }
    }

    #[test]
    fn flat_state_holds_reset_invariant() {
        let state = PositionState::new();
        assert!(!state.in_position);
        assert!(state.avg_entry_price.is_none());
        assert_eq!(state.contracts, Decimal::ZERO);
        assert_eq!(state.collateral_usd, Decimal::ZERO);
        assert_eq!(state.splits_filled, 0);
        assert_eq!(state.pyramids_filled, 0);
        assert!(!state.trailing_active);
        assert_eq!(state.peak_unrealized_pnl, Decimal::ZERO);
    }

    #[test]
    fn entry_fill_opens_position() {
        let mut state = PositionState::new();
        state.apply_entry_fill(&fill(dec!(50000), dec!(0.002)));

        assert!(state.in_position);
        assert_eq!(state.avg_entry_price, Some(dec!(50000)));
        assert_eq!(state.contracts, dec!(0.002));
        assert_eq!(state.collateral_usd, dec!(100.000));
    }

    #[test]
    fn weighted_average_after_split_folds() {
        let mut state = PositionState::new();
        state.apply_entry_fill(&fill(dec!(100), dec!(100)));
        state.apply_scale_fill(&fill(dec!(90), dec!(100)), ScaleKind::Split);

        // 동일 가중: (100*100 + 90*100) / 200 = 95
        assert_eq!(state.avg_entry_price, Some(dec!(95)));
        assert_eq!(state.splits_filled, 1);

        state.apply_scale_fill(&fill(dec!(80), dec!(300)), ScaleKind::Split);

        // (95*200 + 80*300) / 500 = 86
        assert_eq!(state.avg_entry_price, Some(dec!(86)));
        assert_eq!(state.contracts, dec!(500));
        assert_eq!(state.splits_filled, 2);
    }

    #[test]
    fn weighted_average_with_unequal_weights() {
        // 50 @100 + 50 @90 → 평균 95, 이후 300 @80 → (100*95 + 300*80) / 400 = 83.75
        let mut state = PositionState::new();
        state.apply_entry_fill(&fill(dec!(100), dec!(50)));
        state.apply_scale_fill(&fill(dec!(90), dec!(50)), ScaleKind::Split);
        assert_eq!(state.avg_entry_price, Some(dec!(95)));

        state.apply_scale_fill(&fill(dec!(80), dec!(300)), ScaleKind::Split);
        assert_eq!(state.avg_entry_price, Some(dec!(83.75)));
        assert_eq!(state.contracts, dec!(400));
    }

    #[test]
    fn short_contracts_fold_with_absolute_weights() {
        let mut state = PositionState::new();
        state.apply_entry_fill(&fill(dec!(100), dec!(-100)));
        state.apply_scale_fill(&fill(dec!(110), dec!(-100)), ScaleKind::Split);

        assert_eq!(state.avg_entry_price, Some(dec!(105)));
        assert_eq!(state.contracts, dec!(-200));
    }

    #[test]
    fn full_close_resets_state() {
        let mut state = PositionState::new();
        state.apply_entry_fill(&fill(dec!(50000), dec!(0.002)));
        state.activate_trailing(dec!(10));

        let outcome = state.apply_close_fill(&fill(dec!(51000), dec!(-0.002)));
        assert_eq!(outcome, CloseOutcome::FullyClosed);
        assert!(!state.in_position);
        assert!(state.avg_entry_price.is_none());
        assert!(!state.trailing_active);
        assert_eq!(state.peak_unrealized_pnl, Decimal::ZERO);
    }

    #[test]
    fn partial_close_keeps_remaining_quantity() {
        let mut state = PositionState::new();
        state.apply_entry_fill(&fill(dec!(50000), dec!(0.004)));

        let outcome = state.apply_close_fill(&fill(dec!(51000), dec!(-0.003)));
        assert_eq!(
            outcome,
            CloseOutcome::PartiallyClosed {
                remaining: dec!(0.001)
            }
        );
        assert!(state.in_position);
        assert_eq!(state.contracts, dec!(0.001));
    }

    #[test]
    fn peak_only_moves_up() {
        let mut state = PositionState::new();
        state.activate_trailing(dec!(100));
        state.update_peak(dec!(90));
        assert_eq!(state.peak_unrealized_pnl, dec!(100));
        state.update_peak(dec!(120));
        assert_eq!(state.peak_unrealized_pnl, dec!(120));
    }
}
