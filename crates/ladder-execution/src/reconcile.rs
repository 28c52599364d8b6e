//! 내부 상태와 거래소 보고의 정합성 판정.
//!
//! 거래소 포지션 조회 경로는 체결 직후 잠시 이전 상태를 반환할 수
//! 있습니다 (최종 일관성). 이 모듈은 내부 추적 상태와 거래소 보고를
//! 대조하여 "정말 플랫인지 / 정말 보유 중인지 / 반영 대기 중인지"를
//! 판정합니다.

use ladder_core::{PositionReport, PositionState, QTY_EPSILON};
use serde::Serialize;

/// 틱마다 계산되는 정합성 판정 결과.
#[derive(Debug, Clone, Serialize)]
pub enum ReconciliationVerdict {
    /// 거래소·내부 모두 플랫 확인
    ExchangeConfirmsFlat,
    /// 거래소가 포지션 보유를 확인 (거래소 값이 기준)
    ExchangeConfirmsInPosition(PositionReport),
    /// 내부는 보유 중인데 거래소 조회는 플랫 — 체결 반영 지연 상태.
    /// 청산 완료로 해석하거나 재진입해서는 안 되며, 다음 틱까지
    /// 보류해야 합니다.
    AwaitingConfirmation,
}

impl ReconciliationVerdict {
    /// 로그 출력용 간단 라벨.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ExchangeConfirmsFlat => "flat",
            Self::ExchangeConfirmsInPosition(_) => "in_position",
            Self::AwaitingConfirmation => "awaiting_confirmation",
        }
    }
}

/// 내부 상태와 거래소 포지션 보고를 대조하여 판정.
///
/// - 거래소가 0이 아닌 수량을 보고하면 보유 확정 — 거래소 값이 이후
///   표시/판단의 기준이 됩니다.
/// - 거래소가 플랫을 보고하고 내부도 플랫이면 플랫 확정.
/// - 거래소가 플랫을 보고하는데 내부가 보유 중이면 반영 대기.
///   내부 상태를 플랫으로 되돌릴 수 있는 것은 확인된 청산 주문
///   체결뿐입니다 (주문 실행기 담당).
pub fn reconcile(
    state: &PositionState,
    report: Option<&PositionReport>,
) -> ReconciliationVerdict {
    match report {
        Some(position) if position.contracts.abs() >= QTY_EPSILON => {
            ReconciliationVerdict::ExchangeConfirmsInPosition(position.clone())
        }
        _ => {
            if state.in_position {
                ReconciliationVerdict::AwaitingConfirmation
            } else {
                ReconciliationVerdict::ExchangeConfirmsFlat
            }
        }
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use ladder_core::FillEvent;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;

    fn report(contracts: Decimal) -> PositionReport {
        PositionReport {
            contracts,
            entry_price: dec!(50000),
            margin: dec!(10),
            unrealized_pnl: dec!(0.5),
            liq_price: None,
        }
    }

    fn in_position_state() -> PositionState {
        let mut state = PositionState::new();
        state.apply_entry_fill(&FillEvent {
            price: dec!(50000),
            contracts: dec!(0.002),
            usd_value: dec!(100),
        });
        state
    }

    #[test]
    fn nonzero_report_confirms_in_position() {
        let verdict = reconcile(&in_position_state(), Some(&report(dec!(0.002))));
        assert!(matches!(
            verdict,
            ReconciliationVerdict::ExchangeConfirmsInPosition(_)
        ));
    }

    #[test]
    fn exchange_report_wins_even_when_internal_is_flat() {
        // 재시작 직후 등 내부가 플랫이어도 거래소 보고가 우선
        let verdict = reconcile(&PositionState::new(), Some(&report(dec!(0.002))));
        assert!(matches!(
            verdict,
            ReconciliationVerdict::ExchangeConfirmsInPosition(_)
        ));
    }

    #[test]
    fn both_flat_confirms_flat() {
        let verdict = reconcile(&PositionState::new(), None);
        assert!(matches!(verdict, ReconciliationVerdict::ExchangeConfirmsFlat));
    }

    #[test]
    fn zero_size_report_is_treated_as_flat_report() {
        let verdict = reconcile(&PositionState::new(), Some(&report(Decimal::ZERO)));
        assert!(matches!(verdict, ReconciliationVerdict::ExchangeConfirmsFlat));
    }

    #[test]
    fn internal_position_with_flat_report_awaits_confirmation() {
        let verdict = reconcile(&in_position_state(), None);
        assert!(matches!(
            verdict,
            ReconciliationVerdict::AwaitingConfirmation
        ));
    }

    #[test]
    fn roe_uses_exchange_margin_and_pnl() {
        let position = report(dec!(0.002));
        // 0.5 / 10 * 100 = 5%
        assert_eq!(position.roe_pct(), Some(dec!(5)));

        let mut broke = position.clone();
        broke.margin = Decimal::ZERO;
        assert_eq!(broke.roe_pct(), None);
    }
}
