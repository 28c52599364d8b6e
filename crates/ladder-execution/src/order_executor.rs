//! 주문 실행기.
//!
//! 전략 엔진의 [`OrderIntent`]를 거래소 시장가 주문으로 변환하고,
//! 짧은 대기 후 체결을 확인한 다음에만 포지션 상태에 반영합니다.
//! 체결 확인에 실패하면 상태를 추측으로 바꾸지 않고 실패로
//! 처리합니다 — 잘못 추측하면 내부 장부가 조용히 오염됩니다.

use std::sync::Arc;
use std::time::Duration;

use ladder_core::{
    liquidation_estimate, CloseOutcome, ExchangeError, FillEvent, FuturesExchange, OrderIntent,
    OrderPurpose, OrderRequest, PositionState, ScaleKind, StrategyConfig,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tracing::{error, info, warn};

/// 청산가 추정에 사용하는 기본 유지증거금율.
pub const DEFAULT_MAINTENANCE_MARGIN_RATE: Decimal = dec!(0.005);

// =============================================================================
// 설정 / 결과 타입
// =============================================================================

/// 주문 실행기 설정.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// 시장가 주문 후 체결 조회 전 대기 시간
    pub settle_delay: Duration,
    /// 청산 주문을 생략하는 최소 명목 금액 (이하이면 사실상 청산 완료로 간주)
    pub min_close_notional: Decimal,
    /// 거래소 호출별 타임아웃
    pub call_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            min_close_notional: dec!(0.01),
            call_timeout: Duration::from_secs(15),
        }
    }
}

/// 실행 건너뜀 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 청산 의도인데 보유 포지션 없음
    NotInPosition,
    /// 청산 명목 금액이 최소 기준 미만 (사실상 청산 완료)
    ClosingValueTooSmall,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInPosition => write!(f, "보유 포지션 없음"),
            Self::ClosingValueTooSmall => write!(f, "청산 금액이 최소 기준 미만"),
        }
    }
}

/// 실행 결과.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// 체결 완료, 상태 반영됨
    Filled {
        /// 주문 목적
        purpose: OrderPurpose,
        /// 반영된 체결 정보
        fill: FillEvent,
        /// 청산성 주문의 청산 결과
        close: Option<CloseOutcome>,
    },
    /// 주문 없이 건너뜀 (에러 아님, 상태는 사유에 따라 리셋될 수 있음)
    Skipped {
        /// 건너뜀 사유
        reason: SkipReason,
    },
}

/// 실행 에러.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// 거래소 호출 실패 — 이번 틱은 포기하고 다음 틱에 재평가
    #[error("거래소 에러: {0}")]
    Exchange(#[from] ExchangeError),

    /// 주문은 접수되었으나 체결 확인 실패.
    ///
    /// 청산 주문(`closing == true`)에서 발생하면 내부 장부와 거래소가
    /// 어긋났을 수 있는 치명 조건이므로 운영자의 거래소 측 수동 확인이
    /// 필요합니다.
    #[error("주문 {order_id} 체결 확인 실패 (closing: {closing}) — 상태 미반영")]
    FillUnconfirmed {
        /// 거래소 주문 ID
        order_id: String,
        /// 청산성 주문 여부
        closing: bool,
    },
}

// =============================================================================
// 주문 실행기
// =============================================================================

/// 주문 실행기 (Order Execution Coordinator).
///
/// 포지션 상태를 변경하는 유일한 경로입니다. 다른 어떤 컴포넌트도
/// 직접 주문을 내거나 상태를 수정하지 않습니다.
pub struct OrderExecutor {
    exchange: Arc<dyn FuturesExchange>,
    config: Arc<StrategyConfig>,
    executor_config: ExecutorConfig,
}

impl OrderExecutor {
    /// 새 실행기 생성.
    pub fn new(exchange: Arc<dyn FuturesExchange>, config: Arc<StrategyConfig>) -> Self {
        Self {
            exchange,
            config,
            executor_config: ExecutorConfig::default(),
        }
    }

    /// 실행기 설정과 함께 생성.
    pub fn with_executor_config(
        exchange: Arc<dyn FuturesExchange>,
        config: Arc<StrategyConfig>,
        executor_config: ExecutorConfig,
    ) -> Self {
        Self {
            exchange,
            config,
            executor_config,
        }
    }

    /// 거래소 호출에 호출별 타임아웃 적용.
    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ExchangeError>>,
    ) -> Result<T, ExchangeError> {
        tokio::time::timeout(self.executor_config.call_timeout, fut)
            .await
            .map_err(|_| {
                ExchangeError::Timeout(format!(
                    "거래소 호출이 {:?} 내에 끝나지 않음",
                    self.executor_config.call_timeout
                ))
            })?
    }

    /// 클라이언트 주문 ID 생성 (`{접두사}{목적}[-회차]`).
    fn client_order_id(&self, purpose: OrderPurpose, state: &PositionState) -> String {
        let prefix = self.config.normalized_order_id_prefix();
        match purpose {
            OrderPurpose::Split => format!("{prefix}{}-{}", purpose.as_str(), state.splits_filled + 1),
            OrderPurpose::Pyramid => {
                format!("{prefix}{}-{}", purpose.as_str(), state.pyramids_filled + 1)
            }
            _ => format!("{prefix}{}", purpose.as_str()),
        }
    }

    /// 주문 의도 실행.
    ///
    /// 청산성 의도의 금액은 항상 `|보유 계약| × 현재가`로 재계산하여 전체
    /// 포지션을 대상으로 합니다 — 호출자가 준 값은 사용하지 않습니다.
    ///
    /// # Errors
    ///
    /// - [`ExecutorError::Exchange`]: 거래소 호출 실패 (상태 미반영)
    /// - [`ExecutorError::FillUnconfirmed`]: 체결 확인 실패 (상태 미반영)
    pub async fn execute(
        &self,
        intent: &OrderIntent,
        state: &mut PositionState,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let purpose = intent.purpose;
        let is_closing = purpose.is_closing();

        let notional_usd = if is_closing {
            if !state.in_position {
                warn!(%purpose, "청산 의도인데 보유 포지션 없음, 건너뜀");
                return Ok(ExecutionOutcome::Skipped {
                    reason: SkipReason::NotInPosition,
                });
            }
            let last_price = self
                .call(self.exchange.fetch_last_price(&self.config.symbol))
                .await?;
            let value = state.abs_contracts() * last_price;
            if value < self.executor_config.min_close_notional {
                warn!(
                    %purpose,
                    notional = %value,
                    "청산 금액이 최소 기준 미만 — 사실상 청산 완료로 간주하고 상태 리셋"
                );
                state.reset();
                return Ok(ExecutionOutcome::Skipped {
                    reason: SkipReason::ClosingValueTooSmall,
                });
            }
            value
        } else {
            intent.notional_usd
        };

        let request = OrderRequest {
            symbol: self.config.symbol.clone(),
            side: intent.execution_side(self.config.direction),
            notional_usd,
            leverage: self.config.leverage,
            reduce_only: intent.reduce_only(),
            client_id: self.client_order_id(purpose, state),
        };

        let ack = self.call(self.exchange.place_order(&request)).await?;
        info!(
            %purpose,
            order_id = %ack.order_id,
            notional = %notional_usd,
            side = %request.side,
            reduce_only = request.reduce_only,
            "주문 접수됨"
        );

        // 시장가 체결 정보가 조회 경로에 반영될 시간을 잠시 줌
        tokio::time::sleep(self.executor_config.settle_delay).await;

        let status = self
            .call(self.exchange.fetch_order_status(&ack.order_id))
            .await?;
        if !status.has_fill() {
            error!(
                %purpose,
                order_id = %ack.order_id,
                "체결 정보 확인 실패 — 상태를 추측으로 갱신하지 않음"
            );
            return Err(ExecutorError::FillUnconfirmed {
                order_id: ack.order_id,
                closing: is_closing,
            });
        }
        let fill_price = status.fill_price.unwrap_or_default();

        let fill = FillEvent {
            price: fill_price,
            contracts: status.filled_contracts,
            usd_value: status.filled_contracts.abs() * fill_price,
        };

        let close = match purpose {
            OrderPurpose::Entry => {
                state.apply_entry_fill(&fill);
                self.log_risk_context(state);
                None
            }
            OrderPurpose::Split => {
                state.apply_scale_fill(&fill, ScaleKind::Split);
                self.log_risk_context(state);
                None
            }
            OrderPurpose::Pyramid => {
                state.apply_scale_fill(&fill, ScaleKind::Pyramid);
                self.log_risk_context(state);
                None
            }
            OrderPurpose::TakeProfit | OrderPurpose::StopLoss | OrderPurpose::EmergencyClose => {
                Some(state.apply_close_fill(&fill))
            }
        };

        Ok(ExecutionOutcome::Filled {
            purpose,
            fill,
            close,
        })
    }

    /// 진입성 체결 후 청산가 추정치를 로그로 남김.
    fn log_risk_context(&self, state: &PositionState) {
        let Some(avg_price) = state.avg_entry_price else {
            return;
        };
        match liquidation_estimate(
            state.collateral_usd,
            self.config.leverage,
            self.config.margin_mode,
            avg_price,
            self.config.direction,
            DEFAULT_MAINTENANCE_MARGIN_RATE,
        ) {
            Ok(estimate) => info!(
                liq_price = %estimate.liq_price,
                adverse_move_pct = %estimate.adverse_move_pct,
                cross_approx = estimate.cross_approximation,
                "청산가 추정"
            ),
            Err(e) => warn!(error = %e, "청산가 추정 불가"),
        }
    }
}

// =============================================================================
// 테스트
// =============================================================================
