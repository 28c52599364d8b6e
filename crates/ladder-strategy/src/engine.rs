//! 포지션 라이프사이클 상태 기계.
//!
//! 틱마다 정합성 판정을 받아온 뒤 고정된 우선순위로 단 하나의 행동만
//! 결정합니다: 추적 익절 활성화 → 고정 익절 → 추적 익절 청산 → 손절 →
//! 분할매수 → 피라미딩 → 보류. 각 단계가 `else if`로 묶여 있어 같은
//! 가격 샘플에서 두 행동이 동시에 나가는 일이 없습니다.
//!
//! [`PositionState`]는 이 엔진(정확히는 엔진이 호출하는 주문 실행기)만
//! 수정하며, 외부에는 틱마다 스냅샷([`TickReport`])만 내보냅니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ladder_core::{
    ExchangeError, FuturesExchange, OrderIntent, OrderPurpose, PositionReport, PositionState,
    StrategyConfig, QTY_EPSILON,
};
use ladder_execution::{
    reconcile, ExecutionOutcome, ExecutorError, OrderExecutor, ReconciliationVerdict,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::ladder::{next_pyramid_rung, next_split_rung};

/// 추적 익절 청산 기준선의 하한 (USD).
///
/// offset이 커서 기준선이 0 이하로 내려가더라도 이 값 밑으로는 내려가지
/// 않습니다.
pub const MIN_TRAILING_FLOOR_USD: Decimal = dec!(0.01);

/// 거래소 호출별 타임아웃.
const CALL_TIMEOUT: Duration = Duration::from_secs(15);

// =============================================================================
// 틱 보고 타입
// =============================================================================

/// 한 틱의 결정.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TickDecision {
    /// 조건 미충족, 보유 유지
    Hold,
    /// 체결 반영 대기 — 아무것도 하지 않음
    AwaitConfirmation,
    /// 진입 주문 체결
    Entered,
    /// 분할매수 회차 발동
    SplitFired {
        /// 발동한 회차 (0부터)
        rung: usize,
    },
    /// 추적 익절 활성화
    TrailingActivated {
        /// 피라미딩 0회차 동시 발동 여부
        pyramid_fired: bool,
    },
    /// 피라미딩 회차 발동
    PyramidFired {
        /// 발동한 회차 (0부터)
        rung: usize,
    },
    /// 익절 청산 (고정 또는 추적)
    TookProfit,
    /// 손절 청산
    StoppedOut,
    /// 전략 종료 (반복 꺼짐, 손절 후 정지 등)
    Terminated {
        /// 종료 사유
        reason: String,
    },
    /// 이번 틱 실행 실패 — 상태 미반영, 다음 틱에 재평가
    Failed {
        /// 실패 사유
        reason: String,
    },
}

/// 틱마다 내보내는 상태 스냅샷.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// 틱 시각
    pub timestamp: DateTime<Utc>,
    /// 이번 틱의 결정
    pub decision: TickDecision,
    /// 정합성 판정 (판정 전 실패 시 None)
    pub verdict: Option<ReconciliationVerdict>,
    /// 내부 포지션 상태 스냅샷
    pub position: PositionState,
    /// 거래소 기준 ROE (%)
    pub roe_pct: Option<Decimal>,
}

// =============================================================================
// 상태 기계
// =============================================================================

/// 포지션 라이프사이클 상태 기계.
pub struct StrategyEngine {
    config: Arc<StrategyConfig>,
    exchange: Arc<dyn FuturesExchange>,
    executor: OrderExecutor,
    state: PositionState,
    /// 최초 진입을 이미 시도/완료했는지 여부 (반복 정책 적용 기준)
    entered_once: bool,
    stopped: bool,
}

impl StrategyEngine {
    /// 새 엔진 생성.
    pub fn new(config: Arc<StrategyConfig>, exchange: Arc<dyn FuturesExchange>) -> Self {
        let executor = OrderExecutor::new(exchange.clone(), config.clone());
        Self::with_executor(config, exchange, executor)
    }

    /// 실행기를 직접 지정하여 생성 (테스트에서 체결 대기 시간 단축용).
    pub fn with_executor(
        config: Arc<StrategyConfig>,
        exchange: Arc<dyn FuturesExchange>,
        executor: OrderExecutor,
    ) -> Self {
        Self {
            config,
            exchange,
            executor,
            state: PositionState::new(),
            entered_once: false,
            stopped: false,
        }
    }

    /// 전략 종료 여부 (루프 탈출 조건).
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// 내부 상태 스냅샷.
    pub fn state(&self) -> &PositionState {
        &self.state
    }

    /// 전략 설정.
    pub fn config(&self) -> &Arc<StrategyConfig> {
        &self.config
    }

    /// 거래소 호출에 호출별 타임아웃 적용.
    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ExchangeError>>,
    ) -> Result<T, ExchangeError> {
        tokio::time::timeout(CALL_TIMEOUT, fut)
            .await
            .map_err(|_| {
                ExchangeError::Timeout(format!("거래소 호출이 {CALL_TIMEOUT:?} 내에 끝나지 않음"))
            })?
    }

    fn report(
        &self,
        decision: TickDecision,
        verdict: Option<ReconciliationVerdict>,
        roe_pct: Option<Decimal>,
    ) -> TickReport {
        TickReport {
            timestamp: Utc::now(),
            decision,
            verdict,
            position: self.state.clone(),
            roe_pct,
        }
    }

    /// 한 틱 실행.
    ///
    /// 틱당 최대 하나의 주문만 실행하며, 체결 반영이 끝난 뒤에야
    /// 반환합니다 (다음 틱은 항상 반영된 상태를 읽음).
    pub async fn tick(&mut self) -> TickReport {
        let exchange_report = match self
            .call(self.exchange.fetch_position(&self.config.symbol))
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "포지션 조회 실패 — 이번 틱 보류");
                return self.report(
                    TickDecision::Failed {
                        reason: format!("포지션 조회 실패: {e}"),
                    },
                    None,
                    None,
                );
            }
        };

        let verdict = reconcile(&self.state, exchange_report.as_ref());
        match verdict.clone() {
            ReconciliationVerdict::AwaitingConfirmation => {
                info!("거래소 반영 대기 중 — 이번 틱은 아무것도 하지 않음");
                self.report(TickDecision::AwaitConfirmation, Some(verdict), None)
            }
            ReconciliationVerdict::ExchangeConfirmsFlat => self.on_flat(verdict).await,
            ReconciliationVerdict::ExchangeConfirmsInPosition(report) => {
                self.on_in_position(verdict, report).await
            }
        }
    }

    /// 플랫 확정 상태 처리: 최초 진입 또는 반복 정책에 따른 재진입.
    async fn on_flat(&mut self, verdict: ReconciliationVerdict) -> TickReport {
        if self.entered_once && !self.config.repeat_after_take_profit {
            self.stopped = true;
            info!("포지션 종료 확인, 반복 실행 꺼짐 — 전략 종료");
            return self.report(
                TickDecision::Terminated {
                    reason: "반복 실행 비활성화".to_string(),
                },
                Some(verdict),
                None,
            );
        }

        if self.entered_once {
            info!("포지션 없음 — 반복 설정에 따라 재진입 시도");
        } else {
            info!(direction = %self.config.direction, symbol = %self.config.symbol, "최초 진입 시도");
        }

        match self.fire_opening(OrderPurpose::Entry, self.config.entry_pct_of_balance).await {
            Ok(()) => {
                self.entered_once = true;
                self.report(TickDecision::Entered, Some(verdict), None)
            }
            Err(reason) => self.report(TickDecision::Failed { reason }, Some(verdict), None),
        }
    }

    /// 보유 확정 상태 처리: 고정 우선순위로 단 하나의 행동 결정.
    async fn on_in_position(
        &mut self,
        verdict: ReconciliationVerdict,
        exchange_position: PositionReport,
    ) -> TickReport {
        // 재시작 등으로 내부가 플랫이면 거래소 값을 기준으로 채택
        if !self.state.in_position {
            warn!(
                contracts = %exchange_position.contracts,
                entry_price = %exchange_position.entry_price,
                "내부 상태가 플랫인데 거래소가 보유 확인 — 거래소 값으로 상태 채택"
            );
            self.state.avg_entry_price = Some(exchange_position.entry_price);
            self.state.contracts = exchange_position.contracts;
            self.state.collateral_usd = exchange_position.margin;
            self.state.in_position = true;
            self.entered_once = true;
        }

        let Some(roe) = exchange_position.roe_pct() else {
            warn!("거래소 증거금이 0 — ROE 계산 불가, 보류");
            return self.report(TickDecision::Hold, Some(verdict), None);
        };

        // (a) 추적 익절 활성화 (+피라미딩 0회차 즉시 발동)
        if !self.state.trailing_active {
            if let Some((trigger, _)) = self.config.trailing_pair() {
                if roe >= trigger {
                    self.state.activate_trailing(exchange_position.unrealized_pnl);
                    info!(
                        roe = %roe,
                        peak = %exchange_position.unrealized_pnl,
                        "추적 익절 활성화"
                    );

                    let mut pyramid_fired = false;
                    if self.config.enable_pyramiding && self.state.pyramids_filled == 0 {
                        match self.fire_pyramid(0).await {
                            Ok(()) => pyramid_fired = true,
                            Err(reason) => {
                                warn!(reason = %reason, "피라미딩 0회차 실행 실패 — 다음 틱에 재평가")
                            }
                        }
                    }
                    return self.report(
                        TickDecision::TrailingActivated { pyramid_fired },
                        Some(verdict),
                        Some(roe),
                    );
                }
            }
        }

        // (b) 고정 익절 (추적 익절 미사용/비활성 시)
        if !self.state.trailing_active {
            if let Some(take_profit) = self.config.take_profit_pct {
                if roe >= take_profit {
                    info!(roe = %roe, threshold = %take_profit, "고정 익절 조건 충족");
                    return match self.fire_close(OrderPurpose::TakeProfit).await {
                        Ok(()) => self.report(TickDecision::TookProfit, Some(verdict), Some(roe)),
                        Err(reason) => {
                            self.report(TickDecision::Failed { reason }, Some(verdict), Some(roe))
                        }
                    };
                }
            }
        }

        // (c) 추적 익절 고점 갱신 및 청산 판정
        if self.state.trailing_active {
            self.state.update_peak(exchange_position.unrealized_pnl);
            if let Some((_, offset)) = self.config.trailing_pair() {
                let floor = (self.state.peak_unrealized_pnl
                    * (Decimal::ONE - offset / Decimal::ONE_HUNDRED))
                    .max(MIN_TRAILING_FLOOR_USD);
                if exchange_position.unrealized_pnl <= floor {
                    info!(
                        peak = %self.state.peak_unrealized_pnl,
                        floor = %floor,
                        current = %exchange_position.unrealized_pnl,
                        "추적 익절 청산 조건 충족"
                    );
                    return match self.fire_close(OrderPurpose::TakeProfit).await {
                        Ok(()) => self.report(TickDecision::TookProfit, Some(verdict), Some(roe)),
                        Err(reason) => {
                            self.report(TickDecision::Failed { reason }, Some(verdict), Some(roe))
                        }
                    };
                }
            }
        }

        // (d) 손절
        if self.config.enable_stop_loss {
            if let Some(stop_loss) = self.config.stop_loss_pct {
                let threshold = -stop_loss;
                if roe <= threshold {
                    warn!(roe = %roe, threshold = %threshold, "손절 조건 충족");
                    return match self.fire_close(OrderPurpose::StopLoss).await {
                        Ok(()) => {
                            if self.config.stop_after_stop_loss {
                                self.stopped = true;
                                info!("손절 후 정지 설정에 따라 전략 종료");
                            }
                            self.report(TickDecision::StoppedOut, Some(verdict), Some(roe))
                        }
                        Err(reason) => {
                            self.report(TickDecision::Failed { reason }, Some(verdict), Some(roe))
                        }
                    };
                }
            }
        }

        // (e) 분할매수 래더
        if let Some(rung) =
            next_split_rung(&self.config.split_trigger_pcts, self.state.splits_filled, roe)
        {
            info!(rung, roe = %roe, "분할매수 회차 발동");
            let pct = self.config.split_amount_pcts[rung];
            return match self.fire_opening(OrderPurpose::Split, pct).await {
                Ok(()) => self.report(TickDecision::SplitFired { rung }, Some(verdict), Some(roe)),
                Err(reason) => {
                    self.report(TickDecision::Failed { reason }, Some(verdict), Some(roe))
                }
            };
        }

        // (f) 피라미딩 래더 (추적 익절 활성 시에만)
        if self.state.trailing_active && self.config.enable_pyramiding {
            if let Some(rung) = next_pyramid_rung(
                &self.config.pyramid_trigger_pcts,
                self.state.pyramids_filled,
                roe,
            ) {
                info!(rung, roe = %roe, "피라미딩 회차 발동");
                return match self.fire_pyramid(rung).await {
                    Ok(()) => {
                        self.report(TickDecision::PyramidFired { rung }, Some(verdict), Some(roe))
                    }
                    Err(reason) => {
                        self.report(TickDecision::Failed { reason }, Some(verdict), Some(roe))
                    }
                };
            }
        }

        // (g) 보류
        self.report(TickDecision::Hold, Some(verdict), Some(roe))
    }

    /// 진입성 주문 실행 (가용 잔액 × 비율).
    async fn fire_opening(&mut self, purpose: OrderPurpose, pct: Decimal) -> Result<(), String> {
        let balance = self
            .call(self.exchange.fetch_available_balance())
            .await
            .map_err(|e| format!("잔고 조회 실패: {e}"))?;
        let notional = balance * pct / Decimal::ONE_HUNDRED;
        let intent = OrderIntent::opening(purpose, notional);
        self.run_executor(&intent).await
    }

    /// 피라미딩 회차 실행.
    async fn fire_pyramid(&mut self, rung: usize) -> Result<(), String> {
        let pct = *self
            .config
            .pyramid_amount_pcts
            .get(rung)
            .ok_or_else(|| format!("피라미딩 회차 {rung} 금액 비율 없음"))?;
        self.fire_opening(OrderPurpose::Pyramid, pct).await
    }

    /// 청산성 주문 실행.
    async fn fire_close(&mut self, purpose: OrderPurpose) -> Result<(), String> {
        let intent = OrderIntent::closing(purpose);
        self.run_executor(&intent).await
    }

    /// 실행기 호출 및 에러 분류.
    ///
    /// 청산 주문의 체결 확인 실패는 내부 장부와 거래소가 어긋났을 수 있는
    /// 치명 조건이므로 전략을 정지시키고 운영자 확인을 요구합니다.
    async fn run_executor(&mut self, intent: &OrderIntent) -> Result<(), String> {
        match self.executor.execute(intent, &mut self.state).await {
            Ok(ExecutionOutcome::Filled { .. }) => Ok(()),
            Ok(ExecutionOutcome::Skipped { reason }) => {
                info!(%reason, purpose = %intent.purpose, "주문 건너뜀");
                Ok(())
            }
            Err(ExecutorError::FillUnconfirmed { order_id, closing }) if closing => {
                self.stopped = true;
                error!(
                    order_id = %order_id,
                    "청산 주문 체결 확인 실패 — 전략 정지, 거래소에서 포지션을 직접 확인하세요"
                );
                Err(format!("청산 주문 {order_id} 체결 확인 실패 (치명)"))
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// 종료 시 최선 노력 청산.
    ///
    /// 내부 또는 거래소 확인 상태에 열린 포지션이 있으면 긴급 청산을
    /// 시도합니다. 실행기 경로가 실패하면 거래소의 전량 청산 API로
    /// 폴백합니다.
    pub async fn emergency_unwind(&mut self) {
        warn!(symbol = %self.config.symbol, "종료 신호 — 최종 포지션 정리 시도");

        if self.state.in_position {
            let intent = OrderIntent::closing(OrderPurpose::EmergencyClose);
            match self.executor.execute(&intent, &mut self.state).await {
                Ok(ExecutionOutcome::Filled { .. }) => {
                    info!("긴급 청산 완료");
                    return;
                }
                Ok(ExecutionOutcome::Skipped { reason }) => {
                    info!(%reason, "긴급 청산 생략");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "긴급 청산 주문 실패 — close_all 폴백");
                    if let Err(e) = self.call(self.exchange.close_all(&self.config.symbol)).await {
                        error!(error = %e, "close_all 폴백 실패 — 거래소에서 직접 확인 필요");
                    }
                    return;
                }
            }
        }

        // 내부는 플랫이어도 거래소에 잔여 포지션이 있으면 정리
        match self
            .call(self.exchange.fetch_position(&self.config.symbol))
            .await
        {
            Ok(Some(report)) if report.contracts.abs() >= QTY_EPSILON => {
                warn!(
                    contracts = %report.contracts,
                    "내부 플랫인데 거래소 포지션 존재 — close_all 실행"
                );
                if let Err(e) = self.call(self.exchange.close_all(&self.config.symbol)).await {
                    error!(error = %e, "close_all 실패 — 거래소에서 직접 확인 필요");
                }
            }
            Ok(_) => info!("정리할 포지션 없음"),
            Err(e) => warn!(error = %e, "종료 전 포지션 확인 실패 — 거래소에서 직접 확인 필요"),
        }
    }
}
