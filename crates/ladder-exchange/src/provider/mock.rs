//! 테스트용 스크립트 거래소.
//!
//! 시장가 주문을 현재가에 즉시 체결시키고, 체결 결과를 내부 포지션
//! 모델에 반영합니다. `report_lag`를 설정하면 포지션 조회 경로가
//! 체결보다 늦게 갱신되는 거래소의 최종 일관성 동작을 재현할 수
//! 있습니다 (체결 직후 N회의 조회는 이전 스냅샷을 반환).

use std::collections::HashMap;

use async_trait::async_trait;
use ladder_core::{
    Direction, ExchangeError, FuturesExchange, OrderAck, OrderRequest, OrderStatusReport,
    OrderStatusType, PositionReport, QTY_EPSILON,
};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MockState {
    last_price: Decimal,
    available_balance: Decimal,
    /// 체결 즉시 반영되는 실제 포지션
    actual: Option<PositionReport>,
    /// 조회 경로에 보이는 포지션 (지연 반영)
    visible: Option<PositionReport>,
    /// visible이 actual을 따라잡기 전까지 남은 조회 횟수
    lag_calls: usize,
    /// 포지션 변경마다 적용할 조회 지연 횟수
    report_lag: usize,
    orders: HashMap<String, OrderStatusReport>,
    placed: Vec<OrderRequest>,
    close_all_calls: Vec<String>,
    next_order_id: u64,
    fail_place_order: Option<ExchangeError>,
    omit_fill_confirmation: bool,
}

/// 스크립트 가능한 Mock 거래소.
#[derive(Debug, Default)]
pub struct MockFuturesExchange {
    state: Mutex<MockState>,
}

impl MockFuturesExchange {
    /// 초기 시세/잔고로 생성.
    pub fn new(last_price: Decimal, available_balance: Decimal) -> Self {
        Self {
            state: Mutex::new(MockState {
                last_price,
                available_balance,
                next_order_id: 1,
                ..Default::default()
            }),
        }
    }

    /// 현재가 설정.
    pub async fn set_last_price(&self, price: Decimal) {
        self.state.lock().await.last_price = price;
    }

    /// 가용 잔고 설정.
    pub async fn set_available_balance(&self, balance: Decimal) {
        self.state.lock().await.available_balance = balance;
    }

    /// 포지션 변경 후 조회 경로가 이전 스냅샷을 반환할 횟수 설정.
    pub async fn set_report_lag(&self, lag: usize) {
        self.state.lock().await.report_lag = lag;
    }

    /// 실제 포지션과 조회 스냅샷을 모두 지정값으로 교체.
    pub async fn set_position_report(&self, report: Option<PositionReport>) {
        let mut state = self.state.lock().await;
        state.actual = report.clone();
        state.visible = report;
        state.lag_calls = 0;
    }

    /// 현재 포지션의 증거금/미실현 손익 덮어쓰기 (ROE 시나리오 구동용).
    pub async fn override_position_pnl(&self, margin: Decimal, unrealized_pnl: Decimal) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        for slot in [&mut state.actual, &mut state.visible] {
            if let Some(position) = slot.as_mut() {
                position.margin = margin;
                position.unrealized_pnl = unrealized_pnl;
            }
        }
    }

    /// 다음 주문 제출을 지정 에러로 실패시킴.
    pub async fn fail_next_place_order(&self, error: ExchangeError) {
        self.state.lock().await.fail_place_order = Some(error);
    }

    /// 주문 체결 확인 생략 여부 설정 (체결 확인 실패 경로 재현).
    pub async fn set_omit_fill_confirmation(&self, omit: bool) {
        self.state.lock().await.omit_fill_confirmation = omit;
    }

    /// 지금까지 접수된 주문 요청 목록.
    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().await.placed.clone()
    }

    /// close_all 호출 기록.
    pub async fn close_all_calls(&self) -> Vec<String> {
        self.state.lock().await.close_all_calls.clone()
    }

    /// 현재 실제 포지션 스냅샷.
    pub async fn actual_position(&self) -> Option<PositionReport> {
        self.state.lock().await.actual.clone()
    }
}

impl MockState {
    /// 체결된 주문을 실제 포지션에 반영.
    fn apply_fill(&mut self, request: &OrderRequest, fill_contracts: Decimal, price: Decimal) {
        if request.reduce_only {
            if let Some(position) = self.actual.as_mut() {
                position.contracts += fill_contracts;
                if position.contracts.abs() < QTY_EPSILON {
                    self.actual = None;
                }
            }
        } else {
            let margin_add = request.notional_usd / Decimal::from(request.leverage.max(1));
            match self.actual.as_mut() {
                Some(position) => {
                    let prev_abs = position.contracts.abs();
                    let add_abs = fill_contracts.abs();
                    let total_abs = prev_abs + add_abs;
                    if total_abs > Decimal::ZERO {
                        position.entry_price = (position.entry_price * prev_abs
                            + price * add_abs)
                            / total_abs;
                    }
                    position.contracts += fill_contracts;
                    position.margin += margin_add;
                }
                None => {
                    self.actual = Some(PositionReport {
                        contracts: fill_contracts,
                        entry_price: price,
                        margin: margin_add,
                        unrealized_pnl: Decimal::ZERO,
                        liq_price: None,
                    });
                }
            }
        }
        // 조회 경로는 report_lag회 동안 이전 스냅샷을 유지
        self.lag_calls = self.report_lag;
        if self.lag_calls == 0 {
            self.visible = self.actual.clone();
        }
    }
}

#[async_trait]
impl FuturesExchange for MockFuturesExchange {
    async fn fetch_last_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.state.lock().await.last_price)
    }

    async fn fetch_position(
        &self,
        _symbol: &str,
    ) -> Result<Option<PositionReport>, ExchangeError> {
        let mut state = self.state.lock().await;
        if state.lag_calls > 0 {
            state.lag_calls -= 1;
            Ok(state.visible.clone())
        } else {
            state.visible = state.actual.clone();
            Ok(state.visible.clone())
        }
    }

    async fn fetch_available_balance(&self) -> Result<Decimal, ExchangeError> {
        Ok(self.state.lock().await.available_balance)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.fail_place_order.take() {
            return Err(error);
        }

        state.placed.push(request.clone());
        let order_id = state.next_order_id.to_string();
        state.next_order_id += 1;

        let price = state.last_price;
        if price <= Decimal::ZERO {
            return Err(ExchangeError::Api {
                code: "NO_PRICE".to_string(),
                message: "mock 시세가 설정되지 않았습니다".to_string(),
            });
        }

        let unsigned = request.notional_usd / price;
        let fill_contracts = match request.side {
            Direction::Long => unsigned,
            Direction::Short => -unsigned,
        };

        let report = if state.omit_fill_confirmation {
            OrderStatusReport {
                order_id: order_id.clone(),
                status: OrderStatusType::Open,
                fill_price: None,
                filled_contracts: Decimal::ZERO,
            }
        } else {
            state.apply_fill(request, fill_contracts, price);
            OrderStatusReport {
                order_id: order_id.clone(),
                status: OrderStatusType::Finished,
                fill_price: Some(price),
                filled_contracts: fill_contracts,
            }
        };
        let ack_status = report.status;
        state.orders.insert(order_id.clone(), report);

        Ok(OrderAck {
            order_id,
            status: ack_status,
        })
    }

    async fn fetch_order_status(
        &self,
        order_id: &str,
    ) -> Result<OrderStatusReport, ExchangeError> {
        self.state
            .lock()
            .await
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::Api {
                code: "ORDER_NOT_FOUND".to_string(),
                message: format!("주문 없음: {order_id}"),
            })
    }

    async fn close_all(&self, symbol: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().await;
        state.close_all_calls.push(symbol.to_string());
        state.actual = None;
        state.visible = None;
        state.lag_calls = 0;
        Ok(())
    }

    fn exchange_name(&self) -> &str {
        "MockExchange"
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn open_request(notional: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: "BTC_USDT".to_string(),
            side: Direction::Long,
            notional_usd: notional,
            leverage: 10,
            reduce_only: false,
            client_id: "t-test-entry".to_string(),
        }
    }

    #[tokio::test]
    async fn order_fills_at_last_price_and_updates_position() {
        let mock = MockFuturesExchange::new(dec!(50000), dec!(1000));

        let ack = mock.place_order(&open_request(dec!(100))).await.unwrap();
        let status = mock.fetch_order_status(&ack.order_id).await.unwrap();
        assert_eq!(status.status, OrderStatusType::Finished);
        assert_eq!(status.fill_price, Some(dec!(50000)));
        assert_eq!(status.filled_contracts, dec!(0.002));

        let position = mock.fetch_position("BTC_USDT").await.unwrap().unwrap();
        assert_eq!(position.contracts, dec!(0.002));
        assert_eq!(position.entry_price, dec!(50000));
        assert_eq!(position.margin, dec!(10));
    }

    #[tokio::test]
    async fn report_lag_returns_stale_snapshot() {
        let mock = MockFuturesExchange::new(dec!(50000), dec!(1000));
        mock.set_report_lag(2).await;

        mock.place_order(&open_request(dec!(100))).await.unwrap();

        // 지연 2회 동안은 이전 스냅샷(플랫)을 반환
        assert!(mock.fetch_position("BTC_USDT").await.unwrap().is_none());
        assert!(mock.fetch_position("BTC_USDT").await.unwrap().is_none());
        // 이후 실제 포지션이 보임
        assert!(mock.fetch_position("BTC_USDT").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reduce_only_fill_closes_position() {
        let mock = MockFuturesExchange::new(dec!(50000), dec!(1000));
        mock.place_order(&open_request(dec!(100))).await.unwrap();

        let close = OrderRequest {
            symbol: "BTC_USDT".to_string(),
            side: Direction::Short,
            notional_usd: dec!(100),
            leverage: 10,
            reduce_only: true,
            client_id: "t-test-close".to_string(),
        };
        mock.place_order(&close).await.unwrap();

        assert!(mock.actual_position().await.is_none());
    }

    #[tokio::test]
    async fn omitted_fill_confirmation_leaves_position_unchanged() {
        let mock = MockFuturesExchange::new(dec!(50000), dec!(1000));
        mock.set_omit_fill_confirmation(true).await;

        let ack = mock.place_order(&open_request(dec!(100))).await.unwrap();
        let status = mock.fetch_order_status(&ack.order_id).await.unwrap();
        assert!(!status.has_fill());
        assert!(mock.actual_position().await.is_none());
    }
}
