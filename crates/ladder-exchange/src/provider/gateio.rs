//! Gate.io FuturesExchange 구현.
//!
//! [`GateioClient`]를 래핑하여 거래소 중립 인터페이스를 제공합니다.
//! 멱등한 조회성 호출은 빠른 재시도 설정으로 감싸고, 주문성 호출은
//! 절대 재시도하지 않습니다.

use std::sync::Arc;

use async_trait::async_trait;
use ladder_core::{
    Direction, ExchangeError, FuturesExchange, OrderAck, OrderRequest, OrderStatusReport,
    OrderStatusType, PositionReport,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::connector::gateio::client::{parse_decimal, GateOrderPayload, GateioClient};
use crate::retry::{with_retry, RetryConfig};

/// Gate.io USDT 무기한 선물 거래소.
pub struct GateioExchange {
    client: Arc<GateioClient>,
    read_retry: RetryConfig,
}

impl GateioExchange {
    /// 클라이언트로부터 생성.
    pub fn new(client: Arc<GateioClient>) -> Self {
        Self {
            client,
            read_retry: RetryConfig::fast(),
        }
    }

    /// 환경변수 설정으로 생성.
    pub fn from_env() -> Result<Self, ExchangeError> {
        Ok(Self::new(Arc::new(GateioClient::from_env()?)))
    }

    /// 주문 상태 문자열 매핑.
    fn map_status(status: &str, finish_as: Option<&str>) -> OrderStatusType {
        match status {
            "open" => OrderStatusType::Open,
            "finished" => match finish_as {
                Some("cancelled") | Some("liquidated") => OrderStatusType::Cancelled,
                _ => OrderStatusType::Finished,
            },
            other => {
                warn!(status = other, "알 수 없는 주문 상태, open으로 간주");
                OrderStatusType::Open
            }
        }
    }
}

#[async_trait]
impl FuturesExchange for GateioExchange {
    async fn fetch_last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let ticker = with_retry(&self.read_retry, || self.client.fetch_ticker(symbol)).await?;
        parse_decimal(&ticker.last, "last")
    }

    async fn fetch_position(
        &self,
        symbol: &str,
    ) -> Result<Option<PositionReport>, ExchangeError> {
        let raw = with_retry(&self.read_retry, || self.client.fetch_position_raw(symbol)).await?;
        let Some(position) = raw else {
            return Ok(None);
        };

        let multiplier = self.client.contract_multiplier(symbol).await?;
        let entry_price = match position.entry_price.as_deref() {
            Some(raw) if !raw.is_empty() => parse_decimal(raw, "entry_price")?,
            _ => Decimal::ZERO,
        };
        let margin = match position.margin.as_deref() {
            Some(raw) if !raw.is_empty() => parse_decimal(raw, "margin")?,
            _ => Decimal::ZERO,
        };
        let unrealized_pnl = match position.unrealised_pnl.as_deref() {
            Some(raw) if !raw.is_empty() => parse_decimal(raw, "unrealised_pnl")?,
            _ => Decimal::ZERO,
        };
        let liq_price = match position.liq_price.as_deref() {
            Some(raw) if !raw.is_empty() => {
                let value = parse_decimal(raw, "liq_price")?;
                (value > Decimal::ZERO).then_some(value)
            }
            _ => None,
        };

        Ok(Some(PositionReport {
            contracts: Decimal::from(position.size) * multiplier,
            entry_price,
            margin,
            unrealized_pnl,
            liq_price,
        }))
    }

    async fn fetch_available_balance(&self) -> Result<Decimal, ExchangeError> {
        let account = with_retry(&self.read_retry, || self.client.fetch_account()).await?;
        parse_decimal(&account.available, "available")
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        // 명목 금액 → 계약 수 변환 (현재가와 계약 단위 기준)
        let last_price =
            with_retry(&self.read_retry, || self.client.fetch_ticker(&request.symbol)).await?;
        let last_price = parse_decimal(&last_price.last, "last")?;
        let multiplier = self.client.contract_multiplier(&request.symbol).await?;

        let contract_value = last_price * multiplier;
        if contract_value <= Decimal::ZERO {
            return Err(ExchangeError::Parse(format!(
                "{} 계약 가치 계산 불가 (가격 {last_price})",
                request.symbol
            )));
        }
        let raw_size = request.notional_usd / contract_value;
        let unsigned_size = raw_size
            .trunc()
            .to_i64()
            .ok_or_else(|| ExchangeError::Parse(format!("계약 수 변환 실패: {raw_size}")))?;
        if unsigned_size == 0 {
            return Err(ExchangeError::OrderRejected(format!(
                "명목 금액 {}가 1계약 가치 {contract_value}보다 작습니다",
                request.notional_usd
            )));
        }
        let size = match request.side {
            Direction::Long => unsigned_size,
            Direction::Short => -unsigned_size,
        };

        // 진입성 주문은 주문 전 레버리지를 먼저 맞춰둠
        if !request.reduce_only {
            self.client
                .update_leverage(&request.symbol, request.leverage)
                .await?;
        }

        let payload = GateOrderPayload {
            contract: request.symbol.clone(),
            size,
            price: "0".to_string(),
            tif: "ioc".to_string(),
            reduce_only: request.reduce_only,
            close: false,
            text: request.client_id.clone(),
        };
        let order = self.client.create_order(&payload).await?;

        info!(
            symbol = %request.symbol,
            order_id = order.id,
            size,
            reduce_only = request.reduce_only,
            client_id = %request.client_id,
            "주문 접수"
        );

        Ok(OrderAck {
            order_id: order.id.to_string(),
            status: Self::map_status(&order.status, order.finish_as.as_deref()),
        })
    }

    async fn fetch_order_status(
        &self,
        order_id: &str,
    ) -> Result<OrderStatusReport, ExchangeError> {
        let order = with_retry(&self.read_retry, || self.client.fetch_order(order_id)).await?;
        let multiplier = self.client.contract_multiplier(&order.contract).await?;

        let filled_size = order.size - order.left;
        let fill_price = match order.fill_price.as_deref() {
            Some(raw) if !raw.is_empty() => {
                let value = parse_decimal(raw, "fill_price")?;
                (value > Decimal::ZERO).then_some(value)
            }
            _ => None,
        };

        Ok(OrderStatusReport {
            order_id: order.id.to_string(),
            status: Self::map_status(&order.status, order.finish_as.as_deref()),
            fill_price,
            filled_contracts: Decimal::from(filled_size) * multiplier,
        })
    }

    async fn close_all(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.client.close_position(symbol).await?;
        Ok(())
    }

    fn exchange_name(&self) -> &str {
        "Gate.io"
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            GateioExchange::map_status("open", None),
            OrderStatusType::Open
        );
        assert_eq!(
            GateioExchange::map_status("finished", Some("filled")),
            OrderStatusType::Finished
        );
        assert_eq!(
            GateioExchange::map_status("finished", Some("cancelled")),
            OrderStatusType::Cancelled
        );
    }
}
