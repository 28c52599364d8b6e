//! 선물 거래소 추상화.
//!
//! 전략 코어가 소비하는 거래소 중립 인터페이스입니다. 실제 커넥터는
//! `ladder-exchange` 크레이트에서 이 trait을 구현합니다.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::Direction;

// =============================================================================
// 에러 타입
// =============================================================================

/// 거래소 연동 에러.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// 네트워크 연결 실패
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 호출 타임아웃
    #[error("요청 타임아웃: {0}")]
    Timeout(String),

    /// 요청 한도 초과
    #[error("Rate limit 초과")]
    RateLimited {
        /// 거래소가 지정한 재시도 대기 시간 (밀리초)
        retry_after_ms: Option<u64>,
    },

    /// 인증 실패
    #[error("인증 실패: {0}")]
    Unauthorized(String),

    /// 거래소 API 에러
    #[error("API 에러 [{code}]: {message}")]
    Api {
        /// 거래소 에러 코드/라벨
        code: String,
        /// 에러 메시지
        message: String,
    },

    /// 응답 파싱 실패
    #[error("파싱 에러: {0}")]
    Parse(String),

    /// 잔고 부족
    #[error("잔고 부족: {0}")]
    InsufficientBalance(String),

    /// 주문 거부 (최소 수량 미달 등)
    #[error("주문 거부: {0}")]
    OrderRejected(String),

    /// 지원하지 않는 기능
    #[error("지원하지 않는 기능: {0}")]
    NotSupported(String),
}

impl ExchangeError {
    /// 재시도해도 성공할 가능성이 있는 에러인지 여부.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. }
        )
    }

    /// 재시도 자체가 무의미한 치명적 에러인지 여부.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::InsufficientBalance(_) | Self::NotSupported(_)
        )
    }

    /// 에러에 지정된 재시도 대기 시간 (밀리초).
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

// =============================================================================
// 거래소 보고 타입
// =============================================================================

/// 거래소가 보고한 포지션 현황.
///
/// 한 번 확인된 거래소 값은 내부 추정치보다 우선합니다. 수수료/펀딩이
/// 이미 반영된 미실현 손익과 증거금은 ROE 계산의 유일한 입력입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionReport {
    /// 부호 있는 계약 수량 (롱 +, 숏 -)
    pub contracts: Decimal,
    /// 거래소 기준 평균 진입가
    pub entry_price: Decimal,
    /// 사용 중 증거금 (USD)
    pub margin: Decimal,
    /// 미실현 손익 (USD)
    pub unrealized_pnl: Decimal,
    /// 거래소가 보고한 청산가 (제공 시)
    pub liq_price: Option<Decimal>,
}

impl PositionReport {
    /// 레버리지 반영 수익률 (ROE, %).
    ///
    /// 거래소가 보고한 증거금과 미실현 손익만으로 계산합니다. 내부 평균
    /// 단가로 재계산하지 않습니다 — 수수료/펀딩이 반영된 거래소 값이
    /// 유일한 기준입니다. 증거금이 0 이하이면 `None`.
    pub fn roe_pct(&self) -> Option<Decimal> {
        if self.margin > Decimal::ZERO {
            Some(self.unrealized_pnl / self.margin * Decimal::ONE_HUNDRED)
        } else {
            None
        }
    }
}

/// 주문 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatusType {
    /// 미체결/대기
    Open,
    /// 체결 완료
    Finished,
    /// 취소됨
    Cancelled,
}

/// 거래소 주문 요청.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// 계약 심볼
    pub symbol: String,
    /// 실행 방향
    pub side: Direction,
    /// 명목 금액 (USD)
    pub notional_usd: Decimal,
    /// 레버리지 배수
    pub leverage: u32,
    /// reduce-only 여부
    pub reduce_only: bool,
    /// 클라이언트 주문 ID
    pub client_id: String,
}

/// 주문 접수 응답.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    /// 거래소 주문 ID
    pub order_id: String,
    /// 접수 시점 상태
    pub status: OrderStatusType,
}

/// 주문 상태 조회 응답.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusReport {
    /// 거래소 주문 ID
    pub order_id: String,
    /// 주문 상태
    pub status: OrderStatusType,
    /// 평균 체결가 (체결 전이면 None)
    pub fill_price: Option<Decimal>,
    /// 부호 있는 체결 수량
    pub filled_contracts: Decimal,
}

impl OrderStatusReport {
    /// 체결 정보가 확인 가능한 상태인지 여부.
    pub fn has_fill(&self) -> bool {
        self.fill_price.is_some() && self.filled_contracts.abs() > Decimal::ZERO
    }
}

// =============================================================================
// FuturesExchange Trait
// =============================================================================

/// USDT 무기한 선물 거래소 인터페이스.
///
/// 모든 호출은 일시적으로 실패할 수 있습니다. 코어는 주문성 호출을
/// 내부에서 재시도하지 않으며 (이중 제출 위험), 실패한 틱은 다음 틱에서
/// 조건을 재평가합니다. 멱등한 조회성 호출의 재시도는 커넥터 계층의
/// 몫입니다.
///
/// # 구현 예시
///
/// ```ignore
/// pub struct GateioExchange {
///     client: Arc<GateioClient>,
/// }
///
/// #[async_trait]
/// impl FuturesExchange for GateioExchange {
///     async fn fetch_last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
///         // Gate.io ticker 조회 및 변환
///     }
///     // ... 나머지 메서드 구현
/// }
/// ```
#[async_trait]
pub trait FuturesExchange: Send + Sync {
    /// 최근 체결가 조회.
    ///
    /// # Errors
    ///
    /// - `ExchangeError::Network`: 네트워크 연결 실패
    /// - `ExchangeError::Api`: 거래소 API 에러
    /// - `ExchangeError::Parse`: 응답 파싱 실패
    async fn fetch_last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// 포지션 현황 조회.
    ///
    /// # Returns
    ///
    /// 포지션이 없으면 `None`. 거래소 조회 경로는 체결 직후 잠시 이전
    /// 상태를 반환할 수 있으므로, `None`을 곧바로 "청산 완료"로 해석해서는
    /// 안 됩니다 (정합성 판정은 `ladder-execution`의 reconcile 담당).
    ///
    /// # Errors
    ///
    /// - `ExchangeError::Network`: 네트워크 연결 실패
    /// - `ExchangeError::Unauthorized`: 인증 실패
    /// - `ExchangeError::Api`: 거래소 API 에러
    async fn fetch_position(&self, symbol: &str)
        -> Result<Option<PositionReport>, ExchangeError>;

    /// 주문 가능 잔액 조회 (USD).
    ///
    /// # Errors
    ///
    /// - `ExchangeError::Network`: 네트워크 연결 실패
    /// - `ExchangeError::Unauthorized`: 인증 실패
    async fn fetch_available_balance(&self) -> Result<Decimal, ExchangeError>;

    /// 시장가 주문 제출.
    ///
    /// # Errors
    ///
    /// - `ExchangeError::InsufficientBalance`: 잔고 부족
    /// - `ExchangeError::OrderRejected`: 최소 수량 미달 등 거래소 거부
    /// - `ExchangeError::Network`: 네트워크 연결 실패
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    /// 주문 상태 조회.
    ///
    /// # Errors
    ///
    /// - `ExchangeError::Api`: 존재하지 않는 주문
    /// - `ExchangeError::Network`: 네트워크 연결 실패
    async fn fetch_order_status(&self, order_id: &str)
        -> Result<OrderStatusReport, ExchangeError>;

    /// 해당 심볼의 포지션 전량 시장가 청산.
    ///
    /// 긴급 청산 경로 전용입니다. 전략별 내부 상태와 무관하게 거래소
    /// 포지션을 기준으로 동작합니다.
    ///
    /// # Errors
    ///
    /// - `ExchangeError::Network`: 네트워크 연결 실패
    /// - `ExchangeError::Api`: 거래소 API 에러
    async fn close_all(&self, symbol: &str) -> Result<(), ExchangeError>;

    /// 거래소 이름. 로깅 용도입니다.
    fn exchange_name(&self) -> &str;
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn retryable_and_fatal_classification() {
        assert!(ExchangeError::Network("끊김".to_string()).is_retryable());
        assert!(ExchangeError::Timeout("10s".to_string()).is_retryable());
        assert!(ExchangeError::RateLimited {
            retry_after_ms: Some(500)
        }
        .is_retryable());

        assert!(ExchangeError::Unauthorized("키 오류".to_string()).is_fatal());
        assert!(ExchangeError::InsufficientBalance("부족".to_string()).is_fatal());

        let api = ExchangeError::Api {
            code: "INVALID_PARAM".to_string(),
            message: "잘못된 파라미터".to_string(),
        };
        assert!(!api.is_retryable());
        assert!(!api.is_fatal());
    }

    #[test]
    fn rate_limit_carries_retry_delay() {
        let err = ExchangeError::RateLimited {
            retry_after_ms: Some(1500),
        };
        assert_eq!(err.retry_delay_ms(), Some(1500));
        assert_eq!(
            ExchangeError::Network("x".to_string()).retry_delay_ms(),
            None
        );
    }

    /// 테스트용 MockProvider.
    struct MockProvider {
        should_fail: bool,
    }

    #[async_trait]
    impl FuturesExchange for MockProvider {
        async fn fetch_last_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
            if self.should_fail {
                return Err(ExchangeError::Network("mock 네트워크 에러".to_string()));
            }
            Ok(dec!(50000))
        }

        async fn fetch_position(
            &self,
            _symbol: &str,
        ) -> Result<Option<PositionReport>, ExchangeError> {
            if self.should_fail {
                return Err(ExchangeError::Api {
                    code: "MOCK".to_string(),
                    message: "mock API 에러".to_string(),
                });
            }
            Ok(None)
        }

        async fn fetch_available_balance(&self) -> Result<Decimal, ExchangeError> {
            Ok(dec!(1000))
        }

        async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
            Ok(OrderAck {
                order_id: format!("mock-{}", request.client_id),
                status: OrderStatusType::Finished,
            })
        }

        async fn fetch_order_status(
            &self,
            order_id: &str,
        ) -> Result<OrderStatusReport, ExchangeError> {
            Ok(OrderStatusReport {
                order_id: order_id.to_string(),
                status: OrderStatusType::Finished,
                fill_price: Some(dec!(50000)),
                filled_contracts: dec!(0.002),
            })
        }

        async fn close_all(&self, _symbol: &str) -> Result<(), ExchangeError> {
            Ok(())
        }

        fn exchange_name(&self) -> &str {
            "MockProvider"
        }
    }

    #[tokio::test]
    async fn trait_object_dispatch_works() {
        let provider: Box<dyn FuturesExchange> = Box::new(MockProvider { should_fail: false });

        assert_eq!(provider.exchange_name(), "MockProvider");
        assert_eq!(provider.fetch_last_price("BTC_USDT").await.unwrap(), dec!(50000));
        assert!(provider.fetch_position("BTC_USDT").await.unwrap().is_none());
        assert_eq!(provider.fetch_available_balance().await.unwrap(), dec!(1000));
    }

    #[tokio::test]
    async fn trait_errors_propagate() {
        let provider = MockProvider { should_fail: true };

        assert!(matches!(
            provider.fetch_last_price("BTC_USDT").await,
            Err(ExchangeError::Network(_))
        ));
        assert!(matches!(
            provider.fetch_position("BTC_USDT").await,
            Err(ExchangeError::Api { .. })
        ));
    }

    #[test]
    fn order_status_fill_detection() {
        let mut report = OrderStatusReport {
            order_id: "1".to_string(),
            status: OrderStatusType::Finished,
            fill_price: Some(dec!(50000)),
            filled_contracts: dec!(0.002),
        };
        assert!(report.has_fill());

        report.fill_price = None;
        assert!(!report.has_fill());

        report.fill_price = Some(dec!(50000));
        report.filled_contracts = Decimal::ZERO;
        assert!(!report.has_fill());
    }
}
