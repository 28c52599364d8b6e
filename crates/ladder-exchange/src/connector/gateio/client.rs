//! Gate.io v4 선물 REST 클라이언트.
//!
//! USDT 정산 무기한 선물 API의 서명/요청/응답 처리를 담당합니다.
//! 거래소 중립 타입으로의 변환은 `provider::gateio`에서 수행합니다.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use ladder_core::ExchangeError;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tokio::sync::RwLock;
use tracing::{debug, warn};

type HmacSha512 = Hmac<Sha512>;

const LIVE_BASE_URL: &str = "https://api.gateio.ws";
const TESTNET_BASE_URL: &str = "https://fx-api-testnet.gateio.ws";
const FUTURES_PREFIX: &str = "/api/v4/futures/usdt";

// =============================================================================
// 설정
// =============================================================================

/// Gate.io 클라이언트 설정.
#[derive(Clone)]
pub struct GateioConfig {
    /// API 키
    pub api_key: String,
    /// API 시크릿
    pub api_secret: SecretString,
    /// API 베이스 URL (테스트에서 오버라이드 가능)
    pub base_url: String,
    /// HTTP 호출 타임아웃
    pub timeout: Duration,
}

impl std::fmt::Debug for GateioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateioConfig")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GateioConfig {
    /// 환경변수에서 설정 로드.
    ///
    /// `GATE_API_KEY` / `GATE_API_SECRET`는 필수이며, `GATE_ENV`가
    /// "live"(기본)가 아니면 테스트넷 베이스 URL을 사용합니다.
    pub fn from_env() -> Result<Self, ExchangeError> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var("GATE_API_KEY").map_err(|_| {
            ExchangeError::Unauthorized("GATE_API_KEY 환경변수가 설정되지 않았습니다".to_string())
        })?;
        let api_secret = std::env::var("GATE_API_SECRET").map_err(|_| {
            ExchangeError::Unauthorized(
                "GATE_API_SECRET 환경변수가 설정되지 않았습니다".to_string(),
            )
        })?;

        let base_url = match std::env::var("GATE_ENV").as_deref() {
            Ok("live") | Err(_) => LIVE_BASE_URL.to_string(),
            Ok(_) => TESTNET_BASE_URL.to_string(),
        };

        Ok(Self {
            api_key,
            api_secret: api_secret.into(),
            base_url,
            timeout: Duration::from_secs(10),
        })
    }
}

// =============================================================================
// API 응답 타입
// =============================================================================

/// 선물 티커.
#[derive(Debug, Clone, Deserialize)]
pub struct GateTicker {
    /// 계약 심볼
    pub contract: String,
    /// 최근 체결가
    pub last: String,
}

/// 선물 포지션.
#[derive(Debug, Clone, Deserialize)]
pub struct GatePosition {
    /// 계약 심볼
    pub contract: String,
    /// 계약 수 (정수, 롱 +, 숏 -)
    pub size: i64,
    /// 평균 진입가
    #[serde(default)]
    pub entry_price: Option<String>,
    /// 사용 중 증거금
    #[serde(default)]
    pub margin: Option<String>,
    /// 미실현 손익
    #[serde(default)]
    pub unrealised_pnl: Option<String>,
    /// 청산가
    #[serde(default)]
    pub liq_price: Option<String>,
}

/// 선물 계좌.
#[derive(Debug, Clone, Deserialize)]
pub struct GateAccount {
    /// 총 잔액
    pub total: String,
    /// 주문 가능 잔액
    pub available: String,
    /// 정산 통화
    pub currency: String,
}

/// 계약 메타데이터.
#[derive(Debug, Clone, Deserialize)]
pub struct GateContract {
    /// 계약 심볼
    pub name: String,
    /// 1계약당 기초자산 수량
    pub quanto_multiplier: String,
}

/// 선물 주문.
#[derive(Debug, Clone, Deserialize)]
pub struct GateOrder {
    /// 주문 ID
    pub id: i64,
    /// 계약 심볼
    pub contract: String,
    /// 주문 상태 ("open" | "finished")
    pub status: String,
    /// 요청 계약 수 (부호 있음)
    pub size: i64,
    /// 미체결 계약 수
    #[serde(default)]
    pub left: i64,
    /// 평균 체결가
    #[serde(default)]
    pub fill_price: Option<String>,
    /// 종료 사유 ("filled" | "cancelled" 등)
    #[serde(default)]
    pub finish_as: Option<String>,
}

/// 주문 생성 페이로드.
#[derive(Debug, Clone, Serialize)]
pub struct GateOrderPayload {
    /// 계약 심볼
    pub contract: String,
    /// 계약 수 (부호 있음, 청산 전용 주문은 0)
    pub size: i64,
    /// 가격 ("0" = 시장가)
    pub price: String,
    /// time-in-force (시장가는 "ioc")
    pub tif: String,
    /// reduce-only 여부
    pub reduce_only: bool,
    /// 포지션 종료 주문 여부 (size 0과 함께 사용)
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub close: bool,
    /// 클라이언트 주문 ID (`t-` 접두사 필수)
    pub text: String,
}

/// 에러 응답 바디.
#[derive(Debug, Deserialize)]
struct GateErrorBody {
    label: String,
    #[serde(default)]
    message: String,
}

// =============================================================================
// 클라이언트
// =============================================================================

/// Gate.io v4 선물 REST 클라이언트.
pub struct GateioClient {
    http: Client,
    config: GateioConfig,
    /// 계약별 quanto multiplier 캐시
    multipliers: RwLock<HashMap<String, Decimal>>,
}

impl GateioClient {
    /// 새 클라이언트 생성.
    pub fn new(config: GateioConfig) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExchangeError::Network(format!("HTTP 클라이언트 생성 실패: {e}")))?;
        Ok(Self {
            http,
            config,
            multipliers: RwLock::new(HashMap::new()),
        })
    }

    /// 환경변수 설정으로 클라이언트 생성.
    pub fn from_env() -> Result<Self, ExchangeError> {
        Self::new(GateioConfig::from_env()?)
    }

    /// Gate.io v4 요청 서명 생성.
    ///
    /// `HMAC-SHA512(secret, "{METHOD}\n{path}\n{query}\n{SHA512(body)}\n{ts}")`
    fn sign(
        &self,
        method: &str,
        path: &str,
        query: &str,
        body: &str,
        timestamp: &str,
    ) -> Result<String, ExchangeError> {
        let mut hasher = Sha512::new();
        hasher.update(body.as_bytes());
        let body_hash = hex::encode(hasher.finalize());

        let payload = format!("{method}\n{path}\n{query}\n{body_hash}\n{timestamp}");
        let mut mac = HmacSha512::new_from_slice(
            self.config.api_secret.expose_secret().as_bytes(),
        )
        .map_err(|e| ExchangeError::Unauthorized(format!("서명 키 초기화 실패: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// 서명된 요청 실행 및 응답 파싱.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ExchangeError> {
        let query_str = query.unwrap_or("");
        let body_str = match body {
            Some(value) => serde_json::to_string(value)
                .map_err(|e| ExchangeError::Parse(format!("요청 직렬화 실패: {e}")))?,
            None => String::new(),
        };
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(method.as_str(), path, query_str, &body_str, &timestamp)?;

        let mut url = format!("{}{}", self.config.base_url, path);
        if !query_str.is_empty() {
            url = format!("{url}?{query_str}");
        }

        let mut builder = self
            .http
            .request(method, &url)
            .header("KEY", &self.config.api_key)
            .header("Timestamp", &timestamp)
            .header("SIGN", signature)
            .header("Content-Type", "application/json");
        if !body_str.is_empty() {
            builder = builder.body(body_str);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::Timeout(format!("요청 타임아웃: {url}"))
            } else {
                ExchangeError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_error_response(status, retry_after_ms, &text));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Parse(format!("응답 파싱 실패: {e} — 바디: {text}")))
    }

    /// HTTP 에러 응답을 [`ExchangeError`]로 변환.
    fn map_error_response(
        status: StatusCode,
        retry_after_ms: Option<u64>,
        body: &str,
    ) -> ExchangeError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ExchangeError::RateLimited { retry_after_ms };
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return ExchangeError::Unauthorized(body.to_string());
        }

        match serde_json::from_str::<GateErrorBody>(body) {
            Ok(err) => match err.label.as_str() {
                "INSUFFICIENT_AVAILABLE" | "MARGIN_BALANCE_NOT_ENOUGH" => {
                    ExchangeError::InsufficientBalance(err.message)
                }
                "ORDER_SIZE_TOO_SMALL" | "SIZE_TOO_SMALL" | "ORDER_POC_IMMEDIATE" => {
                    ExchangeError::OrderRejected(err.message)
                }
                label => ExchangeError::Api {
                    code: label.to_string(),
                    message: err.message,
                },
            },
            Err(_) => ExchangeError::Api {
                code: status.as_u16().to_string(),
                message: body.to_string(),
            },
        }
    }

    // =========================================================================
    // 시세 / 계좌 / 포지션
    // =========================================================================

    /// 티커 조회.
    pub async fn fetch_ticker(&self, contract: &str) -> Result<GateTicker, ExchangeError> {
        let query = format!("contract={contract}");
        let tickers: Vec<GateTicker> = self
            .request(
                Method::GET,
                &format!("{FUTURES_PREFIX}/tickers"),
                Some(&query),
                None,
            )
            .await?;
        tickers
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Parse(format!("{contract} 티커 응답이 비어 있음")))
    }

    /// 단일 포지션 조회. 포지션이 없으면 `None`.
    pub async fn fetch_position_raw(
        &self,
        contract: &str,
    ) -> Result<Option<GatePosition>, ExchangeError> {
        let result: Result<GatePosition, ExchangeError> = self
            .request(
                Method::GET,
                &format!("{FUTURES_PREFIX}/positions/{contract}"),
                None,
                None,
            )
            .await;

        match result {
            Ok(position) if position.size == 0 => Ok(None),
            Ok(position) => Ok(Some(position)),
            Err(ExchangeError::Api { code, .. }) if code == "POSITION_NOT_FOUND" => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 선물 계좌 조회.
    pub async fn fetch_account(&self) -> Result<GateAccount, ExchangeError> {
        self.request(Method::GET, &format!("{FUTURES_PREFIX}/accounts"), None, None)
            .await
    }

    /// 계약의 quanto multiplier 조회 (캐시 사용).
    pub async fn contract_multiplier(&self, contract: &str) -> Result<Decimal, ExchangeError> {
        if let Some(multiplier) = self.multipliers.read().await.get(contract) {
            return Ok(*multiplier);
        }

        let meta: GateContract = self
            .request(
                Method::GET,
                &format!("{FUTURES_PREFIX}/contracts/{contract}"),
                None,
                None,
            )
            .await?;
        let multiplier = parse_decimal(&meta.quanto_multiplier, "quanto_multiplier")?;
        if multiplier <= Decimal::ZERO {
            return Err(ExchangeError::Parse(format!(
                "{contract} quanto_multiplier가 유효하지 않음: {multiplier}"
            )));
        }

        self.multipliers
            .write()
            .await
            .insert(contract.to_string(), multiplier);
        debug!(contract, %multiplier, "계약 multiplier 캐시 저장");
        Ok(multiplier)
    }

    // =========================================================================
    // 주문
    // =========================================================================

    /// 포지션 레버리지 설정.
    pub async fn update_leverage(
        &self,
        contract: &str,
        leverage: u32,
    ) -> Result<(), ExchangeError> {
        let query = format!("leverage={leverage}");
        let _: serde_json::Value = self
            .request(
                Method::POST,
                &format!("{FUTURES_PREFIX}/positions/{contract}/leverage"),
                Some(&query),
                None,
            )
            .await?;
        Ok(())
    }

    /// 주문 생성.
    pub async fn create_order(
        &self,
        payload: &GateOrderPayload,
    ) -> Result<GateOrder, ExchangeError> {
        let body = serde_json::to_value(payload)
            .map_err(|e| ExchangeError::Parse(format!("주문 직렬화 실패: {e}")))?;
        self.request(
            Method::POST,
            &format!("{FUTURES_PREFIX}/orders"),
            None,
            Some(&body),
        )
        .await
    }

    /// 주문 조회.
    pub async fn fetch_order(&self, order_id: &str) -> Result<GateOrder, ExchangeError> {
        self.request(
            Method::GET,
            &format!("{FUTURES_PREFIX}/orders/{order_id}"),
            None,
            None,
        )
        .await
    }

    /// 포지션 전량 시장가 청산 주문 (size 0 + close).
    pub async fn close_position(&self, contract: &str) -> Result<GateOrder, ExchangeError> {
        let payload = GateOrderPayload {
            contract: contract.to_string(),
            size: 0,
            price: "0".to_string(),
            tif: "ioc".to_string(),
            reduce_only: true,
            close: true,
            text: "t-ladderbot-close-all".to_string(),
        };
        let order = self.create_order(&payload).await?;
        warn!(contract, order_id = order.id, "전량 청산 주문 제출");
        Ok(order)
    }
}

/// 거래소 문자열 필드를 Decimal로 파싱.
pub(crate) fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, ExchangeError> {
    raw.parse::<Decimal>()
        .map_err(|e| ExchangeError::Parse(format!("{field} 파싱 실패 ('{raw}'): {e}")))
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn test_client(base_url: String) -> GateioClient {
        GateioClient::new(GateioConfig {
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string().into(),
            base_url,
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_ticker_parses_last_price() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/futures/usdt/tickers")
            .match_query(mockito::Matcher::UrlEncoded(
                "contract".into(),
                "BTC_USDT".into(),
            ))
            .match_header("KEY", "test-key")
            .with_status(200)
            .with_body(r#"[{"contract":"BTC_USDT","last":"50000.5"}]"#)
            .create_async()
            .await;

        let client = test_client(server.url());
        let ticker = client.fetch_ticker("BTC_USDT").await.unwrap();
        assert_eq!(
            parse_decimal(&ticker.last, "last").unwrap(),
            dec!(50000.5)
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn requests_carry_signature_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/futures/usdt/accounts")
            .match_header("KEY", "test-key")
            .match_header("SIGN", mockito::Matcher::Regex("^[0-9a-f]{128}$".into()))
            .match_header("Timestamp", mockito::Matcher::Regex(r"^\d+$".into()))
            .with_status(200)
            .with_body(r#"{"total":"1000","available":"900","currency":"USDT"}"#)
            .create_async()
            .await;

        let client = test_client(server.url());
        let account = client.fetch_account().await.unwrap();
        assert_eq!(parse_decimal(&account.available, "available").unwrap(), dec!(900));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_position_maps_to_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/futures/usdt/positions/BTC_USDT")
            .with_status(400)
            .with_body(r#"{"label":"POSITION_NOT_FOUND","message":"no position"}"#)
            .create_async()
            .await;

        let client = test_client(server.url());
        assert!(client.fetch_position_raw("BTC_USDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_size_position_maps_to_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/futures/usdt/positions/BTC_USDT")
            .with_status(200)
            .with_body(r#"{"contract":"BTC_USDT","size":0}"#)
            .create_async()
            .await;

        let client = test_client(server.url());
        assert!(client.fetch_position_raw("BTC_USDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rate_limit_maps_to_retryable_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/futures/usdt/accounts")
            .with_status(429)
            .with_header("Retry-After", "2")
            .with_body("rate limited")
            .create_async()
            .await;

        let client = test_client(server.url());
        let err = client.fetch_account().await.unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::RateLimited {
                retry_after_ms: Some(2000)
            }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn insufficient_balance_label_maps_to_fatal_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v4/futures/usdt/orders")
            .with_status(400)
            .with_body(r#"{"label":"INSUFFICIENT_AVAILABLE","message":"not enough"}"#)
            .create_async()
            .await;

        let client = test_client(server.url());
        let payload = GateOrderPayload {
            contract: "BTC_USDT".to_string(),
            size: 10,
            price: "0".to_string(),
            tif: "ioc".to_string(),
            reduce_only: false,
            close: false,
            text: "t-test".to_string(),
        };
        let err = client.create_order(&payload).await.unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientBalance(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn contract_multiplier_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/futures/usdt/contracts/BTC_USDT")
            .with_status(200)
            .with_body(r#"{"name":"BTC_USDT","quanto_multiplier":"0.0001"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(server.url());
        assert_eq!(
            client.contract_multiplier("BTC_USDT").await.unwrap(),
            dec!(0.0001)
        );
        // 두 번째 호출은 캐시를 사용해야 함
        assert_eq!(
            client.contract_multiplier("BTC_USDT").await.unwrap(),
            dec!(0.0001)
        );
        mock.assert_async().await;
    }
}
