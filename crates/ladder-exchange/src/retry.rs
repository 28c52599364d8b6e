//! 조회성 API 호출 재시도 유틸리티.
//!
//! 네트워크 오류, Rate Limit 등 일시적인 오류에 대해 지수 백오프
//! 재시도를 수행합니다. 주문 제출처럼 멱등하지 않은 호출에는 절대
//! 사용하지 않습니다 — 이중 제출 여부를 판별할 수 없기 때문입니다.
//!
//! # 예시
//!
//! ```rust,ignore
//! use ladder_exchange::retry::{with_retry, RetryConfig};
//!
//! let price = with_retry(&RetryConfig::fast(), || async {
//!     client.fetch_ticker("BTC_USDT").await
//! }).await?;
//! ```

use std::{future::Future, time::Duration};

use ladder_core::ExchangeError;
use tracing::{debug, warn};

/// 재시도 설정.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 최대 재시도 횟수 (초기 시도 제외)
    pub max_retries: u32,
    /// 기본 대기 시간 (에러에 지정된 대기 시간이 없을 때 사용)
    pub base_delay: Duration,
    /// 최대 대기 시간
    pub max_delay: Duration,
    /// 지수 백오프 배수
    pub backoff_multiplier: f64,
    /// 재시도 시 지터(무작위 지연) 추가 여부
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// 빠른 재시도 설정. 폴링 틱 안에서 끝나야 하는 조회에 사용합니다.
    pub fn fast() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// 재시도 없음 (단일 시도).
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// attempt 회차의 대기 시간 계산.
    fn delay_for(&self, attempt: u32, error: &ExchangeError) -> Duration {
        // 거래소가 지정한 대기 시간이 있으면 우선 사용
        let base = error
            .retry_delay_ms()
            .map(Duration::from_millis)
            .unwrap_or(self.base_delay);

        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay = Duration::from_secs_f64(base.as_secs_f64() * multiplier).min(self.max_delay);

        if self.add_jitter {
            // ±25% 지터
            let jitter_range = delay.as_millis() as f64 * 0.25;
            let jitter = (rand_unit() * 2.0 - 1.0) * jitter_range;
            Duration::from_millis((delay.as_millis() as f64 + jitter).max(0.0) as u64)
        } else {
            delay
        }
    }
}

/// 시스템 시간 기반 간이 난수 (0.0 ~ 1.0). 지터 용도로만 사용합니다.
fn rand_unit() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos) / f64::from(u32::MAX)
}

/// 재시도가 포함된 비동기 조회 실행.
///
/// 치명적 에러([`ExchangeError::is_fatal`])와 재시도 불가 에러는 즉시
/// 반환하고, 재시도 가능 에러만 설정 횟수까지 다시 시도합니다.
///
/// # Errors
///
/// 모든 재시도 소진 후 마지막 에러를 그대로 반환합니다.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, ExchangeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "재시도 후 성공");
                }
                return Ok(result);
            }
            Err(e) => {
                if e.is_fatal() {
                    warn!(error = %e, "치명적 에러, 재시도 없이 반환");
                    return Err(e);
                }
                if !e.is_retryable() {
                    debug!(error = %e, "재시도 불가능한 에러, 즉시 반환");
                    return Err(e);
                }
                if attempt >= config.max_retries {
                    warn!(
                        error = %e,
                        attempts = attempt + 1,
                        "최대 재시도 횟수 초과"
                    );
                    return Err(e);
                }

                let delay = config.delay_for(attempt, &e);
                warn!(
                    error = %e,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis(),
                    "재시도 대기"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// =============================================================================
// 테스트
// =============================================================================
