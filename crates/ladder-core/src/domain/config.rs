//! 전략 설정 타입 및 유효성 검사.
//!
//! 실행 단위(심볼 하나)마다 불변 설정 하나를 가지며, JSON 파일로
//! 저장/로드할 수 있습니다. 생성 시 유효성 검사는 첫 번째 위반에서
//! 멈추지 않고 모든 위반 사항을 한 번에 보고합니다.

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// =============================================================================
// 기본 열거형
// =============================================================================

/// 포지션 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 롱 (상승 베팅)
    Long,
    /// 숏 (하락 베팅)
    Short,
}

impl Direction {
    /// 반대 방향 반환. 청산 주문의 실행 방향 계산에 사용합니다.
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// 부호 계수 (롱 +1, 숏 -1).
    pub fn sign(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// 마진 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    /// 교차 마진
    Cross,
    /// 격리 마진
    Isolated,
}

// =============================================================================
// 설정 에러
// =============================================================================

/// 설정 유효성 검사 에러.
///
/// 발견된 모든 위반 사항을 담습니다. 하나라도 위반이 있으면
/// 전략 인스턴스는 생성되지 않습니다.
#[derive(Debug, Clone, Error)]
#[error("잘못된 설정 값:\n{}", .violations.iter().map(|v| format!("  - {v}")).collect::<Vec<_>>().join("\n"))]
pub struct ConfigError {
    /// 위반 사항 목록
    pub violations: Vec<String>,
}

// =============================================================================
// 전략 설정
// =============================================================================

/// 래더 전략 설정.
///
/// 분할매수(물타기) 래더, 피라미딩(불타기) 래더, 익절/손절/추적 익절,
/// 반복 실행 정책을 모두 담습니다. 퍼센트 값은 전부 레버리지 반영
/// 수익률(ROE, %) 기준입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    // ───────── 필수 거래 설정 ─────────
    /// 거래 방향
    pub direction: Direction,
    /// 계약 심볼 (예: "BTC_USDT")
    pub symbol: String,
    /// 레버리지 배수
    pub leverage: u32,
    /// 마진 모드
    pub margin_mode: MarginMode,

    // ───────── 자금 및 분할매수 설정 ─────────
    /// 첫 진입 시 사용할 가용 잔액 비율 (%)
    pub entry_pct_of_balance: Decimal,
    /// 최대 분할매수 횟수
    pub max_split_count: usize,
    /// 분할매수 트리거 ROE (%), 전부 음수
    #[serde(default)]
    pub split_trigger_pcts: Vec<Decimal>,
    /// 분할매수별 가용 잔액 비율 (%)
    #[serde(default)]
    pub split_amount_pcts: Vec<Decimal>,

    // ───────── 피라미딩 설정 ─────────
    /// 피라미딩 활성화 여부
    #[serde(default)]
    pub enable_pyramiding: bool,
    /// 최대 피라미딩 횟수
    #[serde(default)]
    pub pyramid_max_count: usize,
    /// 피라미딩 트리거 ROE (%), 전부 양수
    #[serde(default)]
    pub pyramid_trigger_pcts: Vec<Decimal>,
    /// 피라미딩별 가용 잔액 비율 (%)
    #[serde(default)]
    pub pyramid_amount_pcts: Vec<Decimal>,

    // ───────── 청산 전략 설정 ─────────
    /// 고정 익절 ROE (%)
    #[serde(default)]
    pub take_profit_pct: Option<Decimal>,
    /// 추적 익절 활성화 트리거 ROE (%)
    #[serde(default)]
    pub trailing_trigger_pct: Option<Decimal>,
    /// 추적 익절 고점 대비 허용 하락분 (%)
    #[serde(default)]
    pub trailing_offset_pct: Option<Decimal>,
    /// 손절 ROE (%), 양수로 지정 (-x%에서 발동)
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    /// 손절 기능 활성화 여부
    #[serde(default = "default_true")]
    pub enable_stop_loss: bool,

    // ───────── 운영 정책 ─────────
    /// 익절 후 재진입 반복 여부
    #[serde(default)]
    pub repeat_after_take_profit: bool,
    /// 손절 후 봇 정지 여부
    #[serde(default = "default_true")]
    pub stop_after_stop_loss: bool,
    /// 폴링 주기 (초)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// 클라이언트 주문 ID 접두사
    #[serde(default = "default_order_id_prefix")]
    pub order_id_prefix: String,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    10
}

fn default_order_id_prefix() -> String {
    "t-ladderbot-".to_string()
}

impl StrategyConfig {
    /// 유효성 검사.
    ///
    /// 모든 위반 사항을 수집하여 하나의 [`ConfigError`]로 반환합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.symbol.trim().is_empty() {
            errors.push("계약 심볼(symbol)이 비어 있습니다.".to_string());
        }
        if self.leverage == 0 {
            errors.push("레버리지(leverage)는 0보다 커야 합니다.".to_string());
        }
        if !(self.entry_pct_of_balance > Decimal::ZERO
            && self.entry_pct_of_balance <= Decimal::ONE_HUNDRED)
        {
            errors.push(
                "첫 진입 비율(entry_pct_of_balance)은 0보다 크고 100 이하여야 합니다.".to_string(),
            );
        }

        // 분할매수(물타기) 래더
        if self.split_trigger_pcts.len() != self.max_split_count {
            errors.push(format!(
                "분할매수 트리거 리스트 길이({})가 횟수({})와 일치해야 합니다.",
                self.split_trigger_pcts.len(),
                self.max_split_count
            ));
        } else if self.split_trigger_pcts.iter().any(|p| *p >= Decimal::ZERO) {
            errors
                .push("분할매수 트리거는 모두 0보다 작은 음수여야 합니다 (예: -2.5).".to_string());
        }
        if self.split_amount_pcts.len() != self.max_split_count {
            errors.push(format!(
                "분할매수 금액 비율 리스트 길이({})가 횟수({})와 일치해야 합니다.",
                self.split_amount_pcts.len(),
                self.max_split_count
            ));
        } else if self
            .split_amount_pcts
            .iter()
            .any(|p| !(*p > Decimal::ZERO && *p <= Decimal::ONE_HUNDRED))
        {
            errors.push("분할매수 금액 비율은 모두 0보다 크고 100 이하여야 합니다.".to_string());
        }

        // 피라미딩(불타기) 래더
        if self.enable_pyramiding {
            if self.pyramid_max_count == 0 {
                errors.push("피라미딩 횟수(pyramid_max_count)는 0보다 커야 합니다.".to_string());
            }
            if self.pyramid_trigger_pcts.len() != self.pyramid_max_count {
                errors.push(format!(
                    "피라미딩 트리거 리스트 길이({})가 횟수({})와 일치해야 합니다.",
                    self.pyramid_trigger_pcts.len(),
                    self.pyramid_max_count
                ));
            } else if self.pyramid_trigger_pcts.iter().any(|p| *p <= Decimal::ZERO) {
                errors.push(
                    "피라미딩 트리거는 모두 0보다 큰 양수여야 합니다 (예: 2.5).".to_string(),
                );
            }
            if self.pyramid_amount_pcts.len() != self.pyramid_max_count {
                errors.push(format!(
                    "피라미딩 금액 비율 리스트 길이({})가 횟수({})와 일치해야 합니다.",
                    self.pyramid_amount_pcts.len(),
                    self.pyramid_max_count
                ));
            } else if self
                .pyramid_amount_pcts
                .iter()
                .any(|p| !(*p > Decimal::ZERO && *p <= Decimal::ONE_HUNDRED))
            {
                errors
                    .push("피라미딩 금액 비율은 모두 0보다 크고 100 이하여야 합니다.".to_string());
            }
        }

        // 청산 전략
        if let Some(tp) = self.take_profit_pct {
            if tp <= Decimal::ZERO {
                errors.push("고정 익절 퍼센트는 0보다 커야 합니다.".to_string());
            }
        }
        if let Some(sl) = self.stop_loss_pct {
            if sl <= Decimal::ZERO {
                errors.push("손절 퍼센트는 0보다 커야 합니다.".to_string());
            }
        }
        if let Some(trigger) = self.trailing_trigger_pct {
            if trigger <= Decimal::ZERO {
                errors.push("추적 익절 트리거 수익률은 0보다 커야 합니다.".to_string());
            }
        }
        if let Some(offset) = self.trailing_offset_pct {
            if offset <= Decimal::ZERO {
                errors.push("추적 익절 하락분(offset)은 0보다 커야 합니다.".to_string());
            }
        }
        // 추적 익절은 트리거와 하락분이 쌍으로 지정되어야 합니다.
        if self.trailing_trigger_pct.is_some() != self.trailing_offset_pct.is_some() {
            errors.push(
                "추적 익절은 trailing_trigger_pct와 trailing_offset_pct를 함께 지정해야 합니다."
                    .to_string(),
            );
        }
        if self.enable_pyramiding && self.trailing_trigger_pct.is_none() {
            errors.push("피라미딩은 추적 익절 트리거가 설정된 경우에만 사용할 수 있습니다.".to_string());
        }

        if self.poll_interval_secs == 0 {
            errors.push("폴링 주기(poll_interval_secs)는 0보다 커야 합니다.".to_string());
        }

        if errors.is_empty() {
            debug!(symbol = %self.symbol, "전략 설정 유효성 검사 통과");
            Ok(())
        } else {
            Err(ConfigError { violations: errors })
        }
    }

    /// 추적 익절 쌍 반환 (트리거, 하락분).
    pub fn trailing_pair(&self) -> Option<(Decimal, Decimal)> {
        match (self.trailing_trigger_pct, self.trailing_offset_pct) {
            (Some(trigger), Some(offset)) => Some((trigger, offset)),
            _ => None,
        }
    }

    /// 거래소 규격(`t-` 접두사)에 맞춘 클라이언트 주문 ID 접두사.
    pub fn normalized_order_id_prefix(&self) -> String {
        if self.order_id_prefix.starts_with("t-") {
            self.order_id_prefix.clone()
        } else {
            format!("t-{}", self.order_id_prefix.trim_start_matches("t-"))
        }
    }

    /// JSON 파일에서 설정 로드 후 유효성 검사.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError {
            violations: vec![format!("설정 파일 읽기 실패 ({}): {e}", path.display())],
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError {
            violations: vec![format!("설정 파일 파싱 실패 ({}): {e}", path.display())],
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 현재 설정을 JSON 파일로 저장.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError {
                violations: vec![format!("설정 디렉토리 생성 실패 ({}): {e}", parent.display())],
            })?;
        }
        let raw = serde_json::to_string_pretty(self).map_err(|e| ConfigError {
            violations: vec![format!("설정 직렬화 실패: {e}")],
        })?;
        std::fs::write(path, raw).map_err(|e| ConfigError {
            violations: vec![format!("설정 파일 저장 실패 ({}): {e}", path.display())],
        })
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn base_config() -> StrategyConfig {
        StrategyConfig {
            direction: Direction::Long,
            symbol: "BTC_USDT".to_string(),
            leverage: 10,
            margin_mode: MarginMode::Isolated,
            entry_pct_of_balance: dec!(10),
            max_split_count: 3,
            split_trigger_pcts: vec![dec!(-2), dec!(-4), dec!(-6)],
            split_amount_pcts: vec![dec!(12), dec!(14), dec!(16)],
            enable_pyramiding: false,
            pyramid_max_count: 0,
            pyramid_trigger_pcts: vec![],
            pyramid_amount_pcts: vec![],
            take_profit_pct: Some(dec!(3)),
            trailing_trigger_pct: None,
            trailing_offset_pct: None,
            stop_loss_pct: Some(dec!(4)),
            enable_stop_loss: true,
            repeat_after_take_profit: true,
            stop_after_stop_loss: false,
            poll_interval_secs: 10,
            order_id_prefix: "t-ladderbot-".to_string(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn split_ladder_length_and_sign_enforced() {
        let mut config = base_config();
        config.split_trigger_pcts = vec![dec!(-2), dec!(4)]; // 길이 불일치 + 양수 트리거
        config.split_amount_pcts = vec![dec!(12)];

        let err = config.validate().unwrap_err();
        assert!(err.violations.iter().any(|v| v.contains("트리거 리스트 길이")));
        assert!(err.violations.iter().any(|v| v.contains("금액 비율 리스트 길이")));
    }

    #[test]
    fn negative_trigger_required_for_splits() {
        let mut config = base_config();
        config.split_trigger_pcts = vec![dec!(-2), dec!(0), dec!(-6)];

        let err = config.validate().unwrap_err();
        assert!(err.violations.iter().any(|v| v.contains("음수")));
    }

    #[test]
    fn all_violations_reported_together() {
        let mut config = base_config();
        config.leverage = 0;
        config.entry_pct_of_balance = dec!(0);
        config.poll_interval_secs = 0;
        config.take_profit_pct = Some(dec!(-1));

        let err = config.validate().unwrap_err();
        assert!(err.violations.len() >= 4, "violations: {:?}", err.violations);
    }

    #[test]
    fn pyramiding_requires_trailing_trigger() {
        let mut config = base_config();
        config.enable_pyramiding = true;
        config.pyramid_max_count = 2;
        config.pyramid_trigger_pcts = vec![dec!(2), dec!(4)];
        config.pyramid_amount_pcts = vec![dec!(10), dec!(10)];

        let err = config.validate().unwrap_err();
        assert!(err.violations.iter().any(|v| v.contains("추적 익절")));

        config.trailing_trigger_pct = Some(dec!(4));
        config.trailing_offset_pct = Some(dec!(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn trailing_pair_must_be_complete() {
        let mut config = base_config();
        config.trailing_trigger_pct = Some(dec!(4));

        let err = config.validate().unwrap_err();
        assert!(err.violations.iter().any(|v| v.contains("함께 지정")));
    }

    #[test]
    fn order_id_prefix_is_normalized() {
        let mut config = base_config();
        config.order_id_prefix = "mybot-".to_string();
        assert_eq!(config.normalized_order_id_prefix(), "t-mybot-");

        config.order_id_prefix = "t-mybot-".to_string();
        assert_eq!(config.normalized_order_id_prefix(), "t-mybot-");
    }

    #[test]
    fn json_round_trip() {
        let config = base_config();
        let raw = serde_json::to_string(&config).unwrap();
        let parsed: StrategyConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.symbol, config.symbol);
        assert_eq!(parsed.split_trigger_pcts, config.split_trigger_pcts);
        assert!(parsed.validate().is_ok());
    }
}
