//! LadderQuant 트레이딩 봇 CLI.
//!
//! JSON 설정 파일로 전략을 실행하고, stdin의 `stop` 명령 또는 Ctrl-C로
//! 긴급 청산 후 종료합니다. 대화형 설정 프롬프트는 제공하지 않습니다 —
//! 설정은 파일로 관리합니다.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ladder_core::{liquidation_estimate, Direction, FuturesExchange, MarginMode, StrategyConfig};
use ladder_exchange::GateioExchange;
use ladder_execution::DEFAULT_MAINTENANCE_MARGIN_RATE;
use ladder_strategy::{StrategyEngine, StrategyRunner, TickReport};
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ladder-trader")]
#[command(about = "Gate.io USDT 무기한 선물 래더 트레이딩 봇", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// JSON 설정 파일로 전략 실행
    Run {
        /// 전략 설정 파일 경로
        #[arg(short, long)]
        config: PathBuf,

        /// 종료 시 워커 합류 제한 시간 (초)
        #[arg(long, default_value = "30")]
        join_timeout_secs: u64,
    },

    /// API 연결 및 기본 조회 확인 (실제 거래 없음)
    Check {
        /// 확인에 사용할 계약 심볼
        #[arg(long, default_value = "BTC_USDT")]
        symbol: String,
    },

    /// 청산가 추정 계산기 (오프라인)
    Liq {
        /// 투입 원금 (USD)
        #[arg(long)]
        collateral: Decimal,

        /// 레버리지 배수
        #[arg(long)]
        leverage: u32,

        /// 평균 진입가
        #[arg(long)]
        entry_price: Decimal,

        /// 방향 (long/short)
        #[arg(long, default_value = "long")]
        direction: String,

        /// 마진 모드 (cross/isolated)
        #[arg(long, default_value = "isolated")]
        margin_mode: String,

        /// 유지증거금율
        #[arg(long, default_value = "0.005")]
        maintenance_margin_rate: Decimal,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "ladder_cli={0},ladder_core={0},ladder_exchange={0},ladder_execution={0},ladder_strategy={0}",
                    cli.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Run {
            config,
            join_timeout_secs,
        } => run_strategy(config, Duration::from_secs(join_timeout_secs)).await,
        Commands::Check { symbol } => check_connection(&symbol).await,
        Commands::Liq {
            collateral,
            leverage,
            entry_price,
            direction,
            margin_mode,
            maintenance_margin_rate,
        } => print_liquidation(
            collateral,
            leverage,
            entry_price,
            &direction,
            &margin_mode,
            maintenance_margin_rate,
        ),
    }
}

/// 전략 실행: 워커 스폰 → 틱 상태 로그 → 취소 트리거 대기 → 종료 합류.
async fn run_strategy(config_path: PathBuf, join_timeout: Duration) -> anyhow::Result<()> {
    let config = StrategyConfig::load(&config_path)?;
    log_config_summary(&config);

    let config = Arc::new(config);
    let exchange = Arc::new(GateioExchange::from_env()?);
    tracing::info!(exchange = exchange.exchange_name(), "거래소 연결 준비 완료");

    let engine = StrategyEngine::new(config.clone(), exchange);
    let handle = StrategyRunner::new(engine).spawn();

    // 틱 상태 로그
    let mut status_rx = handle.subscribe();
    let status_config = config.clone();
    let status_task = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let report = status_rx.borrow_and_update().clone();
            if let Some(report) = report {
                log_tick_report(&status_config, &report);
            }
        }
    });

    // stdin `stop` 명령 → 같은 취소 토큰
    let stdin_token = handle.cancellation_token();
    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().eq_ignore_ascii_case("stop") {
                tracing::warn!("stop 명령 수신 — 포지션 정리 후 종료합니다");
                stdin_token.cancel();
                break;
            }
            println!("   (종료하려면 'stop'을 입력하세요)");
        }
    });

    tracing::info!("전략이 백그라운드에서 실행 중입니다. 종료: 'stop' 입력 또는 Ctrl-C");

    // Ctrl-C / 취소 / 자연 종료 대기
    let token = handle.cancellation_token();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Ctrl-C 수신 — 포지션 정리 후 종료합니다");
                token.cancel();
                break;
            }
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                if handle.is_finished() {
                    break;
                }
            }
        }
    }

    let result = handle.shutdown(join_timeout).await;
    status_task.abort();
    stdin_task.abort();

    match result {
        Ok(()) => {
            tracing::info!("전략 종료 완료");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "워커 종료 비정상 — 거래소에서 포지션을 직접 확인하세요");
            Err(e.into())
        }
    }
}

/// 설정 요약 로그 (실행 직전 확인용).
fn log_config_summary(config: &StrategyConfig) {
    tracing::info!(
        symbol = %config.symbol,
        direction = %config.direction,
        leverage = config.leverage,
        margin_mode = ?config.margin_mode,
        entry_pct = %config.entry_pct_of_balance,
        splits = config.max_split_count,
        split_triggers = ?config.split_trigger_pcts,
        pyramiding = config.enable_pyramiding,
        take_profit = ?config.take_profit_pct,
        trailing = ?config.trailing_pair(),
        stop_loss = ?config.stop_loss_pct,
        repeat = config.repeat_after_take_profit,
        poll_secs = config.poll_interval_secs,
        "전략 설정 로드 완료"
    );
}

/// 틱 보고 로그: 결정/ROE/내부 상태, 보유 중이면 청산 추정가와 목표가.
fn log_tick_report(config: &StrategyConfig, report: &TickReport) {
    let verdict = report
        .verdict
        .as_ref()
        .map(|v| v.label())
        .unwrap_or("unknown");

    tracing::info!(
        verdict,
        decision = ?report.decision,
        roe_pct = ?report.roe_pct,
        contracts = %report.position.contracts,
        avg_entry = ?report.position.avg_entry_price,
        splits = report.position.splits_filled,
        pyramids = report.position.pyramids_filled,
        trailing = report.position.trailing_active,
        "틱 보고"
    );

    let Some(avg_price) = report.position.avg_entry_price else {
        return;
    };

    if let Ok(estimate) = liquidation_estimate(
        report.position.collateral_usd,
        config.leverage,
        config.margin_mode,
        avg_price,
        config.direction,
        DEFAULT_MAINTENANCE_MARGIN_RATE,
    ) {
        tracing::info!(
            liq_price = %estimate.liq_price,
            adverse_move_pct = %estimate.adverse_move_pct,
            "청산 추정가 (계산)"
        );
    }

    // ROE 목표를 가격으로 환산: 가격 변동률 = ROE / 레버리지
    let leverage = Decimal::from(config.leverage);
    if let Some(tp) = config.take_profit_pct {
        let target = target_price(avg_price, tp / leverage, config.direction, true);
        tracing::info!(target = %target, "익절 목표가");
    }
    if config.enable_stop_loss {
        if let Some(sl) = config.stop_loss_pct {
            let target = target_price(avg_price, sl / leverage, config.direction, false);
            tracing::info!(target = %target, "손절 목표가");
        }
    }
}

/// 평균가 대비 유리(+)/불리(-) 방향의 목표 가격 계산.
fn target_price(avg_price: Decimal, move_pct: Decimal, direction: Direction, favorable: bool) -> Decimal {
    let signed = if favorable {
        move_pct * direction.sign()
    } else {
        -move_pct * direction.sign()
    };
    avg_price * (Decimal::ONE + signed / Decimal::ONE_HUNDRED)
}

/// API 연결/조회 확인.
async fn check_connection(symbol: &str) -> anyhow::Result<()> {
    let exchange = GateioExchange::from_env()?;

    let price = exchange.fetch_last_price(symbol).await?;
    println!("✅ 시세 조회 성공: {symbol} = {price} USDT");

    let balance = exchange.fetch_available_balance().await?;
    println!("✅ 잔고 조회 성공: 주문 가능 {balance} USDT");

    match exchange.fetch_position(symbol).await? {
        Some(position) => println!(
            "ℹ️ 보유 포지션: {} 계약 @ {} (미실현 손익 {})",
            position.contracts, position.entry_price, position.unrealized_pnl
        ),
        None => println!("ℹ️ 보유 포지션 없음"),
    }

    Ok(())
}

/// 오프라인 청산가 추정 출력.
fn print_liquidation(
    collateral: Decimal,
    leverage: u32,
    entry_price: Decimal,
    direction: &str,
    margin_mode: &str,
    maintenance_margin_rate: Decimal,
) -> anyhow::Result<()> {
    let direction = match direction {
        "long" => Direction::Long,
        "short" => Direction::Short,
        other => anyhow::bail!("direction은 long/short 중 하나여야 합니다: {other}"),
    };
    let margin_mode = match margin_mode {
        "cross" => MarginMode::Cross,
        "isolated" => MarginMode::Isolated,
        other => anyhow::bail!("margin_mode는 cross/isolated 중 하나여야 합니다: {other}"),
    };

    let estimate = liquidation_estimate(
        collateral,
        leverage,
        margin_mode,
        entry_price,
        direction,
        maintenance_margin_rate,
    )?;

    println!("청산 추정가        : {} USDT", estimate.liq_price);
    println!("진입가 대비 변동폭 : {}%", estimate.adverse_move_pct);
    if estimate.clamped {
        println!("⚠️ 계산된 청산가가 음수라 0으로 보정되었습니다");
    }
    if estimate.cross_approximation {
        println!("⚠️ 교차 마진은 계좌 전체 기준이 아닌 근사치입니다");
    }
    Ok(())
}
