//! 전략 실행 루프 (라이프사이클/동시성 컨트롤러).
//!
//! 엔진을 폴링 주기에 맞춰 백그라운드 태스크 하나에서 구동합니다.
//! 동시에 진행 중인 틱은 항상 하나뿐이며, 틱의 주문 실행과 상태 반영이
//! 끝난 뒤에야 다음 틱이 시작됩니다.
//!
//! 취소는 [`CancellationToken`]으로 전달됩니다 — 트리거가 stdin 명령이든
//! OS 시그널이든 상관없이 같은 토큰을 취소하면 됩니다. 취소 시 워커는
//! 새 틱 스케줄을 멈추고 최선 노력 청산을 수행한 뒤 종료합니다.
//! 컨트롤러는 제한 시간 내에 워커 합류를 기다리고, 시간이 지나면 강제
//! 종료하지 않고 방치합니다 — 주문 제출 도중 태스크를 죽이면 포지션
//! 상태를 알 수 없게 되기 때문입니다.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::{StrategyEngine, TickReport};

/// 컨트롤러 에러.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// 워커가 제한 시간 내 종료되지 않음 (방치됨) — 거래소 측 수동 확인 필요
    #[error("워커 태스크가 {0:?} 내에 종료되지 않음 — 방치됨, 거래소에서 포지션을 직접 확인하세요")]
    JoinTimeout(Duration),

    /// 워커 태스크 패닉/취소
    #[error("워커 태스크 비정상 종료: {0}")]
    Join(String),
}

/// 전략 실행 루프 빌더.
pub struct StrategyRunner {
    engine: StrategyEngine,
}

impl StrategyRunner {
    /// 새 러너 생성.
    pub fn new(engine: StrategyEngine) -> Self {
        Self { engine }
    }

    /// 워커 태스크 시작.
    pub fn spawn(self) -> RunnerHandle {
        let poll_interval = Duration::from_secs(self.engine.config().poll_interval_secs);
        let token = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(None);

        let worker_token = token.clone();
        let join = tokio::spawn(run_loop(self.engine, poll_interval, worker_token, status_tx));

        RunnerHandle {
            token,
            join,
            status_rx,
        }
    }
}

/// 워커 본체: 틱 → 상태 발행 → 취소 감지 대기.
async fn run_loop(
    mut engine: StrategyEngine,
    poll_interval: Duration,
    token: CancellationToken,
    status_tx: watch::Sender<Option<TickReport>>,
) {
    info!(interval = ?poll_interval, "전략 루프 시작");

    while !token.is_cancelled() {
        let report = engine.tick().await;
        let _ = status_tx.send(Some(report));

        if engine.is_stopped() {
            info!("엔진 정지 — 루프 종료");
            break;
        }

        // 취소는 폴링 주기를 기다리지 않고 즉시 감지됨
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    if token.is_cancelled() {
        engine.emergency_unwind().await;
    }

    info!("전략 루프 종료");
}

/// 실행 중인 워커에 대한 핸들.
pub struct RunnerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
    status_rx: watch::Receiver<Option<TickReport>>,
}

impl RunnerHandle {
    /// 취소 토큰 복제 (시그널 핸들러 등 외부 트리거용).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 취소 신호 전송 (합류 대기는 하지 않음).
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// 틱 상태 구독.
    pub fn subscribe(&self) -> watch::Receiver<Option<TickReport>> {
        self.status_rx.clone()
    }

    /// 워커가 이미 종료되었는지 여부.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 취소 후 제한 시간 내 합류 대기.
    ///
    /// 제한 시간이 지나면 워커를 강제 종료하지 않고 방치한 채
    /// [`RunnerError::JoinTimeout`]을 반환합니다.
    ///
    /// # Errors
    ///
    /// - [`RunnerError::JoinTimeout`]: 제한 시간 초과
    /// - [`RunnerError::Join`]: 워커 패닉 등 비정상 종료
    pub async fn shutdown(self, join_timeout: Duration) -> Result<(), RunnerError> {
        self.token.cancel();
        match tokio::time::timeout(join_timeout, self.join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RunnerError::Join(e.to_string())),
            Err(_) => {
                error!(
                    timeout = ?join_timeout,
                    "워커 합류 제한 시간 초과 — 강제 종료하지 않고 방치"
                );
                Err(RunnerError::JoinTimeout(join_timeout))
            }
        }
    }
}
