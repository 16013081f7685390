use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use common::Error;
use strategy::SessionEnd;

use crate::Agent;

/// Fixed pause between two cycles, whatever the previous outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub delay: Duration,
}

impl RestartPolicy {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(10);

    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::fixed(Self::DEFAULT_DELAY)
    }
}

/// Why the readiness gate refused a cycle. Both causes abort the cycle the
/// same way.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("can't receive trading schedules: {0}")]
    Schedule(#[source] Error),

    #[error("instrument {0} is not available, exchange is closed")]
    ExchangeClosed(String),
}

/// Result of one supervised cycle. Only ever logged.
#[derive(Debug)]
pub enum CycleOutcome {
    Success,
    ReadinessDenied(ReadinessError),
    StartFailed(Error),
    /// The session ended on a strategy-internal error; `stop` succeeded.
    RuntimeFailed(String),
    StopFailed(Error),
    /// Shutdown was requested while the readiness check was pending, or
    /// mid-session and the strategy stopped cleanly.
    Interrupted,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Success)
    }

    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Success => "success",
            CycleOutcome::ReadinessDenied(_) => "readiness_denied",
            CycleOutcome::StartFailed(_) => "start_failed",
            CycleOutcome::RuntimeFailed(_) => "runtime_failed",
            CycleOutcome::StopFailed(_) => "stop_failed",
            CycleOutcome::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleOutcome::Success => write!(f, "finished successfully"),
            CycleOutcome::ReadinessDenied(e) => write!(f, "{e}"),
            CycleOutcome::StartFailed(e) => write!(f, "can't start robot trading strategy, {e}"),
            CycleOutcome::RuntimeFailed(reason) => write!(f, "trading session aborted: {reason}"),
            CycleOutcome::StopFailed(e) => write!(f, "can't stop robot trading strategy, {e}"),
            CycleOutcome::Interrupted => write!(f, "interrupted by shutdown"),
        }
    }
}

impl Agent {
    /// Supervise the strategy until shutdown is requested.
    ///
    /// Every cycle is readiness check → start → block until end → stop,
    /// followed by `RestartPolicy::delay` of cool-down, whatever happened.
    /// No error escapes. The loop exits only once `shutdown` holds `true`;
    /// if the sender is dropped without that, it runs for the life of the
    /// process.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            info!(
                ticker = %self.identity.ticker,
                figi = %self.identity.figi,
                "Micro-robot started"
            );
            let outcome = self.run_cycle(&mut shutdown).await;
            self.report(&outcome);
            if matches!(outcome, CycleOutcome::Interrupted) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.policy.delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        info!(ticker = %self.identity.ticker, "Micro-robot shut down");
    }

    pub(crate) async fn run_cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> CycleOutcome {
        let ready = tokio::select! {
            ready = self.check_readiness() => ready,
            _ = shutdown_requested(shutdown) => return CycleOutcome::Interrupted,
        };
        if let Err(e) = ready {
            return CycleOutcome::ReadinessDenied(e);
        }

        if let Err(e) = self.strategy.start().await {
            return CycleOutcome::StartFailed(e);
        }

        let end = tokio::select! {
            end = self.strategy.block_until_end() => Some(end),
            _ = shutdown_requested(shutdown) => None,
        };

        // Always stop once started, however the session ended
        match (end, self.strategy.stop().await) {
            (Some(SessionEnd::Aborted(reason)), Err(e)) => {
                warn!(ticker = %self.identity.ticker, reason = %reason, "Trading session aborted");
                CycleOutcome::StopFailed(e)
            }
            (_, Err(e)) => CycleOutcome::StopFailed(e),
            (None, Ok(())) => CycleOutcome::Interrupted,
            (Some(SessionEnd::Completed), Ok(())) => CycleOutcome::Success,
            (Some(SessionEnd::Aborted(reason)), Ok(())) => CycleOutcome::RuntimeFailed(reason),
        }
    }

    async fn check_readiness(&self) -> Result<(), ReadinessError> {
        let (can_trade, schedule) = self
            .client
            .can_trade_now(&self.identity.exchange)
            .await
            .map_err(ReadinessError::Schedule)?;
        debug!(
            exchange = %schedule.exchange,
            trading_day = schedule.is_trading_day,
            "Trading schedule received"
        );

        if !can_trade {
            return Err(ReadinessError::ExchangeClosed(self.identity.ticker.clone()));
        }
        Ok(())
    }

    fn report(&self, outcome: &CycleOutcome) {
        let ticker = &self.identity.ticker;
        match outcome {
            CycleOutcome::Success | CycleOutcome::Interrupted => {
                info!(ticker = %ticker, outcome = outcome.label(), "Micro-robot {outcome}");
            }
            _ => {
                warn!(
                    ticker = %ticker,
                    outcome = outcome.label(),
                    error = %outcome,
                    "Micro-robot finished with error"
                );
            }
        }
    }
}

/// Resolves once the shutdown flag is raised. Never resolves if the sender
/// is dropped first.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
