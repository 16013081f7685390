use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;

use common::{BrokerClient, Result};
use strategy::{TradingConfig, TradingStrategy};

use crate::lifecycle::RestartPolicy;

/// How far back the strategy is primed at construction.
const WARMUP_WINDOW_DAYS: i64 = 1;

/// A supervised trading agent for exactly one instrument.
///
/// Construction primes the strategy with the last day of candles; `run`
/// (see `lifecycle`) then drives it through restartable sessions.
pub struct Agent {
    pub(crate) identity: TradingConfig,
    pub(crate) client: Arc<dyn BrokerClient>,
    pub(crate) strategy: Box<dyn TradingStrategy>,
    pub(crate) policy: RestartPolicy,
}

impl Agent {
    /// Build the configured strategy for `identity` and prime it.
    pub async fn new(
        identity: TradingConfig,
        client: Arc<dyn BrokerClient>,
        policy: RestartPolicy,
    ) -> Result<Self> {
        let strategy = strategy::from_config(&identity, client.clone())?;
        Self::with_strategy(identity, client, strategy, policy).await
    }

    /// Prime an already constructed strategy engine.
    ///
    /// Fails without touching the strategy if the candle history can't be
    /// fetched.
    pub async fn with_strategy(
        identity: TradingConfig,
        client: Arc<dyn BrokerClient>,
        mut strategy: Box<dyn TradingStrategy>,
        policy: RestartPolicy,
    ) -> Result<Self> {
        let now = Utc::now();
        let candles = client
            .candles(
                &identity.figi,
                now - Duration::days(WARMUP_WINDOW_DAYS),
                now,
                identity.strategy.interval,
            )
            .await?;

        info!(
            ticker = %identity.ticker,
            candles = candles.len(),
            "Strategy initialized"
        );
        strategy.init(candles);

        Ok(Self {
            identity,
            client,
            strategy,
            policy,
        })
    }

    pub fn identity(&self) -> &TradingConfig {
        &self.identity
    }

    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }
}
