pub mod candle;
pub mod config;
pub mod indicators;

pub use candle::CandleStrategy;
pub use config::{InstrumentsFile, StrategyConfig, TradingConfig};

use std::sync::Arc;

use async_trait::async_trait;

use common::{BrokerClient, Candle, Error, Result};

/// Why a trading session came to an end.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// The strategy decided the session is over (market closed, stop requested).
    Completed,
    /// The session ended on an internal error.
    Aborted(String),
}

/// Lifecycle contract every strategy engine must satisfy.
///
/// One session is `start` → `block_until_end` → `stop`. The same instance is
/// reused for every session of an agent, so `stop` must leave it startable.
#[async_trait]
pub trait TradingStrategy: Send + Sync {
    /// Prime the engine with historical candles (oldest first).
    /// Called once, before the first `start`.
    fn init(&mut self, history: Vec<Candle>);

    /// Begin trading. Fails if a session is already running.
    async fn start(&mut self) -> Result<()>;

    /// Suspend until the running session ends on its own.
    ///
    /// Must be cancel safe: dropping the future leaves the session running.
    async fn block_until_end(&mut self) -> SessionEnd;

    /// Tear the session down. Fails if no session is running.
    async fn stop(&mut self) -> Result<()>;
}

/// Build the strategy engine configured for an instrument.
pub fn from_config(
    cfg: &TradingConfig,
    client: Arc<dyn BrokerClient>,
) -> Result<Box<dyn TradingStrategy>> {
    match cfg.strategy.strategy_type.as_str() {
        "rsi" => Ok(Box::new(CandleStrategy::new(cfg.clone(), client))),
        other => Err(Error::Config(format!(
            "unknown strategy type '{other}' for {}",
            cfg.ticker
        ))),
    }
}
