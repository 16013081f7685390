use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Candle, CandleInterval, Fill, Order, Result, TradingSchedule};

/// Abstraction over the brokerage connection.
///
/// `BinanceClient` implements this for live trading.
/// `PaperClient` implements this for simulation.
///
/// Agents only use the market-data half (`candles`, `can_trade_now`);
/// order flow belongs to the strategy engine.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Historical candles for an instrument in `[from, to]`, oldest first.
    async fn candles(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>>;

    /// Whether the exchange is open for trading right now, with the schedule
    /// the answer was derived from.
    async fn can_trade_now(&self, exchange: &str) -> Result<(bool, TradingSchedule)>;

    /// Submit an order and return the fill confirmation.
    async fn submit_order(&self, order: &Order) -> Result<Fill>;
}
