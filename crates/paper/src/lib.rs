use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    BrokerClient, Candle, CandleInterval, Error, Fill, Order, OrderSide, Result, TradingSchedule,
};

/// Simulated broker for paper trading.
///
/// Market data comes either from an in-memory store (seeded with
/// `push_candles`, exchange availability toggled with `set_exchange_open`) or
/// from a real `feed` client. Fills are simulated at the latest known close
/// with configurable slippage. No real orders are ever sent.
pub struct PaperClient {
    feed: Option<Arc<dyn BrokerClient>>,
    /// Stored candles per instrument, oldest first.
    candles: Arc<RwLock<HashMap<String, Vec<Candle>>>>,
    /// Exchange availability; unknown exchanges count as open.
    exchanges: Arc<RwLock<HashMap<String, bool>>>,
    /// Latest known close per instrument, refreshed whenever candles are served.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    fills: Arc<RwLock<Vec<Fill>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperClient {
    pub fn new(slippage_bps: f64) -> Self {
        info!(slippage_bps = slippage_bps, "PaperClient initialized");
        Self {
            feed: None,
            candles: Arc::new(RwLock::new(HashMap::new())),
            exchanges: Arc::new(RwLock::new(HashMap::new())),
            prices: Arc::new(RwLock::new(HashMap::new())),
            fills: Arc::new(RwLock::new(Vec::new())),
            slippage_bps,
        }
    }

    /// Paper trading on top of real market data.
    pub fn with_feed(feed: Arc<dyn BrokerClient>, slippage_bps: f64) -> Self {
        Self {
            feed: Some(feed),
            ..Self::new(slippage_bps)
        }
    }

    /// Append candles to the in-memory store.
    pub async fn push_candles(&self, figi: &str, new: impl IntoIterator<Item = Candle>) {
        let mut store = self.candles.write().await;
        let series = store.entry(figi.to_string()).or_default();
        series.extend(new);
        series.sort_by_key(|c| c.open_time);
        if let Some(last) = series.last() {
            self.prices.write().await.insert(figi.to_string(), last.close);
        }
    }

    pub async fn set_exchange_open(&self, exchange: &str, open: bool) {
        self.exchanges.write().await.insert(exchange.to_string(), open);
    }

    /// Update the latest price for an instrument.
    pub async fn update_price(&self, figi: &str, price: f64) {
        self.prices.write().await.insert(figi.to_string(), price);
    }

    /// All simulated fills so far.
    pub async fn fills(&self) -> Vec<Fill> {
        self.fills.read().await.clone()
    }
}

#[async_trait]
impl BrokerClient for PaperClient {
    async fn candles(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>> {
        let candles = match &self.feed {
            Some(feed) => feed.candles(figi, from, to, interval).await?,
            None => self
                .candles
                .read()
                .await
                .get(figi)
                .map(|series| {
                    series
                        .iter()
                        .filter(|c| c.open_time >= from && c.open_time <= to)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        };

        if let Some(last) = candles.last() {
            self.update_price(figi, last.close).await;
        }
        Ok(candles)
    }

    async fn can_trade_now(&self, exchange: &str) -> Result<(bool, TradingSchedule)> {
        if let Some(feed) = &self.feed {
            return feed.can_trade_now(exchange).await;
        }
        let open = self
            .exchanges
            .read()
            .await
            .get(exchange)
            .copied()
            .unwrap_or(true);
        Ok((open, TradingSchedule::around_the_clock(exchange, open)))
    }

    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        let prices = self.prices.read().await;
        let mid_price = prices.get(&order.figi).copied().ok_or_else(|| {
            Error::Exchange(format!(
                "PaperClient has no price for '{}'. Ensure candles are flowing.",
                order.figi
            ))
        })?;
        drop(prices);

        // Apply slippage: buys pay more, sells receive less
        let fill_price = match order.side {
            OrderSide::Buy => mid_price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid_price * (1.0 - self.slippage_bps / 10_000.0),
        };

        debug!(
            figi = %order.figi,
            side = ?order.side,
            mid = mid_price,
            fill = fill_price,
            qty = order.quantity,
            "Paper fill simulated"
        );

        let fill = Fill {
            order_id: order.id.clone(),
            figi: order.figi.clone(),
            side: order.side,
            fill_price,
            quantity: order.quantity,
            timestamp: Utc::now(),
        };
        self.fills.write().await.push(fill.clone());

        Ok(fill)
    }
}
