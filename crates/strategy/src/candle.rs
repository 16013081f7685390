use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use common::{BrokerClient, Candle, CandleInterval, Error, Order, OrderSide, Result};

use crate::indicators::{RsiIndicator, RsiZone};
use crate::{SessionEnd, TradingConfig, TradingStrategy};

const MAX_HISTORY: usize = 500;
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// State carried from one session to the next.
#[derive(Debug, Default)]
struct Book {
    history: Vec<Candle>,
    /// True while holding a position opened by this strategy.
    long: bool,
}

struct Session {
    stop_tx: watch::Sender<bool>,
    end_rx: watch::Receiver<Option<SessionEnd>>,
    task: JoinHandle<Book>,
}

/// RSI strategy over a rolling window of candles.
///
/// Each session runs as its own tokio task polling the broker once per
/// candle interval. The session ends by itself when the exchange closes or
/// after repeated tick failures.
pub struct CandleStrategy {
    cfg: TradingConfig,
    indicator: RsiIndicator,
    client: Arc<dyn BrokerClient>,
    poll_every: Duration,
    /// Empty while a session owns it.
    book: Book,
    session: Option<Session>,
}

impl CandleStrategy {
    pub fn new(cfg: TradingConfig, client: Arc<dyn BrokerClient>) -> Self {
        let params = &cfg.strategy;
        let indicator = RsiIndicator::new(
            params.param_usize("period", 14),
            params.param_f64("overbought", 70.0),
            params.param_f64("oversold", 30.0),
        );
        let poll_every = params.interval.as_duration();
        Self {
            cfg,
            indicator,
            client,
            poll_every,
            book: Book::default(),
            session: None,
        }
    }

    /// Override how often a session polls the broker.
    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_every = every;
        self
    }

    /// Candles known between sessions.
    pub fn history(&self) -> &[Candle] {
        &self.book.history
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }
}

#[async_trait]
impl TradingStrategy for CandleStrategy {
    fn init(&mut self, history: Vec<Candle>) {
        debug!(ticker = %self.cfg.ticker, candles = history.len(), "Strategy primed");
        self.book.history.clear();
        merge_candles(&mut self.book.history, history);
    }

    async fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::Strategy(format!(
                "{} strategy is already running",
                self.cfg.ticker
            )));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (end_tx, end_rx) = watch::channel(None);
        let task = SessionTask {
            ticker: self.cfg.ticker.clone(),
            figi: self.cfg.figi.clone(),
            exchange: self.cfg.exchange.clone(),
            interval: self.cfg.strategy.interval,
            quantity: self.cfg.strategy.quantity,
            indicator: self.indicator.clone(),
            client: self.client.clone(),
            poll_every: self.poll_every,
        };
        let book = std::mem::take(&mut self.book);
        let task = tokio::spawn(task.run(book, stop_rx, end_tx));

        info!(ticker = %self.cfg.ticker, "Strategy session started");
        self.session = Some(Session {
            stop_tx,
            end_rx,
            task,
        });
        Ok(())
    }

    async fn block_until_end(&mut self) -> SessionEnd {
        let Some(session) = self.session.as_mut() else {
            return SessionEnd::Completed;
        };
        match session.end_rx.wait_for(|end| end.is_some()).await {
            Ok(end) => (*end).clone().unwrap_or(SessionEnd::Completed),
            Err(_) => SessionEnd::Aborted("strategy session task exited unexpectedly".into()),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Err(Error::Strategy(format!(
                "{} strategy is not running",
                self.cfg.ticker
            )));
        };

        // Ignore send errors (session already finished)
        let _ = session.stop_tx.send(true);
        match session.task.await {
            Ok(book) => {
                self.book = book;
                info!(ticker = %self.cfg.ticker, "Strategy session stopped");
                Ok(())
            }
            Err(e) => {
                warn!(ticker = %self.cfg.ticker, "Strategy session lost its candle history");
                Err(Error::Strategy(format!("session task failed: {e}")))
            }
        }
    }
}

struct SessionTask {
    ticker: String,
    figi: String,
    exchange: String,
    interval: CandleInterval,
    quantity: f64,
    indicator: RsiIndicator,
    client: Arc<dyn BrokerClient>,
    poll_every: Duration,
}

impl SessionTask {
    async fn run(
        self,
        mut book: Book,
        mut stop_rx: watch::Receiver<bool>,
        end_tx: watch::Sender<Option<SessionEnd>>,
    ) -> Book {
        let mut ticker = tokio::time::interval(self.poll_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        let end = loop {
            tokio::select! {
                // Stop requested, or the strategy was dropped
                _ = stop_rx.changed() => break SessionEnd::Completed,
                _ = ticker.tick() => {}
            }

            match self.tick(&mut book).await {
                Ok(true) => failures = 0,
                Ok(false) => {
                    info!(ticker = %self.ticker, "Exchange closed, ending session");
                    break SessionEnd::Completed;
                }
                Err(e) => {
                    failures += 1;
                    warn!(ticker = %self.ticker, error = %e, failures, "Strategy tick failed");
                    if failures >= MAX_CONSECUTIVE_ERRORS {
                        break SessionEnd::Aborted(format!(
                            "{failures} consecutive tick failures, last: {e}"
                        ));
                    }
                }
            }
        };

        let _ = end_tx.send(Some(end));
        book
    }

    /// One poll. Returns `false` once the exchange is closed.
    async fn tick(&self, book: &mut Book) -> Result<bool> {
        let (open, _) = self.client.can_trade_now(&self.exchange).await?;
        if !open {
            return Ok(false);
        }

        let now = Utc::now();
        let from = book
            .history
            .last()
            .map(|c| c.open_time)
            .unwrap_or_else(|| now - chrono::Duration::days(1));
        let fresh = self.client.candles(&self.figi, from, now, self.interval).await?;
        merge_candles(&mut book.history, fresh);

        if let Some(zone) = self.indicator.zone(&book.history) {
            self.act(zone, book).await?;
        }
        Ok(true)
    }

    async fn act(&self, zone: RsiZone, book: &mut Book) -> Result<()> {
        let side = match (zone, book.long) {
            (RsiZone::Oversold, false) => OrderSide::Buy,
            (RsiZone::Overbought, true) => OrderSide::Sell,
            _ => return Ok(()),
        };

        let order = Order::market(&self.figi, side, self.quantity);
        let fill = self.client.submit_order(&order).await?;
        book.long = side == OrderSide::Buy;
        info!(
            ticker = %self.ticker,
            side = %side,
            price = fill.fill_price,
            qty = fill.quantity,
            "Order filled"
        );
        Ok(())
    }
}

/// Append `fresh` to `history`, replacing the forming candle when a newer
/// version of it arrives. Older candles are ignored.
fn merge_candles(history: &mut Vec<Candle>, fresh: Vec<Candle>) {
    for candle in fresh {
        let last_open = history.last().map(|c| c.open_time);
        match last_open {
            Some(t) if candle.open_time < t => {}
            Some(t) if candle.open_time == t => {
                if let Some(slot) = history.last_mut() {
                    *slot = candle;
                }
            }
            _ => history.push(candle),
        }
    }
    if history.len() > MAX_HISTORY {
        let excess = history.len() - MAX_HISTORY;
        history.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::{DateTime, Duration as ChronoDuration};
    use common::{Fill, TradingSchedule};
    use paper::PaperClient;

    use crate::StrategyConfig;

    fn config(period: i64) -> TradingConfig {
        let mut params = HashMap::new();
        params.insert("period".to_string(), toml::Value::Integer(period));
        TradingConfig {
            ticker: "BTCUSDT".into(),
            figi: "BTCUSDT".into(),
            exchange: "BINANCE".into(),
            strategy: StrategyConfig {
                strategy_type: "rsi".into(),
                interval: CandleInterval::OneMinute,
                quantity: 0.5,
                params,
            },
        }
    }

    fn candle(at: DateTime<Utc>, close: f64, is_closed: bool) -> Candle {
        Candle {
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            open_time: at,
            close_time: at + ChronoDuration::minutes(1),
            is_closed,
        }
    }

    fn falling(n: usize) -> Vec<Candle> {
        let start = Utc::now() - ChronoDuration::minutes(n as i64 + 1);
        (0..n)
            .map(|i| candle(start + ChronoDuration::minutes(i as i64), 100.0 - i as f64, true))
            .collect()
    }

    struct BrokenBroker;

    #[async_trait]
    impl BrokerClient for BrokenBroker {
        async fn candles(
            &self,
            _figi: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _interval: CandleInterval,
        ) -> Result<Vec<Candle>> {
            Err(Error::Http("connection reset".into()))
        }

        async fn can_trade_now(&self, _exchange: &str) -> Result<(bool, TradingSchedule)> {
            Err(Error::Http("connection reset".into()))
        }

        async fn submit_order(&self, _order: &Order) -> Result<Fill> {
            Err(Error::Http("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let client = Arc::new(PaperClient::new(0.0));
        let mut strategy = CandleStrategy::new(config(3), client);
        strategy.start().await.unwrap();
        assert!(matches!(strategy.start().await, Err(Error::Strategy(_))));
        strategy.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_session_is_rejected() {
        let client = Arc::new(PaperClient::new(0.0));
        let mut strategy = CandleStrategy::new(config(3), client);
        assert!(matches!(strategy.stop().await, Err(Error::Strategy(_))));
    }

    #[tokio::test]
    async fn session_completes_when_exchange_closes_and_keeps_history() {
        let client = Arc::new(PaperClient::new(0.0));
        client.set_exchange_open("BINANCE", false).await;

        let mut strategy = CandleStrategy::new(config(3), client);
        strategy.init(falling(6));
        strategy.start().await.unwrap();
        assert!(strategy.history().is_empty());

        assert_eq!(strategy.block_until_end().await, SessionEnd::Completed);
        strategy.stop().await.unwrap();
        assert!(!strategy.is_running());
        assert_eq!(strategy.history().len(), 6);

        // Restartable after a completed session
        strategy.start().await.unwrap();
        assert_eq!(strategy.block_until_end().await, SessionEnd::Completed);
        strategy.stop().await.unwrap();
    }

    #[tokio::test]
    async fn oversold_history_buys_once() {
        let client = Arc::new(PaperClient::new(0.0));
        let history = falling(6);
        client.push_candles("BTCUSDT", history.clone()).await;

        let mut strategy = CandleStrategy::new(config(3), client.clone())
            .with_poll_interval(Duration::from_millis(5));
        strategy.init(history);
        strategy.start().await.unwrap();

        for _ in 0..200 {
            if !client.fills().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // A few more polls must not add a second buy while long
        tokio::time::sleep(Duration::from_millis(30)).await;
        strategy.stop().await.unwrap();

        let fills = client.fills().await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, OrderSide::Buy);
        assert_eq!(fills[0].quantity, 0.5);
    }

    #[tokio::test]
    async fn repeated_tick_failures_abort_the_session() {
        let mut strategy = CandleStrategy::new(config(3), Arc::new(BrokenBroker))
            .with_poll_interval(Duration::from_millis(1));
        strategy.start().await.unwrap();

        match strategy.block_until_end().await {
            SessionEnd::Aborted(reason) => assert!(reason.contains("connection reset")),
            other => panic!("expected aborted session, got {other:?}"),
        }
        strategy.stop().await.unwrap();
    }

    #[test]
    fn merge_replaces_forming_candle_and_skips_stale_ones() {
        let t0 = Utc::now() - ChronoDuration::minutes(10);
        let mut history = vec![candle(t0, 1.0, true), candle(t0 + ChronoDuration::minutes(1), 2.0, false)];

        merge_candles(
            &mut history,
            vec![
                candle(t0, 9.0, true),
                candle(t0 + ChronoDuration::minutes(1), 3.0, true),
                candle(t0 + ChronoDuration::minutes(2), 4.0, false),
            ],
        );

        let closes: Vec<f64> = history.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![1.0, 3.0, 4.0]);
        assert!(history[1].is_closed);
    }

    #[test]
    fn merge_caps_history() {
        let mut history = Vec::new();
        merge_candles(&mut history, falling(MAX_HISTORY + 20));
        assert_eq!(history.len(), MAX_HISTORY);
    }
}
