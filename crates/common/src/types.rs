use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// One OHLCV bar for a single time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    /// False while the bucket is still forming.
    pub is_closed: bool,
}

/// Candle sampling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl CandleInterval {
    pub fn as_duration(&self) -> Duration {
        match self {
            CandleInterval::OneMinute => Duration::from_secs(60),
            CandleInterval::FiveMinutes => Duration::from_secs(5 * 60),
            CandleInterval::FifteenMinutes => Duration::from_secs(15 * 60),
            CandleInterval::OneHour => Duration::from_secs(60 * 60),
            CandleInterval::OneDay => Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::OneHour => "1h",
            CandleInterval::OneDay => "1d",
        }
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading schedule of an exchange for the current day, as reported by the
/// broker alongside its readiness answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSchedule {
    pub exchange: String,
    pub is_trading_day: bool,
}

impl TradingSchedule {
    /// A venue without session bounds, e.g. crypto spot.
    pub fn around_the_clock(exchange: impl Into<String>, is_trading_day: bool) -> Self {
        Self {
            exchange: exchange.into(),
            is_trading_day,
        }
    }
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// An order to be submitted to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub figi: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// `None` = market order; `Some(price)` = limit order.
    pub price: Option<f64>,
}

impl Order {
    pub fn market(figi: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            figi: figi.into(),
            side,
            quantity,
            price: None,
        }
    }
}

/// Confirmation of a filled order returned by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub figi: String,
    pub side: OrderSide,
    pub fill_price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Whether the bot is running against the real broker or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            other => Err(Error::Config(format!(
                "TRADING_MODE must be 'paper' or 'live', got: '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_deserializes_and_maps_to_duration() {
        let interval: CandleInterval = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(interval, CandleInterval::FifteenMinutes);
        assert_eq!(interval.as_duration(), Duration::from_secs(900));
        assert_eq!(interval.to_string(), "15m");
    }

    #[test]
    fn around_the_clock_schedule_keeps_the_trading_day_flag() {
        let schedule = TradingSchedule::around_the_clock("BINANCE", false);
        assert_eq!(schedule.exchange, "BINANCE");
        assert!(!schedule.is_trading_day);
    }

    #[test]
    fn trading_mode_is_case_insensitive() {
        assert_eq!("PAPER".parse::<TradingMode>().unwrap(), TradingMode::Paper);
        assert!("demo".parse::<TradingMode>().is_err());
    }
}
