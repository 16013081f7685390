use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use common::{CandleInterval, Error, Result};

/// Instruments config file (TOML). One agent is started per entry.
///
/// Example `config/instruments.toml`:
/// ```toml
/// [[instrument]]
/// ticker = "BTCUSDT"
/// figi = "BTCUSDT"
/// exchange = "BINANCE"
///
/// [instrument.strategy]
/// type = "rsi"
/// interval = "1m"
/// quantity = 0.001
///
/// [instrument.strategy.params]
/// period = 14
/// overbought = 70.0
/// oversold = 30.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentsFile {
    #[serde(rename = "instrument")]
    pub instruments: Vec<TradingConfig>,
}

/// Identity of one traded instrument plus the parameters of its strategy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    /// Human-readable ticker shown in logs, e.g. "BTCUSDT".
    pub ticker: String,
    /// Broker-side instrument identifier.
    pub figi: String,
    /// Exchange whose trading schedule gates the agent.
    pub exchange: String,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Strategy type identifier. Only "rsi" is known.
    #[serde(rename = "type", default = "default_strategy_type")]
    pub strategy_type: String,
    /// Candle sampling interval.
    pub interval: CandleInterval,
    /// Order quantity in instrument units.
    pub quantity: f64,
    /// Strategy-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

fn default_strategy_type() -> String {
    "rsi".to_string()
}

impl StrategyConfig {
    pub fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.params
            .get(key)
            .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
            .unwrap_or(default)
    }

    pub fn param_usize(&self, key: &str, default: usize) -> usize {
        self.params
            .get(key)
            .and_then(|v| v.as_integer())
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(default)
    }
}

impl InstrumentsFile {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read instruments config at '{path}': {e}"))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("Failed to parse instruments config at '{path}': {e}")))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: InstrumentsFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        for instrument in &file.instruments {
            if instrument.figi.trim().is_empty() {
                return Err(Error::Config(format!(
                    "instrument '{}' has an empty figi",
                    instrument.ticker
                )));
            }
            if instrument.strategy.quantity <= 0.0 {
                return Err(Error::Config(format!(
                    "instrument '{}' must trade a positive quantity",
                    instrument.ticker
                )));
            }
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[instrument]]
        ticker = "BTCUSDT"
        figi = "BTCUSDT"
        exchange = "BINANCE"

        [instrument.strategy]
        interval = "5m"
        quantity = 0.001

        [instrument.strategy.params]
        period = 10
        oversold = 25

        [[instrument]]
        ticker = "ETHUSDT"
        figi = "ETHUSDT"
        exchange = "BINANCE"

        [instrument.strategy]
        type = "rsi"
        interval = "1h"
        quantity = 0.05
    "#;

    #[test]
    fn parses_instruments_with_defaults() {
        let file = InstrumentsFile::parse(SAMPLE).unwrap();
        assert_eq!(file.instruments.len(), 2);

        let btc = &file.instruments[0];
        assert_eq!(btc.strategy.strategy_type, "rsi");
        assert_eq!(btc.strategy.interval, CandleInterval::FiveMinutes);
        assert_eq!(btc.strategy.param_usize("period", 14), 10);
        assert_eq!(btc.strategy.param_f64("oversold", 30.0), 25.0);
        assert_eq!(btc.strategy.param_f64("overbought", 70.0), 70.0);
    }

    #[test]
    fn rejects_unknown_interval() {
        let bad = SAMPLE.replace("\"5m\"", "\"7m\"");
        assert!(matches!(InstrumentsFile::parse(&bad), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let bad = SAMPLE.replace("quantity = 0.05", "quantity = 0.0");
        let err = InstrumentsFile::parse(&bad).unwrap_err();
        assert!(err.to_string().contains("ETHUSDT"));
    }

    #[test]
    fn bundled_instruments_file_parses() {
        let file = InstrumentsFile::parse(include_str!("../../../config/instruments.toml")).unwrap();
        assert!(!file.instruments.is_empty());
        assert!(file.instruments.iter().all(|i| i.strategy.strategy_type == "rsi"));
    }

    #[test]
    fn missing_file_is_config_error() {
        let result = InstrumentsFile::load("/nonexistent/instruments.toml");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
