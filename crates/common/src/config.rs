use std::time::Duration;

use crate::{Error, Result, TradingMode};

/// All process-level configuration, loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Broker credentials (only required in live mode)
    pub binance_api_key: String,
    pub binance_secret: String,

    // Trading
    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,

    /// Pause between two supervised cycles of an agent.
    pub restart_delay: Duration,

    // Instruments config file path
    pub instruments_config_path: String,
}

impl Config {
    pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(10);

    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| {
                Error::Config(format!(
                    "Required environment variable '{key}' is not set. Check your .env file."
                ))
            })
        };

        let trading_mode: TradingMode = required("TRADING_MODE")?.parse()?;

        let (binance_api_key, binance_secret) = match trading_mode {
            TradingMode::Live => (required("BINANCE_API_KEY")?, required("BINANCE_SECRET")?),
            TradingMode::Paper => (
                lookup("BINANCE_API_KEY").unwrap_or_default(),
                lookup("BINANCE_SECRET").unwrap_or_default(),
            ),
        };

        let restart_delay = match lookup("RESTART_DELAY_SECS") {
            Some(v) => Duration::from_secs(v.trim().parse().map_err(|_| {
                Error::Config(format!("RESTART_DELAY_SECS must be whole seconds, got: '{v}'"))
            })?),
            None => Self::DEFAULT_RESTART_DELAY,
        };

        Ok(Config {
            binance_api_key,
            binance_secret,
            trading_mode,
            paper_slippage_bps: lookup("PAPER_SLIPPAGE_BPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            restart_delay,
            instruments_config_path: lookup("INSTRUMENTS_CONFIG_PATH")
                .unwrap_or_else(|| "config/instruments.toml".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn paper_mode_applies_defaults() {
        let cfg = Config::from_lookup(lookup(&[("TRADING_MODE", "paper")])).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paper);
        assert_eq!(cfg.restart_delay, Duration::from_secs(10));
        assert_eq!(cfg.instruments_config_path, "config/instruments.toml");
        assert!((cfg.paper_slippage_bps - 10.0).abs() < 1e-9);
        assert!(cfg.binance_api_key.is_empty());
    }

    #[test]
    fn live_mode_requires_credentials() {
        let err = Config::from_lookup(lookup(&[("TRADING_MODE", "live")])).unwrap_err();
        assert!(err.to_string().contains("BINANCE_API_KEY"));
    }

    #[test]
    fn restart_delay_is_read_in_seconds() {
        let cfg = Config::from_lookup(lookup(&[
            ("TRADING_MODE", "paper"),
            ("RESTART_DELAY_SECS", "3"),
        ]))
        .unwrap();
        assert_eq!(cfg.restart_delay, Duration::from_secs(3));
    }

    #[test]
    fn malformed_restart_delay_is_rejected() {
        let result = Config::from_lookup(lookup(&[
            ("TRADING_MODE", "paper"),
            ("RESTART_DELAY_SECS", "soon"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn missing_trading_mode_is_rejected() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
    }
}
