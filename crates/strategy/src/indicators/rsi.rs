use common::Candle;

/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
/// Returns `None` until at least `period + 1` closed candles are available.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

/// Where the latest RSI value sits relative to the configured bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RsiZone {
    Oversold,
    Neutral,
    Overbought,
}

impl RsiIndicator {
    /// `period` is clamped to at least 2.
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Self {
        Self {
            period: period.max(2),
            overbought,
            oversold,
        }
    }

    /// Compute RSI from close prices (oldest first).
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 {
            return None;
        }

        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let (seed, rest) = changes.split_at(self.period);
        let n = self.period as f64;

        let mut avg_gain = seed.iter().map(|c| c.max(0.0)).sum::<f64>() / n;
        let mut avg_loss = seed.iter().map(|c| (-c).max(0.0)).sum::<f64>() / n;

        for &change in rest {
            avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
            avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
        }

        // No movement at all is neutral, not overbought
        if avg_loss == 0.0 {
            return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
        }
        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    /// Classify the closed candles of `history`. Forming candles are ignored.
    pub fn zone(&self, history: &[Candle]) -> Option<RsiZone> {
        let closes: Vec<f64> = history
            .iter()
            .filter(|c| c.is_closed)
            .map(|c| c.close)
            .collect();
        let rsi = self.compute(&closes)?;
        Some(if rsi <= self.oversold {
            RsiZone::Oversold
        } else if rsi >= self.overbought {
            RsiZone::Overbought
        } else {
            RsiZone::Neutral
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::minutes(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
                open_time: start + Duration::minutes(i as i64),
                close_time: start + Duration::minutes(i as i64 + 1),
                is_closed: true,
            })
            .collect()
    }

    #[test]
    fn needs_period_plus_one_closes() {
        let rsi = RsiIndicator::new(14, 70.0, 30.0);
        assert!(rsi.compute(&[100.0; 14]).is_none());
        assert!(rsi.compute(&[100.0; 15]).is_some());
    }

    #[test]
    fn rising_series_is_overbought() {
        let rsi = RsiIndicator::new(3, 70.0, 30.0);
        let history = candles(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        assert_eq!(rsi.zone(&history), Some(RsiZone::Overbought));
    }

    #[test]
    fn falling_series_is_oversold() {
        let rsi = RsiIndicator::new(3, 70.0, 30.0);
        let value = rsi.compute(&[14.0, 13.0, 12.0, 11.0, 10.0]).unwrap();
        assert!(value.abs() < 1e-9, "Expected ~0, got {value}");
        let history = candles(&[14.0, 13.0, 12.0, 11.0, 10.0]);
        assert_eq!(rsi.zone(&history), Some(RsiZone::Oversold));
    }

    #[test]
    fn forming_candle_is_ignored() {
        let rsi = RsiIndicator::new(3, 70.0, 30.0);
        let mut history = candles(&[14.0, 13.0, 12.0, 11.0]);
        history.last_mut().unwrap().is_closed = false;
        assert_eq!(rsi.zone(&history), None);
    }

    #[test]
    fn flat_series_is_neutral() {
        let rsi = RsiIndicator::new(3, 70.0, 30.0);
        assert_eq!(rsi.compute(&[100.0; 5]), Some(50.0));
        assert_eq!(rsi.zone(&candles(&[100.0; 5])), Some(RsiZone::Neutral));
    }

    #[test]
    fn alternating_series_is_neutral() {
        let rsi = RsiIndicator::new(4, 70.0, 30.0);
        let history = candles(&[10.0, 11.0, 10.0, 11.0, 10.0, 11.0]);
        assert_eq!(rsi.zone(&history), Some(RsiZone::Neutral));
    }
}
