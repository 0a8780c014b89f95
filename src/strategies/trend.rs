//! Trend following strategy - RSI + moving average confirmation

use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};

use crate::core::{MarketSnapshot, Symbol};

use super::{Strategy, StrategyScore};

/// Trend following parameters
#[derive(Debug, Clone)]
pub struct TrendParams {
    /// RSI period
    pub rsi_period: usize,
    /// RSI oversold threshold
    pub rsi_oversold: f64,
    /// RSI overbought threshold
    pub rsi_overbought: f64,
    /// Moving average period
    pub ma_period: usize,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            ma_period: 50,
        }
    }
}

/// Trend following strategy
pub struct TrendStrategy {
    params: TrendParams,
    history: HashMap<Symbol, VecDeque<f64>>,
}

impl TrendStrategy {
    pub fn new(params: TrendParams) -> Self {
        Self {
            params,
            history: HashMap::new(),
        }
    }

    /// Calculate RSI over the most recent period
    fn calculate_rsi(&self, prices: &VecDeque<f64>) -> Option<f64> {
        if prices.len() < self.params.rsi_period + 1 {
            return None;
        }

        let mut gains = 0.0;
        let mut losses = 0.0;

        let recent: Vec<f64> = prices
            .iter()
            .rev()
            .take(self.params.rsi_period + 1)
            .cloned()
            .collect();

        for i in 1..recent.len() {
            let change = recent[i - 1] - recent[i];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }

        let avg_gain = gains / self.params.rsi_period as f64;
        let avg_loss = losses / self.params.rsi_period as f64;

        if avg_loss == 0.0 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        Some(100.0 - (100.0 / (1.0 + rs)))
    }

    /// Calculate Simple Moving Average
    fn calculate_sma(&self, prices: &VecDeque<f64>) -> Option<f64> {
        if prices.len() < self.params.ma_period {
            return None;
        }

        let sum: f64 = prices.iter().rev().take(self.params.ma_period).sum();
        Some(sum / self.params.ma_period as f64)
    }
}

impl Strategy for TrendStrategy {
    fn name(&self) -> &'static str {
        "trend"
    }

    fn score(&mut self, snapshot: &MarketSnapshot) -> Option<StrategyScore> {
        let price: f64 = snapshot.last.to_f64().unwrap_or(0.0);
        let prices = self
            .history
            .entry(snapshot.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(200));
        prices.push_back(price);

        // Keep history bounded
        if prices.len() > 200 {
            prices.pop_front();
        }

        let prices = self.history.get(&snapshot.symbol)?;
        let rsi = self.calculate_rsi(prices)?;
        let ma = self.calculate_sma(prices)?;
        if ma <= 0.0 {
            return None;
        }

        // Oscillator leg: +1 fully oversold, -1 fully overbought.
        let osc = (50.0 - rsi) / 50.0;
        // Trend leg: MA deviation, saturating at +-2%.
        let dev = ((price - ma) / ma / 0.02).clamp(-1.0, 1.0);

        let score = 0.7 * osc + 0.3 * dev;

        // Conviction rises when both legs agree and RSI is past a threshold.
        let extreme = rsi < self.params.rsi_oversold || rsi > self.params.rsi_overbought;
        let agree = osc.signum() == dev.signum();
        let confidence = if extreme && agree {
            0.5 + 0.5 * score.abs()
        } else if extreme || agree {
            0.3 + 0.3 * score.abs()
        } else {
            0.2 * score.abs()
        };

        Some(StrategyScore::new(score, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn snap(last: f64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: Symbol::new("BTCUSDT"),
            timestamp: Utc::now(),
            last: Decimal::try_from(last).unwrap(),
            bid: Decimal::try_from(last - 0.5).unwrap(),
            ask: Decimal::try_from(last + 0.5).unwrap(),
            volatility: 0.01,
        }
    }

    #[test]
    fn no_score_until_warm() {
        let mut strat = TrendStrategy::new(TrendParams::default());
        for i in 0..10 {
            assert!(strat.score(&snap(100.0 + i as f64)).is_none());
        }
    }

    #[test]
    fn steady_decline_scores_oversold() {
        let mut strat = TrendStrategy::new(TrendParams {
            ma_period: 20,
            ..TrendParams::default()
        });
        let mut last = None;
        for i in 0..60 {
            last = strat.score(&snap(200.0 - i as f64));
        }
        // Falling prices push RSI toward oversold: oscillator leg goes long.
        let s = last.expect("warm after 60 ticks");
        assert!(s.score > 0.0);
    }
}
