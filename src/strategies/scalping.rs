//! Scalping strategy - short-horizon momentum when the spread is tight

use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};

use crate::core::{MarketSnapshot, Symbol};

use super::{Strategy, StrategyScore};

/// Scalping parameters
#[derive(Debug, Clone)]
pub struct ScalpingParams {
    /// Momentum lookback, in ticks
    pub lookback: usize,
    /// Only trade when the spread is below this many basis points
    pub max_spread_bps: f64,
    /// Mid move (fraction) at which conviction saturates
    pub momentum_cap: f64,
}

impl Default for ScalpingParams {
    fn default() -> Self {
        Self {
            lookback: 5,
            max_spread_bps: 5.0,
            momentum_cap: 0.002,
        }
    }
}

/// Scalping strategy: ride very short-term mid-price momentum, but only
/// in tight markets where the spread will not eat the edge.
pub struct ScalpingStrategy {
    params: ScalpingParams,
    mids: HashMap<Symbol, VecDeque<f64>>,
}

impl ScalpingStrategy {
    pub fn new(params: ScalpingParams) -> Self {
        Self {
            params,
            mids: HashMap::new(),
        }
    }
}

impl Strategy for ScalpingStrategy {
    fn name(&self) -> &'static str {
        "scalping"
    }

    fn score(&mut self, snapshot: &MarketSnapshot) -> Option<StrategyScore> {
        let bid: f64 = snapshot.bid.to_f64().unwrap_or(0.0);
        let ask: f64 = snapshot.ask.to_f64().unwrap_or(0.0);
        if bid <= 0.0 || ask <= bid {
            return None;
        }
        let mid = (bid + ask) / 2.0;
        let spread_bps = (ask - bid) / mid * 10_000.0;

        let lookback = self.params.lookback;
        let mids = self
            .mids
            .entry(snapshot.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(lookback + 1));
        mids.push_back(mid);
        if mids.len() > lookback + 1 {
            mids.pop_front();
        }
        if mids.len() < lookback + 1 {
            return None;
        }

        // Wide market: stand aside rather than cross an expensive spread.
        if spread_bps > self.params.max_spread_bps {
            return Some(StrategyScore::new(0.0, 0.0));
        }

        let oldest = *mids.front()?;
        if oldest <= 0.0 {
            return None;
        }
        let momentum = mid / oldest - 1.0;
        let score = (momentum / self.params.momentum_cap).clamp(-1.0, 1.0);

        // Tighter spread leaves more of the move as edge.
        let tightness = 1.0 - (spread_bps / self.params.max_spread_bps).clamp(0.0, 1.0);
        let confidence = score.abs() * (0.4 + 0.6 * tightness);

        Some(StrategyScore::new(score, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn snap(bid: f64, ask: f64) -> MarketSnapshot {
        let mid = (bid + ask) / 2.0;
        MarketSnapshot {
            symbol: Symbol::new("SOLUSDT"),
            timestamp: Utc::now(),
            last: Decimal::try_from(mid).unwrap(),
            bid: Decimal::try_from(bid).unwrap(),
            ask: Decimal::try_from(ask).unwrap(),
            volatility: 0.01,
        }
    }

    #[test]
    fn rising_mid_in_tight_market_scores_long() {
        let mut strat = ScalpingStrategy::new(ScalpingParams::default());
        let mut last = None;
        for i in 0..6 {
            let p = 100.0 + i as f64 * 0.05;
            last = strat.score(&snap(p - 0.001, p + 0.001));
        }
        let s = last.expect("lookback full");
        assert!(s.score > 0.0);
        assert!(s.confidence > 0.0);
    }

    #[test]
    fn wide_spread_stands_aside() {
        let mut strat = ScalpingStrategy::new(ScalpingParams::default());
        let mut last = None;
        for i in 0..6 {
            let p = 100.0 + i as f64 * 0.05;
            last = strat.score(&snap(p - 1.0, p + 1.0));
        }
        let s = last.expect("lookback full");
        assert_eq!(s.confidence, 0.0);
    }
}
