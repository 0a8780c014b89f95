//! Strategy engine - variant selection and intent generation
//!
//! Selection is a pure function of each variant's rolling realized
//! performance, so an identical snapshot/outcome history always yields
//! the identical intent. That determinism is what lets the backtester
//! reproduce live decisions exactly.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::debug;

use crate::core::{Direction, MarketSnapshot, OutcomeRecord, Signal, TradeIntent, TradingConfig};

use super::{
    MeanReversionParams, MeanReversionStrategy, ScalpingParams, ScalpingStrategy, Strategy,
    TrendParams, TrendStrategy,
};

/// Rolling realized performance of one strategy variant.
#[derive(Debug, Clone)]
struct VariantPerf {
    window: usize,
    pnls: VecDeque<Decimal>,
}

impl VariantPerf {
    fn new(window: usize) -> Self {
        Self {
            window,
            pnls: VecDeque::with_capacity(window),
        }
    }

    fn record(&mut self, pnl: Decimal) {
        self.pnls.push_back(pnl);
        if self.pnls.len() > self.window {
            self.pnls.pop_front();
        }
    }

    /// Rolling realized PnL over the window.
    fn score(&self) -> Decimal {
        self.pnls.iter().copied().sum()
    }

    /// Largest peak-to-trough decline of cumulative PnL within the window.
    fn drawdown(&self) -> Decimal {
        let mut cumulative = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut worst = Decimal::ZERO;
        for pnl in &self.pnls {
            cumulative += *pnl;
            if cumulative > peak {
                peak = cumulative;
            }
            let dd = peak - cumulative;
            if dd > worst {
                worst = dd;
            }
        }
        worst
    }
}

/// Strategy engine: scores every variant each tick, picks one by rolling
/// performance, and emits a candidate intent.
pub struct StrategyEngine {
    variants: Vec<Box<dyn Strategy>>,
    perf: Vec<VariantPerf>,
    min_confidence: f64,
    size_fraction: f64,
}

impl StrategyEngine {
    /// Standard variant set: trend-following, mean-reversion, scalping.
    pub fn new(config: &TradingConfig) -> Self {
        let variants: Vec<Box<dyn Strategy>> = vec![
            Box::new(TrendStrategy::new(TrendParams::default())),
            Box::new(MeanReversionStrategy::new(MeanReversionParams::default())),
            Box::new(ScalpingStrategy::new(ScalpingParams::default())),
        ];
        Self::with_variants(variants, config)
    }

    pub fn with_variants(variants: Vec<Box<dyn Strategy>>, config: &TradingConfig) -> Self {
        let perf = variants
            .iter()
            .map(|_| VariantPerf::new(config.performance_window))
            .collect();
        Self {
            variants,
            perf,
            min_confidence: config.min_confidence,
            size_fraction: config.size_fraction,
        }
    }

    /// Evaluate one snapshot (plus an optional external signal) into a
    /// candidate trade intent. Sub-threshold confidence yields a flat
    /// intent - a valid outcome, not an error.
    pub fn evaluate(&mut self, snapshot: &MarketSnapshot, signal: Option<&Signal>) -> TradeIntent {
        if self.variants.is_empty() {
            return TradeIntent::flat(snapshot.symbol.clone(), "none");
        }

        // Every variant sees every snapshot so histories stay warm even
        // while another variant is selected.
        let scores: Vec<_> = self
            .variants
            .iter_mut()
            .map(|v| v.score(snapshot))
            .collect();

        let selected = self.select();
        let name = self.variants[selected].name();

        let Some(mut scored) = scores[selected] else {
            return TradeIntent::flat(snapshot.symbol.clone(), name);
        };

        // External signal pulls score and confidence toward its view,
        // weighted by its own confidence.
        if let Some(sig) = signal {
            let w = sig.confidence.clamp(0.0, 1.0);
            scored.score = ((scored.score + sig.score * w) / (1.0 + w)).clamp(-1.0, 1.0);
            scored.confidence =
                ((scored.confidence + sig.confidence * w) / (1.0 + w)).clamp(0.0, 1.0);
        }

        if scored.confidence < self.min_confidence {
            debug!(
                symbol = %snapshot.symbol,
                strategy = name,
                confidence = scored.confidence,
                "confidence below threshold, staying flat"
            );
            return TradeIntent::flat(snapshot.symbol.clone(), name);
        }

        let direction = if scored.score > 0.0 {
            Direction::Long
        } else if scored.score < 0.0 {
            Direction::Short
        } else {
            Direction::Flat
        };

        TradeIntent {
            symbol: snapshot.symbol.clone(),
            direction,
            size_fraction: self.size_fraction * scored.confidence,
            confidence: scored.confidence,
            strategy: name.to_string(),
        }
    }

    /// Pick the variant with the best rolling realized performance.
    /// Ties break on lowest recent drawdown, then registration order.
    fn select(&self) -> usize {
        let mut best = 0;
        for i in 1..self.perf.len() {
            let (s_best, s_i) = (self.perf[best].score(), self.perf[i].score());
            if s_i > s_best
                || (s_i == s_best && self.perf[i].drawdown() < self.perf[best].drawdown())
            {
                best = i;
            }
        }
        best
    }

    /// Feed a completed trade back into the producing variant's rolling
    /// performance window.
    pub fn record_outcome(&mut self, outcome: &OutcomeRecord) {
        for (variant, perf) in self.variants.iter().zip(self.perf.iter_mut()) {
            if variant.name() == outcome.strategy {
                perf.record(outcome.realized_pnl);
                return;
            }
        }
        debug!(strategy = %outcome.strategy, "outcome for unknown strategy variant");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderState, OrderType, Side, Symbol};
    use crate::strategies::StrategyScore;
    use chrono::Utc;
    use uuid::Uuid;

    struct FixedStrategy {
        name: &'static str,
        score: f64,
        confidence: f64,
    }

    impl Strategy for FixedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }
        fn score(&mut self, _snapshot: &MarketSnapshot) -> Option<StrategyScore> {
            Some(StrategyScore::new(self.score, self.confidence))
        }
    }

    fn config() -> TradingConfig {
        TradingConfig {
            poll_interval_ms: 1_000,
            min_confidence: 0.4,
            size_fraction: 0.1,
            performance_window: 10,
        }
    }

    fn snap() -> MarketSnapshot {
        MarketSnapshot {
            symbol: Symbol::new("BTCUSDT"),
            timestamp: Utc::now(),
            last: Decimal::from(100),
            bid: Decimal::from(99),
            ask: Decimal::from(101),
            volatility: 0.01,
        }
    }

    fn outcome(strategy: &str, pnl: i64) -> OutcomeRecord {
        OutcomeRecord {
            symbol: Symbol::new("BTCUSDT"),
            strategy: strategy.to_string(),
            plan_id: Uuid::new_v4(),
            side: Side::Buy,
            order_type: OrderType::Market,
            requested_quantity: Decimal::ONE,
            filled_quantity: Decimal::ONE,
            entry_price: Decimal::from(100),
            avg_fill_price: Some(Decimal::from(100)),
            realized_pnl: Decimal::from(pnl),
            confidence: 0.8,
            final_state: OrderState::Filled,
            submitted_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn empty_variant_set_stays_flat() {
        let mut engine = StrategyEngine::with_variants(vec![], &config());
        let intent = engine.evaluate(&snap(), None);
        assert!(intent.is_flat());
    }

    #[test]
    fn low_confidence_yields_flat() {
        let variants: Vec<Box<dyn Strategy>> = vec![Box::new(FixedStrategy {
            name: "a",
            score: 0.9,
            confidence: 0.1,
        })];
        let mut engine = StrategyEngine::with_variants(variants, &config());
        let intent = engine.evaluate(&snap(), None);
        assert!(intent.is_flat());
    }

    #[test]
    fn selection_follows_rolling_performance() {
        let variants: Vec<Box<dyn Strategy>> = vec![
            Box::new(FixedStrategy {
                name: "a",
                score: 0.9,
                confidence: 0.9,
            }),
            Box::new(FixedStrategy {
                name: "b",
                score: -0.9,
                confidence: 0.9,
            }),
        ];
        let mut engine = StrategyEngine::with_variants(variants, &config());

        // Registration order wins the initial tie.
        assert_eq!(engine.evaluate(&snap(), None).strategy, "a");

        // Variant b earns more; selection must switch.
        engine.record_outcome(&outcome("b", 500));
        engine.record_outcome(&outcome("a", -100));
        let intent = engine.evaluate(&snap(), None);
        assert_eq!(intent.strategy, "b");
        assert_eq!(intent.direction, Direction::Short);
    }

    #[test]
    fn external_signal_shifts_score() {
        let variants: Vec<Box<dyn Strategy>> = vec![Box::new(FixedStrategy {
            name: "a",
            score: 0.2,
            confidence: 0.5,
        })];
        let mut engine = StrategyEngine::with_variants(variants, &config());
        let sig = Signal {
            symbol: Symbol::new("BTCUSDT"),
            timestamp: Utc::now(),
            score: -1.0,
            confidence: 1.0,
        };
        let intent = engine.evaluate(&snap(), Some(&sig));
        assert_eq!(intent.direction, Direction::Short);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let build = || StrategyEngine::new(&config());
        let mut a = build();
        let mut b = build();
        for i in 0..80 {
            let mut s = snap();
            s.last = Decimal::from(100 + (i * 7 % 13) - 6);
            s.bid = s.last - Decimal::ONE;
            s.ask = s.last + Decimal::ONE;
            let ia = a.evaluate(&s, None);
            let ib = b.evaluate(&s, None);
            assert_eq!(ia.direction, ib.direction);
            assert_eq!(ia.strategy, ib.strategy);
            assert_eq!(ia.size_fraction, ib.size_fraction);
        }
    }
}
