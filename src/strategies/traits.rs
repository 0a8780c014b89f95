//! Strategy trait - shared scoring capability over strategy variants

use crate::core::MarketSnapshot;

/// Directional score produced by a strategy variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyScore {
    /// Directional score in [-1, 1]: positive long, negative short
    pub score: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

impl StrategyScore {
    pub fn new(score: f64, confidence: f64) -> Self {
        Self {
            score: score.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Common capability of every strategy variant.
///
/// Scoring is synchronous and a pure function of the history the variant
/// has been fed, which is what makes backtest replays reproduce live
/// decisions exactly.
pub trait Strategy: Send + Sync {
    /// Variant name, used for performance attribution
    fn name(&self) -> &'static str;

    /// Consume the next snapshot and score it. Returns None while the
    /// variant has not seen enough history to have an opinion.
    fn score(&mut self, snapshot: &MarketSnapshot) -> Option<StrategyScore>;
}
