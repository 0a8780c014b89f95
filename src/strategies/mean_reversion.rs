//! Mean reversion strategy - z-score against a rolling mean

use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};

use crate::core::{MarketSnapshot, Symbol};

use super::{Strategy, StrategyScore};

/// Mean reversion parameters
#[derive(Debug, Clone)]
pub struct MeanReversionParams {
    /// Rolling window length
    pub window: usize,
    /// Z-score at which conviction saturates
    pub z_entry: f64,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            window: 30,
            z_entry: 2.0,
        }
    }
}

/// Mean reversion strategy: fade deviations from the rolling mean.
pub struct MeanReversionStrategy {
    params: MeanReversionParams,
    history: HashMap<Symbol, VecDeque<f64>>,
}

impl MeanReversionStrategy {
    pub fn new(params: MeanReversionParams) -> Self {
        Self {
            params,
            history: HashMap::new(),
        }
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn score(&mut self, snapshot: &MarketSnapshot) -> Option<StrategyScore> {
        let price: f64 = snapshot.last.to_f64().unwrap_or(0.0);
        let window = self.params.window;
        let prices = self
            .history
            .entry(snapshot.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(window + 1));
        prices.push_back(price);
        if prices.len() > window {
            prices.pop_front();
        }
        if prices.len() < window {
            return None;
        }

        let n = prices.len() as f64;
        let mean = prices.iter().sum::<f64>() / n;
        let var = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = var.sqrt();
        if std == 0.0 {
            return None;
        }

        // Fade the deviation: price above mean scores short, below scores long.
        let z = (price - mean) / std;
        let score = (-z / self.params.z_entry).clamp(-1.0, 1.0);
        let confidence = (z.abs() / self.params.z_entry).min(1.0) * 0.8;

        Some(StrategyScore::new(score, confidence))
    }
}
