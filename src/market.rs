//! Market state cache - latest snapshot per instrument
//!
//! Pure data holder. Snapshots are replaced wholesale on update; readers
//! always see a complete, consistent snapshot. Cold-path friendly: this
//! cache also backs the read-only dashboard model.

use parking_lot::RwLock;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use std::collections::{HashMap, VecDeque};

use crate::core::{MarketSnapshot, Symbol};

/// Latest market state per instrument.
#[derive(Default)]
pub struct MarketCache {
    snapshots: RwLock<HashMap<Symbol, MarketSnapshot>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot for a symbol.
    pub fn update(&self, snapshot: MarketSnapshot) {
        self.snapshots
            .write()
            .insert(snapshot.symbol.clone(), snapshot);
    }

    /// Get the latest snapshot for a symbol. Clones on return.
    pub fn get(&self, symbol: &Symbol) -> Option<MarketSnapshot> {
        self.snapshots.read().get(symbol).cloned()
    }

    /// Snapshot all instruments (for diagnostics / dashboard).
    pub fn all(&self) -> HashMap<Symbol, MarketSnapshot> {
        self.snapshots.read().clone()
    }
}

/// Rolling volatility estimator: sample standard deviation of simple
/// returns over a bounded window, as a fraction of price.
#[derive(Debug, Clone)]
pub struct RollingVolatility {
    window: usize,
    returns: VecDeque<f64>,
    last_price: Option<f64>,
}

impl RollingVolatility {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            returns: VecDeque::with_capacity(window),
            last_price: None,
        }
    }

    /// Feed the next price and return the current estimate.
    pub fn update(&mut self, price: Decimal) -> f64 {
        let price = price.to_f64().unwrap_or(0.0);
        if let Some(prev) = self.last_price {
            if prev > 0.0 {
                self.returns.push_back(price / prev - 1.0);
                if self.returns.len() > self.window {
                    self.returns.pop_front();
                }
            }
        }
        self.last_price = Some(price);
        self.estimate()
    }

    /// Current estimate; zero until at least two returns are observed.
    pub fn estimate(&self) -> f64 {
        let n = self.returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.returns.iter().sum::<f64>() / n as f64;
        let var = self
            .returns
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        var.sqrt()
    }
}
