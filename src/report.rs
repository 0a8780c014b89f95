//! Read-only dashboard model
//!
//! Everything here is computed from the ledger, the risk state and the
//! position set on demand. Nothing in this module mutates pipeline
//! state; the one outbound path is a rebalance recommendation being
//! approved into a TradeIntent and handed back to the executor.

use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Serialize;
use std::collections::HashMap;

use crate::core::{
    Direction, Instrument, MarketSnapshot, OrderType, OutcomeRecord, Position, RiskConfig,
    Symbol, TradeIntent,
};
use crate::risk::PortfolioRiskState;

/// Current risk picture for one instrument, as the dashboard shows it.
#[derive(Debug, Clone, Serialize)]
pub struct RiskMetrics {
    pub symbol: Symbol,
    /// Aggregate portfolio risk level, percent of equity
    pub risk_level_pct: f64,
    /// Rolling volatility estimate, percent of price
    pub volatility_pct: f64,
    /// Stop distance a plan opened right now would carry
    pub stop_buffer: Decimal,
    /// Take-profit distance at the configured reward/risk ratio
    pub take_buffer: Decimal,
    pub drawdown_pct: f64,
}

impl RiskMetrics {
    /// Derive the buffers the same way the risk manager would, so the
    /// dashboard never shows numbers the pipeline would not produce.
    pub fn compute(
        config: &RiskConfig,
        state: &PortfolioRiskState,
        snapshot: &MarketSnapshot,
        instrument: &Instrument,
    ) -> Self {
        let vol_dist = snapshot.last
            * Decimal::try_from(snapshot.volatility * config.stop_vol_multiple)
                .unwrap_or(Decimal::ZERO);
        let floor = instrument.tick_size * Decimal::from(config.min_tick_distance);
        let stop_buffer = vol_dist.max(floor);
        let take_buffer = stop_buffer
            * Decimal::try_from(config.reward_risk_ratio).unwrap_or(Decimal::from(2));

        Self {
            symbol: snapshot.symbol.clone(),
            risk_level_pct: state.risk_level() * 100.0,
            volatility_pct: snapshot.volatility * 100.0,
            stop_buffer,
            take_buffer,
            drawdown_pct: state.drawdown() * 100.0,
        }
    }
}

/// One row of the execution history table.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub symbol: Symbol,
    pub strategy: String,
    pub order_type: OrderType,
    pub execution_ms: i64,
    pub confidence: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&OutcomeRecord> for ExecutionRecord {
    fn from(record: &OutcomeRecord) -> Self {
        Self {
            symbol: record.symbol.clone(),
            strategy: record.strategy.clone(),
            order_type: record.order_type,
            execution_ms: record.execution_ms(),
            confidence: record.confidence,
            timestamp: record.completed_at,
        }
    }
}

/// Aggregate trading performance over a set of outcome records.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub total_profit: Decimal,
    /// Largest peak-to-trough decline of cumulative realized PnL
    pub max_drawdown: Decimal,
    /// Winners / total trades
    pub win_rate: f64,
    /// Gross profit / |gross loss|
    pub profit_factor: f64,
    /// Fraction of closed trades whose realized sign matched the intent
    pub model_accuracy: f64,
}

impl PerformanceMetrics {
    pub fn from_records(records: &[OutcomeRecord]) -> Self {
        let total_trades = records.len();
        let total_profit: Decimal = records.iter().map(|r| r.realized_pnl).sum();

        let mut cumulative = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_drawdown = Decimal::ZERO;
        let mut gross_profit = Decimal::ZERO;
        let mut gross_loss = Decimal::ZERO;
        let mut wins = 0usize;
        let mut closed = 0usize;

        for record in records {
            cumulative += record.realized_pnl;
            if cumulative > peak {
                peak = cumulative;
            }
            let dd = peak - cumulative;
            if dd > max_drawdown {
                max_drawdown = dd;
            }

            if record.realized_pnl > Decimal::ZERO {
                gross_profit += record.realized_pnl;
                wins += 1;
                closed += 1;
            } else if record.realized_pnl < Decimal::ZERO {
                gross_loss += record.realized_pnl.abs();
                closed += 1;
            }
        }

        let win_rate = if total_trades == 0 {
            0.0
        } else {
            wins as f64 / total_trades as f64
        };
        let profit_factor = if gross_loss.is_zero() {
            if gross_profit.is_zero() {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
        };
        let model_accuracy = if closed == 0 {
            0.0
        } else {
            wins as f64 / closed as f64
        };

        Self {
            total_trades,
            total_profit,
            max_drawdown,
            win_rate,
            profit_factor,
            model_accuracy,
        }
    }
}

/// Portfolio allocation of one instrument at current marks.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationEntry {
    pub symbol: Symbol,
    /// Signed notional at the mark
    pub notional: Decimal,
    /// |notional| / equity
    pub fraction: f64,
}

/// Allocation by instrument, largest first.
pub fn allocation(
    positions: &HashMap<Symbol, Position>,
    marks: &HashMap<Symbol, Decimal>,
    equity: Decimal,
) -> Vec<AllocationEntry> {
    let mut entries: Vec<AllocationEntry> = positions
        .values()
        .filter(|p| !p.is_flat())
        .map(|p| {
            let mark = marks.get(&p.symbol).copied().unwrap_or(p.avg_entry_price);
            let notional = p.notional(mark);
            let fraction = if equity > Decimal::ZERO {
                (notional.abs() / equity).to_f64().unwrap_or(0.0)
            } else {
                0.0
            };
            AllocationEntry {
                symbol: p.symbol.clone(),
                notional,
                fraction,
            }
        })
        .collect();
    entries.sort_by(|a, b| b.fraction.total_cmp(&a.fraction));
    entries
}

/// Suggested exposure adjustment for one instrument, as a signed fraction
/// of equity. Negative means reduce the position.
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceRecommendation {
    pub symbol: Symbol,
    pub adjustment: f64,
    pub reason: String,
}

impl RebalanceRecommendation {
    /// Turn an approved recommendation into a trade intent for the
    /// executor. A negative adjustment on a long position becomes a sell,
    /// and vice versa, so the resulting order reduces exposure.
    pub fn approve(&self, position: &Position) -> TradeIntent {
        let direction = if self.adjustment >= 0.0 {
            if position.quantity >= Decimal::ZERO {
                Direction::Long
            } else {
                Direction::Short
            }
        } else if position.quantity > Decimal::ZERO {
            Direction::Short
        } else {
            Direction::Long
        };
        TradeIntent {
            symbol: self.symbol.clone(),
            direction,
            size_fraction: self.adjustment.abs(),
            confidence: 1.0,
            strategy: "rebalance".to_string(),
        }
    }
}

/// Flag instruments whose allocation exceeds the per-instrument cap and
/// recommend trimming back to it.
pub fn rebalance_recommendations(
    positions: &HashMap<Symbol, Position>,
    marks: &HashMap<Symbol, Decimal>,
    equity: Decimal,
    max_instrument_fraction: f64,
) -> Vec<RebalanceRecommendation> {
    allocation(positions, marks, equity)
        .into_iter()
        .filter(|entry| entry.fraction > max_instrument_fraction)
        .map(|entry| RebalanceRecommendation {
            symbol: entry.symbol.clone(),
            adjustment: -(entry.fraction - max_instrument_fraction),
            reason: format!(
                "allocation {:.1}% exceeds {:.1}% cap",
                entry.fraction * 100.0,
                max_instrument_fraction * 100.0
            ),
        })
        .collect()
}
