//! Risk management - bounded, risk-adjusted order plans
//!
//! The risk manager turns a candidate intent into an executable plan or
//! rejects it. Rejection is an expected outcome of normal operation, not
//! a failure. The portfolio circuit breaker is re-checked against live
//! state on every call and is never cached.

use rust_decimal::{prelude::ToPrimitive, Decimal};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::core::{
    Instrument, MarketSnapshot, OrderPlan, OrderType, Position, RiskConfig, Side, Symbol,
    TradeIntent,
};

/// Why an intent produced no plan.
#[derive(Debug, Error)]
pub enum RiskReject {
    #[error("circuit breaker: risk level {level:.3} >= ceiling {ceiling:.3}")]
    CircuitBreaker { level: f64, ceiling: f64 },

    #[error("risk budget exhausted: no headroom left for {0}")]
    BudgetExhausted(Symbol),

    #[error("computed size rounds to zero for {0}")]
    ZeroSize(Symbol),

    #[error("flat intent carries nothing to execute")]
    FlatIntent,

    #[error("no reference data for instrument {0}")]
    UnknownInstrument(Symbol),
}

/// Outcome of risk adjustment.
#[derive(Debug)]
pub enum RiskDecision {
    Approved(OrderPlan),
    Rejected(RiskReject),
}

/// Aggregate portfolio risk picture. Owned by the trade executor and
/// recomputed from the position set plus market snapshots each cycle -
/// never persisted as a separate source of truth.
#[derive(Debug, Clone)]
pub struct PortfolioRiskState {
    pub equity: Decimal,
    pub peak_equity: Decimal,
    /// Signed notional exposure per instrument, at last marks
    exposure: HashMap<Symbol, Decimal>,
    /// Optimistic notional of plans in flight, released on reconciliation
    projected: Decimal,
}

impl PortfolioRiskState {
    pub fn new(equity: Decimal) -> Self {
        Self {
            equity,
            peak_equity: equity,
            exposure: HashMap::new(),
            projected: Decimal::ZERO,
        }
    }

    /// Rebuild exposures from the authoritative position set.
    pub fn recompute(&mut self, positions: &HashMap<Symbol, Position>, marks: &HashMap<Symbol, Decimal>) {
        self.exposure.clear();
        for (symbol, position) in positions {
            if position.is_flat() {
                continue;
            }
            let mark = marks
                .get(symbol)
                .copied()
                .unwrap_or(position.avg_entry_price);
            self.exposure.insert(symbol.clone(), position.notional(mark));
        }
    }

    /// Book realized PnL into equity, tracking the high-water mark.
    pub fn apply_realized(&mut self, pnl: Decimal) {
        self.equity += pnl;
        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
    }

    pub fn exposure(&self, symbol: &Symbol) -> Decimal {
        self.exposure.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    /// Sum of absolute exposures, excluding in-flight projections.
    pub fn gross_exposure(&self) -> Decimal {
        self.exposure.values().map(|n| n.abs()).sum()
    }

    /// Reserve headroom for a plan that was just approved.
    pub fn project(&mut self, notional: Decimal) {
        self.projected += notional.abs();
    }

    /// Release an optimistic projection once actual fills are known.
    pub fn release_projection(&mut self, notional: Decimal) {
        self.projected = (self.projected - notional.abs()).max(Decimal::ZERO);
    }

    /// Current aggregate risk level as a fraction of equity, including
    /// optimistic in-flight projections.
    pub fn risk_level(&self) -> f64 {
        if self.equity <= Decimal::ZERO {
            return f64::INFINITY;
        }
        let ratio = (self.gross_exposure() + self.projected) / self.equity;
        ratio.to_f64().unwrap_or(f64::INFINITY)
    }

    /// Drawdown from the equity high-water mark, as a fraction.
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= Decimal::ZERO {
            return 0.0;
        }
        let dd = (self.peak_equity - self.equity) / self.peak_equity;
        dd.to_f64().unwrap_or(0.0)
    }
}

/// Risk manager: sizing, volatility-derived stops, portfolio limits.
pub struct RiskManager {
    config: RiskConfig,
    instruments: HashMap<Symbol, Instrument>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, instruments: Vec<Instrument>) -> Self {
        let instruments = instruments
            .into_iter()
            .map(|i| (i.symbol.clone(), i))
            .collect();
        Self {
            config,
            instruments,
        }
    }

    /// Transform a candidate intent into a bounded order plan, or reject.
    ///
    /// On approval the state's projected exposure is bumped optimistically;
    /// the trade executor reconciles it against actual fills afterwards.
    pub fn adjust(
        &self,
        intent: &TradeIntent,
        state: &mut PortfolioRiskState,
        snapshot: &MarketSnapshot,
    ) -> RiskDecision {
        let Some(side) = intent.direction.side() else {
            return RiskDecision::Rejected(RiskReject::FlatIntent);
        };
        let Some(instrument) = self.instruments.get(&intent.symbol) else {
            return RiskDecision::Rejected(RiskReject::UnknownInstrument(intent.symbol.clone()));
        };

        let entry = match side {
            Side::Buy => snapshot.ask,
            Side::Sell => snapshot.bid,
        };
        if entry <= Decimal::ZERO {
            return RiskDecision::Rejected(RiskReject::ZeroSize(intent.symbol.clone()));
        }

        let current = state.exposure(&intent.symbol);
        let reduces_exposure = !current.is_zero()
            && ((current > Decimal::ZERO) == (side == Side::Sell));

        // Hard circuit breaker: above the ceiling only exposure-reducing
        // orders pass, regardless of intent confidence.
        let level = state.risk_level();
        if level >= self.config.circuit_breaker_ceiling && !reduces_exposure {
            debug!(
                symbol = %intent.symbol,
                level,
                ceiling = self.config.circuit_breaker_ceiling,
                "circuit breaker rejected intent"
            );
            return RiskDecision::Rejected(RiskReject::CircuitBreaker {
                level,
                ceiling: self.config.circuit_breaker_ceiling,
            });
        }

        let quantity = if reduces_exposure {
            // Closing trades are capped at the open exposure.
            let desired = state.equity * Decimal::try_from(intent.size_fraction)
                .unwrap_or(Decimal::ZERO)
                / entry;
            let cap = current.abs() / entry;
            self.round_to_lot(desired.min(cap), instrument)
        } else {
            let equity_f: f64 = state.equity.to_f64().unwrap_or(0.0);
            if equity_f <= 0.0 {
                return RiskDecision::Rejected(RiskReject::ZeroSize(intent.symbol.clone()));
            }
            let instr_fraction: f64 = (current.abs() / state.equity).to_f64().unwrap_or(0.0);
            let headroom_instrument = self.config.max_instrument_fraction - instr_fraction;
            let headroom_portfolio = self.config.max_portfolio_budget - level;
            let fraction = intent
                .size_fraction
                .min(headroom_instrument)
                .min(headroom_portfolio);
            if fraction <= 0.0 {
                return RiskDecision::Rejected(RiskReject::BudgetExhausted(intent.symbol.clone()));
            }
            let notional = state.equity * Decimal::try_from(fraction).unwrap_or(Decimal::ZERO);
            self.round_to_lot(notional / entry, instrument)
        };

        if quantity <= Decimal::ZERO {
            return RiskDecision::Rejected(RiskReject::ZeroSize(intent.symbol.clone()));
        }

        // Volatility-derived buffers, never narrower than the configured
        // minimum tick distance.
        let vol_dist = entry
            * Decimal::try_from(snapshot.volatility * self.config.stop_vol_multiple)
                .unwrap_or(Decimal::ZERO);
        let floor = instrument.tick_size * Decimal::from(self.config.min_tick_distance);
        let stop_distance = vol_dist.max(floor);
        let take_distance = stop_distance
            * Decimal::try_from(self.config.reward_risk_ratio).unwrap_or(Decimal::from(2));

        let (stop_loss, take_profit) = match side {
            Side::Buy => (entry - stop_distance, entry + take_distance),
            Side::Sell => (entry + stop_distance, entry - take_distance),
        };

        let plan = OrderPlan {
            id: Uuid::new_v4(),
            symbol: intent.symbol.clone(),
            side,
            quantity,
            order_type: OrderType::Market,
            entry_price: entry,
            stop_loss,
            take_profit,
            max_slippage: entry * Decimal::from(self.config.max_slippage_bps)
                / Decimal::from(10_000),
        };

        state.project(quantity * entry);
        RiskDecision::Approved(plan)
    }

    fn round_to_lot(&self, quantity: Decimal, instrument: &Instrument) -> Decimal {
        if instrument.lot_size <= Decimal::ZERO {
            return quantity;
        }
        (quantity / instrument.lot_size).floor() * instrument.lot_size
    }
}
