//! Core types - Strong typing for safety

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tradeable symbol (e.g., "BTCUSDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable reference data for a tradeable instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
}

/// Latest market state for one instrument. Replaced wholesale on each
/// update, never partially mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Rolling volatility estimate as a fraction of price (e.g. 0.02 = 2%)
    pub volatility: f64,
}

impl MarketSnapshot {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }
}

/// Externally produced directional signal. Consumed once per evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    /// Directional score in [-1, 1]
    pub score: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

/// Trade direction proposed by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    /// Order side needed to open exposure in this direction.
    pub fn side(&self) -> Option<Side> {
        match self {
            Direction::Long => Some(Side::Buy),
            Direction::Short => Some(Side::Sell),
            Direction::Flat => None,
        }
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    Trailing,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::Trailing => write!(f, "TRAILING"),
        }
    }
}

/// Candidate trade proposed by the strategy engine, before risk
/// adjustment. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub symbol: Symbol,
    pub direction: Direction,
    /// Requested size as a fraction of portfolio equity
    pub size_fraction: f64,
    pub confidence: f64,
    /// Name of the strategy variant that produced this intent
    pub strategy: String,
}

impl TradeIntent {
    /// A no-trade intent. Valid terminal outcome of evaluation, not an error.
    pub fn flat(symbol: Symbol, strategy: impl Into<String>) -> Self {
        Self {
            symbol,
            direction: Direction::Flat,
            size_fraction: 0.0,
            confidence: 0.0,
            strategy: strategy.into(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.direction == Direction::Flat
    }
}

/// Risk-bounded, executable order description derived from a TradeIntent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlan {
    pub id: Uuid,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    /// Reference entry price the stops were derived from
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Max tolerated slippage, in price units
    pub max_slippage: Decimal,
}

impl OrderPlan {
    /// Check the structural invariants: positive quantity and stop/take
    /// bracketing the entry consistently with the side.
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= Decimal::ZERO {
            return Err(format!("non-positive quantity {}", self.quantity));
        }
        let bracketed = match self.side {
            Side::Buy => self.stop_loss < self.entry_price && self.take_profit > self.entry_price,
            Side::Sell => self.stop_loss > self.entry_price && self.take_profit < self.entry_price,
        };
        if !bracketed {
            return Err(format!(
                "stop {} / take {} do not bracket entry {} for {}",
                self.stop_loss, self.take_profit, self.entry_price, self.side
            ));
        }
        Ok(())
    }
}

/// Execution report for (part of) a submitted order. Fills accumulate
/// monotonically: appended, never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Order lifecycle state.
///
/// Pending → Submitted → PartiallyFilled → Filled, with Cancelled and
/// Rejected as terminal failure exits from the non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected
        )
    }
}

/// Order lifecycle object, owned exclusively by the order manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Plan this order (or its parent) was created from
    pub plan_id: Uuid,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub state: OrderState,
    /// Child order ids when the plan was split into clips
    pub children: Vec<Uuid>,
    pub parent: Option<Uuid>,
    pub fills: Vec<Fill>,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_plan(plan: &OrderPlan) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plan_id: plan.id,
            symbol: plan.symbol.clone(),
            side: plan.side,
            order_type: plan.order_type,
            quantity: plan.quantity,
            state: OrderState::Pending,
            children: vec![],
            parent: None,
            fills: vec![],
            reject_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn child_of(parent: &Order, quantity: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plan_id: parent.plan_id,
            symbol: parent.symbol.clone(),
            side: parent.side,
            order_type: parent.order_type,
            quantity,
            state: OrderState::Pending,
            children: vec![],
            parent: Some(parent.id),
            fills: vec![],
            reject_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn filled_quantity(&self) -> Decimal {
        self.fills.iter().map(|f| f.quantity).sum()
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity()
    }

    /// Quantity-weighted average fill price, if any fills exist.
    pub fn avg_fill_price(&self) -> Option<Decimal> {
        let filled = self.filled_quantity();
        if filled.is_zero() {
            return None;
        }
        let notional: Decimal = self.fills.iter().map(|f| f.price * f.quantity).sum();
        Some(notional / filled)
    }
}

/// Net position per instrument. Updated only by applying fills,
/// never set directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed net quantity: positive long, negative short
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl Position {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Apply an executed fill and return the realized PnL it produced
    /// (zero while the position is growing).
    pub fn apply_fill(&mut self, side: Side, fill: &Fill) -> Decimal {
        let signed = match side {
            Side::Buy => fill.quantity,
            Side::Sell => -fill.quantity,
        };

        // Same direction (or opening): extend and re-average the entry.
        if self.quantity.is_zero() || (self.quantity > Decimal::ZERO) == (signed > Decimal::ZERO) {
            let old_notional = self.avg_entry_price * self.quantity.abs();
            let add_notional = fill.price * fill.quantity;
            self.quantity += signed;
            if !self.quantity.is_zero() {
                self.avg_entry_price = (old_notional + add_notional) / self.quantity.abs();
            }
            return Decimal::ZERO;
        }

        // Opposite direction: close out up to the open quantity.
        let closing = fill.quantity.min(self.quantity.abs());
        let realized = if self.quantity > Decimal::ZERO {
            (fill.price - self.avg_entry_price) * closing
        } else {
            (self.avg_entry_price - fill.price) * closing
        };
        self.quantity += signed;

        // Flipped through zero: the excess opens a new position at the fill price.
        if self.quantity.is_zero() {
            self.avg_entry_price = Decimal::ZERO;
            self.unrealized_pnl = Decimal::ZERO;
        } else if (self.quantity > Decimal::ZERO) != (signed < Decimal::ZERO) {
            self.avg_entry_price = fill.price;
        }
        realized
    }

    /// Refresh unrealized PnL against a mark price.
    pub fn mark(&mut self, price: Decimal) {
        if self.quantity.is_zero() {
            self.unrealized_pnl = Decimal::ZERO;
        } else if self.quantity > Decimal::ZERO {
            self.unrealized_pnl = (price - self.avg_entry_price) * self.quantity;
        } else {
            self.unrealized_pnl = (self.avg_entry_price - price) * self.quantity.abs();
        }
    }

    /// Signed notional value at a mark price.
    pub fn notional(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }
}

/// Record of one completed trade cycle, appended to the ledger and fed
/// back into strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub symbol: Symbol,
    pub strategy: String,
    pub plan_id: Uuid,
    pub side: Side,
    pub order_type: OrderType,
    pub requested_quantity: Decimal,
    pub filled_quantity: Decimal,
    pub entry_price: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub realized_pnl: Decimal,
    pub confidence: f64,
    pub final_state: OrderState,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl OutcomeRecord {
    /// Wall-clock delay between submission and completion, in milliseconds.
    pub fn execution_ms(&self) -> i64 {
        (self.completed_at - self.submitted_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(price: i64, qty: i64) -> Fill {
        Fill {
            price: Decimal::from(price),
            quantity: Decimal::from(qty),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn position_averages_entry_on_growth() {
        let mut pos = Position::new(Symbol::new("BTCUSDT"));
        assert_eq!(pos.apply_fill(Side::Buy, &fill(100, 1)), Decimal::ZERO);
        assert_eq!(pos.apply_fill(Side::Buy, &fill(200, 1)), Decimal::ZERO);
        assert_eq!(pos.quantity, Decimal::from(2));
        assert_eq!(pos.avg_entry_price, Decimal::from(150));
    }

    #[test]
    fn position_realizes_pnl_on_close() {
        let mut pos = Position::new(Symbol::new("BTCUSDT"));
        pos.apply_fill(Side::Buy, &fill(100, 2));
        let realized = pos.apply_fill(Side::Sell, &fill(110, 2));
        assert_eq!(realized, Decimal::from(20));
        assert!(pos.is_flat());
    }

    #[test]
    fn plan_bracket_invariant() {
        let plan = OrderPlan {
            id: Uuid::new_v4(),
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Buy,
            quantity: Decimal::ONE,
            order_type: OrderType::Market,
            entry_price: Decimal::from(100),
            stop_loss: Decimal::from(98),
            take_profit: Decimal::from(104),
            max_slippage: Decimal::ONE,
        };
        assert!(plan.validate().is_ok());

        let inverted = OrderPlan {
            stop_loss: Decimal::from(104),
            take_profit: Decimal::from(98),
            ..plan
        };
        assert!(inverted.validate().is_err());
    }
}
