//! Paper venue - simulated fills with slippage and fees
//!
//! Used both by paper-mode live trading and by the backtester. Fills are
//! a deterministic function of the current marks and the configured
//! slippage/fee schedule, which keeps replays reproducible.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::core::{
    BacktestConfig, Error, Fill, MarketSnapshot, Order, OrderVenue, Result, Side, Symbol,
};

/// Simulated execution venue.
pub struct PaperVenue {
    slippage_bps: Decimal,
    fee_bps: Decimal,
    marks: Mutex<HashMap<Symbol, (Decimal, Decimal)>>,
    pending: Mutex<HashMap<Uuid, Vec<Fill>>>,
}

impl PaperVenue {
    pub fn new(config: &BacktestConfig) -> Self {
        Self {
            slippage_bps: Decimal::from(config.slippage_bps),
            fee_bps: Decimal::from(config.fee_bps),
            marks: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Update the marks this venue fills against.
    pub fn set_mark(&self, snapshot: &MarketSnapshot) {
        self.marks
            .lock()
            .insert(snapshot.symbol.clone(), (snapshot.bid, snapshot.ask));
    }

    /// Fill price: cross the touch, pay slippage, fold the fee into the
    /// price so downstream PnL already includes costs.
    fn fill_price(&self, side: Side, bid: Decimal, ask: Decimal) -> Decimal {
        let bps = Decimal::from(10_000);
        match side {
            Side::Buy => ask * (bps + self.slippage_bps + self.fee_bps) / bps,
            Side::Sell => bid * (bps - self.slippage_bps - self.fee_bps) / bps,
        }
    }
}

#[async_trait]
impl OrderVenue for PaperVenue {
    async fn submit(&self, order: &Order) -> Result<()> {
        let (bid, ask) = self
            .marks
            .lock()
            .get(&order.symbol)
            .copied()
            .ok_or_else(|| Error::Venue(format!("no mark for {}", order.symbol)))?;

        let price = self.fill_price(order.side, bid, ask);
        debug!(order_id = %order.id, %price, quantity = %order.quantity, "paper fill");
        self.pending.lock().entry(order.id).or_default().push(Fill {
            price,
            quantity: order.quantity,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn cancel(&self, order_id: Uuid) -> Result<()> {
        self.pending.lock().remove(&order_id);
        Ok(())
    }

    async fn query_fills(&self, order_id: Uuid) -> Result<Vec<Fill>> {
        Ok(self.pending.lock().remove(&order_id).unwrap_or_default())
    }

    fn observe(&self, snapshot: &MarketSnapshot) {
        self.set_mark(snapshot);
    }

    fn name(&self) -> &str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderPlan, OrderType};

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            symbol: Symbol::new("BTCUSDT"),
            timestamp: Utc::now(),
            last: Decimal::from(50_000),
            bid: Decimal::from(49_990),
            ask: Decimal::from(50_010),
            volatility: 0.02,
        }
    }

    fn order(side: Side) -> Order {
        let plan = OrderPlan {
            id: Uuid::new_v4(),
            symbol: Symbol::new("BTCUSDT"),
            side,
            quantity: Decimal::ONE,
            order_type: OrderType::Market,
            entry_price: Decimal::from(50_010),
            stop_loss: Decimal::from(49_000),
            take_profit: Decimal::from(52_000),
            max_slippage: Decimal::from(10),
        };
        Order::from_plan(&plan)
    }

    #[tokio::test]
    async fn buy_fills_above_ask_sell_below_bid() {
        let venue = PaperVenue::new(&BacktestConfig {
            slippage_bps: 5,
            fee_bps: 10,
        });
        venue.set_mark(&snapshot());

        let buy = order(Side::Buy);
        venue.submit(&buy).await.unwrap();
        let fills = venue.query_fills(buy.id).await.unwrap();
        assert_eq!(fills.len(), 1);
        assert!(fills[0].price > Decimal::from(50_010));

        let sell = order(Side::Sell);
        venue.submit(&sell).await.unwrap();
        let fills = venue.query_fills(sell.id).await.unwrap();
        assert!(fills[0].price < Decimal::from(49_990));
    }

    #[tokio::test]
    async fn fills_drain_once() {
        let venue = PaperVenue::new(&BacktestConfig {
            slippage_bps: 0,
            fee_bps: 0,
        });
        venue.set_mark(&snapshot());
        let o = order(Side::Buy);
        venue.submit(&o).await.unwrap();
        assert_eq!(venue.query_fills(o.id).await.unwrap().len(), 1);
        assert!(venue.query_fills(o.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_mark_is_a_venue_error() {
        let venue = PaperVenue::new(&BacktestConfig {
            slippage_bps: 0,
            fee_bps: 0,
        });
        let o = order(Side::Buy);
        assert!(matches!(venue.submit(&o).await, Err(Error::Venue(_))));
    }
}
