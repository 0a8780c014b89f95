//! Backtester - historical replay through the live decision pipeline
//!
//! The replay calls the exact decision function the live executor calls,
//! against the same risk manager and the same paper fill model, so a
//! snapshot series plus a config always reproduces the live plan
//! sequence. Only fill timing differs: the paper venue fills immediately,
//! so each plan completes within its own tick.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::{
    Config, MarketSnapshot, OrderPlan, OrderState, OrderVenue, OutcomeRecord, Result, Symbol,
};
use crate::execution::OrderManager;
use crate::executor::{decide, PortfolioState};
use crate::report::PerformanceMetrics;
use crate::risk::RiskManager;
use crate::strategies::StrategyEngine;
use crate::venues::PaperVenue;

/// Replay summary: every plan the pipeline produced, every completed
/// trade, and the aggregate performance metrics.
#[derive(Debug)]
pub struct BacktestReport {
    pub initial_equity: Decimal,
    /// Equity after the replay, including unrealized PnL at final marks
    pub final_equity: Decimal,
    pub plans: Vec<OrderPlan>,
    pub outcomes: Vec<OutcomeRecord>,
    pub metrics: PerformanceMetrics,
}

/// Historical replay driver.
pub struct Backtester {
    config: Arc<Config>,
}

impl Backtester {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Replay with the standard variant set.
    pub async fn run(&self, snapshots: &[MarketSnapshot]) -> Result<BacktestReport> {
        let mut engine = StrategyEngine::new(&self.config.trading);
        self.run_with_engine(&mut engine, snapshots).await
    }

    /// Replay a time-ordered snapshot series through evaluate → adjust →
    /// submit, filling against the configured slippage/fee model.
    pub async fn run_with_engine(
        &self,
        engine: &mut StrategyEngine,
        snapshots: &[MarketSnapshot],
    ) -> Result<BacktestReport> {
        let instruments = self
            .config
            .instruments
            .iter()
            .map(|i| i.to_instrument())
            .collect();
        let risk = RiskManager::new(self.config.risk.clone(), instruments);
        let venue = PaperVenue::new(&self.config.backtest);
        let orders = OrderManager::new(self.config.execution.clone());

        let initial_equity = self.config.risk.initial_equity;
        let mut state = PortfolioState::new(initial_equity);
        let mut marks: HashMap<Symbol, Decimal> = HashMap::new();
        let mut plans = Vec::new();
        let mut outcomes = Vec::new();

        info!(snapshots = snapshots.len(), "backtest replay starting");

        for snapshot in snapshots {
            venue.set_mark(snapshot);
            marks.insert(snapshot.symbol.clone(), snapshot.last);
            state.refresh(&marks);

            let (intent, plan) =
                decide(engine, &risk, &mut state.risk, snapshot, None, false);
            let Some(plan) = plan else { continue };
            plans.push(plan.clone());

            let parent_id = orders.submit(&plan, &venue).await?;
            let mut realized = Decimal::ZERO;
            for leaf in orders.leaves(parent_id) {
                if leaf.state.is_terminal() {
                    continue;
                }
                for fill in venue.query_fills(leaf.id).await? {
                    match orders.on_fill(leaf.id, fill.price, fill.quantity) {
                        Ok(_) => {
                            realized += state.apply_fill(&plan.symbol, plan.side, &fill, &marks);
                        }
                        Err(e) => warn!(order_id = %leaf.id, error = %e, "replay fill not applied"),
                    }
                }
            }
            state.risk.release_projection(plan.quantity * plan.entry_price);
            state.refresh(&marks);

            let final_state = orders
                .order(parent_id)
                .map(|o| o.state)
                .unwrap_or(OrderState::Rejected);
            let fills = orders.fills_for(parent_id);
            let filled_quantity: Decimal = fills.iter().map(|f| f.quantity).sum();
            let avg_fill_price = if filled_quantity.is_zero() {
                None
            } else {
                Some(
                    fills.iter().map(|f| f.price * f.quantity).sum::<Decimal>()
                        / filled_quantity,
                )
            };

            let outcome = OutcomeRecord {
                symbol: plan.symbol.clone(),
                strategy: intent.strategy.clone(),
                plan_id: plan.id,
                side: plan.side,
                order_type: plan.order_type,
                requested_quantity: plan.quantity,
                filled_quantity,
                entry_price: plan.entry_price,
                avg_fill_price,
                realized_pnl: realized,
                confidence: intent.confidence,
                final_state,
                // Simulated clock: the snapshot drives time, not the wall.
                submitted_at: snapshot.timestamp,
                completed_at: snapshot.timestamp,
            };
            debug!(
                symbol = %outcome.symbol,
                side = %outcome.side,
                quantity = %outcome.filled_quantity,
                pnl = %outcome.realized_pnl,
                "replay trade completed"
            );
            engine.record_outcome(&outcome);
            outcomes.push(outcome);
        }

        let unrealized: Decimal = state.positions.values().map(|p| p.unrealized_pnl).sum();
        let metrics = PerformanceMetrics::from_records(&outcomes);
        info!(
            trades = outcomes.len(),
            profit = %metrics.total_profit,
            "backtest replay finished"
        );

        Ok(BacktestReport {
            initial_equity,
            final_equity: state.risk.equity + unrealized,
            plans,
            outcomes,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Error, MarketFeed, RunMode, Side};
    use crate::executor::TradeExecutor;
    use crate::ledger::TradeLedger;
    use crate::strategies::{Strategy, StrategyScore};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex as SyncMutex;
    use rust_decimal::prelude::ToPrimitive;

    /// Deterministic momentum variant: long when the price rose since the
    /// previous tick, short when it fell.
    struct TickMomentum {
        last: Option<f64>,
    }

    impl TickMomentum {
        fn new() -> Self {
            Self { last: None }
        }
    }

    impl Strategy for TickMomentum {
        fn name(&self) -> &'static str {
            "tick_momentum"
        }

        fn score(&mut self, snapshot: &MarketSnapshot) -> Option<StrategyScore> {
            let price = snapshot.last.to_f64().unwrap_or(0.0);
            let prev = self.last.replace(price)?;
            if price > prev {
                Some(StrategyScore::new(0.8, 0.9))
            } else if price < prev {
                Some(StrategyScore::new(-0.8, 0.9))
            } else {
                None
            }
        }
    }

    struct ReplayFeed {
        snapshots: SyncMutex<Vec<MarketSnapshot>>,
    }

    #[async_trait]
    impl MarketFeed for ReplayFeed {
        async fn fetch_snapshot(&self, _symbol: &Symbol) -> Result<MarketSnapshot> {
            let mut queue = self.snapshots.lock();
            if queue.is_empty() {
                return Err(Error::Venue("replay exhausted".to_string()));
            }
            Ok(queue.remove(0))
        }

        fn name(&self) -> &str {
            "replay"
        }
    }

    fn config() -> Arc<Config> {
        let mut config = Config::default();
        config.app.mode = RunMode::Paper;
        config.trading.min_confidence = 0.2;
        config.execution.fill_wait_ms = 1_000;
        config.execution.fill_poll_ms = 5;
        config.execution.venue_timeout_ms = 200;
        Arc::new(config)
    }

    fn series(prices: &[i64]) -> Vec<MarketSnapshot> {
        prices
            .iter()
            .map(|p| MarketSnapshot {
                symbol: Symbol::new("BTCUSDT"),
                timestamp: Utc::now(),
                last: Decimal::from(*p),
                bid: Decimal::from(*p) - Decimal::ONE,
                ask: Decimal::from(*p) + Decimal::ONE,
                volatility: 0.02,
            })
            .collect()
    }

    fn momentum_engine(config: &Config) -> StrategyEngine {
        StrategyEngine::with_variants(vec![Box::new(TickMomentum::new())], &config.trading)
    }

    #[tokio::test]
    async fn replay_produces_trades_and_metrics() {
        let config = config();
        let snapshots = series(&[
            50_000, 50_100, 50_250, 50_200, 50_400, 50_350, 50_500, 50_450, 50_600,
        ]);
        let backtester = Backtester::new(config.clone());
        let mut engine = momentum_engine(&config);
        let report = backtester
            .run_with_engine(&mut engine, &snapshots)
            .await
            .unwrap();

        assert!(!report.plans.is_empty());
        assert_eq!(report.plans.len(), report.outcomes.len());
        assert_eq!(report.metrics.total_trades, report.outcomes.len());
        for outcome in &report.outcomes {
            assert_eq!(outcome.final_state, OrderState::Filled);
        }
        // First rising tick goes long.
        assert_eq!(report.plans[0].side, Side::Buy);
    }

    #[tokio::test]
    async fn identical_replays_yield_identical_plan_sequences() {
        let config = config();
        let snapshots = series(&[
            50_000, 50_100, 49_900, 50_300, 50_200, 50_500, 50_100, 50_600, 50_400,
        ]);
        let backtester = Backtester::new(config.clone());

        let mut engine_a = momentum_engine(&config);
        let a = backtester
            .run_with_engine(&mut engine_a, &snapshots)
            .await
            .unwrap();
        let mut engine_b = momentum_engine(&config);
        let b = backtester
            .run_with_engine(&mut engine_b, &snapshots)
            .await
            .unwrap();

        assert_eq!(a.plans.len(), b.plans.len());
        for (pa, pb) in a.plans.iter().zip(b.plans.iter()) {
            assert_eq!(pa.symbol, pb.symbol);
            assert_eq!(pa.side, pb.side);
            assert_eq!(pa.quantity, pb.quantity);
            assert_eq!(pa.stop_loss, pb.stop_loss);
            assert_eq!(pa.take_profit, pb.take_profit);
        }
        assert_eq!(a.final_equity, b.final_equity);
    }

    #[tokio::test]
    async fn replay_matches_the_live_pipeline() {
        let config = config();
        let snapshots = series(&[
            50_000, 50_100, 50_050, 50_300, 50_150, 50_400, 50_250, 50_500,
        ]);

        let backtester = Backtester::new(config.clone());
        let mut engine = momentum_engine(&config);
        let replay = backtester
            .run_with_engine(&mut engine, &snapshots)
            .await
            .unwrap();

        // Same series through the live executor, paper venue, same config.
        let feed = Arc::new(ReplayFeed {
            snapshots: SyncMutex::new(snapshots.clone()),
        });
        let venue = Arc::new(PaperVenue::new(&config.backtest));
        let executor = TradeExecutor::with_engine(
            config.clone(),
            feed,
            venue.clone(),
            Arc::new(TradeLedger::new()),
            momentum_engine(&config),
        );
        let instrument = executor.instruments()[0].clone();
        for _ in &snapshots {
            executor.run_cycle(&instrument).await.unwrap();
        }

        let live = executor.ledger().records();
        assert_eq!(replay.outcomes.len(), live.len());
        for (r, l) in replay.outcomes.iter().zip(live.iter()) {
            assert_eq!(r.symbol, l.symbol);
            assert_eq!(r.side, l.side);
            assert_eq!(r.requested_quantity, l.requested_quantity);
            assert_eq!(r.entry_price, l.entry_price);
            assert_eq!(r.realized_pnl, l.realized_pnl);
        }
    }
}
