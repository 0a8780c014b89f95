//! Trade executor - the orchestration loop
//!
//! One coordinated cycle per evaluation tick per tracked instrument:
//! snapshot → strategy evaluate → risk adjust → order submission →
//! fill reconciliation → outcome feedback. Per-instrument cycles run
//! concurrently and fail independently; everything touching the shared
//! portfolio state goes through a single mutex scope so two instruments
//! can never double-spend the same risk budget.

use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::{
    Config, Error, Fill, Instrument, MarketFeed, MarketSnapshot, OrderPlan, OrderState,
    OrderVenue, OutcomeRecord, Position, Result, Side, Signal, Symbol, TradeIntent,
};
use crate::execution::OrderManager;
use crate::ledger::TradeLedger;
use crate::market::MarketCache;
use crate::risk::{PortfolioRiskState, RiskDecision, RiskManager};
use crate::strategies::StrategyEngine;

/// Positions plus the aggregate risk picture, guarded together. The
/// executor owns this; the risk manager only reads/projects through it.
#[derive(Debug, Clone)]
pub struct PortfolioState {
    pub risk: PortfolioRiskState,
    pub positions: HashMap<Symbol, Position>,
}

impl PortfolioState {
    pub fn new(equity: Decimal) -> Self {
        Self {
            risk: PortfolioRiskState::new(equity),
            positions: HashMap::new(),
        }
    }

    /// Book one actual fill: position first, then equity, then exposures.
    /// Returns the realized PnL.
    pub fn apply_fill(
        &mut self,
        symbol: &Symbol,
        side: Side,
        fill: &Fill,
        marks: &HashMap<Symbol, Decimal>,
    ) -> Decimal {
        let position = self
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::new(symbol.clone()));
        let realized = position.apply_fill(side, fill);
        if !realized.is_zero() {
            self.risk.apply_realized(realized);
        }
        self.refresh(marks);
        realized
    }

    /// Re-mark positions and rebuild exposures from the position set.
    pub fn refresh(&mut self, marks: &HashMap<Symbol, Decimal>) {
        for (symbol, position) in self.positions.iter_mut() {
            if let Some(mark) = marks.get(symbol) {
                position.mark(*mark);
            }
        }
        self.risk.recompute(&self.positions, marks);
    }
}

/// Whether executing this intent would shrink the existing exposure on
/// its symbol. Only such intents pass in flatten-only mode.
fn reduces_exposure(state: &PortfolioRiskState, intent: &TradeIntent) -> bool {
    let exposure = state.exposure(&intent.symbol);
    !exposure.is_zero()
        && ((exposure > Decimal::ZERO) == (intent.direction.side() == Some(Side::Sell)))
}

/// The decision step shared verbatim by live execution and backtesting:
/// evaluate the strategy engine, then risk-adjust the intent. Identical
/// inputs always yield the identical plan fields.
pub fn decide(
    engine: &mut StrategyEngine,
    risk: &RiskManager,
    state: &mut PortfolioRiskState,
    snapshot: &MarketSnapshot,
    signal: Option<&Signal>,
    flatten_only: bool,
) -> (TradeIntent, Option<OrderPlan>) {
    let intent = engine.evaluate(snapshot, signal);
    if intent.is_flat() {
        return (intent, None);
    }

    if flatten_only && !reduces_exposure(state, &intent) {
        info!(symbol = %intent.symbol, "flatten-only mode: exposure-increasing intent skipped");
        return (intent, None);
    }

    match risk.adjust(&intent, state, snapshot) {
        RiskDecision::Approved(plan) => (intent, Some(plan)),
        RiskDecision::Rejected(reject) => {
            // Expected outcome of normal operation, not a failure.
            debug!(symbol = %intent.symbol, %reject, "intent rejected by risk manager");
            (intent, None)
        }
    }
}

/// Trade executor: owns the evaluation cycle, the portfolio state, and
/// the outcome feedback loop.
pub struct TradeExecutor {
    config: Arc<Config>,
    instruments: Vec<Instrument>,
    feed: Arc<dyn MarketFeed>,
    venue: Arc<dyn OrderVenue>,
    cache: Arc<MarketCache>,
    engine: Mutex<StrategyEngine>,
    risk: RiskManager,
    state: Mutex<PortfolioState>,
    orders: Arc<OrderManager>,
    ledger: Arc<TradeLedger>,
    /// Pending external signals, consumed once on the next cycle
    signals: Mutex<HashMap<Symbol, Signal>>,
    /// Degraded mode: only exposure-reducing orders until operator reset
    flatten_only: AtomicBool,
}

impl TradeExecutor {
    pub fn new(
        config: Arc<Config>,
        feed: Arc<dyn MarketFeed>,
        venue: Arc<dyn OrderVenue>,
        ledger: Arc<TradeLedger>,
    ) -> Self {
        let engine = StrategyEngine::new(&config.trading);
        Self::with_engine(config, feed, venue, ledger, engine)
    }

    /// Run with a non-standard variant set.
    pub fn with_engine(
        config: Arc<Config>,
        feed: Arc<dyn MarketFeed>,
        venue: Arc<dyn OrderVenue>,
        ledger: Arc<TradeLedger>,
        engine: StrategyEngine,
    ) -> Self {
        let instruments: Vec<Instrument> = config
            .instruments
            .iter()
            .map(|i| i.to_instrument())
            .collect();
        Self {
            engine: Mutex::new(engine),
            risk: RiskManager::new(config.risk.clone(), instruments.clone()),
            state: Mutex::new(PortfolioState::new(config.risk.initial_equity)),
            orders: Arc::new(OrderManager::new(config.execution.clone())),
            cache: Arc::new(MarketCache::new()),
            signals: Mutex::new(HashMap::new()),
            flatten_only: AtomicBool::new(false),
            instruments,
            feed,
            venue,
            ledger,
            config,
        }
    }

    /// Queue an external signal for the next evaluation of its symbol.
    pub async fn push_signal(&self, signal: Signal) {
        self.signals.lock().await.insert(signal.symbol.clone(), signal);
    }

    /// Main loop: one evaluation tick per polling interval, all tracked
    /// instruments concurrently. On shutdown every working order is
    /// reconciled before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.trading.poll_interval_ms));
        info!(
            instruments = self.instruments.len(),
            venue = self.venue.name(),
            feed = self.feed.name(),
            "trade executor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let cycles = self.instruments.iter().map(|instrument| async move {
                        if let Err(e) = self.run_cycle(instrument).await {
                            // One instrument failing never blocks the others.
                            warn!(symbol = %instrument.symbol, error = %e, "cycle failed");
                        }
                    });
                    join_all(cycles).await;
                }
                _ = shutdown.changed() => {
                    info!("shutdown requested, reconciling open orders");
                    self.reconcile_open_orders().await;
                    return Ok(());
                }
            }
        }
    }

    /// One evaluation cycle for one instrument.
    pub async fn run_cycle(&self, instrument: &Instrument) -> Result<()> {
        let symbol = &instrument.symbol;
        let fetch_timeout = Duration::from_millis(self.config.execution.venue_timeout_ms);
        let snapshot = timeout(fetch_timeout, self.feed.fetch_snapshot(symbol))
            .await
            .map_err(|_| Error::VenueTimeout(format!("market data fetch for {symbol}")))??;
        self.cache.update(snapshot.clone());
        self.venue.observe(&snapshot);

        let signal = self.signals.lock().await.remove(symbol);
        let marks = self.marks();

        // Single-writer scope over the shared risk state.
        let (intent, plan) = {
            let mut engine = self.engine.lock().await;
            let mut state = self.state.lock().await;
            state.refresh(&marks);
            decide(
                &mut engine,
                &self.risk,
                &mut state.risk,
                &snapshot,
                signal.as_ref(),
                self.flatten_only.load(Ordering::Acquire),
            )
        };

        match plan {
            Some(plan) => self.execute_plan(&intent, plan).await,
            None => Ok(()),
        }
    }

    /// Risk-adjust and execute an externally approved intent (e.g. an
    /// accepted rebalancing recommendation).
    pub async fn submit_intent(&self, intent: TradeIntent) -> Result<()> {
        let snapshot = self.cache.get(&intent.symbol).ok_or_else(|| {
            Error::InvalidState(format!("no market snapshot for {}", intent.symbol))
        })?;
        let marks = self.marks();
        let plan = {
            let mut state = self.state.lock().await;
            state.refresh(&marks);
            // Degraded mode gates every submission path, not just the
            // evaluation loop.
            if self.flatten_only.load(Ordering::Acquire)
                && !reduces_exposure(&state.risk, &intent)
            {
                info!(symbol = %intent.symbol, "flatten-only mode: approved intent skipped");
                return Ok(());
            }
            match self.risk.adjust(&intent, &mut state.risk, &snapshot) {
                RiskDecision::Approved(plan) => plan,
                RiskDecision::Rejected(reject) => {
                    info!(symbol = %intent.symbol, %reject, "approved intent rejected by risk manager");
                    return Ok(());
                }
            }
        };
        self.execute_plan(&intent, plan).await
    }

    /// Submit a plan and drive it to a terminal state, booking actual
    /// fills as they arrive. The fills are authoritative and supersede
    /// the risk manager's optimistic projection.
    async fn execute_plan(&self, intent: &TradeIntent, plan: OrderPlan) -> Result<()> {
        let submitted_at = chrono::Utc::now();
        let parent_id = match self.orders.submit(&plan, self.venue.as_ref()).await {
            Ok(id) => id,
            Err(e) => {
                // A plan that never reached the venue holds no exposure;
                // leaving its projection booked would ratchet the risk
                // level upward forever.
                let mut state = self.state.lock().await;
                state.risk.release_projection(plan.quantity * plan.entry_price);
                return Err(e);
            }
        };
        let (final_state, realized) = self.await_completion(parent_id).await;

        // Reconcile the optimistic projection against reality.
        {
            let mut state = self.state.lock().await;
            state.risk.release_projection(plan.quantity * plan.entry_price);
            state.refresh(&self.marks());
        }

        let fills = self.orders.fills_for(parent_id);
        let filled_quantity: Decimal = fills.iter().map(|f| f.quantity).sum();
        let avg_fill_price = if filled_quantity.is_zero() {
            None
        } else {
            Some(fills.iter().map(|f| f.price * f.quantity).sum::<Decimal>() / filled_quantity)
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
            submitted_at,
            completed_at: chrono::Utc::now(),
        };
        self.ledger.append(outcome.clone());
        self.engine.lock().await.record_outcome(&outcome);

        self.check_consistency();
        Ok(())
    }

    /// Poll the venue for fills until the order reaches a terminal state
    /// or the wait budget is exhausted, then cancel the remainder.
    async fn await_completion(&self, parent_id: Uuid) -> (OrderState, Decimal) {
        let deadline =
            Instant::now() + Duration::from_millis(self.config.execution.fill_wait_ms);
        let poll = Duration::from_millis(self.config.execution.fill_poll_ms);
        let venue_timeout = Duration::from_millis(self.config.execution.venue_timeout_ms);
        let mut realized = Decimal::ZERO;

        loop {
            for leaf in self.orders.leaves(parent_id) {
                if leaf.state.is_terminal() {
                    continue;
                }
                match timeout(venue_timeout, self.venue.query_fills(leaf.id)).await {
                    Ok(Ok(fills)) => {
                        for fill in fills {
                            realized += self.ingest_fill(&leaf.symbol, leaf.side, leaf.id, &fill).await;
                        }
                    }
                    Ok(Err(e)) => warn!(order_id = %leaf.id, error = %e, "fill query failed"),
                    Err(_) => warn!(order_id = %leaf.id, "fill query timed out"),
                }
            }

            let state = self
                .orders
                .order(parent_id)
                .map(|o| o.state)
                .unwrap_or(OrderState::Rejected);
            if state.is_terminal() {
                return (state, realized);
            }

            if Instant::now() >= deadline {
                warn!(order_id = %parent_id, "fill wait exhausted, cancelling remainder");
                if let Err(e) = self.orders.cancel(parent_id, self.venue.as_ref()).await {
                    // The venue would not confirm: close the book locally so
                    // nothing stays Pending forever, and flag the divergence.
                    error!(order_id = %parent_id, error = %e, "cancel failed during reconciliation");
                    for leaf in self.orders.leaves(parent_id) {
                        if !leaf.state.is_terminal() {
                            self.orders.on_cancel(leaf.id);
                        }
                    }
                }
                let state = self
                    .orders
                    .order(parent_id)
                    .map(|o| o.state)
                    .unwrap_or(OrderState::Cancelled);
                return (state, realized);
            }

            tokio::time::sleep(poll).await;
        }
    }

    /// Apply one reported fill: state machine first, then the books.
    /// Anomalous fills (terminal/unknown order, overfill) are recorded by
    /// the order manager and never reach the position set.
    async fn ingest_fill(&self, symbol: &Symbol, side: Side, order_id: Uuid, fill: &Fill) -> Decimal {
        match self.orders.on_fill(order_id, fill.price, fill.quantity) {
            Ok(_) => {
                let marks = self.marks();
                let mut state = self.state.lock().await;
                state.apply_fill(symbol, side, fill, &marks)
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "fill not applied");
                Decimal::ZERO
            }
        }
    }

    /// Reconcile every working order before exit: drain reported fills,
    /// then cancel. Nothing in Submitted/PartiallyFilled is abandoned.
    pub async fn reconcile_open_orders(&self) {
        let venue_timeout = Duration::from_millis(self.config.execution.venue_timeout_ms);
        for order in self.orders.open_orders() {
            if let Ok(Ok(fills)) = timeout(venue_timeout, self.venue.query_fills(order.id)).await
            {
                for fill in fills {
                    self.ingest_fill(&order.symbol, order.side, order.id, &fill)
                        .await;
                }
            }
            if let Err(e) = self.orders.cancel(order.id, self.venue.as_ref()).await {
                error!(order_id = %order.id, error = %e, "cancel failed during shutdown reconciliation");
                self.orders.on_cancel(order.id);
            }
        }
    }

    /// Persistent reconciliation divergence halts new-order submission
    /// (flatten-only) until an operator resets it. Degraded, not dead.
    fn check_consistency(&self) {
        if self.orders.anomaly_count() >= self.config.execution.anomaly_threshold
            && !self.flatten_only.load(Ordering::Acquire)
        {
            error!(
                anomalies = self.orders.anomaly_count(),
                "reconciliation divergence: entering flatten-only mode"
            );
            self.flatten_only.store(true, Ordering::Release);
        }
    }

    fn marks(&self) -> HashMap<Symbol, Decimal> {
        self.cache
            .all()
            .into_iter()
            .map(|(symbol, snap)| (symbol, snap.last))
            .collect()
    }

    pub fn is_flatten_only(&self) -> bool {
        self.flatten_only.load(Ordering::Acquire)
    }

    /// Operator action: leave (or force) degraded mode.
    pub fn set_flatten_only(&self, on: bool) {
        self.flatten_only.store(on, Ordering::Release);
    }

    /// Read-only views for the dashboard/reporting layer.
    pub async fn portfolio(&self) -> PortfolioState {
        self.state.lock().await.clone()
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn order_manager(&self) -> &OrderManager {
        &self.orders
    }

    pub fn market_cache(&self) -> &MarketCache {
        &self.cache
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Direction, RunMode};
    use crate::strategies::{Strategy, StrategyScore};
    use crate::venues::PaperVenue;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex as SyncMutex;

    /// Always-long variant so cycles trade without history warm-up.
    struct AlwaysLong;

    impl Strategy for AlwaysLong {
        fn name(&self) -> &'static str {
            "always_long"
        }
        fn score(&mut self, _snapshot: &MarketSnapshot) -> Option<StrategyScore> {
            Some(StrategyScore::new(0.9, 0.9))
        }
    }

    /// Feed that replays a scripted sequence of snapshots.
    struct ScriptedFeed {
        snapshots: SyncMutex<HashMap<Symbol, Vec<MarketSnapshot>>>,
    }

    impl ScriptedFeed {
        fn new() -> Self {
            Self {
                snapshots: SyncMutex::new(HashMap::new()),
            }
        }

        fn push(&self, snapshot: MarketSnapshot) {
            self.snapshots
                .lock()
                .entry(snapshot.symbol.clone())
                .or_default()
                .push(snapshot);
        }
    }

    #[async_trait]
    impl MarketFeed for ScriptedFeed {
        async fn fetch_snapshot(&self, symbol: &Symbol) -> Result<MarketSnapshot> {
            let mut map = self.snapshots.lock();
            let queue = map
                .get_mut(symbol)
                .ok_or_else(|| Error::Validation(format!("no script for {symbol}")))?;
            if queue.is_empty() {
                return Err(Error::Venue("script exhausted".to_string()));
            }
            Ok(queue.remove(0))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.app.mode = RunMode::Paper;
        config.trading.min_confidence = 0.2;
        config.execution.fill_wait_ms = 1_000;
        config.execution.fill_poll_ms = 5;
        config.execution.venue_timeout_ms = 200;
        config
    }

    fn snapshot(symbol: &str, last: i64, vol: f64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: Symbol::new(symbol),
            timestamp: Utc::now(),
            last: Decimal::from(last),
            bid: Decimal::from(last) - Decimal::ONE,
            ask: Decimal::from(last) + Decimal::ONE,
            volatility: vol,
        }
    }

    fn executor(config: Config) -> (Arc<TradeExecutor>, Arc<ScriptedFeed>, Arc<PaperVenue>) {
        let config = Arc::new(config);
        let feed = Arc::new(ScriptedFeed::new());
        let venue = Arc::new(PaperVenue::new(&config.backtest));
        let engine =
            StrategyEngine::with_variants(vec![Box::new(AlwaysLong)], &config.trading);
        let executor = Arc::new(TradeExecutor::with_engine(
            config,
            feed.clone(),
            venue.clone(),
            Arc::new(TradeLedger::new()),
            engine,
        ));
        (executor, feed, venue)
    }

    #[tokio::test]
    async fn approved_intent_becomes_a_booked_position() {
        let (executor, feed, venue) = executor(test_config());
        let instrument = executor.instruments()[0].clone();
        let snap = snapshot("BTCUSDT", 50_000, 0.02);
        venue.set_mark(&snap);
        feed.push(snap.clone());
        executor.cache.update(snap);

        executor
            .push_signal(Signal {
                symbol: instrument.symbol.clone(),
                timestamp: Utc::now(),
                score: 1.0,
                confidence: 1.0,
            })
            .await;
        executor.run_cycle(&instrument).await.unwrap();

        let portfolio = executor.portfolio().await;
        let position = portfolio.positions.get(&instrument.symbol).unwrap();
        assert!(position.quantity > Decimal::ZERO);
        assert_eq!(executor.ledger().len(), 1);
        let record = &executor.ledger().records()[0];
        assert_eq!(record.final_state, OrderState::Filled);
        assert_eq!(record.filled_quantity, record.requested_quantity);
    }

    #[tokio::test]
    async fn one_failing_instrument_does_not_block_others() {
        let mut config = test_config();
        config.instruments.push(crate::core::InstrumentConfig {
            symbol: "ETHUSDT".to_string(),
            tick_size: Decimal::new(1, 2),
            lot_size: Decimal::new(1, 4),
        });
        let (executor, feed, venue) = executor(config);

        // Only ETH gets data; the BTC cycle must fail without poisoning it.
        let snap = snapshot("ETHUSDT", 3_000, 0.02);
        venue.set_mark(&snap);
        feed.push(snap.clone());
        executor.cache.update(snap);
        executor
            .push_signal(Signal {
                symbol: Symbol::new("ETHUSDT"),
                timestamp: Utc::now(),
                score: 1.0,
                confidence: 1.0,
            })
            .await;

        let instruments = executor.instruments().to_vec();
        let btc = instruments.iter().find(|i| i.symbol.as_str() == "BTCUSDT").unwrap();
        let eth = instruments.iter().find(|i| i.symbol.as_str() == "ETHUSDT").unwrap();

        assert!(executor.run_cycle(btc).await.is_err());
        executor.run_cycle(eth).await.unwrap();
        let portfolio = executor.portfolio().await;
        assert!(portfolio.positions.contains_key(&Symbol::new("ETHUSDT")));
    }

    #[tokio::test]
    async fn flatten_only_skips_exposure_increasing_intents() {
        let (executor, feed, venue) = executor(test_config());
        let instrument = executor.instruments()[0].clone();
        executor.set_flatten_only(true);

        let snap = snapshot("BTCUSDT", 50_000, 0.02);
        venue.set_mark(&snap);
        feed.push(snap.clone());
        executor.cache.update(snap);
        executor
            .push_signal(Signal {
                symbol: instrument.symbol.clone(),
                timestamp: Utc::now(),
                score: 1.0,
                confidence: 1.0,
            })
            .await;

        executor.run_cycle(&instrument).await.unwrap();
        let portfolio = executor.portfolio().await;
        assert!(portfolio.positions.is_empty());
        assert!(executor.ledger().is_empty());
    }

    #[tokio::test]
    async fn flatten_only_gates_submitted_intents_too() {
        let (executor, _feed, venue) = executor(test_config());
        executor.set_flatten_only(true);

        let snap = snapshot("BTCUSDT", 50_000, 0.02);
        venue.set_mark(&snap);
        executor.cache.update(snap);

        let intent = TradeIntent {
            symbol: Symbol::new("BTCUSDT"),
            direction: Direction::Long,
            size_fraction: 0.05,
            confidence: 1.0,
            strategy: "rebalance".to_string(),
        };
        executor.submit_intent(intent).await.unwrap();

        let portfolio = executor.portfolio().await;
        assert!(portfolio.positions.is_empty());
        assert!(executor.ledger().is_empty());
    }

    #[tokio::test]
    async fn flatten_only_still_lets_submitted_intents_reduce() {
        let (executor, feed, venue) = executor(test_config());
        let instrument = executor.instruments()[0].clone();
        let snap = snapshot("BTCUSDT", 50_000, 0.02);
        venue.set_mark(&snap);
        feed.push(snap.clone());
        executor.cache.update(snap);
        executor.run_cycle(&instrument).await.unwrap();

        let before = executor.portfolio().await.positions[&instrument.symbol].quantity;
        assert!(before > Decimal::ZERO);

        executor.set_flatten_only(true);
        let intent = TradeIntent {
            symbol: instrument.symbol.clone(),
            direction: Direction::Short,
            size_fraction: 0.02,
            confidence: 1.0,
            strategy: "rebalance".to_string(),
        };
        executor.submit_intent(intent).await.unwrap();

        let after = executor.portfolio().await.positions[&instrument.symbol].quantity;
        assert!(after < before);
        assert!(after >= Decimal::ZERO);
    }

    #[tokio::test]
    async fn failed_submission_releases_the_projection() {
        let mut config = test_config();
        // Degenerate ratio collapses the take-profit onto entry, so the
        // plan fails validation at submit time.
        config.risk.reward_risk_ratio = 0.0;
        let (executor, _feed, venue) = executor(config);

        let snap = snapshot("BTCUSDT", 50_000, 0.02);
        venue.set_mark(&snap);
        executor.cache.update(snap);

        let intent = TradeIntent {
            symbol: Symbol::new("BTCUSDT"),
            direction: Direction::Long,
            size_fraction: 0.05,
            confidence: 1.0,
            strategy: "rebalance".to_string(),
        };
        assert!(executor.submit_intent(intent).await.is_err());

        let portfolio = executor.portfolio().await;
        assert!(portfolio.positions.is_empty());
        assert_eq!(portfolio.risk.risk_level(), 0.0);
    }

    #[tokio::test]
    async fn late_fill_for_cancelled_order_leaves_position_unchanged() {
        let (executor, _feed, venue) = executor(test_config());
        let plan = OrderPlan {
            id: Uuid::new_v4(),
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Buy,
            quantity: Decimal::from(2),
            order_type: crate::core::OrderType::Market,
            entry_price: Decimal::from(50_000),
            stop_loss: Decimal::from(49_000),
            take_profit: Decimal::from(52_000),
            max_slippage: Decimal::from(10),
        };
        venue.set_mark(&snapshot("BTCUSDT", 50_000, 0.02));
        let parent_id = executor
            .orders
            .submit(&plan, executor.venue.as_ref())
            .await
            .unwrap();
        // Discard the paper fill and cancel the order first.
        let _ = executor.venue.query_fills(parent_id).await.unwrap();
        executor.orders.on_cancel(parent_id);

        // The straggler fill must be recorded as an anomaly, not booked.
        let late = Fill {
            price: Decimal::from(50_000),
            quantity: Decimal::from(2),
            timestamp: Utc::now(),
        };
        let realized = executor
            .ingest_fill(&plan.symbol, plan.side, parent_id, &late)
            .await;
        assert_eq!(realized, Decimal::ZERO);
        assert_eq!(executor.order_manager().anomaly_count(), 1);
        let portfolio = executor.portfolio().await;
        assert!(portfolio.positions.is_empty());
    }

    #[tokio::test]
    async fn anomaly_threshold_trips_flatten_only() {
        let mut config = test_config();
        config.execution.anomaly_threshold = 1;
        let (executor, feed, venue) = executor(config);
        let instrument = executor.instruments()[0].clone();

        // Seed an anomaly, then run a normal cycle to trigger the check.
        executor
            .orders
            .on_fill(Uuid::new_v4(), Decimal::from(1), Decimal::from(1))
            .unwrap_err();

        let snap = snapshot("BTCUSDT", 50_000, 0.02);
        venue.set_mark(&snap);
        feed.push(snap.clone());
        executor.cache.update(snap);
        executor
            .push_signal(Signal {
                symbol: instrument.symbol.clone(),
                timestamp: Utc::now(),
                score: 1.0,
                confidence: 1.0,
            })
            .await;
        executor.run_cycle(&instrument).await.unwrap();

        assert!(executor.is_flatten_only());
    }
}
