//! Execution layer - order lifecycle state machine
//!
//! The order manager exclusively owns Order objects and their
//! transitions: Pending → Submitted → PartiallyFilled → Filled, with
//! Cancelled/Rejected as terminal failure exits. Fills arriving for
//! unknown or terminal orders are reconciliation anomalies: logged and
//! surfaced, never silently applied.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{
    Error, ExecutionConfig, Fill, Order, OrderPlan, OrderState, OrderVenue, Result,
};

/// Operator-visible record of a reconciliation inconsistency.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub order_id: Option<Uuid>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Split a quantity into clips of at most `max_clip`, summing exactly to
/// the input. The remainder lands on the last clip.
pub fn split_quantity(total: Decimal, max_clip: Decimal) -> Vec<Decimal> {
    if max_clip <= Decimal::ZERO || total <= max_clip {
        return vec![total];
    }
    let mut clips = vec![];
    let mut remaining = total;
    while remaining > max_clip {
        clips.push(max_clip);
        remaining -= max_clip;
    }
    if remaining > Decimal::ZERO {
        clips.push(remaining);
    }
    clips
}

/// Order manager - sequences plans into order lifecycle operations.
pub struct OrderManager {
    orders: RwLock<HashMap<Uuid, Order>>,
    /// Plan id → parent order id, for idempotent submission
    by_plan: RwLock<HashMap<Uuid, Uuid>>,
    anomalies: RwLock<Vec<Anomaly>>,
    config: ExecutionConfig,
}

impl OrderManager {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            by_plan: RwLock::new(HashMap::new()),
            anomalies: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Submit a plan: create the parent order, apply the splitting policy,
    /// and dispatch each clip to the venue with bounded timeout and retry.
    ///
    /// Idempotent on the plan id: a repeated submission returns the
    /// existing parent order id without creating a duplicate.
    pub async fn submit(&self, plan: &OrderPlan, venue: &dyn OrderVenue) -> Result<Uuid> {
        plan.validate().map_err(Error::Validation)?;

        // Registration happens in one critical section so a concurrent
        // duplicate submission cannot slip past the idempotence check.
        let (parent_id, dispatch_ids) = {
            let mut by_plan = self.by_plan.write();
            if let Some(existing) = by_plan.get(&plan.id) {
                debug!(plan_id = %plan.id, order_id = %existing, "duplicate plan submission ignored");
                return Ok(*existing);
            }

            let mut parent = Order::from_plan(plan);
            let clips = split_quantity(plan.quantity, self.config.max_clip);
            let mut orders = self.orders.write();
            let dispatch_ids: Vec<Uuid> = if clips.len() == 1 {
                vec![parent.id]
            } else {
                let children: Vec<Order> = clips
                    .iter()
                    .map(|qty| Order::child_of(&parent, *qty))
                    .collect();
                parent.children = children.iter().map(|c| c.id).collect();
                let ids = parent.children.clone();
                for child in children {
                    orders.insert(child.id, child);
                }
                ids
            };
            let parent_id = parent.id;
            by_plan.insert(plan.id, parent_id);
            orders.insert(parent_id, parent);
            (parent_id, dispatch_ids)
        };

        info!(
            plan_id = %plan.id,
            order_id = %parent_id,
            side = %plan.side,
            quantity = %plan.quantity,
            clips = dispatch_ids.len(),
            "submitting order"
        );

        for id in dispatch_ids {
            self.dispatch(id, venue).await;
        }
        self.roll_up(parent_id);
        Ok(parent_id)
    }

    /// Dispatch one order to the venue: bounded timeout, bounded retries
    /// with doubling backoff, then a terminal Rejected with the reason.
    /// A timed-out submission never stays Pending.
    async fn dispatch(&self, order_id: Uuid, venue: &dyn OrderVenue) {
        let Some(order) = self.orders.read().get(&order_id).cloned() else {
            return;
        };

        let timeout = Duration::from_millis(self.config.venue_timeout_ms);
        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            match tokio::time::timeout(timeout, venue.submit(&order)).await {
                Ok(Ok(())) => {
                    self.set_state(order_id, OrderState::Submitted, None);
                    return;
                }
                Ok(Err(e)) => {
                    warn!(order_id = %order_id, attempt, error = %e, "venue submission failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(order_id = %order_id, attempt, "venue submission timed out");
                    last_error = format!("venue timeout after {}ms", timeout.as_millis());
                }
            }
            if attempt < self.config.max_retries {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        self.set_state(order_id, OrderState::Rejected, Some(last_error));
    }

    /// Apply a fill report. Unknown/terminal targets and overfills are
    /// anomalies: recorded, surfaced, never applied.
    pub fn on_fill(&self, order_id: Uuid, price: Decimal, quantity: Decimal) -> Result<OrderState> {
        let mut orders = self.orders.write();
        let Some(order) = orders.get_mut(&order_id) else {
            drop(orders);
            return Err(self.record_anomaly(
                Some(order_id),
                format!("fill for unknown order {order_id}"),
            ));
        };

        if order.state.is_terminal() {
            let detail = format!(
                "fill of {quantity} @ {price} for terminal order {order_id} ({:?})",
                order.state
            );
            drop(orders);
            return Err(self.record_anomaly(Some(order_id), detail));
        }

        if order.filled_quantity() + quantity > order.quantity {
            let detail = format!(
                "overfill on {order_id}: {} + {quantity} > {}",
                order.filled_quantity(),
                order.quantity
            );
            drop(orders);
            return Err(self.record_anomaly(Some(order_id), detail));
        }

        order.fills.push(Fill {
            price,
            quantity,
            timestamp: Utc::now(),
        });
        order.state = if order.remaining_quantity().is_zero() {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        order.updated_at = Utc::now();
        let state = order.state;
        let parent = order.parent;
        drop(orders);

        debug!(order_id = %order_id, price = %price, quantity = %quantity, state = ?state, "fill applied");
        if let Some(parent_id) = parent {
            self.roll_up(parent_id);
        }
        Ok(state)
    }

    /// Terminal rejection from the venue. No further fills accepted.
    pub fn on_reject(&self, order_id: Uuid, reason: impl Into<String>) {
        self.set_state(order_id, OrderState::Rejected, Some(reason.into()));
    }

    /// Terminal cancellation. No further fills accepted.
    pub fn on_cancel(&self, order_id: Uuid) {
        self.set_state(order_id, OrderState::Cancelled, None);
    }

    /// Cancel a working order (and its working children) at the venue.
    pub async fn cancel(&self, order_id: Uuid, venue: &dyn OrderVenue) -> Result<()> {
        let targets: Vec<Uuid> = {
            let orders = self.orders.read();
            let Some(order) = orders.get(&order_id) else {
                return Err(Error::InvalidState(format!("unknown order {order_id}")));
            };
            if order.children.is_empty() {
                vec![order_id]
            } else {
                order
                    .children
                    .iter()
                    .filter(|id| {
                        orders
                            .get(id)
                            .map(|c| !c.state.is_terminal())
                            .unwrap_or(false)
                    })
                    .copied()
                    .collect()
            }
        };

        let timeout = Duration::from_millis(self.config.venue_timeout_ms);
        for id in targets {
            match tokio::time::timeout(timeout, venue.cancel(id)).await {
                Ok(Ok(())) => self.on_cancel(id),
                Ok(Err(e)) => {
                    warn!(order_id = %id, error = %e, "venue cancel failed");
                    return Err(e);
                }
                Err(_) => {
                    warn!(order_id = %id, "venue cancel timed out");
                    return Err(Error::VenueTimeout(format!("cancel of {id}")));
                }
            }
        }
        self.roll_up(order_id);
        Ok(())
    }

    fn set_state(&self, order_id: Uuid, state: OrderState, reason: Option<String>) {
        let parent = {
            let mut orders = self.orders.write();
            let Some(order) = orders.get_mut(&order_id) else {
                return;
            };
            if order.state.is_terminal() {
                warn!(order_id = %order_id, current = ?order.state, requested = ?state,
                    "transition on terminal order ignored");
                return;
            }
            order.state = state;
            order.reject_reason = reason;
            order.updated_at = Utc::now();
            order.parent
        };
        if let Some(parent_id) = parent {
            self.roll_up(parent_id);
        }
    }

    /// Recompute a parent's state from its children.
    fn roll_up(&self, parent_id: Uuid) {
        let mut orders = self.orders.write();
        let Some(parent) = orders.get(&parent_id) else {
            return;
        };
        if parent.children.is_empty() {
            return;
        }

        let children: Vec<&Order> = parent
            .children
            .iter()
            .filter_map(|id| orders.get(id))
            .collect();
        let total_filled: Decimal = children.iter().map(|c| c.filled_quantity()).sum();
        let all_terminal = children.iter().all(|c| c.state.is_terminal());
        let any_submitted = children
            .iter()
            .any(|c| matches!(c.state, OrderState::Submitted | OrderState::PartiallyFilled));
        let quantity = parent.quantity;

        let state = if total_filled == quantity {
            OrderState::Filled
        } else if all_terminal {
            if children.iter().any(|c| c.state == OrderState::Cancelled)
                || total_filled > Decimal::ZERO
            {
                OrderState::Cancelled
            } else {
                OrderState::Rejected
            }
        } else if total_filled > Decimal::ZERO {
            OrderState::PartiallyFilled
        } else if any_submitted {
            OrderState::Submitted
        } else {
            OrderState::Pending
        };

        if let Some(parent) = orders.get_mut(&parent_id) {
            if parent.state != state {
                parent.state = state;
                parent.updated_at = Utc::now();
            }
        }
    }

    fn record_anomaly(&self, order_id: Option<Uuid>, detail: String) -> Error {
        warn!(?order_id, %detail, "reconciliation anomaly");
        self.anomalies.write().push(Anomaly {
            order_id,
            detail: detail.clone(),
            at: Utc::now(),
        });
        Error::ReconciliationAnomaly(detail)
    }

    pub fn order(&self, order_id: Uuid) -> Option<Order> {
        self.orders.read().get(&order_id).cloned()
    }

    pub fn order_for_plan(&self, plan_id: Uuid) -> Option<Order> {
        let id = *self.by_plan.read().get(&plan_id)?;
        self.order(id)
    }

    /// Leaf orders that were actually dispatched: the children when the
    /// plan was split, the parent itself otherwise.
    pub fn leaves(&self, parent_id: Uuid) -> Vec<Order> {
        let orders = self.orders.read();
        let Some(parent) = orders.get(&parent_id) else {
            return vec![];
        };
        if parent.children.is_empty() {
            vec![parent.clone()]
        } else {
            parent
                .children
                .iter()
                .filter_map(|id| orders.get(id).cloned())
                .collect()
        }
    }

    /// All fills booked against this parent's leaves.
    pub fn fills_for(&self, parent_id: Uuid) -> Vec<Fill> {
        self.leaves(parent_id)
            .into_iter()
            .flat_map(|o| o.fills)
            .collect()
    }

    /// Orders still working at the venue; these must be reconciled
    /// (queried or cancelled) before process exit.
    pub fn open_orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| {
                o.children.is_empty()
                    && matches!(
                        o.state,
                        OrderState::Submitted | OrderState::PartiallyFilled
                    )
            })
            .cloned()
            .collect()
    }

    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.anomalies.read().clone()
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies.read().len()
    }
}
