//! Core traits - seams toward the market-data and execution venues

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::{Fill, MarketSnapshot, Order, Result, Symbol};

/// Normalized market data feed. The core consumes snapshots, not
/// transport details.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Fetch the current snapshot for a symbol
    async fn fetch_snapshot(&self, symbol: &Symbol) -> Result<MarketSnapshot>;

    /// Feed name
    fn name(&self) -> &str;
}

/// Order venue capability: submit, cancel, query fills.
///
/// Venue calls are the pipeline's only suspension points; every
/// implementation must respect the configured bounded timeouts.
#[async_trait]
pub trait OrderVenue: Send + Sync {
    /// Dispatch one (child) order to the venue
    async fn submit(&self, order: &Order) -> Result<()>;

    /// Cancel a working order
    async fn cancel(&self, order_id: Uuid) -> Result<()>;

    /// Drain fills reported since the last query for this order
    async fn query_fills(&self, order_id: Uuid) -> Result<Vec<Fill>>;

    /// Venues that price their own fills (paper) observe each snapshot;
    /// network venues ignore it.
    fn observe(&self, _snapshot: &MarketSnapshot) {}

    /// Venue name
    fn name(&self) -> &str;
}
