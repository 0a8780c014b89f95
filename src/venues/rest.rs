//! REST venue - order submission over a normalized HTTP API

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::core::{Error, Fill, Order, OrderVenue, Result};

/// REST order venue client.
///
/// Talks to a broker gateway exposing submit/cancel/fills endpoints.
/// Every request carries the configured bounded timeout.
pub struct RestVenue {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct FillReport {
    price: Decimal,
    quantity: Decimal,
    timestamp: DateTime<Utc>,
}

impl RestVenue {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl OrderVenue for RestVenue {
    async fn submit(&self, order: &Order) -> Result<()> {
        let url = format!("{}/orders", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "order_id": order.id,
                "symbol": order.symbol.as_str(),
                "side": order.side,
                "type": order.order_type,
                "quantity": order.quantity,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Venue(format!("submit returned {status}: {body}")));
        }
        Ok(())
    }

    async fn cancel(&self, order_id: Uuid) -> Result<()> {
        let url = format!("{}/orders/{}", self.base_url, order_id);
        let resp = self.client.delete(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Venue(format!(
                "cancel of {order_id} returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn query_fills(&self, order_id: Uuid) -> Result<Vec<Fill>> {
        let url = format!("{}/orders/{}/fills", self.base_url, order_id);
        let reports = self
            .client
            .get(&url)
            .send()
            .await?
            .json::<Vec<FillReport>>()
            .await?;

        Ok(reports
            .into_iter()
            .map(|r| Fill {
                price: r.price,
                quantity: r.quantity,
                timestamp: r.timestamp,
            })
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
