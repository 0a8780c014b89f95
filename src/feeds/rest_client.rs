//! REST client for market data

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::core::{Error, MarketFeed, MarketSnapshot, Result, Symbol};
use crate::market::RollingVolatility;

/// REST market feed client.
///
/// Polls a ticker endpoint and derives the rolling volatility estimate
/// locally, so the rest of the pipeline consumes a fully normalized
/// snapshot.
pub struct RestMarketFeed {
    name: String,
    base_url: String,
    client: reqwest::Client,
    volatility: Mutex<HashMap<Symbol, RollingVolatility>>,
}

impl RestMarketFeed {
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
            volatility: Mutex::new(HashMap::new()),
        })
    }

    fn parse_price(value: &serde_json::Value, field: &str) -> Result<Decimal> {
        let raw = value[field]
            .as_str()
            .map(str::to_owned)
            .or_else(|| value[field].as_f64().map(|f| f.to_string()))
            .ok_or_else(|| Error::Validation(format!("missing field {field} in ticker")))?;
        Decimal::from_str(&raw)
            .map_err(|e| Error::Validation(format!("bad {field} in ticker: {e}")))
    }
}

#[async_trait]
impl MarketFeed for RestMarketFeed {
    async fn fetch_snapshot(&self, symbol: &Symbol) -> Result<MarketSnapshot> {
        let url = format!("{}/ticker/bookTicker?symbol={}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;

        let bid = Self::parse_price(&resp, "bidPrice")?;
        let ask = Self::parse_price(&resp, "askPrice")?;
        let last = (bid + ask) / Decimal::from(2);

        let volatility = self
            .volatility
            .lock()
            .entry(symbol.clone())
            .or_insert_with(|| RollingVolatility::new(64))
            .update(last);

        Ok(MarketSnapshot {
            symbol: symbol.clone(),
            timestamp: chrono::Utc::now(),
            last,
            bid,
            ask,
            volatility,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
