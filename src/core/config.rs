//! Configuration - Type-safe, validated config

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::types::{Instrument, Symbol};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,

    /// Tracked instruments
    pub instruments: Vec<InstrumentConfig>,

    /// Trading / strategy selection settings
    pub trading: TradingConfig,

    /// Risk management
    pub risk: RiskConfig,

    /// Order execution
    pub execution: ExecutionConfig,

    /// Backtest fill model
    pub backtest: BacktestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run mode: paper or live
    pub mode: RunMode,

    /// Log level
    pub log_level: String,

    /// Market data endpoint
    pub feed_url: String,

    /// Order venue endpoint (required in live mode)
    pub venue_url: Option<String>,

    /// Append-only trade log (JSONL); in-memory only when unset
    pub trade_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
}

impl InstrumentConfig {
    pub fn to_instrument(&self) -> Instrument {
        Instrument {
            symbol: Symbol::new(&self.symbol),
            tick_size: self.tick_size,
            lot_size: self.lot_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Evaluation interval in milliseconds
    pub poll_interval_ms: u64,

    /// Intents below this confidence become flat (no trade)
    pub min_confidence: f64,

    /// Base position size as a fraction of equity, scaled by confidence
    pub size_fraction: f64,

    /// Rolling window (completed trades) for strategy selection
    pub performance_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Starting equity for sizing (paper/backtest)
    pub initial_equity: Decimal,

    /// Max fraction of equity in a single instrument
    pub max_instrument_fraction: f64,

    /// Total risk budget as a fraction of equity
    pub max_portfolio_budget: f64,

    /// Risk level at which the circuit breaker trips (flatten-only)
    pub circuit_breaker_ceiling: f64,

    /// Stop distance = volatility * this multiple (of entry price)
    pub stop_vol_multiple: f64,

    /// Take-profit distance as a multiple of stop distance
    pub reward_risk_ratio: f64,

    /// Stops are never placed closer than this many ticks from entry
    pub min_tick_distance: u32,

    /// Max tolerated slippage, basis points of entry
    pub max_slippage_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Orders above this size are split into child clips
    pub max_clip: Decimal,

    /// Bound on each venue call
    pub venue_timeout_ms: u64,

    /// Submission retries before the order is marked Rejected
    pub max_retries: u32,

    /// Backoff between retries (doubled per attempt)
    pub retry_backoff_ms: u64,

    /// Fill polling interval while an order is working
    pub fill_poll_ms: u64,

    /// Give up waiting for fills after this long and reconcile
    pub fill_wait_ms: u64,

    /// Reconciliation anomalies tolerated before flatten-only mode
    pub anomaly_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Simulated slippage, basis points of the touch price
    pub slippage_bps: u32,

    /// Fee schedule, basis points of fill notional
    pub fee_bps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig {
                mode: RunMode::Paper,
                log_level: "info".to_string(),
                feed_url: "https://api.binance.com/api/v3".to_string(),
                venue_url: None,
                trade_log: None,
            },
            instruments: vec![InstrumentConfig {
                symbol: "BTCUSDT".to_string(),
                tick_size: Decimal::new(1, 2),
                lot_size: Decimal::new(1, 5),
            }],
            trading: TradingConfig {
                poll_interval_ms: 1_000,
                min_confidence: 0.4,
                size_fraction: 0.1,
                performance_window: 20,
            },
            risk: RiskConfig {
                initial_equity: Decimal::from(100_000),
                max_instrument_fraction: 0.1,
                max_portfolio_budget: 0.5,
                circuit_breaker_ceiling: 0.5,
                stop_vol_multiple: 1.5,
                reward_risk_ratio: 2.0,
                min_tick_distance: 10,
                max_slippage_bps: 20,
            },
            execution: ExecutionConfig {
                max_clip: Decimal::from(1_000),
                venue_timeout_ms: 5_000,
                max_retries: 3,
                retry_backoff_ms: 200,
                fill_poll_ms: 250,
                fill_wait_ms: 30_000,
                anomaly_threshold: 5,
            },
            backtest: BacktestConfig {
                slippage_bps: 5,
                fee_bps: 10,
            },
        }
    }
}

impl Config {
    /// Load from TOML file
    pub fn load(path: &PathBuf) -> crate::core::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::core::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::core::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get instrument config by symbol
    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentConfig> {
        self.instruments
            .iter()
            .find(|i| i.symbol.eq_ignore_ascii_case(symbol))
    }
}
