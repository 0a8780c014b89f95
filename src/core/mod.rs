//! Core module - types, errors, config, traits

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{
    AppConfig, BacktestConfig, Config, ExecutionConfig, InstrumentConfig, RiskConfig, RunMode,
    TradingConfig,
};
pub use error::{Error, Result};
pub use traits::{MarketFeed, OrderVenue};
pub use types::{
    Direction, Fill, Instrument, MarketSnapshot, Order, OrderPlan, OrderState, OrderType,
    OutcomeRecord, Position, Side, Signal, Symbol, TradeIntent,
};
