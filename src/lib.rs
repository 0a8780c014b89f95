//! Tradewind - Core Library
//! Automated trade decision and execution pipeline

// Public modules
pub mod core;
pub mod market;
pub mod strategies;
pub mod risk;
pub mod execution;
pub mod executor;
pub mod backtest;
pub mod ledger;
pub mod report;
pub mod venues;
pub mod feeds;

// Re-exports
pub use core::{Config, Error, Result};
