//! Trading strategies - variants and selection

pub mod engine;
pub mod mean_reversion;
pub mod scalping;
pub mod traits;
pub mod trend;

pub use engine::StrategyEngine;
pub use mean_reversion::{MeanReversionParams, MeanReversionStrategy};
pub use scalping::{ScalpingParams, ScalpingStrategy};
pub use traits::{Strategy, StrategyScore};
pub use trend::{TrendParams, TrendStrategy};
