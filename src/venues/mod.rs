//! Order venue implementations

pub mod paper;
pub mod rest;

pub use paper::PaperVenue;
pub use rest::RestVenue;
