//! Types library for live market-data collection
//!
//! This library provides the core type definitions shared by every collector
//! pipeline: instrument identifiers, fixed-point prices, candle timeframes,
//! raw ticks, intraday bars and the error taxonomy.
//!
//! # Version
//! v1.0.0
//!
//! # Modules
//! - `ids`: Instrument tokens and exchange codes
//! - `numeric`: Fixed-point decimal price type
//! - `timeframe`: Candle bucket widths and epoch alignment
//! - `tick`: Live ticks and their persisted form
//! - `bar`: OHLCV intraday bars
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod timeframe;
pub mod tick;
pub mod bar;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::timeframe::*;
    pub use crate::tick::*;
    pub use crate::bar::*;
    pub use crate::errors::*;
}
