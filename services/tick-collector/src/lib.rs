//! Tick Collector Service
//!
//! Runs named live-data pipelines ("collectors"). Each collector:
//! - Subscribes instruments on its own transport connection
//! - Persists every raw tick it routes
//! - Aggregates ticks into fixed-timeframe OHLCV bars per instrument
//! - Persists each bar the moment a later bucket starts, and flushes open
//!   bars on stop
//!
//! # Architecture
//!
//! ```text
//!  Ticker (transport)
//!        │ TickSink
//!    ┌───▼────┐
//!    │ Queue  │  ← bounded, FIFO, one per collector
//!    └───┬────┘
//!        │ delivery task
//!   ┌────┴──────────┐
//!   │               │
//! ┌─▼───────┐  ┌────▼─────────┐
//! │Raw ticks│  │CandleBuilder │  ← one per instrument
//! └─┬───────┘  └────┬─────────┘
//!   │               │ completed bars
//! ┌─▼───────────────▼──┐
//! │    MarketStore     │
//! └────────────────────┘
//! ```
//!
//! [`manager::CollectorManager`] owns every collector by name.

pub mod candles;
pub mod collector;
pub mod config;
pub mod ingestion;
pub mod manager;
pub mod metrics;
pub mod simulated;
pub mod store;
pub mod transport;

// Service version
pub const SERVICE_VERSION: &str = "0.1.0";
