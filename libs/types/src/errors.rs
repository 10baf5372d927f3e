//! Error types for tick collection
//!
//! Comprehensive error taxonomy using thiserror

use crate::ids::InstrumentToken;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Top-level collector error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectorError {
    #[error("Collector '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("Collector '{name}' not found")]
    NotFound { name: String },

    #[error("Instrument token {token} is not registered")]
    UnknownInstrument { token: InstrumentToken },

    #[error("Collector is not running")]
    NotRunning,

    #[error("Collector has been stopped and cannot be restarted")]
    Stopped,

    #[error("None of the requested symbols could be resolved to instrument tokens")]
    NoSymbolsResolved,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    LateOrOutOfOrderTick(#[from] CandleError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Persistence collaborator failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Write rejected: {reason}")]
    WriteRejected { reason: String },
}

/// Market-data transport failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Subscription request rejected: {reason}")]
    SubscriptionRejected { reason: String },
}

/// Candle aggregation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CandleError {
    #[error(
        "Late or out-of-order tick for {token}: bucket {tick_bucket} precedes open bar {open_bucket}"
    )]
    LateTick {
        token: InstrumentToken,
        tick_bucket: DateTime<Utc>,
        open_bucket: DateTime<Utc>,
    },
}
