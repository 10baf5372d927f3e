//! Live ticks and their persisted form

use crate::ids::{Exchange, Instrument, InstrumentToken};
use crate::numeric::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single last-traded-price update for one instrument.
///
/// Produced by the transport and consumed exactly once by a collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument_token: InstrumentToken,
    pub last_price: Price,
    /// Zero for quote-only updates
    pub last_quantity: u64,
    /// Exchange clock, not local receive time
    pub exchange_timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(
        instrument_token: InstrumentToken,
        last_price: Price,
        last_quantity: u64,
        exchange_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument_token,
            last_price,
            last_quantity,
            exchange_timestamp,
        }
    }
}

/// Raw tick as written to storage, enriched with the instrument listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRecord {
    pub exchange: Exchange,
    pub symbol: String,
    pub instrument_token: InstrumentToken,
    pub tick_timestamp: DateTime<Utc>,
    pub price: Price,
    pub quantity: u64,
    /// Aggressor side when known; LTP feeds do not carry it
    pub trade_type: String,
    pub source: String,
}

impl TickRecord {
    pub fn from_tick(tick: &Tick, instrument: &Instrument, source: impl Into<String>) -> Self {
        Self {
            exchange: instrument.exchange,
            symbol: instrument.symbol.clone(),
            instrument_token: tick.instrument_token,
            tick_timestamp: tick.exchange_timestamp,
            price: tick.last_price,
            quantity: tick.last_quantity,
            trade_type: "unknown".to_string(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_from_tick() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 14, 10, 30, 15).unwrap();
        let tick = Tick::new(
            InstrumentToken::new(738561),
            "2500.50".parse().unwrap(),
            100,
            ts,
        );
        let inst = Instrument::new(InstrumentToken::new(738561), Exchange::NSE, "RELIANCE");

        let record = TickRecord::from_tick(&tick, &inst, "zerodha");
        assert_eq!(record.symbol, "RELIANCE");
        assert_eq!(record.exchange, Exchange::NSE);
        assert_eq!(record.tick_timestamp, ts);
        assert_eq!(record.quantity, 100);
        assert_eq!(record.trade_type, "unknown");
        assert_eq!(record.source, "zerodha");
    }
}
