//! OHLCV intraday bars
//!
//! A bar summarises every tick of one instrument inside one timeframe bucket.
//! `bar_timestamp` is the bucket start, never the time of the first tick.

use crate::ids::{Exchange, Instrument, InstrumentToken};
use crate::numeric::Price;
use crate::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntradayBar {
    pub exchange: Exchange,
    pub symbol: String,
    pub instrument_token: InstrumentToken,
    pub bar_timestamp: DateTime<Utc>,
    pub timeframe: Timeframe,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: u64,
    /// Number of ticks folded into this bar
    pub tick_count: u64,
    pub source: String,
}

impl IntradayBar {
    /// Seed a bar from the first tick of its bucket.
    pub fn open_with(
        instrument: &Instrument,
        timeframe: Timeframe,
        bar_timestamp: DateTime<Utc>,
        price: Price,
        quantity: u64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            exchange: instrument.exchange,
            symbol: instrument.symbol.clone(),
            instrument_token: instrument.token,
            bar_timestamp,
            timeframe,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: quantity,
            tick_count: 1,
            source: source.into(),
        }
    }

    /// Fold a subsequent tick of the same bucket into the bar.
    pub fn apply(&mut self, price: Price, quantity: u64) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume = self.volume.saturating_add(quantity);
        self.tick_count += 1;
    }

    /// Validate OHLC ordering invariants.
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reliance() -> Instrument {
        Instrument::new(InstrumentToken::new(738561), Exchange::NSE, "RELIANCE")
    }

    fn px(s: &str) -> Price {
        s.parse().unwrap()
    }

    fn minute(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 10, m, 0).unwrap()
    }

    #[test]
    fn test_bar_seeded_from_first_tick() {
        let bar = IntradayBar::open_with(
            &reliance(),
            Timeframe::M1,
            minute(30),
            px("2500.50"),
            100,
            "zerodha_websocket",
        );

        assert_eq!(bar.open, px("2500.50"));
        assert_eq!(bar.high, px("2500.50"));
        assert_eq!(bar.low, px("2500.50"));
        assert_eq!(bar.close, px("2500.50"));
        assert_eq!(bar.volume, 100);
        assert_eq!(bar.tick_count, 1);
        assert!(bar.is_valid());
    }

    #[test]
    fn test_bar_apply() {
        let mut bar = IntradayBar::open_with(
            &reliance(),
            Timeframe::M1,
            minute(30),
            px("2500.00"),
            100,
            "zerodha_websocket",
        );

        bar.apply(px("2505.00"), 50); // New high
        bar.apply(px("2495.00"), 75); // New low
        bar.apply(px("2501.00"), 0); // Quote-only update

        assert_eq!(bar.open, px("2500.00"));
        assert_eq!(bar.high, px("2505.00"));
        assert_eq!(bar.low, px("2495.00"));
        assert_eq!(bar.close, px("2501.00"));
        assert_eq!(bar.volume, 225);
        assert_eq!(bar.tick_count, 4);
        assert!(bar.is_valid());
    }

    #[test]
    fn test_bar_integrity_validation() {
        let mut invalid = IntradayBar::open_with(
            &reliance(),
            Timeframe::M1,
            minute(30),
            px("2500.00"),
            1,
            "zerodha_websocket",
        );
        invalid.high = px("2490.00"); // High < Open
        assert!(!invalid.is_valid());
    }

    #[test]
    fn test_bar_serialization() {
        let bar = IntradayBar::open_with(
            &reliance(),
            Timeframe::M5,
            minute(30),
            px("2500.50"),
            10,
            "zerodha_websocket",
        );
        let json = serde_json::to_value(&bar).unwrap();
        assert_eq!(json["timeframe"], "5m");
        assert_eq!(json["exchange"], "NSE");
        assert_eq!(json["open"], "2500.50");
    }
}
