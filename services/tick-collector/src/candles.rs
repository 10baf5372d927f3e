//! OHLCV Candle Builder
//!
//! Folds the tick stream of one instrument into consecutive, non-overlapping
//! OHLCV bars for a single configured timeframe.
//!
//! Bucket boundaries are aligned to epoch (a 1m bar always covers a whole
//! minute). Ticks are expected in non-decreasing exchange-time order: a tick
//! whose bucket precedes the open bar is rejected, never merged backwards.
//! The builder performs no I/O; emitting and persisting completed bars is the
//! caller's job.

use chrono::{DateTime, Utc};
use tracing::trace;
use types::bar::IntradayBar;
use types::errors::CandleError;
use types::ids::Instrument;
use types::numeric::Price;
use types::timeframe::Timeframe;

/// Builds bars for a single timeframe on a single instrument.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    instrument: Instrument,
    timeframe: Timeframe,
    /// Source tag stamped on every emitted bar.
    source: String,
    /// Currently building bar (not yet closed). `None` until the first tick.
    current: Option<IntradayBar>,
}

impl CandleBuilder {
    pub fn new(instrument: Instrument, timeframe: Timeframe, source: impl Into<String>) -> Self {
        Self {
            instrument,
            timeframe,
            source: source.into(),
            current: None,
        }
    }

    /// Process a tick: update the open bar or close it at a bucket boundary.
    ///
    /// Returns the just-closed bar when the tick starts a later bucket. The
    /// new bucket is then seeded from this tick.
    pub fn ingest(
        &mut self,
        price: Price,
        quantity: u64,
        event_timestamp: DateTime<Utc>,
    ) -> Result<Option<IntradayBar>, CandleError> {
        let bucket = self.timeframe.bucket_start(event_timestamp);

        if let Some(bar) = self.current.as_mut() {
            if bucket == bar.bar_timestamp {
                bar.apply(price, quantity);
                return Ok(None);
            }
            if bucket < bar.bar_timestamp {
                return Err(CandleError::LateTick {
                    token: self.instrument.token,
                    tick_bucket: bucket,
                    open_bucket: bar.bar_timestamp,
                });
            }
        }

        let seeded = IntradayBar::open_with(
            &self.instrument,
            self.timeframe,
            bucket,
            price,
            quantity,
            self.source.clone(),
        );
        let closed = self.current.replace(seeded);

        if let Some(bar) = &closed {
            trace!(
                token = %self.instrument.token,
                bucket = %bar.bar_timestamp,
                ticks = bar.tick_count,
                "Bar closed at bucket boundary"
            );
        }

        Ok(closed)
    }

    /// Force-close the current bar (e.g., at shutdown).
    pub fn flush(&mut self) -> Option<IntradayBar> {
        self.current.take()
    }

    /// Get the current (unclosed) bar.
    pub fn current(&self) -> Option<&IntradayBar> {
        self.current.as_ref()
    }

}


#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use types::ids::{Exchange, InstrumentToken};

    proptest! {
        #[test]
        fn prop_single_bucket_summary(
            ticks in proptest::collection::vec((1u64..100_000, 0u64..1_000), 1..100),
        ) {
            let mut builder = CandleBuilder::new(
                Instrument::new(InstrumentToken::new(1), Exchange::NSE, "TEST"),
                Timeframe::M1,
                "proptest",
            );
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 15, 0).unwrap();

            for (i, (price, qty)) in ticks.iter().enumerate() {
                let ts = start + Duration::milliseconds(i as i64 * 500);
                let closed = builder.ingest(Price::from_u64(*price), *qty, ts).unwrap();
                prop_assert!(closed.is_none());
            }

            let bar = builder.current().unwrap();
            prop_assert_eq!(bar.open, Price::from_u64(ticks[0].0));
            prop_assert_eq!(bar.high, Price::from_u64(ticks.iter().map(|t| t.0).max().unwrap()));
            prop_assert_eq!(bar.low, Price::from_u64(ticks.iter().map(|t| t.0).min().unwrap()));
            prop_assert_eq!(bar.close, Price::from_u64(ticks[ticks.len() - 1].0));
            prop_assert_eq!(bar.volume, ticks.iter().map(|t| t.1).sum::<u64>());
        }

        #[test]
        fn prop_one_bar_per_bucket_crossing(minutes in proptest::collection::vec(0i64..3, 1..60)) {
            let mut builder = CandleBuilder::new(
                Instrument::new(InstrumentToken::new(1), Exchange::NSE, "TEST"),
                Timeframe::M1,
                "proptest",
            );
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 15, 0).unwrap();

            let mut minute = 0i64;
            let mut crossings = 0usize;
            let mut emitted = 0usize;
            for (i, step) in minutes.iter().enumerate() {
                if i > 0 && *step > 0 {
                    crossings += 1;
                }
                minute += step;
                let ts = start + Duration::minutes(minute);
                if builder.ingest(Price::from_u64(100), 1, ts).unwrap().is_some() {
                    emitted += 1;
                }
            }
            prop_assert_eq!(emitted, crossings);
        }
    }
}
