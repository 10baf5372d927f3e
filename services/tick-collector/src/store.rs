//! Persistence seam
//!
//! Collectors write raw ticks and completed bars through [`MarketStore`] and
//! resolve `(exchange, symbol)` pairs to instrument tokens with it. The SQL
//! backend lives outside this crate; [`MemoryStore`] keeps everything in
//! process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;
use types::bar::IntradayBar;
use types::errors::StorageError;
use types::ids::{Exchange, Instrument, InstrumentToken};
use types::tick::TickRecord;

/// Storage collaborator shared by every collector of a manager.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Resolve a listing to its instrument token.
    async fn instrument_token(
        &self,
        exchange: Exchange,
        symbol: &str,
    ) -> Result<Option<InstrumentToken>, StorageError>;

    async fn insert_tick(&self, record: &TickRecord) -> Result<(), StorageError>;

    async fn insert_intraday_bar(&self, bar: &IntradayBar) -> Result<(), StorageError>;

    /// Persist many bars. Stops at the first failure.
    async fn bulk_insert_intraday_bars(&self, bars: &[IntradayBar]) -> Result<(), StorageError> {
        for bar in bars {
            self.insert_intraday_bar(bar).await?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryTables {
    instruments: HashMap<(Exchange, String), InstrumentToken>,
    ticks: Vec<TickRecord>,
    bars: Vec<IntradayBar>,
}

/// In-memory [`MarketStore`] with switchable write failures.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
    fail_ticks: AtomicBool,
    fail_bars: AtomicBool,
    bulk_inserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with an instrument catalog.
    pub fn with_instruments(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        let store = Self::new();
        for instrument in instruments {
            store.add_instrument(instrument);
        }
        store
    }

    fn tables(&self) -> MutexGuard<'_, MemoryTables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_instrument(&self, instrument: Instrument) {
        self.tables()
            .instruments
            .insert((instrument.exchange, instrument.symbol), instrument.token);
    }

    /// Reject every raw-tick write while set.
    pub fn set_fail_ticks(&self, fail: bool) {
        self.fail_ticks.store(fail, Ordering::SeqCst);
    }

    /// Reject every bar write while set.
    pub fn set_fail_bars(&self, fail: bool) {
        self.fail_bars.store(fail, Ordering::SeqCst);
    }

    pub fn ticks(&self) -> Vec<TickRecord> {
        self.tables().ticks.clone()
    }

    pub fn bars(&self) -> Vec<IntradayBar> {
        self.tables().bars.clone()
    }

    pub fn bars_for(&self, token: InstrumentToken) -> Vec<IntradayBar> {
        self.tables()
            .bars
            .iter()
            .filter(|b| b.instrument_token == token)
            .cloned()
            .collect()
    }

    /// Number of bulk bar inserts accepted so far.
    pub fn bulk_inserts(&self) -> usize {
        self.bulk_inserts.load(Ordering::SeqCst)
    }

    fn check_bars(&self) -> Result<(), StorageError> {
        if self.fail_bars.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected {
                reason: "bar writes disabled".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn instrument_token(
        &self,
        exchange: Exchange,
        symbol: &str,
    ) -> Result<Option<InstrumentToken>, StorageError> {
        Ok(self
            .tables()
            .instruments
            .get(&(exchange, symbol.to_string()))
            .copied())
    }

    async fn insert_tick(&self, record: &TickRecord) -> Result<(), StorageError> {
        if self.fail_ticks.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected {
                reason: "tick writes disabled".to_string(),
            });
        }
        self.tables().ticks.push(record.clone());
        Ok(())
    }

    async fn insert_intraday_bar(&self, bar: &IntradayBar) -> Result<(), StorageError> {
        self.check_bars()?;
        self.tables().bars.push(bar.clone());
        Ok(())
    }

    /// All-or-nothing, unlike the default sequential insert.
    async fn bulk_insert_intraday_bars(&self, bars: &[IntradayBar]) -> Result<(), StorageError> {
        self.check_bars()?;
        self.tables().bars.extend_from_slice(bars);
        self.bulk_inserts.fetch_add(1, Ordering::SeqCst);
        debug!(count = bars.len(), "Bulk inserted intraday bars");
        Ok(())
    }
}
