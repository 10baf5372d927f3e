//! Simulated market feed
//!
//! Generates a seeded random-walk tick stream for every subscribed token so
//! collectors can run end to end without a broker account. Each step moves
//! the price by up to ±0.5% of a slowly drifting base and trades 100–1000
//! shares. The walk is deterministic for a given seed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::errors::TransportError;
use types::ids::{Exchange, Instrument, InstrumentToken};
use types::numeric::Price;
use types::tick::Tick;

use crate::ingestion::TickSink;
use crate::transport::{Credentials, SubscriptionMode, Ticker, TickerFactory};

/// Well-known NSE listings with a realistic starting price.
const CATALOG: &[(u32, &str, u64)] = &[
    (738561, "RELIANCE", 2500),
    (2953217, "TCS", 3500),
    (408065, "INFY", 1450),
    (341249, "HDFCBANK", 1650),
    (1270529, "ICICIBANK", 1100),
    (779521, "SBIN", 750),
    (2714625, "BHARTIARTL", 1200),
    (424961, "ITC", 450),
    (356865, "HINDUNILVR", 2400),
    (2939649, "LT", 3450),
    (492033, "KOTAKBANK", 1750),
    (1510401, "AXISBANK", 1050),
    (81153, "BAJFINANCE", 6800),
    (60417, "ASIANPAINT", 2900),
    (2815745, "MARUTI", 12500),
    (895745, "TATASTEEL", 140),
    (969473, "WIPRO", 450),
    (857857, "SUNPHARMA", 1650),
    (897537, "TITAN", 3200),
    (4598529, "NESTLEIND", 2400),
];

/// Instruments and base prices the simulated feed knows about.
pub fn catalog() -> Vec<(Instrument, Price)> {
    CATALOG
        .iter()
        .map(|(token, symbol, base)| {
            (
                Instrument::new(InstrumentToken::new(*token), Exchange::NSE, *symbol),
                Price::from_u64(*base),
            )
        })
        .collect()
}

/// Configuration for the simulated feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// RNG seed; equal seeds give equal tick streams
    pub seed: u64,
    /// Delay between rounds; one tick per subscribed token per round
    pub interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            interval_ms: 1_000,
        }
    }
}

/// Seeded per-token random walk.
pub struct RandomWalk {
    rng: ChaCha8Rng,
    bases: HashMap<InstrumentToken, Decimal>,
}

impl RandomWalk {
    pub fn new(seed: u64) -> Self {
        let bases = catalog()
            .into_iter()
            .map(|(inst, base)| (inst.token, base.as_decimal()))
            .collect();
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            bases,
        }
    }

    /// Current base price for a token, if it has one yet.
    pub fn base(&self, token: InstrumentToken) -> Option<Decimal> {
        self.bases.get(&token).copied()
    }

    /// Next tick for `token`. LTP mode carries no traded quantity.
    pub fn next_tick(
        &mut self,
        token: InstrumentToken,
        mode: SubscriptionMode,
        timestamp: DateTime<Utc>,
    ) -> Option<Tick> {
        let base = match self.bases.get(&token) {
            Some(base) => *base,
            None => {
                // Unlisted tokens start somewhere between 100 and 5000.
                let start = Decimal::from(self.rng.gen_range(100u64..=5_000));
                self.bases.insert(token, start);
                start
            }
        };

        // ±0.5% expressed in basis points of a basis point (1e-6).
        let swing = Decimal::new(self.rng.gen_range(-5_000i64..=5_000), 6);
        let price = (base + base * swing).round_dp(2);
        let drifted = (base * Decimal::new(99, 2) + price * Decimal::new(1, 2)).round_dp(4);
        self.bases.insert(token, drifted);

        let quantity = match mode {
            SubscriptionMode::Ltp => 0,
            _ => self.rng.gen_range(100u64..=1_000),
        };

        match Price::new(price) {
            Ok(price) => Some(Tick::new(token, price, quantity, timestamp)),
            Err(e) => {
                warn!(token = %token, error = %e, "Random walk produced an invalid price");
                None
            }
        }
    }
}

struct FeedState {
    sink: Option<TickSink>,
    subscribed: BTreeMap<InstrumentToken, SubscriptionMode>,
    walk: RandomWalk,
}

/// A [`Ticker`] backed by [`RandomWalk`].
pub struct SimulatedTicker {
    config: SimulationConfig,
    state: Arc<Mutex<FeedState>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SimulatedTicker {
    pub fn new(config: SimulationConfig) -> Self {
        let walk = RandomWalk::new(config.seed);
        Self {
            config,
            state: Arc::new(Mutex::new(FeedState {
                sink: None,
                subscribed: BTreeMap::new(),
                walk,
            })),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Generate one round of ticks, one per subscribed token.
    fn round(state: &Mutex<FeedState>, now: DateTime<Utc>) -> Option<(TickSink, Vec<Tick>)> {
        let mut state = lock(state);
        let sink = state.sink.clone()?;
        let targets: Vec<_> = state.subscribed.iter().map(|(t, m)| (*t, *m)).collect();
        let ticks = targets
            .into_iter()
            .filter_map(|(token, mode)| state.walk.next_tick(token, mode, now))
            .collect();
        Some((sink, ticks))
    }

    async fn run(
        state: Arc<Mutex<FeedState>>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let Some((sink, ticks)) = Self::round(&state, Utc::now()) else {
                        break;
                    };
                    for tick in ticks {
                        if sink.send(tick).await.is_err() {
                            debug!("Tick queue closed, simulated feed exiting");
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Ticker for SimulatedTicker {
    async fn connect(&self, sink: TickSink) -> Result<(), TransportError> {
        if lock(&self.task).is_some() {
            return Err(TransportError::ConnectionFailed {
                reason: "simulated feed already connected".to_string(),
            });
        }
        lock(&self.state).sink = Some(sink);

        let (tx, rx) = watch::channel(false);
        let interval = Duration::from_millis(self.config.interval_ms.max(1));
        let handle = tokio::spawn(Self::run(self.state.clone(), interval, rx));
        *lock(&self.shutdown) = Some(tx);
        *lock(&self.task) = Some(handle);

        info!(
            seed = self.config.seed,
            interval_ms = self.config.interval_ms,
            "Simulated feed connected"
        );
        Ok(())
    }

    async fn subscribe(&self, tokens: &[InstrumentToken]) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.sink.is_none() {
            return Err(TransportError::NotConnected);
        }
        for token in tokens {
            state.subscribed.entry(*token).or_default();
        }
        Ok(())
    }

    async fn unsubscribe(&self, tokens: &[InstrumentToken]) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.sink.is_none() {
            return Err(TransportError::NotConnected);
        }
        for token in tokens {
            state.subscribed.remove(token);
        }
        Ok(())
    }

    async fn set_mode(
        &self,
        mode: SubscriptionMode,
        tokens: &[InstrumentToken],
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.sink.is_none() {
            return Err(TransportError::NotConnected);
        }
        for token in tokens {
            if let Some(current) = state.subscribed.get_mut(token) {
                *current = mode;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let shutdown = lock(&self.shutdown).take();
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }

        let task = lock(&self.task).take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                warn!(error = %e, "Simulated feed task ended abnormally");
            }
        }

        let mut state = lock(&self.state);
        state.sink = None;
        state.subscribed.clear();
        Ok(())
    }
}

/// Builds one [`SimulatedTicker`] per collector, each with its own seed.
pub struct SimulatedTickerFactory {
    config: SimulationConfig,
    created: Mutex<u64>,
}

impl SimulatedTickerFactory {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            created: Mutex::new(0),
        }
    }
}

impl TickerFactory for SimulatedTickerFactory {
    fn create(&self, collector: &str, _credentials: &Credentials) -> Arc<dyn Ticker> {
        let mut created = lock(&self.created);
        let config = SimulationConfig {
            seed: self.config.seed.wrapping_add(*created),
            ..self.config.clone()
        };
        *created += 1;
        debug!(collector, seed = config.seed, "Creating simulated ticker");
        Arc::new(SimulatedTicker::new(config))
    }
}
