//! Data collector
//!
//! One named ingestion pipeline: a transport connection, the instruments it
//! routes, one [`CandleBuilder`] per instrument and the pipeline metrics.
//!
//! Lifecycle is `Created → Running → Stopped`, with `Stopped` terminal.
//! While running, a single delivery task drains the tick queue in arrival
//! order, persists each raw tick and feeds the instrument's builder. Per-tick
//! failures are counted and the tick is dropped; nothing on the delivery
//! path aborts the pipeline.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::bar::IntradayBar;
use types::errors::{CollectorError, StorageError};
use types::ids::{Exchange, Instrument, InstrumentToken};
use types::tick::{Tick, TickRecord};

use crate::candles::CandleBuilder;
use crate::config::PipelineConfig;
use crate::ingestion::{tick_queue, QueuedTick, TickQueue};
use crate::metrics::{CollectorMetrics, DropReason, MetricsSnapshot};
use crate::store::MarketStore;
use crate::transport::{Credentials, SubscriptionMode, Ticker};

/// Collector lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectorState::Created => "created",
            CollectorState::Running => "running",
            CollectorState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct Routing {
    instruments: HashMap<InstrumentToken, Instrument>,
    builders: HashMap<InstrumentToken, CandleBuilder>,
    subscribed: BTreeSet<InstrumentToken>,
}

/// State shared with the delivery task.
struct Pipeline {
    name: String,
    config: PipelineConfig,
    store: Arc<dyn MarketStore>,
    metrics: Arc<CollectorMetrics>,
    routing: Mutex<Routing>,
}

struct Delivery {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Lifecycle {
    state: CollectorState,
    delivery: Option<Delivery>,
}

/// A named live-data pipeline.
pub struct DataCollector {
    credentials: Credentials,
    ticker: Arc<dyn Ticker>,
    pipeline: Arc<Pipeline>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    running: AtomicBool,
}

impl Pipeline {
    fn routing(&self) -> MutexGuard<'_, Routing> {
        // Routing holds plain maps; a panic elsewhere cannot leave them torn.
        self.routing.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Process one queued tick and record its outcome.
    ///
    /// Counters are updated once the tick is fully handled, and a tick
    /// accounts for at most one error.
    async fn process_tick(&self, queued: QueuedTick) {
        let outcome = self.route_tick(&queued.tick).await;

        self.metrics.record_tick();
        if let Err(e) = outcome {
            let reason = drop_reason(&e);
            self.metrics.record_error(reason);
            match reason {
                DropReason::UnknownInstrument | DropReason::LateTick => {
                    debug!(collector = %self.name, error = %e, "Dropped tick");
                }
                _ => warn!(collector = %self.name, error = %e, "Tick not fully persisted"),
            }
        }

        let latency = queued.enqueued_at.elapsed().as_nanos();
        self.metrics
            .record_latency(u64::try_from(latency).unwrap_or(u64::MAX));
    }

    /// Persist a tick raw, then fold it into its instrument's builder.
    ///
    /// A failed raw write does not stop aggregation; it is reported after
    /// the builder has seen the tick.
    async fn route_tick(&self, tick: &Tick) -> Result<(), CollectorError> {
        let instrument = self
            .routing()
            .instruments
            .get(&tick.instrument_token)
            .cloned()
            .ok_or(CollectorError::UnknownInstrument {
                token: tick.instrument_token,
            })?;

        let record = TickRecord::from_tick(tick, &instrument, self.config.tick_source.as_str());
        let raw = self.store.insert_tick(&record).await;

        let closed = {
            let mut routing = self.routing();
            let builder = routing
                .builders
                .entry(tick.instrument_token)
                .or_insert_with(|| {
                    CandleBuilder::new(
                        instrument.clone(),
                        self.config.timeframe,
                        self.config.bar_source.as_str(),
                    )
                });
            builder.ingest(tick.last_price, tick.last_quantity, tick.exchange_timestamp)
        }?;

        if let Some(bar) = closed {
            self.persist_bar(&bar).await?;
        }
        raw.map_err(CollectorError::from)
    }

    async fn persist_bar(&self, bar: &IntradayBar) -> Result<(), StorageError> {
        match self.store.insert_intraday_bar(bar).await {
            Ok(()) => {
                self.metrics.record_bars(1);
                debug!(
                    collector = %self.name,
                    symbol = %bar.symbol,
                    bucket = %bar.bar_timestamp,
                    "Bar persisted"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    collector = %self.name,
                    symbol = %bar.symbol,
                    bucket = %bar.bar_timestamp,
                    error = %e,
                    "Failed to store bar"
                );
                Err(e)
            }
        }
    }

    /// Close every open bar and persist them with one bulk insert.
    async fn flush_all(&self) -> usize {
        let mut bars: Vec<IntradayBar> = self
            .routing()
            .builders
            .values_mut()
            .filter_map(CandleBuilder::flush)
            .collect();
        if bars.is_empty() {
            return 0;
        }
        bars.sort_by_key(|b| b.instrument_token);

        match self.store.bulk_insert_intraday_bars(&bars).await {
            Ok(()) => {
                self.metrics.record_bars(bars.len() as u64);
                info!(collector = %self.name, count = bars.len(), "Flushed open bars");
            }
            Err(e) => {
                self.metrics.record_error(DropReason::StorageFailure);
                error!(
                    collector = %self.name,
                    count = bars.len(),
                    error = %e,
                    "Failed to store flushed bars"
                );
            }
        }
        bars.len()
    }
}

fn drop_reason(err: &CollectorError) -> DropReason {
    match err {
        CollectorError::UnknownInstrument { .. } => DropReason::UnknownInstrument,
        CollectorError::LateOrOutOfOrderTick(_) => DropReason::LateTick,
        CollectorError::Transport(_) => DropReason::Transport,
        _ => DropReason::StorageFailure,
    }
}

/// Delivery task: process until told to stop, then drain what is queued.
async fn deliver(pipeline: Arc<Pipeline>, mut queue: TickQueue, mut shutdown: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            next = queue.recv() => match next {
                Some(queued) => pipeline.process_tick(queued).await,
                None => break,
            },
        }
    }

    queue.close();
    let mut drained = 0usize;
    while let Some(queued) = queue.recv().await {
        pipeline.process_tick(queued).await;
        drained += 1;
    }
    debug!(collector = %pipeline.name, drained, "Delivery task finished");
}

impl DataCollector {
    pub fn new(
        name: impl Into<String>,
        credentials: Credentials,
        ticker: Arc<dyn Ticker>,
        store: Arc<dyn MarketStore>,
        config: PipelineConfig,
    ) -> Self {
        let metrics = Arc::new(CollectorMetrics::new(config.latency_window));
        Self {
            credentials,
            ticker,
            pipeline: Arc::new(Pipeline {
                name: name.into(),
                config,
                store,
                metrics,
                routing: Mutex::new(Routing::default()),
            }),
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                state: CollectorState::Created,
                delivery: None,
            }),
            running: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.pipeline.name
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.pipeline.config
    }

    pub async fn state(&self) -> CollectorState {
        self.lifecycle.lock().await.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Map a token to its listing and install a fresh builder for it.
    ///
    /// Registering the same listing again is a no-op and keeps the open bar.
    /// When the listing changes, a bar still open for the token is flushed
    /// and persisted first, then returned. A failed write of that bar is
    /// counted and reported as an error; the new registration is kept either
    /// way.
    pub async fn register_symbol(
        &self,
        token: InstrumentToken,
        exchange: Exchange,
        symbol: impl Into<String>,
    ) -> Result<Option<IntradayBar>, CollectorError> {
        let instrument = Instrument::new(token, exchange, symbol);
        let config = &self.pipeline.config;

        let previous = {
            let mut routing = self.pipeline.routing();
            if routing.instruments.get(&token) == Some(&instrument) {
                return Ok(None);
            }
            let builder = CandleBuilder::new(
                instrument.clone(),
                config.timeframe,
                config.bar_source.as_str(),
            );
            routing.instruments.insert(token, instrument.clone());
            routing.builders.insert(token, builder)
        };
        debug!(collector = %self.name(), instrument = %instrument, "Registered symbol");

        let Some(bar) = previous.and_then(|mut b| b.flush()) else {
            return Ok(None);
        };
        if let Err(e) = self.pipeline.persist_bar(&bar).await {
            self.pipeline.metrics.record_error(DropReason::StorageFailure);
            return Err(e.into());
        }
        Ok(Some(bar))
    }

    /// Subscribe a batch of tokens with a single transport request.
    ///
    /// Tokens already subscribed are left out of the request; when none are
    /// new, no request is sent.
    pub async fn subscribe(&self, tokens: &[InstrumentToken]) -> Result<(), CollectorError> {
        let lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != CollectorState::Running {
            return Err(CollectorError::NotRunning);
        }

        let fresh: Vec<InstrumentToken> = {
            let routing = self.pipeline.routing();
            let mut seen = BTreeSet::new();
            tokens
                .iter()
                .copied()
                .filter(|t| !routing.subscribed.contains(t) && seen.insert(*t))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }

        self.ticker.subscribe(&fresh).await?;
        let total = {
            let mut routing = self.pipeline.routing();
            routing.subscribed.extend(fresh.iter().copied());
            routing.subscribed.len()
        };
        drop(lifecycle);

        info!(collector = %self.name(), added = fresh.len(), total, "Subscribed instruments");
        Ok(())
    }

    pub async fn unsubscribe(&self, tokens: &[InstrumentToken]) -> Result<(), CollectorError> {
        let lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != CollectorState::Running {
            return Err(CollectorError::NotRunning);
        }
        if tokens.is_empty() {
            return Ok(());
        }

        self.ticker.unsubscribe(tokens).await?;
        let mut routing = self.pipeline.routing();
        for token in tokens {
            routing.subscribed.remove(token);
        }
        info!(collector = %self.name(), removed = tokens.len(), "Unsubscribed instruments");
        Ok(())
    }

    pub async fn set_mode(
        &self,
        mode: SubscriptionMode,
        tokens: &[InstrumentToken],
    ) -> Result<(), CollectorError> {
        let lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != CollectorState::Running {
            return Err(CollectorError::NotRunning);
        }
        self.ticker.set_mode(mode, tokens).await?;
        info!(collector = %self.name(), %mode, count = tokens.len(), "Subscription mode set");
        Ok(())
    }

    /// Connect the transport and spawn the delivery task.
    pub async fn start(&self) -> Result<(), CollectorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            CollectorState::Running => return Ok(()),
            CollectorState::Stopped => return Err(CollectorError::Stopped),
            CollectorState::Created => {}
        }

        let pipeline = &self.pipeline;
        let (sink, queue) = tick_queue(pipeline.config.queue_capacity, pipeline.metrics.clone());
        if let Err(e) = self.ticker.connect(sink).await {
            error!(collector = %self.name(), error = %e, "Transport connection failed");
            return Err(e.into());
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(deliver(pipeline.clone(), queue, shutdown_rx));
        lifecycle.delivery = Some(Delivery { shutdown, handle });
        lifecycle.state = CollectorState::Running;
        self.running.store(true, Ordering::Release);

        info!(
            collector = %self.name(),
            timeframe = %pipeline.config.timeframe,
            queue_capacity = pipeline.config.queue_capacity,
            "Collector started"
        );
        Ok(())
    }

    /// Close the transport, drain queued ticks and flush every open bar.
    ///
    /// Returns the number of bars flushed.
    pub async fn stop(&self) -> Result<usize, CollectorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            CollectorState::Created => return Err(CollectorError::NotRunning),
            CollectorState::Stopped => return Ok(0),
            CollectorState::Running => {}
        }

        if let Err(e) = self.ticker.close().await {
            self.pipeline.metrics.record_error(DropReason::Transport);
            warn!(collector = %self.name(), error = %e, "Transport close failed");
        }

        if let Some(delivery) = lifecycle.delivery.take() {
            let _ = delivery.shutdown.send(());
            if let Err(e) = delivery.handle.await {
                error!(collector = %self.name(), error = %e, "Delivery task failed");
            }
        }

        lifecycle.state = CollectorState::Stopped;
        self.running.store(false, Ordering::Release);
        self.pipeline.routing().subscribed.clear();

        let flushed = self.pipeline.flush_all().await;
        let snapshot = self.metrics();
        info!(
            collector = %self.name(),
            flushed,
            ticks_received = snapshot.ticks_received,
            bars_created = snapshot.bars_created,
            errors = snapshot.errors,
            "Collector stopped"
        );
        Ok(flushed)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let subscribed = self.pipeline.routing().subscribed.len();
        self.pipeline.metrics.snapshot(self.is_running(), subscribed)
    }

    /// Subscribed tokens in ascending order.
    pub fn subscribed_tokens(&self) -> Vec<InstrumentToken> {
        self.pipeline.routing().subscribed.iter().copied().collect()
    }

    pub fn instrument(&self, token: InstrumentToken) -> Option<Instrument> {
        self.pipeline.routing().instruments.get(&token).cloned()
    }

    /// Peek at the bar currently being built for a token.
    pub fn open_bar(&self, token: InstrumentToken) -> Option<IntradayBar> {
        self.pipeline
            .routing()
            .builders
            .get(&token)
            .and_then(|b| b.current().cloned())
    }
}

impl fmt::Debug for DataCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCollector")
            .field("name", &self.name())
            .field("credentials", &self.credentials)
            .field("running", &self.is_running())
            .finish()
    }
}
