//! Market-data transport seam
//!
//! A [`Ticker`] is the live connection a collector subscribes instruments on.
//! Once connected it pushes every tick it receives into the collector's
//! [`TickSink`]. Real broker protocols live outside this crate; this module
//! ships [`ManualTicker`], an in-process transport driven by the caller.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use types::errors::TransportError;
use types::ids::InstrumentToken;
use types::tick::Tick;

use crate::ingestion::{IngestionError, TickSink};

/// How much data the transport streams per instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    /// Last traded price only
    Ltp,
    /// LTP plus OHLC and depth summary
    Quote,
    /// Everything, including market depth
    #[default]
    Full,
}

impl SubscriptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionMode::Ltp => "ltp",
            SubscriptionMode::Quote => "quote",
            SubscriptionMode::Full => "full",
        }
    }
}

impl fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionMode {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ltp" => Ok(SubscriptionMode::Ltp),
            "quote" => Ok(SubscriptionMode::Quote),
            "full" => Ok(SubscriptionMode::Full),
            other => Err(TransportError::SubscriptionRejected {
                reason: format!("unknown mode '{other}'"),
            }),
        }
    }
}

/// Broker credentials for one collector.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub access_token: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            access_token: access_token.into(),
        }
    }
}

// Secrets never reach logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Live market-data connection used by one collector.
#[async_trait]
pub trait Ticker: Send + Sync {
    /// Open the connection. Ticks flow into `sink` until [`Ticker::close`].
    async fn connect(&self, sink: TickSink) -> Result<(), TransportError>;

    /// Subscribe a batch of tokens in one request.
    async fn subscribe(&self, tokens: &[InstrumentToken]) -> Result<(), TransportError>;

    async fn unsubscribe(&self, tokens: &[InstrumentToken]) -> Result<(), TransportError>;

    async fn set_mode(
        &self,
        mode: SubscriptionMode,
        tokens: &[InstrumentToken],
    ) -> Result<(), TransportError>;

    /// Close the connection. No tick is pushed after this returns.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Builds one [`Ticker`] per collector.
pub trait TickerFactory: Send + Sync {
    fn create(&self, collector: &str, credentials: &Credentials) -> Arc<dyn Ticker>;
}

/// A transport request as seen by [`ManualTicker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickerRequest {
    Subscribe(Vec<InstrumentToken>),
    Unsubscribe(Vec<InstrumentToken>),
    SetMode(SubscriptionMode, Vec<InstrumentToken>),
}

#[derive(Default)]
struct ManualState {
    sink: Option<TickSink>,
    subscribed: BTreeSet<InstrumentToken>,
    requests: Vec<TickerRequest>,
    connect_failure: Option<String>,
    connects: usize,
}

/// In-process transport: the caller pushes ticks by hand.
///
/// Every request is recorded so callers can assert on exactly what a
/// collector asked the transport to do.
#[derive(Default)]
pub struct ManualTicker {
    state: Mutex<ManualState>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        // A poisoned lock only means a panicking caller; the state is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `connect` fail with the given reason.
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        self.state().connect_failure = Some(reason.into());
    }

    /// Deliver a tick, waiting for queue capacity.
    pub async fn push(&self, tick: Tick) -> Result<(), IngestionError> {
        let sink = self.state().sink.clone();
        match sink {
            Some(sink) => sink.send(tick).await,
            None => Err(IngestionError::Closed),
        }
    }

    /// Deliver a tick the way a callback transport does: never wait.
    pub fn try_push(&self, tick: Tick) -> Result<(), IngestionError> {
        match self.state().sink.as_ref() {
            Some(sink) => sink.try_send(tick),
            None => Err(IngestionError::Closed),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().sink.is_some()
    }

    /// Number of successful connects.
    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn requests(&self) -> Vec<TickerRequest> {
        self.state().requests.clone()
    }

    pub fn subscribe_requests(&self) -> Vec<Vec<InstrumentToken>> {
        self.state()
            .requests
            .iter()
            .filter_map(|r| match r {
                TickerRequest::Subscribe(tokens) => Some(tokens.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn subscribed(&self) -> Vec<InstrumentToken> {
        self.state().subscribed.iter().copied().collect()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn connect(&self, sink: TickSink) -> Result<(), TransportError> {
        let mut state = self.state();
        if let Some(reason) = state.connect_failure.take() {
            return Err(TransportError::ConnectionFailed { reason });
        }
        state.sink = Some(sink);
        state.connects += 1;
        info!("Manual ticker connected");
        Ok(())
    }

    async fn subscribe(&self, tokens: &[InstrumentToken]) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.sink.is_none() {
            return Err(TransportError::NotConnected);
        }
        state.subscribed.extend(tokens.iter().copied());
        state.requests.push(TickerRequest::Subscribe(tokens.to_vec()));
        debug!(count = tokens.len(), "Manual ticker subscribe");
        Ok(())
    }

    async fn unsubscribe(&self, tokens: &[InstrumentToken]) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.sink.is_none() {
            return Err(TransportError::NotConnected);
        }
        for token in tokens {
            state.subscribed.remove(token);
        }
        state.requests.push(TickerRequest::Unsubscribe(tokens.to_vec()));
        Ok(())
    }

    async fn set_mode(
        &self,
        mode: SubscriptionMode,
        tokens: &[InstrumentToken],
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.sink.is_none() {
            return Err(TransportError::NotConnected);
        }
        state.requests.push(TickerRequest::SetMode(mode, tokens.to_vec()));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.sink = None;
        state.subscribed.clear();
        Ok(())
    }
}

/// Hands out [`ManualTicker`]s and keeps a handle to each for the caller.
#[derive(Default)]
pub struct ManualTickerFactory {
    created: Mutex<Vec<(String, Arc<ManualTicker>)>>,
}

impl ManualTickerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent ticker created for `collector`.
    pub fn ticker(&self, collector: &str) -> Option<Arc<ManualTicker>> {
        let created = self.created.lock().unwrap_or_else(|e| e.into_inner());
        created
            .iter()
            .rev()
            .find(|(name, _)| name == collector)
            .map(|(_, ticker)| ticker.clone())
    }
}

impl TickerFactory for ManualTickerFactory {
    fn create(&self, collector: &str, _credentials: &Credentials) -> Arc<dyn Ticker> {
        let ticker = Arc::new(ManualTicker::new());
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((collector.to_string(), ticker.clone()));
        ticker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::tick_queue;
    use crate::metrics::CollectorMetrics;
    use chrono::Utc;
    use types::numeric::Price;

    fn tokens(raw: &[u32]) -> Vec<InstrumentToken> {
        raw.iter().copied().map(InstrumentToken::new).collect()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("ltp".parse::<SubscriptionMode>().unwrap(), SubscriptionMode::Ltp);
        assert_eq!(" QUOTE ".parse::<SubscriptionMode>().unwrap(), SubscriptionMode::Quote);
        assert_eq!("full".parse::<SubscriptionMode>().unwrap(), SubscriptionMode::Full);
        assert!("depth".parse::<SubscriptionMode>().is_err());
        assert_eq!(SubscriptionMode::default(), SubscriptionMode::Full);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::new("key-123", "secret-token");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key-123"));
        assert!(!debug.contains("secret-token"));
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let ticker = ManualTicker::new();
        let err = ticker.subscribe(&tokens(&[1])).await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
    }

    #[tokio::test]
    async fn test_requests_recorded() {
        let ticker = ManualTicker::new();
        let (sink, _queue) = tick_queue(4, Arc::new(CollectorMetrics::default()));
        ticker.connect(sink).await.unwrap();

        ticker.subscribe(&tokens(&[1, 2, 3])).await.unwrap();
        ticker.set_mode(SubscriptionMode::Ltp, &tokens(&[1])).await.unwrap();
        ticker.unsubscribe(&tokens(&[2])).await.unwrap();

        assert_eq!(ticker.subscribe_requests(), vec![tokens(&[1, 2, 3])]);
        assert_eq!(ticker.subscribed(), tokens(&[1, 3]));
        assert_eq!(ticker.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_connect_failure_injection() {
        let ticker = ManualTicker::new();
        ticker.fail_next_connect("handshake refused");
        let (sink, _queue) = tick_queue(4, Arc::new(CollectorMetrics::default()));

        let err = ticker.connect(sink.clone()).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed { .. }));
        assert!(!ticker.is_connected());

        ticker.connect(sink).await.unwrap();
        assert_eq!(ticker.connects(), 1);
    }

    #[tokio::test]
    async fn test_push_after_close_is_rejected() {
        let ticker = ManualTicker::new();
        let (sink, mut queue) = tick_queue(4, Arc::new(CollectorMetrics::default()));
        ticker.connect(sink).await.unwrap();

        let tick = Tick::new(InstrumentToken::new(1), Price::from_u64(100), 1, Utc::now());
        ticker.push(tick.clone()).await.unwrap();
        ticker.close().await.unwrap();

        assert_eq!(ticker.push(tick.clone()).await, Err(IngestionError::Closed));
        assert_eq!(ticker.try_push(tick), Err(IngestionError::Closed));
        assert!(queue.recv().await.is_some());
    }

    #[test]
    fn test_factory_tracks_tickers_by_collector() {
        let factory = ManualTickerFactory::new();
        let creds = Credentials::new("k", "t");
        let _a = factory.create("alpha", &creds);
        let _b = factory.create("beta", &creds);

        assert!(factory.ticker("alpha").is_some());
        assert!(factory.ticker("beta").is_some());
        assert!(factory.ticker("gamma").is_none());
    }
}
