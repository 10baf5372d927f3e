//! Collector registry
//!
//! Owns every named [`DataCollector`] together with the storage and
//! transport factory new collectors are built from. Name checks and inserts
//! go through the `DashMap` entry API, so two concurrent creates of the same
//! name cannot both succeed.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{error, info, warn};
use types::errors::CollectorError;
use types::ids::{Exchange, InstrumentToken};

use crate::collector::DataCollector;
use crate::config::{CollectorsFile, PipelineConfig};
use crate::metrics::MetricsSnapshot;
use crate::store::MarketStore;
use crate::transport::{Credentials, TickerFactory};

/// Exchanges tried, in order, when resolving a bare symbol.
const LOOKUP_EXCHANGES: [Exchange; 2] = [Exchange::NSE, Exchange::BSE];

pub struct CollectorManager {
    collectors: DashMap<String, Arc<DataCollector>>,
    store: Arc<dyn MarketStore>,
    tickers: Arc<dyn TickerFactory>,
    config: PipelineConfig,
}

impl CollectorManager {
    pub fn new(
        store: Arc<dyn MarketStore>,
        tickers: Arc<dyn TickerFactory>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            collectors: DashMap::new(),
            store,
            tickers,
            config,
        }
    }

    /// Register a new collector in the `Created` state.
    pub fn create_collector(
        &self,
        name: &str,
        api_key: &str,
        access_token: &str,
    ) -> Result<Arc<DataCollector>, CollectorError> {
        match self.collectors.entry(name.to_string()) {
            Entry::Occupied(_) => Err(CollectorError::AlreadyExists {
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                let credentials = Credentials::new(api_key, access_token);
                let ticker = self.tickers.create(name, &credentials);
                let collector = Arc::new(DataCollector::new(
                    name,
                    credentials,
                    ticker,
                    self.store.clone(),
                    self.config.clone(),
                ));
                slot.insert(collector.clone());
                info!(collector = %name, "Collector created");
                Ok(collector)
            }
        }
    }

    pub fn get_collector(&self, name: &str) -> Result<Arc<DataCollector>, CollectorError> {
        self.collectors
            .get(name)
            .map(|c| c.value().clone())
            .ok_or_else(|| CollectorError::NotFound {
                name: name.to_string(),
            })
    }

    /// All collector names, sorted.
    pub fn list_collectors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collectors.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    /// Unregister a collector, stopping it if it is running.
    pub async fn remove_collector(&self, name: &str) -> Result<(), CollectorError> {
        let (_, collector) = self
            .collectors
            .remove(name)
            .ok_or_else(|| CollectorError::NotFound {
                name: name.to_string(),
            })?;

        if collector.is_running() {
            collector.stop().await?;
        }
        info!(collector = %name, "Collector removed");
        Ok(())
    }

    pub async fn start_collector(&self, name: &str) -> Result<(), CollectorError> {
        self.get_collector(name)?.start().await
    }

    /// Stop one collector. Returns the number of bars flushed.
    pub async fn stop_collector(&self, name: &str) -> Result<usize, CollectorError> {
        self.get_collector(name)?.stop().await
    }

    /// Stop every running collector. Failures are logged, not returned.
    pub async fn stop_all(&self) {
        let running: Vec<Arc<DataCollector>> = self
            .collectors
            .iter()
            .filter(|c| c.is_running())
            .map(|c| c.value().clone())
            .collect();

        for collector in running {
            match collector.stop().await {
                Ok(flushed) => info!(collector = %collector.name(), flushed, "Collector stopped"),
                Err(e) => error!(collector = %collector.name(), error = %e, "Failed to stop collector"),
            }
        }
    }

    /// Metrics of every collector keyed by name.
    pub fn all_metrics(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.collectors
            .iter()
            .map(|c| (c.key().clone(), c.metrics()))
            .collect()
    }

    /// Resolve a symbol to its token, trying NSE before BSE.
    pub async fn resolve_symbol(&self, symbol: &str) -> Option<(InstrumentToken, Exchange)> {
        for exchange in LOOKUP_EXCHANGES {
            match self.store.instrument_token(exchange, symbol).await {
                Ok(Some(token)) => return Some((token, exchange)),
                Ok(None) => {}
                Err(e) => {
                    warn!(symbol, %exchange, error = %e, "Instrument lookup failed");
                }
            }
        }
        None
    }

    /// Resolve, register and subscribe symbols on a running collector.
    ///
    /// Unresolvable symbols are skipped. Returns the subscribed tokens.
    pub async fn subscribe_symbols(
        &self,
        name: &str,
        symbols: &[String],
    ) -> Result<Vec<InstrumentToken>, CollectorError> {
        let collector = self.get_collector(name)?;

        let mut tokens = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let Some((token, exchange)) = self.resolve_symbol(symbol).await else {
                warn!(collector = %name, symbol = %symbol, "Symbol not found");
                continue;
            };
            if let Err(e) = collector.register_symbol(token, exchange, symbol.as_str()).await {
                warn!(collector = %name, symbol = %symbol, error = %e, "Re-registration flush failed");
            }
            tokens.push(token);
        }

        if tokens.is_empty() {
            return Err(CollectorError::NoSymbolsResolved);
        }
        collector.subscribe(&tokens).await?;
        Ok(tokens)
    }

    /// Resolve symbols and unsubscribe them. Unresolvable symbols are skipped.
    pub async fn unsubscribe_symbols(
        &self,
        name: &str,
        symbols: &[String],
    ) -> Result<Vec<InstrumentToken>, CollectorError> {
        let collector = self.get_collector(name)?;

        let mut tokens = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if let Some((token, _)) = self.resolve_symbol(symbol).await {
                tokens.push(token);
            }
        }
        collector.unsubscribe(&tokens).await?;
        Ok(tokens)
    }

    /// Create, start and subscribe every `auto_start` collector in `file`.
    ///
    /// Credentials are expanded from the environment first. A failing
    /// collector is logged and skipped. Returns how many were started.
    pub async fn load_and_start(&self, file: &CollectorsFile) -> usize {
        let mut file = file.clone();
        file.expand_env_vars();

        let mut started = 0;
        for entry in &file.collectors {
            if !entry.auto_start {
                info!(collector = %entry.name, "Skipping collector (auto_start=false)");
                continue;
            }

            let collector =
                match self.create_collector(&entry.name, &entry.api_key, &entry.access_token) {
                    Ok(collector) => collector,
                    Err(e) => {
                        error!(collector = %entry.name, error = %e, "Failed to create collector");
                        continue;
                    }
                };

            if let Err(e) = collector.start().await {
                error!(collector = %entry.name, error = %e, "Failed to start collector");
                continue;
            }

            let symbols = file.resolve_symbols(entry);
            if !symbols.is_empty() {
                if let Err(e) = self.subscribe_symbols(&entry.name, &symbols).await {
                    error!(collector = %entry.name, error = %e, "Failed to subscribe symbols");
                    if let Err(e) = collector.stop().await {
                        warn!(collector = %entry.name, error = %e, "Failed to stop collector");
                    }
                    continue;
                }
            }

            if let Some(mode) = entry.mode {
                let tokens = collector.subscribed_tokens();
                if let Err(e) = collector.set_mode(mode, &tokens).await {
                    warn!(collector = %entry.name, %mode, error = %e, "Failed to set mode");
                }
            }

            started += 1;
            info!(
                collector = %entry.name,
                symbols = symbols.len(),
                subscribed = collector.subscribed_tokens().len(),
                "Auto-started collector"
            );
        }

        info!(started, total = file.collectors.len(), "Auto-start complete");
        started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transport::{ManualTickerFactory, SubscriptionMode, TickerRequest};
    use types::ids::Instrument;

    fn manager() -> (CollectorManager, Arc<ManualTickerFactory>) {
        let store = Arc::new(MemoryStore::with_instruments([
            Instrument::new(InstrumentToken::new(738561), Exchange::NSE, "RELIANCE"),
            Instrument::new(InstrumentToken::new(2953217), Exchange::NSE, "TCS"),
            Instrument::new(InstrumentToken::new(500112), Exchange::BSE, "SBIN"),
        ]));
        let factory = Arc::new(ManualTickerFactory::new());
        let manager = CollectorManager::new(store, factory.clone(), PipelineConfig::default());
        (manager, factory)
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_create_and_get() {
        let (manager, _) = manager();
        let created = manager.create_collector("primary", "k", "t").unwrap();
        let fetched = manager.get_collector("primary").unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));
        assert_eq!(fetched.credentials().api_key, "k");
    }

    #[test]
    fn test_duplicate_name_rejected_and_original_kept() {
        let (manager, _) = manager();
        let original = manager.create_collector("primary", "k1", "t1").unwrap();

        let err = manager.create_collector("primary", "k2", "t2").unwrap_err();
        assert_eq!(
            err,
            CollectorError::AlreadyExists {
                name: "primary".to_string()
            }
        );

        let kept = manager.get_collector("primary").unwrap();
        assert!(Arc::ptr_eq(&original, &kept));
        assert_eq!(kept.credentials().api_key, "k1");
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (manager, _) = manager();
        assert_eq!(
            manager.get_collector("ghost").unwrap_err(),
            CollectorError::NotFound {
                name: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_list_is_sorted() {
        let (manager, _) = manager();
        assert!(manager.list_collectors().is_empty());
        for name in ["zeta", "alpha", "mid"] {
            manager.create_collector(name, "k", "t").unwrap();
        }
        assert_eq!(manager.list_collectors(), vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_resolve_tries_nse_then_bse() {
        let (manager, _) = manager();
        assert_eq!(
            manager.resolve_symbol("RELIANCE").await,
            Some((InstrumentToken::new(738561), Exchange::NSE))
        );
        assert_eq!(
            manager.resolve_symbol("SBIN").await,
            Some((InstrumentToken::new(500112), Exchange::BSE))
        );
        assert_eq!(manager.resolve_symbol("NOPE").await, None);
    }

    #[tokio::test]
    async fn test_subscribe_symbols_registers_and_batches() {
        let (manager, factory) = manager();
        let collector = manager.create_collector("primary", "k", "t").unwrap();
        manager.start_collector("primary").await.unwrap();

        let tokens = manager
            .subscribe_symbols("primary", &symbols(&["RELIANCE", "NOPE", "SBIN"]))
            .await
            .unwrap();
        assert_eq!(
            tokens,
            vec![InstrumentToken::new(738561), InstrumentToken::new(500112)]
        );

        let ticker = factory.ticker("primary").unwrap();
        assert_eq!(ticker.subscribe_requests().len(), 1);
        let sbin = collector.instrument(InstrumentToken::new(500112)).unwrap();
        assert_eq!(sbin.exchange, Exchange::BSE);

        manager
            .unsubscribe_symbols("primary", &symbols(&["SBIN"]))
            .await
            .unwrap();
        assert_eq!(collector.subscribed_tokens(), vec![InstrumentToken::new(738561)]);

        manager.stop_all().await;
        assert!(!collector.is_running());
    }

    #[tokio::test]
    async fn test_subscribe_symbols_none_resolved() {
        let (manager, _) = manager();
        manager.create_collector("primary", "k", "t").unwrap();
        manager.start_collector("primary").await.unwrap();

        let err = manager
            .subscribe_symbols("primary", &symbols(&["NOPE"]))
            .await
            .unwrap_err();
        assert_eq!(err, CollectorError::NoSymbolsResolved);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_remove_collector_stops_it() {
        let (manager, _) = manager();
        let collector = manager.create_collector("primary", "k", "t").unwrap();
        manager.start_collector("primary").await.unwrap();

        manager.remove_collector("primary").await.unwrap();
        assert!(!collector.is_running());
        assert!(manager.list_collectors().is_empty());
        assert!(matches!(
            manager.remove_collector("primary").await,
            Err(CollectorError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_and_start() {
        let (manager, factory) = manager();
        let file: CollectorsFile = serde_json::from_value(serde_json::json!({
            "collectors": [
                { "name": "auto", "api_key": "k", "access_token": "t",
                  "auto_start": true, "symbols": ["RELIANCE", "TCS"], "mode": "ltp" },
                { "name": "manual", "api_key": "k", "access_token": "t" },
                { "name": "broken", "api_key": "k", "access_token": "t",
                  "auto_start": true, "symbols": ["NOPE"] }
            ]
        }))
        .unwrap();

        let started = manager.load_and_start(&file).await;
        assert_eq!(started, 1);
        assert_eq!(manager.list_collectors(), vec!["auto", "broken"]);

        let auto = manager.get_collector("auto").unwrap();
        assert!(auto.is_running());
        assert_eq!(auto.subscribed_tokens().len(), 2);

        let requests = factory.ticker("auto").unwrap().requests();
        assert!(requests
            .iter()
            .any(|r| matches!(r, TickerRequest::SetMode(SubscriptionMode::Ltp, t) if t.len() == 2)));

        assert!(!manager.get_collector("broken").unwrap().is_running());

        let metrics = manager.all_metrics();
        assert_eq!(metrics.len(), 2);
        assert!(metrics["auto"].running);
        manager.stop_all().await;
    }
}
