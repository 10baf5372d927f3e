//! Configuration
//!
//! Two layers: [`PipelineConfig`] holds per-collector processing defaults,
//! and [`CollectorsFile`] describes which collectors to create at startup,
//! with their credentials, symbols and watchlists. The file is JSON or TOML,
//! chosen by extension. Credentials may reference environment variables as
//! `${VAR}` or `$VAR`.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use types::errors::CollectorError;
use types::timeframe::Timeframe;

use crate::simulated::SimulationConfig;
use crate::transport::SubscriptionMode;

// ── Pipeline defaults ───────────────────────────────────────────────

/// Processing settings shared by every collector of a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bucket width for every candle builder.
    pub timeframe: Timeframe,
    /// Bounded tick queue capacity per collector.
    pub queue_capacity: usize,
    /// Source tag stamped on raw tick records.
    pub tick_source: String,
    /// Source tag stamped on completed bars.
    pub bar_source: String,
    /// Number of latency samples kept for percentiles.
    pub latency_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M1,
            queue_capacity: 10_000,
            tick_source: "zerodha".to_string(),
            bar_source: "zerodha_websocket".to_string(),
            latency_window: 1_000,
        }
    }
}

// ── Collectors file ─────────────────────────────────────────────────

/// One collector entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub name: String,
    pub api_key: String,
    pub access_token: String,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub watchlists: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SubscriptionMode>,
}

/// Startup configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectorsFile {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub watchlists: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub collectors: Vec<CollectorConfig>,
}

/// Serialization format, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, CollectorError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("toml") => Ok(ConfigFormat::Toml),
            other => Err(config_error(format!(
                "unsupported config file format: {} (use .json or .toml)",
                other.unwrap_or("<none>")
            ))),
        }
    }
}

fn config_error(message: impl Into<String>) -> CollectorError {
    CollectorError::Config {
        message: message.into(),
    }
}

impl CollectorsFile {
    /// Read and parse a collectors file. Environment references are left as-is.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CollectorError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let raw = fs::read_to_string(path)
            .map_err(|e| config_error(format!("failed to read {}: {e}", path.display())))?;

        let file = match format {
            ConfigFormat::Json => serde_json::from_str(&raw)
                .map_err(|e| config_error(format!("failed to parse JSON config: {e}")))?,
            ConfigFormat::Toml => toml::from_str(&raw)
                .map_err(|e| config_error(format!("failed to parse TOML config: {e}")))?,
        };
        info!(path = %path.display(), "Loaded collectors file");
        Ok(file)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CollectorError> {
        let path = path.as_ref();
        let data = match ConfigFormat::from_path(path)? {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| config_error(format!("failed to encode JSON config: {e}")))?,
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| config_error(format!("failed to encode TOML config: {e}")))?,
        };
        fs::write(path, data)
            .map_err(|e| config_error(format!("failed to write {}: {e}", path.display())))
    }

    /// Starter file: one disabled collector on the two index watchlists.
    pub fn starter() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            simulation: SimulationConfig::default(),
            watchlists: builtin_watchlists(),
            collectors: vec![CollectorConfig {
                name: "default".to_string(),
                api_key: "${ZERODHA_API_KEY}".to_string(),
                access_token: "${ZERODHA_ACCESS_TOKEN}".to_string(),
                auto_start: false,
                symbols: Vec::new(),
                watchlists: vec!["NIFTY50".to_string(), "BANKNIFTY".to_string()],
                mode: Some(SubscriptionMode::Full),
            }],
        }
    }

    /// Write the starter file, creating parent directories.
    pub fn create_default(path: impl AsRef<Path>) -> Result<Self, CollectorError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| {
                config_error(format!("failed to create {}: {e}", dir.display()))
            })?;
        }
        let file = Self::starter();
        file.save(path)?;
        info!(path = %path.display(), "Created default collectors file");
        Ok(file)
    }

    /// Expand environment references in every collector's credentials.
    pub fn expand_env_vars(&mut self) {
        self.expand_with(|name| std::env::var(name).ok());
    }

    /// Expand credentials with a custom variable lookup.
    pub fn expand_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for collector in &mut self.collectors {
            collector.api_key = expand_vars(&collector.api_key, &lookup);
            collector.access_token = expand_vars(&collector.access_token, &lookup);
        }
    }

    /// Watchlist members, file table first, then built-in lists.
    pub fn watchlist(&self, name: &str) -> Option<Vec<String>> {
        self.watchlists
            .get(name)
            .cloned()
            .or_else(|| builtin_watchlists().remove(name))
    }

    /// Watchlist members followed by explicit symbols, deduplicated in order.
    pub fn resolve_symbols(&self, collector: &CollectorConfig) -> Vec<String> {
        let mut all = Vec::new();
        for name in &collector.watchlists {
            match self.watchlist(name) {
                Some(symbols) => all.extend(symbols),
                None => warn!(collector = %collector.name, watchlist = %name, "Watchlist not found"),
            }
        }
        all.extend(collector.symbols.iter().cloned());

        let mut seen = HashSet::new();
        all.retain(|s| seen.insert(s.clone()));
        all
    }
}

/// `~/.market-bridge/collectors.toml`, or `./collectors.toml` without a home.
pub fn default_config_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home)
            .join(".market-bridge")
            .join("collectors.toml"),
        _ => PathBuf::from("./collectors.toml"),
    }
}

/// Substitute `${VAR}` and `$VAR`. Unset variables become empty strings.
pub fn expand_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some((start, '{')) => {
                chars.next();
                let rest = &input[start + 1..];
                match rest.find('}') {
                    Some(len) => {
                        out.push_str(&lookup(&rest[..len]).unwrap_or_default());
                        // Skip the name and the closing brace.
                        for _ in 0..rest[..=len].chars().count() {
                            chars.next();
                        }
                    }
                    None => {
                        out.push_str("${");
                    }
                }
            }
            Some((start, n)) if n == '_' || n.is_ascii_alphabetic() => {
                let len = input[start..]
                    .find(|ch: char| !(ch == '_' || ch.is_ascii_alphanumeric()))
                    .unwrap_or(input.len() - start);
                out.push_str(&lookup(&input[start..start + len]).unwrap_or_default());
                for _ in 0..len {
                    chars.next();
                }
            }
            _ => out.push('$'),
        }
    }
    out
}

/// Index constituent lists known without a file table.
pub fn builtin_watchlists() -> BTreeMap<String, Vec<String>> {
    const NIFTY50: &[&str] = &[
        "RELIANCE", "TCS", "HDFCBANK", "INFY", "ICICIBANK", "HINDUNILVR", "ITC", "SBIN",
        "BHARTIARTL", "KOTAKBANK", "LT", "AXISBANK", "ASIANPAINT", "MARUTI", "HCLTECH",
        "SUNPHARMA", "BAJFINANCE", "TITAN", "ULTRACEMCO", "WIPRO", "ONGC", "NTPC",
        "POWERGRID", "M&M", "TATASTEEL", "TATAMOTORS", "TECHM", "BAJAJFINSV", "ADANIPORTS",
        "COALINDIA", "NESTLEIND", "DRREDDY", "JSWSTEEL", "INDUSINDBK", "DIVISLAB", "GRASIM",
        "CIPLA", "HINDALCO", "HEROMOTOCO", "EICHERMOT", "BRITANNIA", "APOLLOHOSP", "UPL",
        "SBILIFE", "TATACONSUM", "BAJAJ-AUTO", "HDFCLIFE", "ADANIENT", "BPCL", "TATAPOWER",
    ];
    const BANKNIFTY: &[&str] = &[
        "HDFCBANK", "ICICIBANK", "SBIN", "KOTAKBANK", "AXISBANK", "INDUSINDBK", "BANKBARODA",
        "PNB", "IDFCFIRSTB", "FEDERALBNK", "AUBANK", "BANDHANBNK",
    ];

    let to_vec = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    BTreeMap::from([
        ("NIFTY50".to_string(), to_vec(NIFTY50)),
        ("BANKNIFTY".to_string(), to_vec(BANKNIFTY)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "ZERODHA_API_KEY" => Some("kite-key".to_string()),
            "TOKEN" => Some("tok".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.timeframe, Timeframe::M1);
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.bar_source, "zerodha_websocket");
    }

    #[test]
    fn test_expand_vars_forms() {
        assert_eq!(expand_vars("${ZERODHA_API_KEY}", env), "kite-key");
        assert_eq!(expand_vars("$TOKEN", env), "tok");
        assert_eq!(expand_vars("pre-${TOKEN}-post", env), "pre-tok-post");
        assert_eq!(expand_vars("$TOKEN/rest", env), "tok/rest");
        assert_eq!(expand_vars("${MISSING}", env), "");
        assert_eq!(expand_vars("plain", env), "plain");
        assert_eq!(expand_vars("cost $5", env), "cost $5");
        assert_eq!(expand_vars("${UNCLOSED", env), "${UNCLOSED");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a/collectors.json")).unwrap(),
            ConfigFormat::Json
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("collectors.TOML")).unwrap(),
            ConfigFormat::Toml
        );
        assert!(matches!(
            ConfigFormat::from_path(Path::new("collectors.yaml")),
            Err(CollectorError::Config { .. })
        ));
        assert!(ConfigFormat::from_path(Path::new("collectors")).is_err());
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collectors.json");
        fs::write(
            &path,
            r#"{
                "collectors": [
                    {
                        "name": "primary",
                        "api_key": "${ZERODHA_API_KEY}",
                        "access_token": "$TOKEN",
                        "auto_start": true,
                        "symbols": ["RELIANCE"],
                        "mode": "ltp"
                    }
                ]
            }"#,
        )
        .unwrap();

        let mut file = CollectorsFile::load(&path).unwrap();
        file.expand_with(env);

        let primary = &file.collectors[0];
        assert_eq!(primary.api_key, "kite-key");
        assert_eq!(primary.access_token, "tok");
        assert!(primary.auto_start);
        assert_eq!(primary.mode, Some(SubscriptionMode::Ltp));
        assert_eq!(file.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collectors.toml");
        fs::write(
            &path,
            r#"
[pipeline]
timeframe = "5m"
queue_capacity = 64

[watchlists]
MINE = ["TCS", "INFY"]

[[collectors]]
name = "secondary"
api_key = "k"
access_token = "t"
watchlists = ["MINE"]
symbols = ["INFY", "SBIN"]
"#,
        )
        .unwrap();

        let file = CollectorsFile::load(&path).unwrap();
        assert_eq!(file.pipeline.timeframe, Timeframe::M5);
        assert_eq!(file.pipeline.queue_capacity, 64);
        assert_eq!(file.pipeline.bar_source, "zerodha_websocket");

        let secondary = &file.collectors[0];
        assert!(!secondary.auto_start);
        assert_eq!(secondary.mode, None);
        assert_eq!(file.resolve_symbols(secondary), vec!["TCS", "INFY", "SBIN"]);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collectors.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            CollectorsFile::load(&path),
            Err(CollectorError::Config { .. })
        ));
    }

    #[test]
    fn test_create_default_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["nested/collectors.toml", "nested/collectors.json"] {
            let path = dir.path().join(name);
            let created = CollectorsFile::create_default(&path).unwrap();
            let loaded = CollectorsFile::load(&path).unwrap();
            assert_eq!(created, loaded);
            assert_eq!(loaded.collectors[0].name, "default");
            assert_eq!(loaded.collectors[0].api_key, "${ZERODHA_API_KEY}");
        }
    }

    #[test]
    fn test_builtin_watchlists_resolve() {
        let file = CollectorsFile::default();
        let collector = CollectorConfig {
            name: "c".to_string(),
            api_key: String::new(),
            access_token: String::new(),
            auto_start: true,
            symbols: vec!["HDFCBANK".to_string()],
            watchlists: vec!["BANKNIFTY".to_string(), "NOPE".to_string()],
            mode: None,
        };

        let symbols = file.resolve_symbols(&collector);
        assert_eq!(symbols.len(), 12);
        assert_eq!(symbols[0], "HDFCBANK");
        assert_eq!(file.watchlist("NIFTY50").unwrap().len(), 50);
    }

    #[test]
    fn test_default_config_path_file_name() {
        assert!(default_config_path().ends_with("collectors.toml"));
    }
}
