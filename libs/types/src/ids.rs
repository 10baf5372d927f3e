//! Identifier types for tradable instruments
//!
//! Instruments are addressed by the broker's integer instrument token on the
//! wire and by `(exchange, symbol)` in storage and configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Broker-assigned integer identifier of a tradable instrument
///
/// Tokens are unique across exchanges, so a token alone is enough to route a
/// tick to its instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentToken(u32);

impl InstrumentToken {
    pub const fn new(token: u32) -> Self {
        Self(token)
    }

    /// Raw token value as sent on the wire
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for InstrumentToken {
    fn from(token: u32) -> Self {
        Self(token)
    }
}

impl fmt::Display for InstrumentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange segment an instrument is listed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    /// National Stock Exchange, cash segment
    NSE,
    /// Bombay Stock Exchange, cash segment
    BSE,
    /// NSE futures & options
    NFO,
    /// BSE futures & options
    BFO,
    /// Multi Commodity Exchange
    MCX,
    /// NSE currency derivatives
    CDS,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::NSE => "NSE",
            Exchange::BSE => "BSE",
            Exchange::NFO => "NFO",
            Exchange::BFO => "BFO",
            Exchange::MCX => "MCX",
            Exchange::CDS => "CDS",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an exchange code is not recognised
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown exchange code: {0}")]
pub struct UnknownExchange(pub String);

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NSE" => Ok(Exchange::NSE),
            "BSE" => Ok(Exchange::BSE),
            "NFO" => Ok(Exchange::NFO),
            "BFO" => Ok(Exchange::BFO),
            "MCX" => Ok(Exchange::MCX),
            "CDS" => Ok(Exchange::CDS),
            _ => Err(UnknownExchange(s.to_string())),
        }
    }
}

/// A registered instrument: token plus its human-readable listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub token: InstrumentToken,
    pub exchange: Exchange,
    pub symbol: String,
}

impl Instrument {
    pub fn new(token: InstrumentToken, exchange: Exchange, symbol: impl Into<String>) -> Self {
        Self {
            token,
            exchange,
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.exchange, self.symbol, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip_value() {
        let token = InstrumentToken::new(738561);
        assert_eq!(token.get(), 738561);
        assert_eq!(InstrumentToken::from(738561), token);
        assert_eq!(token.to_string(), "738561");
    }

    #[test]
    fn test_token_serializes_as_number() {
        let json = serde_json::to_string(&InstrumentToken::new(2953217)).unwrap();
        assert_eq!(json, "2953217");
    }

    #[test]
    fn test_exchange_parse_case_insensitive() {
        assert_eq!("nse".parse::<Exchange>().unwrap(), Exchange::NSE);
        assert_eq!(" BSE ".parse::<Exchange>().unwrap(), Exchange::BSE);
        assert_eq!(
            "LSE".parse::<Exchange>().unwrap_err(),
            UnknownExchange("LSE".to_string())
        );
    }

    #[test]
    fn test_exchange_serialization() {
        let json = serde_json::to_string(&Exchange::MCX).unwrap();
        assert_eq!(json, "\"MCX\"");
        let parsed: Exchange = serde_json::from_str("\"NFO\"").unwrap();
        assert_eq!(parsed, Exchange::NFO);
    }

    #[test]
    fn test_instrument_display() {
        let inst = Instrument::new(InstrumentToken::new(738561), Exchange::NSE, "RELIANCE");
        assert_eq!(inst.to_string(), "NSE:RELIANCE#738561");
    }
}
