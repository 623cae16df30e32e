//! Static bidirectional mapping between canonical symbol ids and
//! per-exchange symbols (spec §3 C1).
//!
//! Built once at startup from configuration and never mutated afterward;
//! lookups in both directions are O(1) `HashMap` gets, grounded on the
//! teacher's convention of building static state once in `Config::from_env`
//! and handing out `Arc`s to it thereafter.

use std::collections::HashMap;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ExchangeSymbols {
    pub binance: Option<String>,
    pub coinbase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SymbolMap {
    canonical_to_exchange: HashMap<String, ExchangeSymbols>,
    binance_to_canonical: HashMap<String, String>,
    coinbase_to_canonical: HashMap<String, String>,
}

impl SymbolMap {
    /// Build from a fixed table of canonical id -> per-exchange symbol.
    /// A canonical id with no exchange symbols anywhere is a configuration
    /// error (spec §7 `ConfigurationError`, fatal at `start`).
    pub fn build(entries: &[(&str, Option<&str>, Option<&str>)]) -> Result<Self> {
        let mut canonical_to_exchange = HashMap::with_capacity(entries.len());
        let mut binance_to_canonical = HashMap::new();
        let mut coinbase_to_canonical = HashMap::new();

        for (canonical, binance, coinbase) in entries {
            if binance.is_none() && coinbase.is_none() {
                return Err(Error::Configuration(format!(
                    "symbol '{canonical}' has no exchange mapping on any stream"
                )));
            }
            if let Some(b) = binance {
                binance_to_canonical.insert(b.to_uppercase(), canonical.to_string());
            }
            if let Some(c) = coinbase {
                coinbase_to_canonical.insert(c.to_uppercase(), canonical.to_string());
            }
            canonical_to_exchange.insert(
                canonical.to_string(),
                ExchangeSymbols {
                    binance: binance.map(|s| s.to_string()),
                    coinbase: coinbase.map(|s| s.to_string()),
                },
            );
        }

        Ok(Self {
            canonical_to_exchange,
            binance_to_canonical,
            coinbase_to_canonical,
        })
    }

    /// Default mapping for the configured monitored symbols, deriving
    /// Binance (`BTCUSDT`) and Coinbase (`BTC-USD`) tickers from well-known
    /// short codes. Symbols without a known short code fall back to the
    /// HTTP-fallback-only path (no stream mapping), which is valid per
    /// spec §4.3.
    pub fn from_monitored(symbols: &[String]) -> Result<Self> {
        let short_codes: HashMap<&str, &str> = [
            ("bitcoin", "BTC"),
            ("ethereum", "ETH"),
            ("solana", "SOL"),
            ("ripple", "XRP"),
            ("cardano", "ADA"),
            ("dogecoin", "DOGE"),
            ("avalanche", "AVAX"),
            ("polkadot", "DOT"),
            ("chainlink", "LINK"),
            ("polygon", "MATIC"),
            ("litecoin", "LTC"),
            ("bitcoin-cash", "BCH"),
            ("tron", "TRX"),
            ("stellar", "XLM"),
            ("monero", "XMR"),
            ("algorand", "ALGO"),
            ("cosmos", "ATOM"),
            ("near", "NEAR"),
            ("aptos", "APT"),
            ("arbitrum", "ARB"),
            ("optimism", "OP"),
            ("filecoin", "FIL"),
            ("hedera", "HBAR"),
            ("vechain", "VET"),
            ("internet-computer", "ICP"),
            ("maker", "MKR"),
            ("aave", "AAVE"),
            ("the-graph", "GRT"),
            ("sui", "SUI"),
            ("sei", "SEI"),
        ]
        .into_iter()
        .collect();

        let mut entries = Vec::with_capacity(symbols.len());
        let mut binance_syms = Vec::with_capacity(symbols.len());
        let mut coinbase_syms = Vec::with_capacity(symbols.len());
        for s in symbols {
            let code = short_codes.get(s.as_str()).copied();
            binance_syms.push(code.map(|c| format!("{c}USDT")));
            coinbase_syms.push(code.map(|c| format!("{c}-USD")));
        }
        for (i, s) in symbols.iter().enumerate() {
            entries.push((
                s.as_str(),
                binance_syms[i].as_deref(),
                coinbase_syms[i].as_deref(),
            ));
        }
        Self::build(&entries)
    }

    pub fn canonical_for_binance(&self, exchange_symbol: &str) -> Option<&str> {
        self.binance_to_canonical
            .get(&exchange_symbol.to_uppercase())
            .map(|s| s.as_str())
    }

    pub fn canonical_for_coinbase(&self, exchange_symbol: &str) -> Option<&str> {
        self.coinbase_to_canonical
            .get(&exchange_symbol.to_uppercase())
            .map(|s| s.as_str())
    }

    pub fn exchange_symbols(&self, canonical: &str) -> Option<&ExchangeSymbols> {
        self.canonical_to_exchange.get(canonical)
    }

    pub fn canonical_ids(&self) -> impl Iterator<Item = &str> {
        self.canonical_to_exchange.keys().map(|s| s.as_str())
    }

    /// Symbols with no streaming coverage at all — candidates for the HTTP
    /// fallback poller's "not mapped to any stream" path (spec §4.3).
    pub fn unstreamed(&self) -> Vec<&str> {
        self.canonical_to_exchange
            .iter()
            .filter(|(_, ex)| ex.binance.is_none() && ex.coinbase.is_none())
            .map(|(k, _)| k.as_str())
            .collect()
    }
}
