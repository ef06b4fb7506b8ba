//! Environment-driven node configuration.

use anyhow::{Context, Result};
use htlc_core::HtlcConfig;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub port: u16,
    /// JSON-RPC endpoint of a Lightning node; the in-memory node is used when unset
    pub lightning_rpc_url: Option<String>,
    /// SQLite payment log; payments live in memory only when unset
    pub db_path: Option<PathBuf>,
    /// Drive the clock from `/api/system/tick` instead of the wall clock
    pub simulated_time: bool,
    /// Starting balance of the in-memory ledger
    pub demo_balance_sats: u64,
    pub htlc: HtlcConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            lightning_rpc_url: None,
            db_path: None,
            simulated_time: false,
            demo_balance_sats: 1_000_000,
            htlc: HtlcConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests don't touch the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            port: parse_or(&non_empty, "PORT", defaults.port)?,
            lightning_rpc_url: non_empty("LIGHTNING_RPC_URL"),
            db_path: non_empty("HTLC_DB_PATH").map(PathBuf::from),
            simulated_time: non_empty("SIMULATED_TIME")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(defaults.simulated_time),
            demo_balance_sats: parse_or(
                &non_empty,
                "DEMO_BALANCE_SATS",
                defaults.demo_balance_sats,
            )?,
            htlc: HtlcConfig {
                default_invoice_expiry_secs: parse_or(
                    &non_empty,
                    "HTLC_INVOICE_EXPIRY_SECS",
                    defaults.htlc.default_invoice_expiry_secs,
                )?,
                rail_timeout_secs: parse_or(
                    &non_empty,
                    "HTLC_RAIL_TIMEOUT_SECS",
                    defaults.htlc.rail_timeout_secs,
                )?,
                sweep_interval_secs: parse_or(
                    &non_empty,
                    "HTLC_SWEEP_INTERVAL_SECS",
                    defaults.htlc.sweep_interval_secs,
                )?,
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 3000);
        assert!(config.lightning_rpc_url.is_none());
        assert!(!config.simulated_time);
        assert_eq!(config.htlc, HtlcConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("LIGHTNING_RPC_URL", "http://127.0.0.1:8227"),
            ("HTLC_DB_PATH", "/tmp/htlc.sqlite"),
            ("SIMULATED_TIME", "true"),
            ("HTLC_RAIL_TIMEOUT_SECS", "7"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.lightning_rpc_url.as_deref(), Some("http://127.0.0.1:8227"));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/htlc.sqlite")));
        assert!(config.simulated_time);
        assert_eq!(config.htlc.rail_timeout_secs, 7);
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        let err = NodeConfig::from_lookup(lookup(&[("PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
