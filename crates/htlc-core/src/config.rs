//! Service tunables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by the rails, the claim path and the expiry sweeper
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtlcConfig {
    /// Expiry of hold invoices when the caller gives none
    pub default_invoice_expiry_secs: u64,
    /// Upper bound on any single rail call
    pub rail_timeout_secs: u64,
    /// How often the background sweeper runs
    pub sweep_interval_secs: u64,
}

impl Default for HtlcConfig {
    fn default() -> Self {
        Self {
            default_invoice_expiry_secs: 3_600,
            rail_timeout_secs: 30,
            sweep_interval_secs: 30,
        }
    }
}

impl HtlcConfig {
    pub fn rail_timeout(&self) -> Duration {
        Duration::from_secs(self.rail_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: HtlcConfig = serde_json::from_str(r#"{ "rail_timeout_secs": 5 }"#).unwrap();
        assert_eq!(config.rail_timeout(), Duration::from_secs(5));
        assert_eq!(config.default_invoice_expiry_secs, 3_600);
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
    }
}
