use algocash_net::{Config as NetConfig, DEFAULT_NODE_URL, DEFAULT_SIGNER_URL};
use algocash_sdk::{Amount, DenominationPolicy, PoolConfig, StoreConfig, SENDER_RESERVE};
use std::str::FromStr;

pub const DEFAULT_CUSTODIAL_ADDRESS: &str = "CUSTODIAL";
pub const DEFAULT_POOL_ADDRESS: &str = "POOL";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerBackend {
    /// In-process ledger for local development
    Memory,
    Http,
}

impl FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(LedgerBackend::Memory),
            "http" => Ok(LedgerBackend::Http),
            other => anyhow::bail!("LEDGER_BACKEND must be 'memory' or 'http', got '{}'", other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayoutMode {
    Pool,
    Custodial,
}

impl FromStr for PayoutMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pool" => Ok(PayoutMode::Pool),
            "custodial" => Ok(PayoutMode::Custodial),
            other => anyhow::bail!("PAYOUT_SOURCE must be 'pool' or 'custodial', got '{}'", other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelayerConfig {
    pub host: String,
    pub port: u16,
    pub backend: LedgerBackend,
    pub node_url: String,
    pub signer_url: String,
    pub api_token: Option<String>,
    pub app_id: u64,
    pub conditional_writes: bool,
    pub custodial_address: String,
    pub pool_address: String,
    pub denominations: DenominationPolicy,
    pub mint_fee_reserve: Amount,
    pub pool_min_threshold: Amount,
    pub pool_replenish_amount: Amount,
    pub pool_reserve: Amount,
    pub payout_mode: PayoutMode,
    pub confirmation_rounds: u32,
    pub replenish_interval_secs: u64,
    pub resume_interval_secs: u64,
    /// Custodial balance the memory backend starts with
    pub memory_seed_balance: Amount,
}

impl RelayerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let amount = |key: &str, default: Amount| -> anyhow::Result<Amount> {
            match lookup(key) {
                Some(raw) => raw
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
                None => Ok(default),
            }
        };

        let backend = lookup("LEDGER_BACKEND")
            .map(|s| s.parse::<LedgerBackend>())
            .transpose()?
            .unwrap_or(LedgerBackend::Memory);

        let custodial_address = lookup("CUSTODIAL_ADDRESS");
        let pool_address = lookup("POOL_ADDRESS");
        if backend == LedgerBackend::Http && (custodial_address.is_none() || pool_address.is_none()) {
            anyhow::bail!("CUSTODIAL_ADDRESS and POOL_ADDRESS are required with the http backend");
        }

        let app_id = match lookup("LEDGER_APP_ID") {
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid LEDGER_APP_ID: {}", e))?,
            None if backend == LedgerBackend::Http => {
                anyhow::bail!("LEDGER_APP_ID is required with the http backend")
            }
            None => 0,
        };

        let denominations = match lookup("DENOMINATIONS") {
            Some(raw) => DenominationPolicy::parse(&raw)
                .map_err(|e| anyhow::anyhow!("Invalid DENOMINATIONS: {}", e))?,
            None => DenominationPolicy::default(),
        };

        let payout_mode = lookup("PAYOUT_SOURCE")
            .map(|s| s.parse::<PayoutMode>())
            .transpose()?
            .unwrap_or(PayoutMode::Pool);

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        let conditional_writes = lookup("LEDGER_CONDITIONAL_WRITES")
            .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(backend == LedgerBackend::Memory);

        let confirmation_rounds = lookup("CONFIRMATION_ROUNDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);

        let replenish_interval_secs = lookup("REPLENISH_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let resume_interval_secs = lookup("RESUME_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            host,
            port,
            backend,
            node_url: lookup("LEDGER_NODE_URL").unwrap_or_else(|| DEFAULT_NODE_URL.to_string()),
            signer_url: lookup("SIGNER_URL").unwrap_or_else(|| DEFAULT_SIGNER_URL.to_string()),
            api_token: lookup("LEDGER_API_TOKEN").filter(|t| !t.is_empty()),
            app_id,
            conditional_writes,
            custodial_address: custodial_address
                .unwrap_or_else(|| DEFAULT_CUSTODIAL_ADDRESS.to_string()),
            pool_address: pool_address.unwrap_or_else(|| DEFAULT_POOL_ADDRESS.to_string()),
            denominations,
            mint_fee_reserve: amount("MINT_FEE_RESERVE", SENDER_RESERVE)?,
            pool_min_threshold: amount("POOL_MIN_THRESHOLD", Amount::from_units(5))?,
            pool_replenish_amount: amount("POOL_REPLENISH_AMOUNT", Amount::from_units(10))?,
            pool_reserve: amount("POOL_RESERVE", SENDER_RESERVE)?,
            payout_mode,
            confirmation_rounds,
            replenish_interval_secs,
            resume_interval_secs,
            memory_seed_balance: amount("MEMORY_SEED_BALANCE", Amount::from_units(1_000))?,
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.custodial_address.as_str())
            .with_policy(self.denominations.clone())
            .with_mint_fee_reserve(self.mint_fee_reserve)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.pool_address.as_str(), self.custodial_address.as_str())
            .with_minimum_threshold(self.pool_min_threshold)
            .with_replenish_amount(self.pool_replenish_amount)
            .with_reserve(self.pool_reserve)
    }

    pub fn net_config(&self) -> NetConfig {
        let config = NetConfig::default()
            .with_node_url(&self.node_url)
            .with_signer_url(&self.signer_url);
        match &self.api_token {
            Some(token) => config.with_api_token(token),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<RelayerConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.backend, LedgerBackend::Memory);
        assert_eq!(config.port, 8080);
        assert_eq!(config.payout_mode, PayoutMode::Pool);
        assert_eq!(config.denominations, DenominationPolicy::default());
        assert_eq!(config.pool_min_threshold, Amount::from_units(5));
        assert_eq!(config.pool_replenish_amount, Amount::from_units(10));
        assert_eq!(config.mint_fee_reserve, Amount::from_micro(101_000));
        assert_eq!(config.pool_reserve, Amount::from_micro(101_000));
        assert!(config.conditional_writes);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("DENOMINATIONS", "0.1..0.9"),
            ("POOL_MIN_THRESHOLD", "2.5"),
            ("PAYOUT_SOURCE", "custodial"),
            ("LEDGER_API_TOKEN", "secret"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.denominations.to_string(), "0.1..0.9");
        assert_eq!(config.pool_min_threshold, Amount::from_micro(2_500_000));
        assert_eq!(config.payout_mode, PayoutMode::Custodial);
        assert_eq!(config.net_config().api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_http_backend_requires_addresses() {
        assert!(config_from(&[("LEDGER_BACKEND", "http")]).is_err());

        let config = config_from(&[
            ("LEDGER_BACKEND", "http"),
            ("LEDGER_APP_ID", "42"),
            ("CUSTODIAL_ADDRESS", "C"),
            ("POOL_ADDRESS", "P"),
        ])
        .unwrap();
        assert_eq!(config.app_id, 42);
        assert!(!config.conditional_writes);
        assert_eq!(config.pool_config().custodial_address, "C");
    }

    #[test]
    fn test_invalid_values_are_reported() {
        assert_err!(config_from(&[("LEDGER_BACKEND", "sqlite")]));
        assert_err!(config_from(&[("DENOMINATIONS", "1,x")]));
        assert_err!(config_from(&[("POOL_RESERVE", "-1")]));
        assert_ok!(config_from(&[("POOL_RESERVE", "0.25")]));
    }
}
