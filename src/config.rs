use std::fs;
use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange::{Currency, PlatformWallet};
use crate::fee::FeeSchedule;
use crate::gateway::RetryPolicy;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageKind,
    /// Required when `storage: postgres`
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub postgres_pool_size: u32,
    /// Run sql/schema.sql on startup
    #[serde(default)]
    pub postgres_ensure_schema: bool,
    #[serde(default)]
    pub gateways: GatewaysConfig,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub saga: SagaConfig,
    /// Reference data loaded into the in-memory store at startup
    #[serde(default)]
    pub seed: SeedConfig,
}

fn default_pool_size() -> u32 {
    10
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Postgres,
}

/// Remote service endpoints and the shared retry budget
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewaysConfig {
    pub wallets_url: String,
    pub transactions_url: String,
    pub currencies_url: String,
    pub blockchain_url: String,
    pub attempts: u32,
    pub timeout_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for GatewaysConfig {
    fn default() -> Self {
        Self {
            wallets_url: "http://localhost:9001".to_string(),
            transactions_url: "http://localhost:9002".to_string(),
            currencies_url: "http://localhost:9003".to_string(),
            blockchain_url: "http://localhost:9004".to_string(),
            attempts: 3,
            timeout_ms: 10_000,
            retry_delay_ms: 200,
        }
    }
}

impl GatewaysConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts.max(1),
            timeout: Duration::from_millis(self.timeout_ms),
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SagaConfig {
    /// Wallet that holds token balances
    pub settlement_currency: String,
    /// Largest exchange accepted, in USD
    pub max_sum: Decimal,
    /// Minutes a deposit may predate its exchange
    pub transaction_delta_minutes: i64,
    pub check_addresses: bool,
    pub recovery_enabled: bool,
    pub recovery_interval_secs: u64,
    pub stale_after_secs: u64,
    pub recovery_batch: usize,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            settlement_currency: "ethereum".to_string(),
            max_sum: Decimal::new(10_000, 0),
            transaction_delta_minutes: 30,
            check_addresses: true,
            recovery_enabled: true,
            recovery_interval_secs: 30,
            stale_after_secs: 60,
            recovery_batch: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SeedConfig {
    pub currencies: Vec<Currency>,
    pub wallets: Vec<PlatformWallet>,
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        if config.storage == StorageKind::Postgres && config.postgres_url.is_none() {
            anyhow::bail!("storage is postgres but postgres_url is not set");
        }
        Ok(config)
    }
}
