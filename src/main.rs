//! Coinswap server
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌─────────────┐    ┌──────────────┐
//! │  Config  │───▶│  Store   │───▶│ Coordinator │───▶│ HTTP + Worker│
//! │  (YAML)  │    │(mem / pg)│    │ (+gateways) │    │              │
//! └──────────┘    └──────────┘    └─────────────┘    └──────────────┘
//! ```
//!
//! Usage: `coinswap [--env dev] [--port 8080]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;

use coinswap::config::{AppConfig, StorageKind};
use coinswap::db::Database;
use coinswap::exchange::{
    ExchangeCoordinator, ExchangeService, ExchangeStore, MemoryStore, PgExchangeStore,
    RecoveryWorker, SagaContext, ServiceLimits, WorkerConfig,
};
use coinswap::gateway::{
    BlockchainGateway, CurrenciesGateway, HttpTransport, RpcTransport, TransactionsGateway,
    WalletsGateway,
};

fn get_arg(name: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1).cloned())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ExchangeStore>> {
    match config.storage {
        StorageKind::Memory => {
            let store = MemoryStore::new();
            for currency in &config.seed.currencies {
                store.add_currency(currency.clone()).await;
            }
            for wallet in &config.seed.wallets {
                store.add_wallet(wallet.clone()).await;
            }
            tracing::warn!(
                currencies = config.seed.currencies.len(),
                wallets = config.seed.wallets.len(),
                "Using in-memory store; exchanges are lost on restart"
            );
            Ok(Arc::new(store))
        }
        StorageKind::Postgres => {
            let url = config
                .postgres_url
                .as_deref()
                .context("postgres_url is required for postgres storage")?;
            let db = Database::connect(url, config.postgres_pool_size)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.health_check().await.context("PostgreSQL health check failed")?;
            if config.postgres_ensure_schema {
                db.ensure_schema().await.context("Failed to apply schema")?;
            }
            Ok(Arc::new(PgExchangeStore::new(db.pool().clone())))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_arg("--env").unwrap_or_else(|| "dev".to_string());
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_arg("--port").and_then(|p| p.parse().ok()) {
        config.server.port = port;
    }
    let _log_guard = coinswap::logging::init_logging(&config);

    tracing::info!(env = %env, version = env!("GIT_HASH"), "Starting coinswap");

    let store = build_store(&config).await?;

    let policy = config.gateways.retry_policy();
    let transport: Arc<dyn RpcTransport> =
        Arc::new(HttpTransport::new(policy.timeout).context("Failed to build HTTP transport")?);
    let gw = &config.gateways;

    let ctx = SagaContext {
        store,
        wallets: Arc::new(WalletsGateway::new(&gw.wallets_url, transport.clone(), policy.clone())),
        transactions: Arc::new(TransactionsGateway::new(
            &gw.transactions_url,
            transport.clone(),
            policy.clone(),
        )),
        currencies: Arc::new(CurrenciesGateway::new(
            &gw.currencies_url,
            transport.clone(),
            policy.clone(),
        )),
        blockchain: Arc::new(BlockchainGateway::new(&gw.blockchain_url, transport, policy)),
        fees: config.fees.clone(),
        settlement_currency: config.saga.settlement_currency.clone(),
    };
    let coordinator = Arc::new(ExchangeCoordinator::new(ctx)?);

    if config.saga.recovery_enabled {
        let worker = RecoveryWorker::new(
            coordinator.clone(),
            WorkerConfig {
                scan_interval: Duration::from_secs(config.saga.recovery_interval_secs),
                stale_threshold: Duration::from_secs(config.saga.stale_after_secs),
                batch_size: config.saga.recovery_batch,
            },
        );
        tokio::spawn(async move { worker.run().await });
    }

    let service = Arc::new(ExchangeService::new(
        coordinator,
        ServiceLimits {
            max_sum: config.saga.max_sum,
            transaction_delta: chrono::Duration::minutes(config.saga.transaction_delta_minutes),
            check_addresses: config.saga.check_addresses,
        },
    ));
    let app = coinswap::api::router(service);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!(addr = %addr, "HTTP server listening; API docs at /docs");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
