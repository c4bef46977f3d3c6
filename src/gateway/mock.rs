//! In-process fakes for gateway tests and saga integration tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::*;

// ============================================================================
// Transport
// ============================================================================

/// Transport that replays queued results in order
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<serde_json::Value, TransportError>>>,
    calls: AtomicUsize,
    last: Mutex<Option<(String, serde_json::Value)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn push_ok(&self, value: serde_json::Value) {
        self.script.lock().unwrap().push_back(Ok(value));
    }

    pub fn push_err(&self, error: TransportError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_method(&self) -> Option<String> {
        self.last.lock().unwrap().as_ref().map(|(m, _)| m.clone())
    }

    pub fn last_body(&self) -> Option<serde_json::Value> {
        self.last.lock().unwrap().as_ref().map(|(_, b)| b.clone())
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn call(
        &self,
        _endpoint: &str,
        method: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((method.to_string(), body));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connection("script exhausted".into())))
    }
}

fn rejected(service: ServiceName, method: &'static str) -> GatewayError {
    GatewayError::Rejected {
        service,
        method,
        status: RpcStatus::Failed,
        description: "mock failure".to_string(),
    }
}

// ============================================================================
// Services
// ============================================================================

#[derive(Default)]
pub struct MockWallets {
    monitoring: Mutex<Vec<MonitoringRequest>>,
    inputs: Mutex<Vec<InputTransactionRequest>>,
    fail_monitoring: Mutex<bool>,
}

impl MockWallets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_monitoring(&self, fail: bool) {
        *self.fail_monitoring.lock().unwrap() = fail;
    }

    pub fn monitoring_count(&self) -> usize {
        self.monitoring.lock().unwrap().len()
    }

    pub fn monitoring_requests(&self) -> Vec<MonitoringRequest> {
        self.monitoring.lock().unwrap().clone()
    }

    pub fn input_requests(&self) -> Vec<InputTransactionRequest> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletService for MockWallets {
    async fn put_on_monitoring(&self, request: &MonitoringRequest) -> Result<(), GatewayError> {
        if *self.fail_monitoring.lock().unwrap() {
            return Err(rejected(ServiceName::Wallets, "StartMonitoringPlatformWallet"));
        }
        self.monitoring.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn add_input_transaction(
        &self,
        request: &InputTransactionRequest,
    ) -> Result<(), GatewayError> {
        self.inputs.lock().unwrap().push(request.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTransactions {
    transfers: Mutex<Vec<Transfer>>,
    attempts: AtomicUsize,
    fail: Mutex<bool>,
}

impl MockTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    /// Calls that reached the service, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionService for MockTransactions {
    async fn create_transfer(&self, transfer: &Transfer) -> Result<(), GatewayError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock().unwrap() {
            return Err(rejected(ServiceName::Transactions, "CreateTransfer"));
        }
        self.transfers.lock().unwrap().push(transfer.clone());
        Ok(())
    }
}

pub struct MockCurrencies {
    rates: Mutex<Vec<CurrencyRate>>,
}

impl MockCurrencies {
    pub fn new(rates: &[(&str, Decimal)]) -> Self {
        Self {
            rates: Mutex::new(
                rates
                    .iter()
                    .map(|(slug, rate)| CurrencyRate {
                        slug: slug.to_string(),
                        rate: *rate,
                    })
                    .collect(),
            ),
        }
    }

    pub fn set_rate(&self, slug: &str, rate: Decimal) {
        let mut rates = self.rates.lock().unwrap();
        match rates.iter_mut().find(|r| r.slug == slug) {
            Some(existing) => existing.rate = rate,
            None => rates.push(CurrencyRate {
                slug: slug.to_string(),
                rate,
            }),
        }
    }
}

#[async_trait]
impl CurrencyService for MockCurrencies {
    async fn get_currencies(&self) -> Result<Vec<CurrencyRate>, GatewayError> {
        Ok(self.rates.lock().unwrap().clone())
    }
}

/// Blockchain fake: every address is valid unless listed, lookups come from a table
#[derive(Default)]
pub struct MockBlockchain {
    invalid_addresses: Mutex<Vec<String>>,
    lookups: Mutex<Vec<(String, TransactionLookup)>>,
}

impl MockBlockchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_address(&self, address: &str) {
        self.invalid_addresses.lock().unwrap().push(address.to_string());
    }

    pub fn put_transaction(&self, tx: ChainTransaction) {
        let hash = tx.hash.clone();
        self.lookups.lock().unwrap().push((
            hash,
            TransactionLookup {
                status: RpcStatus::Success,
                transaction: Some(tx),
            },
        ));
    }

    pub fn put_status(&self, hash: &str, status: RpcStatus) {
        self.lookups.lock().unwrap().push((
            hash.to_string(),
            TransactionLookup {
                status,
                transaction: None,
            },
        ));
    }
}

#[async_trait]
impl BlockchainService for MockBlockchain {
    async fn check_address(&self, address: &str, _currency_slug: &str) -> Result<bool, GatewayError> {
        Ok(!self
            .invalid_addresses
            .lock()
            .unwrap()
            .iter()
            .any(|a| a == address))
    }

    async fn get_transaction(
        &self,
        hash: &str,
        _currency_slug: &str,
        _to: &str,
    ) -> Result<TransactionLookup, GatewayError> {
        Ok(self
            .lookups
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(h, _)| h == hash)
            .map(|(_, lookup)| lookup.clone())
            .unwrap_or(TransactionLookup {
                status: RpcStatus::NotFound,
                transaction: None,
            }))
    }
}
