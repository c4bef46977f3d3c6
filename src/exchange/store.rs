//! Exchange entity store
//!
//! The store is the only place exchange state lives between hops. Every
//! status change goes through [`ExchangeStore::commit_hop`], which is a
//! compare-and-swap on the previous status.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::ExchangeError;
use super::state::ExchangeStatus;
use super::types::{
    Currency, ExchangeHistory, ExchangeSnapshot, PlatformWallet, TransactionRecord, TxRole,
    TxStatus,
};

#[async_trait]
pub trait ExchangeStore: Send + Sync {
    async fn currency(&self, slug: &str) -> Result<Option<Currency>, ExchangeError>;

    async fn currencies(&self) -> Result<Vec<Currency>, ExchangeError>;

    /// The active platform wallet holding `currency_slug`
    async fn active_wallet(
        &self,
        currency_slug: &str,
    ) -> Result<Option<PlatformWallet>, ExchangeError>;

    async fn insert_exchange(&self, exchange: &ExchangeHistory) -> Result<(), ExchangeError>;

    /// Exchange plus its transaction records and resolved wallets
    async fn load(&self, uuid: Uuid) -> Result<Option<ExchangeSnapshot>, ExchangeError>;

    /// Persist one hop atomically
    ///
    /// Writes the exchange row and its transaction records only if the
    /// stored status still equals `expected`. Returns `false` on a CAS miss,
    /// in which case nothing was written. A CONFIRMED record is never
    /// overwritten by an unconfirmed copy.
    async fn commit_hop(
        &self,
        expected: ExchangeStatus,
        snapshot: &ExchangeSnapshot,
    ) -> Result<bool, ExchangeError>;

    /// Apply a confirmation callback to an active record
    ///
    /// Returns the owning exchange uuid, or `None` when the record is
    /// unknown or no longer active.
    async fn confirm_transaction(
        &self,
        role: TxRole,
        uuid: Uuid,
        trx_hash: &str,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>, ExchangeError>;

    /// Exchanges a poll could move that were not updated for `older_than`,
    /// oldest first
    ///
    /// Terminal exchanges are skipped, as are exchanges parked on a record
    /// that is still unconfirmed (see [`ExchangeStatus::awaits`]).
    async fn find_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<Uuid>, ExchangeError>;
}

pub(crate) fn stale_cutoff(older_than: Duration) -> Result<DateTime<Utc>, ExchangeError> {
    let delta = chrono::Duration::from_std(older_than)
        .map_err(|e| ExchangeError::Internal(format!("stale threshold out of range: {}", e)))?;
    Ok(Utc::now() - delta)
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    currencies: HashMap<String, Currency>,
    wallets: Vec<PlatformWallet>,
    exchanges: HashMap<Uuid, ExchangeHistory>,
    inputs: HashMap<Uuid, TransactionRecord>,
    outputs: HashMap<Uuid, TransactionRecord>,
}

impl MemoryInner {
    fn records(&mut self, role: TxRole) -> &mut HashMap<Uuid, TransactionRecord> {
        match role {
            TxRole::Input => &mut self.inputs,
            TxRole::Output => &mut self.outputs,
        }
    }

    fn wallet(&self, id: Option<i64>) -> Option<PlatformWallet> {
        id.and_then(|id| self.wallets.iter().find(|w| w.id == id).cloned())
    }

    fn pollable(&self, e: &ExchangeHistory) -> bool {
        if e.status.is_terminal() {
            return false;
        }
        let awaited = match e.status.awaits() {
            None => return true,
            Some(TxRole::Input) => e.transaction_input.and_then(|id| self.inputs.get(&id)),
            Some(TxRole::Output) => e.transaction_output.and_then(|id| self.outputs.get(&id)),
        };
        awaited.is_some_and(|record| record.is_confirmed())
    }
}

fn merge_record(records: &mut HashMap<Uuid, TransactionRecord>, record: &TransactionRecord) {
    match records.get(&record.uuid) {
        Some(existing) if existing.status == TxStatus::Confirmed => {}
        _ => {
            records.insert(record.uuid, record.clone());
        }
    }
}

/// Store backed by process memory (tests and `storage: memory`)
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_currency(&self, currency: Currency) {
        let mut inner = self.inner.lock().await;
        inner.currencies.insert(currency.slug.to_lowercase(), currency);
    }

    pub async fn add_wallet(&self, wallet: PlatformWallet) {
        self.inner.lock().await.wallets.push(wallet);
    }

    /// Overwrite a stored status out of band
    #[cfg(test)]
    pub(crate) async fn force_status(&self, uuid: Uuid, status: ExchangeStatus) {
        if let Some(exchange) = self.inner.lock().await.exchanges.get_mut(&uuid) {
            exchange.status = status;
        }
    }

    /// Backdate `updated_at`
    #[cfg(test)]
    pub(crate) async fn touch(&self, uuid: Uuid, updated_at: DateTime<Utc>) {
        if let Some(exchange) = self.inner.lock().await.exchanges.get_mut(&uuid) {
            exchange.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl ExchangeStore for MemoryStore {
    async fn currency(&self, slug: &str) -> Result<Option<Currency>, ExchangeError> {
        Ok(self
            .inner
            .lock()
            .await
            .currencies
            .get(&slug.to_lowercase())
            .cloned())
    }

    async fn currencies(&self) -> Result<Vec<Currency>, ExchangeError> {
        let inner = self.inner.lock().await;
        let mut all: Vec<Currency> = inner.currencies.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    async fn active_wallet(
        &self,
        currency_slug: &str,
    ) -> Result<Option<PlatformWallet>, ExchangeError> {
        Ok(self
            .inner
            .lock()
            .await
            .wallets
            .iter()
            .find(|w| w.is_active && w.currency_slug.eq_ignore_ascii_case(currency_slug))
            .cloned())
    }

    async fn insert_exchange(&self, exchange: &ExchangeHistory) -> Result<(), ExchangeError> {
        let mut inner = self.inner.lock().await;
        if inner.exchanges.contains_key(&exchange.uuid) {
            return Err(ExchangeError::Database(format!(
                "duplicate exchange uuid {}",
                exchange.uuid
            )));
        }
        inner.exchanges.insert(exchange.uuid, exchange.clone());
        Ok(())
    }

    async fn load(&self, uuid: Uuid) -> Result<Option<ExchangeSnapshot>, ExchangeError> {
        let inner = self.inner.lock().await;
        let Some(exchange) = inner.exchanges.get(&uuid).cloned() else {
            return Ok(None);
        };

        Ok(Some(ExchangeSnapshot {
            input: exchange
                .transaction_input
                .and_then(|id| inner.inputs.get(&id).cloned()),
            output: exchange
                .transaction_output
                .and_then(|id| inner.outputs.get(&id).cloned()),
            ingoing_wallet: inner.wallet(exchange.ingoing_wallet),
            outgoing_wallet: inner.wallet(exchange.outgoing_wallet),
            exchange,
        }))
    }

    async fn commit_hop(
        &self,
        expected: ExchangeStatus,
        snapshot: &ExchangeSnapshot,
    ) -> Result<bool, ExchangeError> {
        let mut inner = self.inner.lock().await;
        let uuid = snapshot.exchange.uuid;

        match inner.exchanges.get(&uuid) {
            Some(current) if current.status == expected => {}
            Some(_) => return Ok(false),
            None => return Err(ExchangeError::NotFound(format!("exchange {}", uuid))),
        }

        if let Some(input) = &snapshot.input {
            merge_record(&mut inner.inputs, input);
        }
        if let Some(output) = &snapshot.output {
            merge_record(&mut inner.outputs, output);
        }
        inner.exchanges.insert(uuid, snapshot.exchange.clone());
        Ok(true)
    }

    async fn confirm_transaction(
        &self,
        role: TxRole,
        uuid: Uuid,
        trx_hash: &str,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>, ExchangeError> {
        let mut inner = self.inner.lock().await;
        match inner.records(role).get_mut(&uuid) {
            Some(record) if record.status.is_active() => record.confirm(trx_hash, value, at),
            _ => return Ok(None),
        }

        Ok(inner
            .exchanges
            .values()
            .find(|e| match role {
                TxRole::Input => e.transaction_input == Some(uuid),
                TxRole::Output => e.transaction_output == Some(uuid),
            })
            .map(|e| e.uuid))
    }

    async fn find_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<Uuid>, ExchangeError> {
        let cutoff = stale_cutoff(older_than)?;
        let inner = self.inner.lock().await;
        let mut stale: Vec<&ExchangeHistory> = inner
            .exchanges
            .values()
            .filter(|e| e.updated_at < cutoff && inner.pollable(e))
            .collect();
        stale.sort_by_key(|e| e.updated_at);
        Ok(stale.into_iter().take(limit).map(|e| e.uuid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> ExchangeHistory {
        let now = Utc::now();
        ExchangeHistory {
            uuid: Uuid::new_v4(),
            user_email: "u@x.io".into(),
            fee: Decimal::new(5, 0),
            from_currency: "bitcoin".into(),
            to_currency: "ethereum".into(),
            issue_rate_from: Decimal::ONE,
            issue_rate_to: Decimal::ONE,
            transaction_input: None,
            transaction_output: None,
            status: ExchangeStatus::Unknown,
            ingoing_amount: Decimal::ONE,
            outgoing_amount: Decimal::ONE,
            ingoing_wallet: None,
            outgoing_wallet: None,
            from_address: "bc1user".into(),
            to_address: "0xuser".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_commit_hop_cas() {
        let store = MemoryStore::new();
        let e = exchange();
        store.insert_exchange(&e).await.unwrap();

        let mut draft = store.load(e.uuid).await.unwrap().unwrap();
        draft.exchange.transition_to(ExchangeStatus::New).unwrap();

        // Wrong expectation: nothing written
        assert!(!store.commit_hop(ExchangeStatus::New, &draft).await.unwrap());
        assert_eq!(
            store.load(e.uuid).await.unwrap().unwrap().status(),
            ExchangeStatus::Unknown
        );

        assert!(store.commit_hop(ExchangeStatus::Unknown, &draft).await.unwrap());
        assert_eq!(
            store.load(e.uuid).await.unwrap().unwrap().status(),
            ExchangeStatus::New
        );
    }

    #[tokio::test]
    async fn test_confirm_only_active_records() {
        let store = MemoryStore::new();
        let mut e = exchange();
        let input = TransactionRecord::new("bitcoin", Decimal::ONE, "bc1user", "bc1platform");
        e.transaction_input = Some(input.uuid);
        store.insert_exchange(&e).await.unwrap();

        let mut draft = store.load(e.uuid).await.unwrap().unwrap();
        draft.input = Some(input.clone());
        draft.exchange.transition_to(ExchangeStatus::New).unwrap();
        assert!(store.commit_hop(ExchangeStatus::Unknown, &draft).await.unwrap());

        let owner = store
            .confirm_transaction(TxRole::Input, input.uuid, "h1", Decimal::new(9, 1), Utc::now())
            .await
            .unwrap();
        assert_eq!(owner, Some(e.uuid));

        // Already confirmed: no-op
        let again = store
            .confirm_transaction(TxRole::Input, input.uuid, "h2", Decimal::ONE, Utc::now())
            .await
            .unwrap();
        assert_eq!(again, None);

        // Wrong role / unknown uuid: no-op
        assert_eq!(
            store
                .confirm_transaction(TxRole::Output, input.uuid, "h", Decimal::ONE, Utc::now())
                .await
                .unwrap(),
            None
        );

        let loaded = store.load(e.uuid).await.unwrap().unwrap();
        let stored = loaded.input.unwrap();
        assert_eq!(stored.trx_hash.as_deref(), Some("h1"));
        assert_eq!(stored.value, Decimal::new(9, 1));
    }

    #[tokio::test]
    async fn test_hop_never_downgrades_confirmed_record() {
        let store = MemoryStore::new();
        let mut e = exchange();
        let input = TransactionRecord::new("bitcoin", Decimal::ONE, "bc1user", "bc1platform");
        e.transaction_input = Some(input.uuid);
        e.status = ExchangeStatus::New;
        store.insert_exchange(&e).await.unwrap();

        let mut draft = ExchangeSnapshot::new(e.clone());
        draft.input = Some(input.clone());
        assert!(store.commit_hop(ExchangeStatus::New, &draft).await.unwrap());

        store
            .confirm_transaction(TxRole::Input, input.uuid, "h1", Decimal::ONE, Utc::now())
            .await
            .unwrap();

        // Stale draft still holds the NEW copy
        draft.exchange.transition_to(ExchangeStatus::WaitingHash).unwrap();
        assert!(store.commit_hop(ExchangeStatus::New, &draft).await.unwrap());

        let loaded = store.load(e.uuid).await.unwrap().unwrap();
        assert!(loaded.input.unwrap().is_confirmed());
        assert_eq!(loaded.exchange.status, ExchangeStatus::WaitingHash);
    }

    #[tokio::test]
    async fn test_find_stale() {
        let store = MemoryStore::new();
        let old = exchange();
        let fresh = exchange();
        let mut done = exchange();
        done.status = ExchangeStatus::Closed;
        for e in [&old, &fresh, &done] {
            store.insert_exchange(e).await.unwrap();
        }
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        store.touch(old.uuid, long_ago).await;
        store.touch(done.uuid, long_ago).await;

        let stale = store.find_stale(Duration::from_secs(60), 10).await.unwrap();
        assert_eq!(stale, vec![old.uuid]);
        assert!(store.find_stale(Duration::from_secs(60), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_stale_skips_parked_until_confirmed() {
        let store = MemoryStore::new();
        let input = TransactionRecord::new("bitcoin", Decimal::ONE, "bc1user", "bc1platform");
        let mut parked = exchange();
        parked.status = ExchangeStatus::WaitingHash;
        parked.transaction_input = Some(input.uuid);
        store.insert_exchange(&parked).await.unwrap();

        let mut draft = ExchangeSnapshot::new(parked.clone());
        draft.input = Some(input.clone());
        assert!(store.commit_hop(ExchangeStatus::WaitingHash, &draft).await.unwrap());
        store.touch(parked.uuid, Utc::now() - chrono::Duration::hours(5)).await;

        assert!(store.find_stale(Duration::from_secs(60), 10).await.unwrap().is_empty());

        // A confirmation whose advance never ran makes it pollable
        store
            .confirm_transaction(TxRole::Input, input.uuid, "h1", Decimal::ONE, Utc::now())
            .await
            .unwrap();
        assert_eq!(
            store.find_stale(Duration::from_secs(60), 10).await.unwrap(),
            vec![parked.uuid]
        );
    }

    #[tokio::test]
    async fn test_active_wallet_lookup() {
        let store = MemoryStore::new();
        store
            .add_wallet(PlatformWallet {
                id: 1,
                address: "old".into(),
                currency_slug: "bitcoin".into(),
                is_active: false,
                external_id: "w1".into(),
            })
            .await;
        store
            .add_wallet(PlatformWallet {
                id: 2,
                address: "bc1platform".into(),
                currency_slug: "bitcoin".into(),
                is_active: true,
                external_id: "w2".into(),
            })
            .await;

        let wallet = store.active_wallet("bitcoin").await.unwrap().unwrap();
        assert_eq!(wallet.id, 2);
        assert!(store.active_wallet("ethereum").await.unwrap().is_none());
    }
}
