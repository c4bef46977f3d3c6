//! Exchange operations exposed to the HTTP layer and the confirmation RPC

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::coordinator::ExchangeCoordinator;
use super::error::ExchangeError;
use super::state::ExchangeStatus;
use super::states::ExternalEvent;
use super::types::{ExchangeHistory, ExchangeSnapshot, ExchangeView, TxRole};
use crate::fee;
use crate::gateway::{ChainTransaction, RpcStatus, TransactionLookup};
use crate::money::{format_amount, max_amount, parse_amount, quantize, validate_amount};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateExchangeRequest {
    #[validate(email)]
    pub user_email: String,
    #[validate(length(min = 1))]
    pub from_currency: String,
    #[validate(length(min = 1))]
    pub to_currency: String,
    /// Decimal string, at most 8 fractional digits
    pub ingoing_amount: String,
    pub outgoing_amount: String,
    #[validate(length(min = 1, max = 128))]
    pub from_address: String,
    #[validate(length(min = 1, max = 128))]
    pub to_address: String,
}

/// One confirmation reported by the companion process
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct TransactionUpdate {
    pub uuid: Uuid,
    pub trx_hash: String,
    #[schema(value_type = String, example = "0.15")]
    pub value: Decimal,
}

#[derive(Debug, Clone)]
pub struct ServiceLimits {
    /// Largest accepted exchange, in USD
    pub max_sum: Decimal,
    /// How far before the exchange's creation a deposit may be dated
    pub transaction_delta: Duration,
    /// Validate user addresses against the blockchain gateway at creation
    pub check_addresses: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    pub default: Decimal,
    pub extended: Decimal,
    pub limit: Decimal,
    pub max_sum: Decimal,
    /// Minutes
    pub delta: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrencyView {
    pub slug: String,
    pub name: String,
    pub rate: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    pub status: &'static str,
    pub version: &'static str,
}

pub struct ExchangeService {
    coordinator: Arc<ExchangeCoordinator>,
    limits: ServiceLimits,
}

impl ExchangeService {
    pub fn new(coordinator: Arc<ExchangeCoordinator>, limits: ServiceLimits) -> Self {
        Self {
            coordinator,
            limits,
        }
    }

    pub fn coordinator(&self) -> &Arc<ExchangeCoordinator> {
        &self.coordinator
    }

    /// Validate, persist with status UNKNOWN, then run the saga up to the
    /// point where it waits for the user's deposit
    pub async fn create_exchange(
        &self,
        request: CreateExchangeRequest,
    ) -> Result<Uuid, ExchangeError> {
        request
            .validate()
            .map_err(|e| ExchangeError::Validation(e.to_string()))?;

        let ingoing_amount = parse_amount(&request.ingoing_amount)?;
        let requested_outgoing = parse_amount(&request.outgoing_amount)?;
        let from_currency = request.from_currency.trim().to_lowercase();
        let to_currency = request.to_currency.trim().to_lowercase();

        let ctx = self.coordinator.context();
        for slug in [&from_currency, &to_currency] {
            match ctx.store.currency(slug).await? {
                Some(c) if c.active => {}
                Some(_) => {
                    return Err(ExchangeError::Validation(format!(
                        "currency {} is not active",
                        slug
                    )));
                }
                None => {
                    return Err(ExchangeError::Validation(format!(
                        "unknown currency {}",
                        slug
                    )));
                }
            }
        }

        if self.limits.check_addresses {
            for (address, slug, field) in [
                (&request.from_address, &from_currency, "from_address"),
                (&request.to_address, &to_currency, "to_address"),
            ] {
                if !ctx.blockchain.check_address(address, slug).await? {
                    return Err(ExchangeError::Validation(format!(
                        "{} is not a valid {} address",
                        field, slug
                    )));
                }
            }
        }

        let rates = ctx.currencies.rate_table().await?;
        let quote = fee::quote(&ctx.fees, &rates, &from_currency, &to_currency, ingoing_amount)
            .map_err(|e| ExchangeError::Validation(e.to_string()))?;
        if quote.usd_value > self.limits.max_sum {
            return Err(ExchangeError::Validation(format!(
                "exchange worth {} USD exceeds the limit of {} USD",
                quote.usd_value, self.limits.max_sum
            )));
        }
        if requested_outgoing != quote.outgoing_amount {
            info!(
                requested = %requested_outgoing,
                quoted = %quote.outgoing_amount,
                "Client quote differs from live quote, using live quote"
            );
        }

        let now = Utc::now();
        let exchange = ExchangeHistory {
            uuid: Uuid::new_v4(),
            user_email: request.user_email,
            fee: quote.fee,
            from_currency,
            to_currency,
            issue_rate_from: quote.rate_from,
            issue_rate_to: quote.rate_to,
            transaction_input: None,
            transaction_output: None,
            status: ExchangeStatus::Unknown,
            ingoing_amount,
            outgoing_amount: quote.outgoing_amount,
            ingoing_wallet: None,
            outgoing_wallet: None,
            from_address: request.from_address,
            to_address: request.to_address,
            created_at: now,
            updated_at: now,
        };
        let uuid = exchange.uuid;

        ctx.store.insert_exchange(&exchange).await?;
        info!(
            exchange = %uuid,
            from = %exchange.from_currency,
            to = %exchange.to_currency,
            ingoing = %exchange.ingoing_amount,
            outgoing = %exchange.outgoing_amount,
            "Exchange created"
        );

        // The row exists from here on; failures carry its uuid
        self.coordinator
            .advance(uuid, Some(ExchangeStatus::WaitingDeposit))
            .await
            .map_err(|e| {
                warn!(exchange = %uuid, error = %e, "First run of new exchange failed");
                ExchangeError::Incomplete {
                    uuid,
                    source: Box::new(e),
                }
            })?;
        Ok(uuid)
    }

    pub async fn view(&self, uuid: Uuid) -> Result<ExchangeView, ExchangeError> {
        Ok(self.coordinator.load(uuid).await?.view())
    }

    /// Verify a user-submitted deposit hash against the chain and resume the saga
    pub async fn submit_transaction_hash(
        &self,
        uuid: Uuid,
        hash: &str,
    ) -> Result<ExchangeView, ExchangeError> {
        let hash = hash.trim();
        if hash.is_empty() {
            return Err(ExchangeError::Validation("transaction hash is empty".into()));
        }

        let snapshot = self.coordinator.load(uuid).await?;
        if snapshot.status() != ExchangeStatus::WaitingHash {
            return Err(ExchangeError::Validation(format!(
                "exchange is {}, not waiting for a transaction hash",
                snapshot.status()
            )));
        }

        let deposit_address = snapshot
            .ingoing_wallet
            .as_ref()
            .map(|w| w.address.clone())
            .ok_or_else(|| {
                ExchangeError::Internal(format!("exchange {} has no ingoing wallet", uuid))
            })?;

        let lookup = self
            .coordinator
            .context()
            .blockchain
            .get_transaction(hash, &snapshot.exchange.from_currency, &deposit_address)
            .await?;

        let tx = verify_deposit(
            &snapshot,
            &deposit_address,
            lookup,
            self.limits.transaction_delta,
        )
        .inspect_err(|e| warn!(exchange = %uuid, hash, error = %e, "Deposit hash rejected"))?;

        let snapshot = self
            .coordinator
            .resume(uuid, None, &ExternalEvent::DepositSubmitted(tx))
            .await?;
        Ok(snapshot.view())
    }

    pub async fn refresh(&self, uuid: Uuid) -> Result<ExchangeView, ExchangeError> {
        Ok(self.coordinator.advance(uuid, None).await?.view())
    }

    pub async fn update_input_transactions(&self, updates: &[TransactionUpdate]) -> usize {
        self.apply_updates(TxRole::Input, updates).await
    }

    pub async fn update_output_transactions(&self, updates: &[TransactionUpdate]) -> usize {
        self.apply_updates(TxRole::Output, updates).await
    }

    /// Confirm each active record and advance its exchange
    ///
    /// Returns how many records were confirmed. Unknown or inactive uuids
    /// and values outside `(0, max_amount]` are skipped, and a failing item
    /// never stops the batch.
    async fn apply_updates(&self, role: TxRole, updates: &[TransactionUpdate]) -> usize {
        let store = self.coordinator.store();
        let mut confirmed = 0;

        for update in updates {
            let value = match validate_amount(quantize(update.value)) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        role = role.as_str(),
                        uuid = %update.uuid,
                        value = %update.value,
                        error = %e,
                        "Confirmation value rejected"
                    );
                    continue;
                }
            };

            let owner = match store
                .confirm_transaction(role, update.uuid, &update.trx_hash, value, Utc::now())
                .await
            {
                Ok(Some(owner)) => owner,
                Ok(None) => {
                    info!(
                        role = role.as_str(),
                        uuid = %update.uuid,
                        "No active transaction record for confirmation"
                    );
                    continue;
                }
                Err(e) => {
                    error!(role = role.as_str(), uuid = %update.uuid, error = %e, "Confirmation failed");
                    continue;
                }
            };

            confirmed += 1;
            info!(
                role = role.as_str(),
                uuid = %update.uuid,
                exchange = %owner,
                value = %update.value,
                "Transaction confirmed"
            );

            if let Err(e) = self.coordinator.advance(owner, None).await {
                error!(exchange = %owner, error = %e, "Advance after confirmation failed");
            }
        }

        confirmed
    }

    pub fn settings(&self) -> SettingsView {
        let fees = &self.coordinator.context().fees;
        SettingsView {
            default: fees.default_fee,
            extended: fees.extended_fee,
            limit: fees.extended_threshold,
            max_sum: self.limits.max_sum,
            delta: self.limits.transaction_delta.num_minutes(),
        }
    }

    /// Live rates for the active currencies known locally
    pub async fn currencies(&self) -> Result<Vec<CurrencyView>, ExchangeError> {
        let ctx = self.coordinator.context();
        let rates = ctx.currencies.rate_table().await?;
        let local = ctx.store.currencies().await?;

        Ok(local
            .into_iter()
            .filter(|c| c.active)
            .filter_map(|c| {
                let rate = rates.rate(&c.slug).ok()?;
                Some(CurrencyView {
                    slug: c.slug,
                    name: c.name,
                    rate: format_amount(rate),
                })
            })
            .collect())
    }

    pub fn healthz(&self) -> HealthView {
        HealthView {
            status: "ok",
            version: env!("GIT_HASH"),
        }
    }
}

/// Check a chain lookup against what the exchange expects to receive
pub fn verify_deposit(
    snapshot: &ExchangeSnapshot,
    deposit_address: &str,
    lookup: TransactionLookup,
    transaction_delta: Duration,
) -> Result<ChainTransaction, ExchangeError> {
    match lookup.status {
        RpcStatus::Success | RpcStatus::Pending => {}
        status => {
            return Err(ExchangeError::StaleData(format!(
                "transaction status is {}",
                status
            )));
        }
    }

    let tx = lookup
        .transaction
        .ok_or_else(|| ExchangeError::StaleData("transaction not found".into()))?;
    let e = &snapshot.exchange;

    if !tx.currency_slug.eq_ignore_ascii_case(&e.from_currency) {
        return Err(ExchangeError::StaleData(format!(
            "transaction currency {} does not match {}",
            tx.currency_slug, e.from_currency
        )));
    }
    if tx.to != deposit_address {
        return Err(ExchangeError::StaleData(
            "transaction is not addressed to the deposit wallet".into(),
        ));
    }
    if tx.from != e.from_address {
        return Err(ExchangeError::StaleData(
            "transaction sender does not match from_address".into(),
        ));
    }
    if tx.value <= Decimal::ZERO {
        return Err(ExchangeError::StaleData("transaction value is not positive".into()));
    }
    if tx.value > max_amount() {
        return Err(ExchangeError::StaleData(format!(
            "transaction value {} is out of range",
            tx.value
        )));
    }

    let sent_at = DateTime::<Utc>::from_timestamp(tx.time, 0)
        .ok_or_else(|| ExchangeError::StaleData(format!("invalid transaction time {}", tx.time)))?;
    if sent_at < e.created_at - transaction_delta {
        return Err(ExchangeError::StaleData(format!(
            "transaction sent at {} predates the exchange window",
            sent_at
        )));
    }

    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::PlatformWallet;

    fn snapshot(created_at: DateTime<Utc>) -> ExchangeSnapshot {
        let mut s = ExchangeSnapshot::new(ExchangeHistory {
            uuid: Uuid::new_v4(),
            user_email: "u@x.io".into(),
            fee: Decimal::new(5, 0),
            from_currency: "ethereum".into(),
            to_currency: "bitcoin".into(),
            issue_rate_from: Decimal::ONE,
            issue_rate_to: Decimal::ONE,
            transaction_input: None,
            transaction_output: None,
            status: ExchangeStatus::WaitingHash,
            ingoing_amount: Decimal::ONE,
            outgoing_amount: Decimal::ONE,
            ingoing_wallet: Some(1),
            outgoing_wallet: Some(2),
            from_address: "0xuser".into(),
            to_address: "bc1user".into(),
            created_at,
            updated_at: created_at,
        });
        s.ingoing_wallet = Some(PlatformWallet {
            id: 1,
            address: "0xplatform".into(),
            currency_slug: "ethereum".into(),
            is_active: true,
            external_id: "eth-1".into(),
        });
        s
    }

    fn found(tx: ChainTransaction) -> TransactionLookup {
        TransactionLookup {
            status: RpcStatus::Success,
            transaction: Some(tx),
        }
    }

    fn chain_tx(time: DateTime<Utc>) -> ChainTransaction {
        ChainTransaction {
            from: "0xuser".into(),
            to: "0xplatform".into(),
            currency_slug: "ethereum".into(),
            value: Decimal::new(15, 1),
            hash: "0xabc".into(),
            time: time.timestamp(),
        }
    }

    #[test]
    fn test_verify_deposit_accepts_matching_tx() {
        let created = Utc::now();
        let s = snapshot(created);
        let tx = verify_deposit(&s, "0xplatform", found(chain_tx(created)), Duration::minutes(30))
            .unwrap();
        assert_eq!(tx.hash, "0xabc");

        // Pending on chain is still acceptable
        let pending = TransactionLookup {
            status: RpcStatus::Pending,
            transaction: Some(chain_tx(created)),
        };
        assert!(verify_deposit(&s, "0xplatform", pending, Duration::minutes(30)).is_ok());
    }

    #[test]
    fn test_verify_deposit_time_window() {
        let created = Utc::now();
        let s = snapshot(created);

        let inside = chain_tx(created - Duration::minutes(29));
        assert!(verify_deposit(&s, "0xplatform", found(inside), Duration::minutes(30)).is_ok());

        let outside = chain_tx(created - Duration::minutes(31));
        let err = verify_deposit(&s, "0xplatform", found(outside), Duration::minutes(30))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::StaleData(_)));
    }

    #[test]
    fn test_verify_deposit_mismatches() {
        let created = Utc::now();
        let s = snapshot(created);
        let delta = Duration::minutes(30);

        let mut wrong_currency = chain_tx(created);
        wrong_currency.currency_slug = "bitcoin".into();
        let mut wrong_to = chain_tx(created);
        wrong_to.to = "0xsomeoneelse".into();
        let mut wrong_from = chain_tx(created);
        wrong_from.from = "0xattacker".into();
        let mut zero = chain_tx(created);
        zero.value = Decimal::ZERO;
        let mut huge = chain_tx(created);
        huge.value = max_amount() + Decimal::ONE;

        for tx in [wrong_currency, wrong_to, wrong_from, zero, huge] {
            let err = verify_deposit(&s, "0xplatform", found(tx), delta).unwrap_err();
            assert_eq!(err.code(), "STALE_DATA");
        }

        for status in [RpcStatus::NotFound, RpcStatus::Failed] {
            let lookup = TransactionLookup {
                status,
                transaction: None,
            };
            let err = verify_deposit(&s, "0xplatform", lookup, delta).unwrap_err();
            assert!(matches!(err, ExchangeError::StaleData(_)));
        }
    }
}
