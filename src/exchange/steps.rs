//! Behaviour shared between state handlers
//!
//! Everything here works on a hop draft: mutations become visible only if
//! the coordinator commits the hop.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::coordinator::SagaContext;
use super::error::ExchangeError;
use super::types::{ExchangeSnapshot, PlatformWallet, TransactionRecord, TxStatus};
use crate::fee::{self, RateError, RateTable};
use crate::gateway::Transfer;

/// Which outgoing transfer an Output record stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payout {
    /// Converted amount to the user's `to_address`
    Forward,
    /// Received deposit back to the user's `from_address`
    Refund,
}

/// Platform wallet that holds `currency_slug`
///
/// Token currencies settle on the configured settlement currency's wallet.
pub async fn wallet_for(
    ctx: &SagaContext,
    currency_slug: &str,
) -> Result<PlatformWallet, ExchangeError> {
    let currency = ctx
        .store
        .currency(currency_slug)
        .await?
        .ok_or_else(|| ExchangeError::NotFound(format!("currency {}", currency_slug)))?;

    let holding = if currency.is_token {
        ctx.settlement_currency.as_str()
    } else {
        currency.slug.as_str()
    };

    ctx.store.active_wallet(holding).await?.ok_or_else(|| {
        ExchangeError::NotFound(format!("active platform wallet for {}", holding))
    })
}

pub async fn resolve_wallets(
    ctx: &SagaContext,
    draft: &mut ExchangeSnapshot,
) -> Result<(), ExchangeError> {
    if draft.ingoing_wallet.is_none() {
        let wallet = wallet_for(ctx, &draft.exchange.from_currency).await?;
        draft.exchange.ingoing_wallet = Some(wallet.id);
        draft.ingoing_wallet = Some(wallet);
    }
    if draft.outgoing_wallet.is_none() {
        let wallet = wallet_for(ctx, &draft.exchange.to_currency).await?;
        draft.exchange.outgoing_wallet = Some(wallet.id);
        draft.outgoing_wallet = Some(wallet);
    }
    Ok(())
}

pub fn ingoing_wallet(draft: &ExchangeSnapshot) -> Result<&PlatformWallet, ExchangeError> {
    draft.ingoing_wallet.as_ref().ok_or_else(|| {
        ExchangeError::Internal(format!("exchange {} has no ingoing wallet", draft.exchange.uuid))
    })
}

pub fn outgoing_wallet(draft: &ExchangeSnapshot) -> Result<&PlatformWallet, ExchangeError> {
    draft.outgoing_wallet.as_ref().ok_or_else(|| {
        ExchangeError::Internal(format!(
            "exchange {} has no outgoing wallet",
            draft.exchange.uuid
        ))
    })
}

/// Create the Input record once
pub fn open_input(draft: &mut ExchangeSnapshot) -> Result<(), ExchangeError> {
    if draft.input.is_some() {
        return Ok(());
    }

    let deposit_address = ingoing_wallet(draft)?.address.clone();
    let e = &draft.exchange;
    let record = TransactionRecord::new(
        e.from_currency.clone(),
        e.ingoing_amount,
        e.from_address.clone(),
        deposit_address,
    );

    debug!(exchange = %e.uuid, input = %record.uuid, "Input record created");
    draft.exchange.transaction_input = Some(record.uuid);
    draft.input = Some(record);
    Ok(())
}

/// Create the Output record once
pub fn open_output(draft: &mut ExchangeSnapshot, payout: Payout) -> Result<(), ExchangeError> {
    if draft.output.is_some() {
        return Ok(());
    }

    let e = &draft.exchange;
    let record = match payout {
        Payout::Forward => TransactionRecord::new(
            e.to_currency.clone(),
            e.outgoing_amount,
            outgoing_wallet(draft)?.address.clone(),
            e.to_address.clone(),
        ),
        Payout::Refund => {
            let received = confirmed_input(draft).map(|t| t.value).ok_or_else(|| {
                ExchangeError::Internal(format!("exchange {} refund without confirmed input", e.uuid))
            })?;
            TransactionRecord::new(
                e.from_currency.clone(),
                received,
                ingoing_wallet(draft)?.address.clone(),
                e.from_address.clone(),
            )
        }
    };

    debug!(exchange = %e.uuid, output = %record.uuid, ?payout, "Output record created");
    draft.exchange.transaction_output = Some(record.uuid);
    draft.output = Some(record);
    Ok(())
}

pub fn confirmed_input(draft: &ExchangeSnapshot) -> Option<&TransactionRecord> {
    draft.input.as_ref().filter(|t| t.is_confirmed())
}

pub fn output_confirmed(draft: &ExchangeSnapshot) -> bool {
    draft.output.as_ref().is_some_and(|t| t.is_confirmed())
}

pub async fn live_rates(ctx: &SagaContext) -> Result<RateTable, ExchangeError> {
    Ok(ctx.currencies.rate_table().await?)
}

/// Whether `value` of the source currency is worth more than its fee
///
/// The live rates used for the decision are pinned on the draft as the
/// issue rates.
pub async fn price_deposit(
    ctx: &SagaContext,
    draft: &mut ExchangeSnapshot,
    value: Decimal,
) -> Result<bool, ExchangeError> {
    let rates = live_rates(ctx).await?;
    let e = &mut draft.exchange;
    let rate_from = rates.rate(&e.from_currency)?;
    let rate_to = rates.rate(&e.to_currency)?;
    let usd = fee::usd_at(rate_from, value)?;
    let covers = ctx.fees.covers_fee(usd);

    e.issue_rate_from = rate_from;
    e.issue_rate_to = rate_to;
    debug!(
        exchange = %e.uuid,
        %value,
        usd_value = %usd,
        %rate_from,
        %rate_to,
        covers,
        "Deposit priced"
    );
    Ok(covers)
}

/// Reprice the exchange on the value that actually arrived
///
/// Live rates are used unless they no longer cover the fee. In that case the
/// rates pinned when the deposit was judged sufficient are used instead, so
/// an accepted deposit is always forwarded.
pub async fn recalculate(
    ctx: &SagaContext,
    draft: &mut ExchangeSnapshot,
) -> Result<(), ExchangeError> {
    let actual = confirmed_input(draft).map(|t| t.value).ok_or_else(|| {
        ExchangeError::Internal(format!(
            "exchange {} calculating without confirmed input",
            draft.exchange.uuid
        ))
    })?;

    let rates = live_rates(ctx).await?;
    let e = &mut draft.exchange;
    let quote = match fee::quote(&ctx.fees, &rates, &e.from_currency, &e.to_currency, actual) {
        Ok(quote) => quote,
        Err(RateError::BelowFee { usd_value, fee }) => {
            warn!(
                exchange = %e.uuid,
                %usd_value,
                %fee,
                rate_from = %e.issue_rate_from,
                "Live rates no longer cover the fee, using accepted rates"
            );
            fee::quote_at(&ctx.fees, e.issue_rate_from, e.issue_rate_to, actual)?
        }
        Err(err) => return Err(err.into()),
    };

    if actual != e.ingoing_amount {
        info!(
            exchange = %e.uuid,
            requested = %e.ingoing_amount,
            received = %actual,
            "Deposit differs from requested amount, repricing"
        );
    }

    e.ingoing_amount = actual;
    e.issue_rate_from = quote.rate_from;
    e.issue_rate_to = quote.rate_to;
    e.fee = quote.fee;
    e.outgoing_amount = quote.outgoing_amount;
    Ok(())
}

/// Ask the transactions service to execute the Output record
///
/// The record uuid is the idempotency key, so a retried hop re-sends the
/// same transfer rather than a new one.
pub async fn send_output(
    ctx: &SagaContext,
    draft: &mut ExchangeSnapshot,
    payout: Payout,
) -> Result<(), ExchangeError> {
    let wallet = match payout {
        Payout::Forward => outgoing_wallet(draft)?.clone(),
        Payout::Refund => ingoing_wallet(draft)?.clone(),
    };
    let uuid = draft.exchange.uuid;
    let output = draft.output.as_mut().ok_or_else(|| {
        ExchangeError::Internal(format!("exchange {} has no output record", uuid))
    })?;

    let transfer = Transfer {
        address_from: wallet.address,
        address_to: output.to_address.clone(),
        currency_slug: output.currency_slug.clone(),
        value: output.value,
        wallet_id: wallet.id,
        uuid: output.uuid,
    };
    ctx.transactions.create_transfer(&transfer).await?;

    info!(
        exchange = %uuid,
        output = %output.uuid,
        value = %output.value,
        currency = %output.currency_slug,
        ?payout,
        "Outgoing transfer requested"
    );
    output.status = TxStatus::Pending;
    output.updated_at = Utc::now();
    Ok(())
}
