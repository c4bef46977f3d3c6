//! State handlers
//!
//! One handler per [`ExchangeStatus`]. A handler decides the next status
//! from the draft it is given; it never persists anything itself.
//!
//! ```text
//! UNKNOWN → NEW → WAITING_HASH → WAITING_DEPOSIT ─┬→ DEPOSIT_PAID → CALCULATING
//!                                                 │     → CREATING_OUTGOING_TRANSFER
//!                                                 │     → OUTGOING_RUNNING → CLOSED
//!                                                 └→ INSUFFICIENT_DEPOSIT → CREATE_RETURN_TRANSFER
//!                                                       → RETURNING_DEPOSIT → FAILED
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::coordinator::SagaContext;
use super::error::ExchangeError;
use super::state::ExchangeStatus;
use super::steps::{self, Payout};
use super::types::{ExchangeSnapshot, TxStatus};
use crate::gateway::{ChainTransaction, InputTransactionRequest, MonitoringRequest};

/// Data supplied by an external caller to drive an outer transition
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalEvent {
    /// User submitted a deposit hash, already verified against the chain
    DepositSubmitted(ChainTransaction),
}

#[async_trait]
pub trait StateHandler: Send + Sync {
    fn status(&self) -> ExchangeStatus;

    /// Runs on the draft before it is committed with this status
    async fn on_enter(
        &self,
        _ctx: &SagaContext,
        _draft: &mut ExchangeSnapshot,
    ) -> Result<(), ExchangeError> {
        Ok(())
    }

    /// Progress driven by polling alone
    async fn inner_transition(
        &self,
        _ctx: &SagaContext,
        _draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        Ok(self.status())
    }

    /// Progress driven by external data
    async fn outer_transition(
        &self,
        _ctx: &SagaContext,
        _draft: &mut ExchangeSnapshot,
        _event: &ExternalEvent,
    ) -> Result<ExchangeStatus, ExchangeError> {
        Ok(self.status())
    }
}

// ============================================================================
// Happy path
// ============================================================================

pub struct UnknownState;

#[async_trait]
impl StateHandler for UnknownState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::Unknown
    }

    async fn inner_transition(
        &self,
        _ctx: &SagaContext,
        _draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        Ok(ExchangeStatus::New)
    }
}

pub struct NewState;

#[async_trait]
impl StateHandler for NewState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::New
    }

    async fn on_enter(
        &self,
        ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<(), ExchangeError> {
        steps::resolve_wallets(ctx, draft).await?;
        steps::open_input(draft)
    }

    async fn inner_transition(
        &self,
        ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        let wallet = steps::ingoing_wallet(draft)?;
        let input = draft.input.as_ref().ok_or_else(|| {
            ExchangeError::Internal(format!("exchange {} has no input record", draft.exchange.uuid))
        })?;

        ctx.wallets
            .put_on_monitoring(&MonitoringRequest {
                wallet_id: wallet.id,
                wallet_address: wallet.address.clone(),
                currency_slug: draft.exchange.from_currency.clone(),
                expected_from: draft.exchange.from_address.clone(),
                expected_amount: draft.exchange.ingoing_amount,
                uuid: input.uuid,
            })
            .await?;

        Ok(ExchangeStatus::WaitingHash)
    }
}

pub struct WaitingHashState;

#[async_trait]
impl StateHandler for WaitingHashState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::WaitingHash
    }

    /// Wallet monitoring may confirm the deposit before the user submits a hash
    async fn inner_transition(
        &self,
        _ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        if steps::confirmed_input(draft).is_some() {
            return Ok(ExchangeStatus::WaitingDeposit);
        }
        Ok(self.status())
    }

    async fn outer_transition(
        &self,
        ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
        event: &ExternalEvent,
    ) -> Result<ExchangeStatus, ExchangeError> {
        let ExternalEvent::DepositSubmitted(tx) = event;

        if steps::confirmed_input(draft).is_some() {
            return Ok(ExchangeStatus::WaitingDeposit);
        }

        let wallet_address = steps::ingoing_wallet(draft)?.address.clone();
        let request = {
            let e = &draft.exchange;
            let input = draft.input.as_mut().ok_or_else(|| {
                ExchangeError::Internal(format!("exchange {} has no input record", e.uuid))
            })?;
            input.trx_hash = Some(tx.hash.clone());
            input.status = TxStatus::Pending;
            input.updated_at = Utc::now();

            InputTransactionRequest {
                trx_hash: tx.hash.clone(),
                wallet_address,
                currency_slug: e.from_currency.clone(),
                from_address: e.from_address.clone(),
                amount: tx.value,
                uuid: input.uuid,
            }
        };

        ctx.wallets.add_input_transaction(&request).await?;
        info!(exchange = %draft.exchange.uuid, hash = %tx.hash, "Deposit hash registered");
        Ok(ExchangeStatus::WaitingDeposit)
    }
}

pub struct WaitingDepositState;

#[async_trait]
impl StateHandler for WaitingDepositState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::WaitingDeposit
    }

    async fn inner_transition(
        &self,
        ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        let Some(received) = steps::confirmed_input(draft).map(|t| t.value) else {
            return Ok(self.status());
        };

        if steps::price_deposit(ctx, draft, received).await? {
            Ok(ExchangeStatus::DepositPaid)
        } else {
            Ok(ExchangeStatus::InsufficientDeposit)
        }
    }
}

pub struct DepositPaidState;

#[async_trait]
impl StateHandler for DepositPaidState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::DepositPaid
    }

    async fn inner_transition(
        &self,
        _ctx: &SagaContext,
        _draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        Ok(ExchangeStatus::Calculating)
    }
}

pub struct CalculatingState;

#[async_trait]
impl StateHandler for CalculatingState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::Calculating
    }

    async fn inner_transition(
        &self,
        ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        steps::recalculate(ctx, draft).await?;
        Ok(ExchangeStatus::CreatingOutgoingTransfer)
    }
}

pub struct CreatingOutgoingTransferState;

#[async_trait]
impl StateHandler for CreatingOutgoingTransferState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::CreatingOutgoingTransfer
    }

    /// Output record is committed before the transfer is requested
    async fn on_enter(
        &self,
        _ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<(), ExchangeError> {
        steps::open_output(draft, Payout::Forward)
    }

    async fn inner_transition(
        &self,
        ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        steps::send_output(ctx, draft, Payout::Forward).await?;
        Ok(ExchangeStatus::OutgoingRunning)
    }
}

pub struct OutgoingRunningState;

#[async_trait]
impl StateHandler for OutgoingRunningState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::OutgoingRunning
    }

    async fn inner_transition(
        &self,
        _ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        if steps::output_confirmed(draft) {
            return Ok(ExchangeStatus::Closed);
        }
        Ok(self.status())
    }
}

pub struct ClosedState;

#[async_trait]
impl StateHandler for ClosedState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::Closed
    }
}

// ============================================================================
// Compensation path
// ============================================================================

pub struct InsufficientDepositState;

#[async_trait]
impl StateHandler for InsufficientDepositState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::InsufficientDeposit
    }

    async fn inner_transition(
        &self,
        _ctx: &SagaContext,
        _draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        Ok(ExchangeStatus::CreateReturnTransfer)
    }
}

pub struct CreateReturnTransferState;

#[async_trait]
impl StateHandler for CreateReturnTransferState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::CreateReturnTransfer
    }

    async fn on_enter(
        &self,
        _ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<(), ExchangeError> {
        steps::open_output(draft, Payout::Refund)
    }

    async fn inner_transition(
        &self,
        ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        steps::send_output(ctx, draft, Payout::Refund).await?;
        Ok(ExchangeStatus::ReturningDeposit)
    }
}

pub struct ReturningDepositState;

#[async_trait]
impl StateHandler for ReturningDepositState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::ReturningDeposit
    }

    async fn inner_transition(
        &self,
        _ctx: &SagaContext,
        draft: &mut ExchangeSnapshot,
    ) -> Result<ExchangeStatus, ExchangeError> {
        if steps::output_confirmed(draft) {
            return Ok(ExchangeStatus::Failed);
        }
        Ok(self.status())
    }
}

pub struct FailedState;

#[async_trait]
impl StateHandler for FailedState {
    fn status(&self) -> ExchangeStatus {
        ExchangeStatus::Failed
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Status → handler lookup, complete by construction
pub struct StateRegistry {
    handlers: HashMap<ExchangeStatus, Box<dyn StateHandler>>,
}

impl StateRegistry {
    fn handler_for(status: ExchangeStatus) -> Box<dyn StateHandler> {
        match status {
            ExchangeStatus::Unknown => Box::new(UnknownState),
            ExchangeStatus::New => Box::new(NewState),
            ExchangeStatus::WaitingHash => Box::new(WaitingHashState),
            ExchangeStatus::WaitingDeposit => Box::new(WaitingDepositState),
            ExchangeStatus::DepositPaid => Box::new(DepositPaidState),
            ExchangeStatus::Calculating => Box::new(CalculatingState),
            ExchangeStatus::CreatingOutgoingTransfer => Box::new(CreatingOutgoingTransferState),
            ExchangeStatus::OutgoingRunning => Box::new(OutgoingRunningState),
            ExchangeStatus::Closed => Box::new(ClosedState),
            ExchangeStatus::InsufficientDeposit => Box::new(InsufficientDepositState),
            ExchangeStatus::CreateReturnTransfer => Box::new(CreateReturnTransferState),
            ExchangeStatus::ReturningDeposit => Box::new(ReturningDepositState),
            ExchangeStatus::Failed => Box::new(FailedState),
        }
    }

    /// Build and verify that every status has a handler bound to itself
    pub fn new() -> Result<Self, ExchangeError> {
        let mut handlers = HashMap::with_capacity(ExchangeStatus::ALL.len());
        for status in ExchangeStatus::ALL {
            let handler = Self::handler_for(status);
            if handler.status() != status {
                return Err(ExchangeError::Internal(format!(
                    "handler for {} reports {}",
                    status,
                    handler.status()
                )));
            }
            handlers.insert(status, handler);
        }
        Ok(Self { handlers })
    }

    pub fn get(&self, status: ExchangeStatus) -> Result<&dyn StateHandler, ExchangeError> {
        self.handlers
            .get(&status)
            .map(|h| h.as_ref())
            .ok_or_else(|| ExchangeError::Internal(format!("no handler for {}", status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_complete() {
        let registry = StateRegistry::new().unwrap();
        for status in ExchangeStatus::ALL {
            assert_eq!(registry.get(status).unwrap().status(), status);
        }
    }
}
