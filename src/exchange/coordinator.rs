//! Exchange Coordinator
//!
//! Drives the saga. Every hop works on a cloned draft of the current
//! snapshot and is committed with a CAS on the previous status, so the
//! persisted status is always a checkpoint the saga can resume from.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::ExchangeError;
use super::state::ExchangeStatus;
use super::states::{ExternalEvent, StateRegistry};
use super::store::ExchangeStore;
use super::types::ExchangeSnapshot;
use crate::fee::FeeSchedule;
use crate::gateway::{BlockchainService, CurrencyService, TransactionService, WalletService};

/// Upper bound on hops per invocation (the graph's longest path is 8)
const MAX_HOPS: usize = 32;

/// Everything a state handler may touch
pub struct SagaContext {
    pub store: Arc<dyn ExchangeStore>,
    pub wallets: Arc<dyn WalletService>,
    pub transactions: Arc<dyn TransactionService>,
    pub currencies: Arc<dyn CurrencyService>,
    pub blockchain: Arc<dyn BlockchainService>,
    pub fees: FeeSchedule,
    /// Currency whose wallet holds token balances
    pub settlement_currency: String,
}

pub struct ExchangeCoordinator {
    ctx: SagaContext,
    registry: StateRegistry,
}

impl ExchangeCoordinator {
    pub fn new(ctx: SagaContext) -> Result<Self, ExchangeError> {
        Ok(Self {
            ctx,
            registry: StateRegistry::new()?,
        })
    }

    pub fn context(&self) -> &SagaContext {
        &self.ctx
    }

    pub fn store(&self) -> &Arc<dyn ExchangeStore> {
        &self.ctx.store
    }

    pub async fn load(&self, uuid: Uuid) -> Result<ExchangeSnapshot, ExchangeError> {
        self.ctx
            .store
            .load(uuid)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(format!("exchange {}", uuid)))
    }

    /// Run inner transitions until a wait-state or `stop` is reached
    pub async fn advance(
        &self,
        uuid: Uuid,
        stop: Option<ExchangeStatus>,
    ) -> Result<ExchangeSnapshot, ExchangeError> {
        let snapshot = self.load(uuid).await?;
        self.drive(snapshot, stop, None).await
    }

    /// Run the current state's outer transition with `event`, then chain
    /// inner transitions like [`advance`](Self::advance)
    pub async fn resume(
        &self,
        uuid: Uuid,
        stop: Option<ExchangeStatus>,
        event: &ExternalEvent,
    ) -> Result<ExchangeSnapshot, ExchangeError> {
        let snapshot = self.load(uuid).await?;
        self.drive(snapshot, stop, Some(event)).await
    }

    async fn drive(
        &self,
        mut snapshot: ExchangeSnapshot,
        stop: Option<ExchangeStatus>,
        mut event: Option<&ExternalEvent>,
    ) -> Result<ExchangeSnapshot, ExchangeError> {
        let uuid = snapshot.exchange.uuid;

        for hops in 0..MAX_HOPS {
            // The event only feeds the first transition; the chain after it is internal
            let Some(next) = self.hop(&snapshot, event.take()).await? else {
                debug!(exchange = %uuid, status = %snapshot.status(), hops, "Exchange waiting");
                return Ok(snapshot);
            };

            snapshot = next;
            if stop == Some(snapshot.status()) {
                debug!(exchange = %uuid, status = %snapshot.status(), "Requested stop reached");
                return Ok(snapshot);
            }
        }

        warn!(
            exchange = %uuid,
            status = %snapshot.status(),
            "Exchange did not settle within hop limit"
        );
        Ok(snapshot)
    }

    /// One transition; `None` when the current state chose to stay
    async fn hop(
        &self,
        current: &ExchangeSnapshot,
        event: Option<&ExternalEvent>,
    ) -> Result<Option<ExchangeSnapshot>, ExchangeError> {
        let from = current.status();
        let uuid = current.exchange.uuid;
        let handler = self.registry.get(from)?;
        let mut draft = current.clone();

        let next = match event {
            Some(event) => handler.outer_transition(&self.ctx, &mut draft, event).await,
            None => handler.inner_transition(&self.ctx, &mut draft).await,
        }
        .inspect_err(|e| log_hop_failure(uuid, from, e))?;

        if next == from {
            return Ok(None);
        }

        if !from.can_transition_to(next) {
            let err = ExchangeError::IllegalTransition { from, to: next };
            log_hop_failure(uuid, from, &err);
            return Err(err);
        }

        self.registry
            .get(next)?
            .on_enter(&self.ctx, &mut draft)
            .await
            .inspect_err(|e| log_hop_failure(uuid, from, e))?;

        draft.exchange.transition_to(next)?;
        draft.exchange.updated_at = Utc::now();

        if !self.ctx.store.commit_hop(from, &draft).await? {
            warn!(exchange = %uuid, from = %from, to = %next, "Hop lost CAS race");
            return Err(ExchangeError::ConcurrentModification(format!(
                "exchange {} moved away from {}",
                uuid, from
            )));
        }

        info!(exchange = %uuid, from = %from, to = %next, "Exchange advanced");
        Ok(Some(draft))
    }
}

fn log_hop_failure(uuid: Uuid, status: ExchangeStatus, err: &ExchangeError) {
    match err {
        ExchangeError::Gateway(g) => warn!(
            exchange = %uuid,
            status = %status,
            service = %g.service(),
            method = g.method(),
            remote_status = g.status_name(),
            description = %g.description(),
            "Hop aborted by gateway failure"
        ),
        ExchangeError::IllegalTransition { .. } | ExchangeError::Internal(_) => error!(
            exchange = %uuid,
            status = %status,
            error = %err,
            "Hop aborted: saga invariant violated"
        ),
        _ => warn!(exchange = %uuid, status = %status, error = %err, "Hop aborted"),
    }
}
