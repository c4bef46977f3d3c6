//! Exchange Saga
//!
//! Moves one user's funds from currency A to currency B across independent
//! remote services: the user deposits into a platform wallet, the platform
//! verifies and prices the deposit, then pays out the converted amount. If
//! the deposit does not cover the fee, the received funds are sent back.
//!
//! # State Machine
//!
//! ```text
//! UNKNOWN → NEW → WAITING_HASH → WAITING_DEPOSIT → DEPOSIT_PAID → CALCULATING
//!                                       │             → CREATING_OUTGOING_TRANSFER
//!                                       │             → OUTGOING_RUNNING → CLOSED
//!                                       ↓
//!                              INSUFFICIENT_DEPOSIT → CREATE_RETURN_TRANSFER
//!                                                   → RETURNING_DEPOSIT → FAILED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Status is the checkpoint**: every hop commits atomically with a CAS
//!    on the previous status; a failed hop writes nothing.
//! 2. **Persist-Before-Call**: the Output record is committed before the
//!    transfer that carries its uuid is requested.
//! 3. **Idempotency**: record uuids key both outgoing transfers and
//!    confirmation callbacks.
//! 4. **No rollback on gateway failure**: the saga stays put and is retried
//!    by the next trigger.

pub mod coordinator;
pub mod db;
pub mod error;
pub mod service;
pub mod state;
pub mod states;
pub mod steps;
pub mod store;
pub mod types;
pub mod worker;


pub use coordinator::{ExchangeCoordinator, SagaContext};
pub use db::PgExchangeStore;
pub use error::ExchangeError;
pub use service::{CreateExchangeRequest, ExchangeService, ServiceLimits, TransactionUpdate};
pub use state::ExchangeStatus;
pub use store::{ExchangeStore, MemoryStore};
pub use types::{Currency, ExchangeHistory, ExchangeSnapshot, ExchangeView, PlatformWallet};
pub use worker::{RecoveryWorker, ScanReport, WorkerConfig};
