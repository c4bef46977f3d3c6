//! Coinswap - Cross-Currency Exchange Saga
//!
//! A user deposits currency A into a platform wallet and receives currency B
//! at a user-supplied address. The platform coordinates independent remote
//! services (wallet monitoring, transfer execution, rates, blockchain
//! lookups) through a persistent state machine.
//!
//! # Modules
//!
//! - [`money`] - Decimal parsing, rounding and formatting at 8 digits
//! - [`fee`] - Tiered USD fee and conversion quote
//! - [`gateway`] - Retrying clients for the remote services
//! - [`exchange`] - Saga state machine, store and service operations
//! - [`db`] - PostgreSQL pool
//! - [`api`] - HTTP routes
//! - [`config`] / [`logging`] - Startup plumbing

pub mod api;
pub mod config;
pub mod db;
pub mod exchange;
pub mod fee;
pub mod gateway;
pub mod logging;
pub mod money;

pub use exchange::{ExchangeCoordinator, ExchangeError, ExchangeService, ExchangeStatus};
pub use fee::{FeeSchedule, RateTable};
