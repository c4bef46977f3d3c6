//! Remote Gateways
//!
//! Retried, classified access to the four external services the exchange
//! saga depends on:
//! - **Wallets**: platform wallet monitoring
//! - **Transactions**: outgoing transfer creation
//! - **Currencies**: live USD rates
//! - **Blockchain**: address and transaction verification
//!
//! Every client is a thin shell around [`RemoteGateway`], which owns the
//! retry loop, the per-attempt timeout and the response-status check.
//!
//! # Retry Rule
//!
//! Only *transport* failures (connection, timeout, protocol) are retried.
//! A response that arrived with a rejected status is final: the call
//! completed, it just completed with a failure.

pub mod blockchain;
pub mod currencies;
pub mod transactions;
pub mod transport;
pub mod wallets;

#[cfg(test)]
pub mod mock;

pub use blockchain::{BlockchainGateway, BlockchainService, ChainTransaction, TransactionLookup};
pub use currencies::{CurrenciesGateway, CurrencyRate, CurrencyService};
pub use transactions::{TransactionService, TransactionsGateway, Transfer};
pub use transport::HttpTransport;
pub use wallets::{InputTransactionRequest, MonitoringRequest, WalletService, WalletsGateway};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Status code carried in every response header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcStatus {
    Success,
    Pending,
    NotFound,
    Failed,
    Error,
    #[serde(other)]
    Unknown,
}

impl RpcStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcStatus::Success => "SUCCESS",
            RpcStatus::Pending => "PENDING",
            RpcStatus::NotFound => "NOT_FOUND",
            RpcStatus::Failed => "FAILED",
            RpcStatus::Error => "ERROR",
            RpcStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Header present on every response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub status: RpcStatus,
    #[serde(default)]
    pub description: String,
}

impl ResponseHeader {
    pub fn success() -> Self {
        Self {
            status: RpcStatus::Success,
            description: String::new(),
        }
    }

    pub fn with_status(status: RpcStatus, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
        }
    }
}

/// A decoded response that exposes its header
pub trait Envelope: DeserializeOwned + Send {
    fn header(&self) -> &ResponseHeader;
}

/// Remote service identity (used in logs and errors)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceName {
    Wallets,
    Transactions,
    Currencies,
    Blockchain,
}

impl ServiceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Wallets => "wallets",
            ServiceName::Transactions => "transactions",
            ServiceName::Currencies => "currencies",
            ServiceName::Blockchain => "blockchain",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure to complete a call at all (eligible for retry)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Gateway call failure surfaced to the saga
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("Service {service}: {method} failed with status {status}: {description}")]
    Rejected {
        service: ServiceName,
        method: &'static str,
        status: RpcStatus,
        description: String,
    },

    #[error("Service {service}: {method} unavailable after {attempts} attempts: {source}")]
    Unavailable {
        service: ServiceName,
        method: &'static str,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Service {service}: {method} returned a malformed message: {detail}")]
    Malformed {
        service: ServiceName,
        method: &'static str,
        detail: String,
    },
}

impl GatewayError {
    pub fn service(&self) -> ServiceName {
        match self {
            GatewayError::Rejected { service, .. }
            | GatewayError::Unavailable { service, .. }
            | GatewayError::Malformed { service, .. } => *service,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            GatewayError::Rejected { method, .. }
            | GatewayError::Unavailable { method, .. }
            | GatewayError::Malformed { method, .. } => method,
        }
    }

    /// Name of the offending status (synthetic for non-status failures)
    pub fn status_name(&self) -> &'static str {
        match self {
            GatewayError::Rejected { status, .. } => status.as_str(),
            GatewayError::Unavailable { .. } => "UNAVAILABLE",
            GatewayError::Malformed { .. } => "MALFORMED",
        }
    }

    /// Remote description (or local detail)
    pub fn description(&self) -> String {
        match self {
            GatewayError::Rejected { description, .. } => description.clone(),
            GatewayError::Unavailable { source, .. } => source.to_string(),
            GatewayError::Malformed { detail, .. } => detail.clone(),
        }
    }
}

// ============================================================================
// Transport + Retry
// ============================================================================

/// Wire-level call: one request body in, one response body out
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(
        &self,
        endpoint: &str,
        method: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError>;
}

/// Attempt budget and timing for one gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts (first call included)
    pub attempts: u32,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(10),
            delay: Duration::from_millis(200),
        }
    }
}

/// Shared base of all gateway clients
pub struct RemoteGateway {
    service: ServiceName,
    endpoint: String,
    allowed: &'static [RpcStatus],
    transport: Arc<dyn RpcTransport>,
    policy: RetryPolicy,
}

impl RemoteGateway {
    pub fn new(
        service: ServiceName,
        endpoint: impl Into<String>,
        allowed: &'static [RpcStatus],
        transport: Arc<dyn RpcTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            endpoint: endpoint.into(),
            allowed,
            transport,
            policy,
        }
    }

    pub fn service(&self) -> ServiceName {
        self.service
    }

    /// Call `method` and classify the response
    ///
    /// Accepted statuses are the gateway's own set plus `extra_allowed`.
    /// Accepted non-SUCCESS responses are logged and returned; callers
    /// branch on the header status.
    pub async fn invoke<Req, Resp>(
        &self,
        method: &'static str,
        request: &Req,
        extra_allowed: &[RpcStatus],
    ) -> Result<Resp, GatewayError>
    where
        Req: Serialize + Sync,
        Resp: Envelope,
    {
        let request_type = short_type_name::<Req>();
        let body = serde_json::to_value(request).map_err(|e| GatewayError::Malformed {
            service: self.service,
            method,
            detail: format!("cannot encode {}: {}", request_type, e),
        })?;

        let raw = self.call_with_retry(method, body).await?;

        let response: Resp = serde_json::from_value(raw).map_err(|e| {
            error!(
                service = %self.service,
                method,
                request_type,
                error = %e,
                "Gateway response could not be decoded"
            );
            GatewayError::Malformed {
                service: self.service,
                method,
                detail: e.to_string(),
            }
        })?;

        let header = response.header();
        if header.status == RpcStatus::Success {
            debug!(service = %self.service, method, request_type, "Gateway call succeeded");
            return Ok(response);
        }

        if self.allowed.contains(&header.status) || extra_allowed.contains(&header.status) {
            warn!(
                service = %self.service,
                method,
                request_type,
                status = %header.status,
                description = %header.description,
                "Gateway call completed with non-success status"
            );
            return Ok(response);
        }

        error!(
            service = %self.service,
            method,
            request_type,
            status = %header.status,
            description = %header.description,
            "Gateway call rejected"
        );
        Err(GatewayError::Rejected {
            service: self.service,
            method,
            status: header.status,
            description: header.description.clone(),
        })
    }

    async fn call_with_retry(
        &self,
        method: &'static str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = TransportError::Connection("no attempt made".to_string());

        for attempt in 1..=attempts {
            let call = self.transport.call(&self.endpoint, method, body.clone());
            match tokio::time::timeout(self.policy.timeout, call).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!(
                        service = %self.service,
                        method,
                        attempt,
                        attempts,
                        error = %e,
                        "Gateway transport failure"
                    );
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        service = %self.service,
                        method,
                        attempt,
                        attempts,
                        timeout_ms = self.policy.timeout.as_millis() as u64,
                        "Gateway call timed out"
                    );
                    last_error = TransportError::Timeout(self.policy.timeout);
                }
            }

            if attempt < attempts && !self.policy.delay.is_zero() {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        error!(
            service = %self.service,
            method,
            attempts,
            error = %last_error,
            "Gateway unavailable, attempt budget exhausted"
        );
        Err(GatewayError::Unavailable {
            service: self.service,
            method,
            attempts,
            source: last_error,
        })
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
