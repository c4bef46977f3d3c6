//! Blockchain verification gateway
//!
//! Unlike the other services, the blockchain gateway reports its header
//! under `status` rather than `header`.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    Envelope, GatewayError, RemoteGateway, ResponseHeader, RetryPolicy, RpcStatus, RpcTransport,
    ServiceName,
};

/// Transaction as seen on chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTransaction {
    pub from: String,
    pub to: String,
    pub currency_slug: String,
    pub value: Decimal,
    pub hash: String,
    /// Unix seconds
    pub time: i64,
}

/// Lookup outcome: the remote status plus the transaction when one was found
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionLookup {
    pub status: RpcStatus,
    pub transaction: Option<ChainTransaction>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckAddressRequest<'a> {
    address: &'a str,
    currency_slug: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckAddressResponse {
    status: ResponseHeader,
    #[serde(default)]
    is_valid: bool,
}

impl Envelope for CheckAddressResponse {
    fn header(&self) -> &ResponseHeader {
        &self.status
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetTransactionRequest<'a> {
    hash: &'a str,
    currency_slug: &'a str,
    to: &'a str,
}

#[derive(Debug, Deserialize)]
struct GetTransactionResponse {
    status: ResponseHeader,
    #[serde(default)]
    transaction: Option<ChainTransaction>,
}

impl Envelope for GetTransactionResponse {
    fn header(&self) -> &ResponseHeader {
        &self.status
    }
}

#[async_trait]
pub trait BlockchainService: Send + Sync {
    async fn check_address(&self, address: &str, currency_slug: &str) -> Result<bool, GatewayError>;

    /// NOT_FOUND, FAILED and PENDING come back as a lookup, not an error;
    /// the caller decides what they mean for the exchange
    async fn get_transaction(
        &self,
        hash: &str,
        currency_slug: &str,
        to: &str,
    ) -> Result<TransactionLookup, GatewayError>;
}

pub struct BlockchainGateway {
    base: RemoteGateway,
}

impl BlockchainGateway {
    const ALLOWED: &'static [RpcStatus] = &[RpcStatus::Success];
    const LOOKUP_ALLOWED: &'static [RpcStatus] =
        &[RpcStatus::Pending, RpcStatus::NotFound, RpcStatus::Failed];

    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn RpcTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            base: RemoteGateway::new(
                ServiceName::Blockchain,
                endpoint,
                Self::ALLOWED,
                transport,
                policy,
            ),
        }
    }
}

#[async_trait]
impl BlockchainService for BlockchainGateway {
    async fn check_address(&self, address: &str, currency_slug: &str) -> Result<bool, GatewayError> {
        let response: CheckAddressResponse = self
            .base
            .invoke(
                "CheckAddress",
                &CheckAddressRequest {
                    address,
                    currency_slug,
                },
                &[],
            )
            .await?;
        Ok(response.is_valid)
    }

    async fn get_transaction(
        &self,
        hash: &str,
        currency_slug: &str,
        to: &str,
    ) -> Result<TransactionLookup, GatewayError> {
        let response: GetTransactionResponse = self
            .base
            .invoke(
                "GetTransaction",
                &GetTransactionRequest {
                    hash,
                    currency_slug,
                    to,
                },
                Self::LOOKUP_ALLOWED,
            )
            .await?;
        Ok(TransactionLookup {
            status: response.status.status,
            transaction: response.transaction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::ScriptedTransport;
    use serde_json::json;

    fn gateway(transport: Arc<ScriptedTransport>) -> BlockchainGateway {
        BlockchainGateway::new("http://bgw", transport, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_check_address() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(json!({"status": {"status": "SUCCESS"}, "isValid": true}));
        transport.push_ok(json!({"status": {"status": "SUCCESS"}, "isValid": false}));
        let gw = gateway(transport.clone());

        assert!(gw.check_address("0xgood", "ethereum").await.unwrap());
        assert!(!gw.check_address("0xbad", "ethereum").await.unwrap());
        assert_eq!(transport.last_body().unwrap()["currencySlug"], "ethereum");
    }

    #[tokio::test]
    async fn test_get_transaction_found() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(json!({
            "status": {"status": "SUCCESS"},
            "transaction": {
                "from": "0xuser", "to": "0xplatform", "currencySlug": "ethereum",
                "value": "1.5", "hash": "0xabc", "time": 1_700_000_000
            }
        }));

        let lookup = gateway(transport)
            .get_transaction("0xabc", "ethereum", "0xplatform")
            .await
            .unwrap();
        assert_eq!(lookup.status, RpcStatus::Success);
        let tx = lookup.transaction.unwrap();
        assert_eq!(tx.value, Decimal::new(15, 1));
        assert_eq!(tx.time, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_get_transaction_not_found_is_a_lookup() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(json!({"status": {"status": "NOT_FOUND", "description": "unknown hash"}}));

        let lookup = gateway(transport)
            .get_transaction("0xmissing", "ethereum", "0xplatform")
            .await
            .unwrap();
        assert_eq!(lookup.status, RpcStatus::NotFound);
        assert!(lookup.transaction.is_none());
    }

    #[tokio::test]
    async fn test_check_address_not_found_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(json!({"status": {"status": "NOT_FOUND"}}));

        let err = gateway(transport)
            .check_address("0x", "ethereum")
            .await
            .unwrap_err();
        assert_eq!(err.service(), ServiceName::Blockchain);
        assert_eq!(err.status_name(), "NOT_FOUND");
    }
}
