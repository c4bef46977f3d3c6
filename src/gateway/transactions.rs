//! Transactions gateway: outgoing transfer creation

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    Envelope, GatewayError, RemoteGateway, ResponseHeader, RetryPolicy, RpcStatus, RpcTransport,
    ServiceName,
};

/// One outgoing transfer from a platform wallet
///
/// `uuid` is the output transaction record id; the transactions service
/// reports confirmation back under the same id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub address_from: String,
    pub address_to: String,
    pub currency_slug: String,
    pub value: Decimal,
    pub wallet_id: i64,
    pub uuid: Uuid,
}

#[derive(Serialize)]
struct CreateTransferRequest<'a> {
    transfer: &'a Transfer,
}

#[derive(Debug, Deserialize)]
struct CreateTransferResponse {
    header: ResponseHeader,
}

impl Envelope for CreateTransferResponse {
    fn header(&self) -> &ResponseHeader {
        &self.header
    }
}

#[async_trait]
pub trait TransactionService: Send + Sync {
    async fn create_transfer(&self, transfer: &Transfer) -> Result<(), GatewayError>;
}

pub struct TransactionsGateway {
    base: RemoteGateway,
}

impl TransactionsGateway {
    const ALLOWED: &'static [RpcStatus] = &[RpcStatus::Success];

    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn RpcTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            base: RemoteGateway::new(
                ServiceName::Transactions,
                endpoint,
                Self::ALLOWED,
                transport,
                policy,
            ),
        }
    }
}

#[async_trait]
impl TransactionService for TransactionsGateway {
    async fn create_transfer(&self, transfer: &Transfer) -> Result<(), GatewayError> {
        self.base
            .invoke::<_, CreateTransferResponse>(
                "CreateTransfer",
                &CreateTransferRequest { transfer },
                &[],
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::ScriptedTransport;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_transfer_wraps_transfer() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(json!({"header": {"status": "SUCCESS"}}));
        let gateway = TransactionsGateway::new("http://tx", transport.clone(), RetryPolicy::default());

        gateway
            .create_transfer(&Transfer {
                address_from: "0xplatform".into(),
                address_to: "0xuser".into(),
                currency_slug: "ethereum".into(),
                value: Decimal::new(38_14, 2),
                wallet_id: 4,
                uuid: Uuid::new_v4(),
            })
            .await
            .unwrap();

        let body = transport.last_body().unwrap();
        assert_eq!(body["transfer"]["addressTo"], "0xuser");
        assert_eq!(body["transfer"]["walletId"], 4);
    }

    #[tokio::test]
    async fn test_create_transfer_failed_status() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(json!({"header": {"status": "FAILED", "description": "insufficient hot wallet"}}));
        let gateway = TransactionsGateway::new("http://tx", transport.clone(), RetryPolicy::default());

        let err = gateway
            .create_transfer(&Transfer {
                address_from: "a".into(),
                address_to: "b".into(),
                currency_slug: "bitcoin".into(),
                value: Decimal::ONE,
                wallet_id: 1,
                uuid: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.service(), ServiceName::Transactions);
        assert_eq!(err.description(), "insufficient hot wallet");
        assert_eq!(transport.calls(), 1);
    }
}
