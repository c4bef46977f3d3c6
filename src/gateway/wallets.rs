//! Wallets gateway: deposit monitoring on platform wallets

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    Envelope, GatewayError, RemoteGateway, ResponseHeader, RetryPolicy, RpcStatus, RpcTransport,
    ServiceName,
};

/// Ask the wallet service to watch a platform wallet for an expected deposit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringRequest {
    pub wallet_id: i64,
    pub wallet_address: String,
    pub currency_slug: String,
    pub expected_from: String,
    pub expected_amount: Decimal,
    /// Input transaction record uuid
    pub uuid: Uuid,
}

/// Register a user-submitted deposit hash for confirmation tracking
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputTransactionRequest {
    pub trx_hash: String,
    pub wallet_address: String,
    pub currency_slug: String,
    pub from_address: String,
    pub amount: Decimal,
    pub uuid: Uuid,
}

#[derive(Debug, Deserialize)]
struct WalletsResponse {
    header: ResponseHeader,
}

impl Envelope for WalletsResponse {
    fn header(&self) -> &ResponseHeader {
        &self.header
    }
}

#[async_trait]
pub trait WalletService: Send + Sync {
    async fn put_on_monitoring(&self, request: &MonitoringRequest) -> Result<(), GatewayError>;

    async fn add_input_transaction(
        &self,
        request: &InputTransactionRequest,
    ) -> Result<(), GatewayError>;
}

pub struct WalletsGateway {
    base: RemoteGateway,
}

impl WalletsGateway {
    const ALLOWED: &'static [RpcStatus] = &[RpcStatus::Success];

    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn RpcTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            base: RemoteGateway::new(
                ServiceName::Wallets,
                endpoint,
                Self::ALLOWED,
                transport,
                policy,
            ),
        }
    }
}

#[async_trait]
impl WalletService for WalletsGateway {
    async fn put_on_monitoring(&self, request: &MonitoringRequest) -> Result<(), GatewayError> {
        self.base
            .invoke::<_, WalletsResponse>("StartMonitoringPlatformWallet", request, &[])
            .await
            .map(|_| ())
    }

    async fn add_input_transaction(
        &self,
        request: &InputTransactionRequest,
    ) -> Result<(), GatewayError> {
        self.base
            .invoke::<_, WalletsResponse>("AddInputTransaction", request, &[])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::ScriptedTransport;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_add_input_transaction_wire_shape() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(json!({"header": {"status": "SUCCESS"}}));
        let gateway = WalletsGateway::new(
            "http://wallets",
            transport.clone(),
            RetryPolicy {
                delay: Duration::ZERO,
                ..RetryPolicy::default()
            },
        );

        let uuid = Uuid::new_v4();
        gateway
            .add_input_transaction(&InputTransactionRequest {
                trx_hash: "0xabc".into(),
                wallet_address: "0xplatform".into(),
                currency_slug: "ethereum".into(),
                from_address: "0xuser".into(),
                amount: Decimal::new(15, 1),
                uuid,
            })
            .await
            .unwrap();

        assert_eq!(transport.last_method().as_deref(), Some("AddInputTransaction"));
        let body = transport.last_body().unwrap();
        assert_eq!(body["trxHash"], "0xabc");
        assert_eq!(body["fromAddress"], "0xuser");
        assert_eq!(body["uuid"], uuid.to_string());
    }

    #[tokio::test]
    async fn test_pending_is_rejected_for_wallets() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(json!({"header": {"status": "PENDING"}}));
        let gateway = WalletsGateway::new("http://wallets", transport, RetryPolicy::default());

        let err = gateway
            .put_on_monitoring(&MonitoringRequest {
                wallet_id: 1,
                wallet_address: "bc1platform".into(),
                currency_slug: "bitcoin".into(),
                expected_from: "bc1user".into(),
                expected_amount: Decimal::ONE,
                uuid: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.service(), ServiceName::Wallets);
        assert_eq!(err.status_name(), "PENDING");
    }
}
