//! Currencies gateway: live USD rates

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    Envelope, GatewayError, RemoteGateway, ResponseHeader, RetryPolicy, RpcStatus, RpcTransport,
    ServiceName,
};
use crate::fee::RateTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRate {
    pub slug: String,
    /// USD per one unit
    pub rate: Decimal,
}

#[derive(Serialize)]
struct GetCurrenciesRequest {}

#[derive(Debug, Deserialize)]
struct GetCurrenciesResponse {
    header: ResponseHeader,
    #[serde(default)]
    currencies: Vec<CurrencyRate>,
}

impl Envelope for GetCurrenciesResponse {
    fn header(&self) -> &ResponseHeader {
        &self.header
    }
}

#[async_trait]
pub trait CurrencyService: Send + Sync {
    async fn get_currencies(&self) -> Result<Vec<CurrencyRate>, GatewayError>;

    /// Rates keyed by slug, ready for pricing
    async fn rate_table(&self) -> Result<RateTable, GatewayError> {
        let currencies = self.get_currencies().await?;
        Ok(RateTable::new(
            currencies.into_iter().map(|c| (c.slug, c.rate)),
        ))
    }
}

pub struct CurrenciesGateway {
    base: RemoteGateway,
}

impl CurrenciesGateway {
    const ALLOWED: &'static [RpcStatus] = &[RpcStatus::Success];

    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn RpcTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            base: RemoteGateway::new(
                ServiceName::Currencies,
                endpoint,
                Self::ALLOWED,
                transport,
                policy,
            ),
        }
    }
}

#[async_trait]
impl CurrencyService for CurrenciesGateway {
    async fn get_currencies(&self) -> Result<Vec<CurrencyRate>, GatewayError> {
        let response: GetCurrenciesResponse = self
            .base
            .invoke("GetCurrencies", &GetCurrenciesRequest {}, &[])
            .await?;
        Ok(response.currencies)
    }
}
