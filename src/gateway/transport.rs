//! HTTP/JSON transport
//!
//! Each method maps to `POST {endpoint}/{Method}` with a JSON body.

use std::time::Duration;

use async_trait::async_trait;

use super::{RpcTransport, TransportError};

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `timeout` is a hard ceiling; the gateway applies its own per-attempt timeout on top
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    fn url(endpoint: &str, method: &str) -> String {
        format!("{}/{}", endpoint.trim_end_matches('/'), method)
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(
        &self,
        endpoint: &str,
        method: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let response = self
            .client
            .post(Self::url(endpoint, method))
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Protocol(format!("HTTP {}", status)));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(Duration::ZERO)
    } else {
        TransportError::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        assert_eq!(
            HttpTransport::url("http://wallets:9000/", "AddInputTransaction"),
            "http://wallets:9000/AddInputTransaction"
        );
        assert_eq!(
            HttpTransport::url("http://bgw", "CheckAddress"),
            "http://bgw/CheckAddress"
        );
    }
}
