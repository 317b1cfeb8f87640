use std::time::Duration;

use async_trait::async_trait;
use fieldnode_core::{HttpResponse, HttpTransport, TransportError};
use serde_json::Value;
use tracing::debug;

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fieldnoded/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(map_error)?;
        Ok(Self { client })
    }

    async fn finish(response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_error)?;
        Ok(HttpResponse { status, body })
    }
}

fn map_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::NotConnected
    } else if err.is_decode() {
        TransportError::Payload(err.to_string())
    } else {
        TransportError::Io(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        debug!(url, "GET");
        let response = self.client.get(url).send().await.map_err(map_error)?;
        Self::finish(response).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse, TransportError> {
        debug!(url, "POST");
        let response = self.client.post(url).json(body).send().await.map_err(map_error)?;
        Self::finish(response).await
    }
}
