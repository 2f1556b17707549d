//! HTTP adapter for the serving cluster's control API.
//!
//! Opens one HTTP/1.1 connection per call. Timeouts and retries are the
//! caller's concern; this layer only maps transport failures and status
//! codes onto [`TrafficError`].

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode, header};
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;

use launchpad_core::{HealthStatus, VersionHandle};

use crate::controller::{TrafficController, TrafficError, TrafficResult};

#[derive(Debug, Serialize, Deserialize)]
struct RegisterBody {
    artifact_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WeightBody {
    percent: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorRateBody {
    error_rate: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthBody {
    status: HealthStatus,
}

/// Traffic controller that talks JSON to `http://{address}/v1/...`.
#[derive(Debug, Clone)]
pub struct HttpTrafficController {
    address: String,
}

impl HttpTrafficController {
    /// `address` is the `host:port` of the control API.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn call(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> TrafficResult<Bytes> {
        let uri = format!("http://{}{}", self.address, path);
        let unreachable_err =
            |e: &dyn std::fmt::Display| TrafficError::Unreachable(format!("{uri}: {e}"));

        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| unreachable_err(&e))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| unreachable_err(&e))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "controller connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(header::HOST, &self.address)
            .header(header::USER_AGENT, "launchpad/0.1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| TrafficError::Rejected(e.to_string()))?;

        let resp = sender.send_request(req).await.map_err(|e| unreachable_err(&e))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| unreachable_err(&e))?
            .to_bytes();
        debug!(%method, %uri, %status, "controller call");

        if status.is_success() {
            return Ok(bytes);
        }
        let detail = String::from_utf8_lossy(&bytes).trim().to_string();
        Err(match status {
            StatusCode::NOT_FOUND => TrafficError::NotFound(path.to_string()),
            StatusCode::SERVICE_UNAVAILABLE => TrafficError::ResourceUnavailable(detail),
            StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => TrafficError::Timeout,
            _ => TrafficError::Rejected(format!("{status}: {detail}")),
        })
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> TrafficResult<T> {
        let bytes = self.call(method, path, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TrafficError::Rejected(format!("malformed response from {path}: {e}")))
    }
}

fn encode<T: Serialize>(value: &T) -> TrafficResult<Option<Vec<u8>>> {
    serde_json::to_vec(value)
        .map(Some)
        .map_err(|e| TrafficError::Rejected(e.to_string()))
}

#[async_trait]
impl TrafficController for HttpTrafficController {
    async fn register_version(
        &self,
        namespace: &str,
        artifact_id: &str,
    ) -> TrafficResult<VersionHandle> {
        let body = encode(&RegisterBody {
            artifact_id: artifact_id.to_string(),
        })?;
        self.call_json(Method::POST, &format!("/v1/namespaces/{namespace}/versions"), body)
            .await
    }

    async fn set_weight(
        &self,
        namespace: &str,
        version: &VersionHandle,
        percent: u8,
    ) -> TrafficResult<()> {
        let path = format!("/v1/namespaces/{namespace}/versions/{}/weight", version.id);
        self.call(Method::PUT, &path, encode(&WeightBody { percent })?)
            .await
            .map(|_| ())
    }

    async fn deregister_version(
        &self,
        namespace: &str,
        version: &VersionHandle,
    ) -> TrafficResult<()> {
        let path = format!("/v1/namespaces/{namespace}/versions/{}", version.id);
        self.call(Method::DELETE, &path, None).await.map(|_| ())
    }

    async fn get_error_rate(
        &self,
        namespace: &str,
        version: &VersionHandle,
        window_secs: u64,
    ) -> TrafficResult<f64> {
        let path = format!(
            "/v1/namespaces/{namespace}/versions/{}/error-rate?window_secs={window_secs}",
            version.id
        );
        let body: ErrorRateBody = self.call_json(Method::GET, &path, None).await?;
        Ok(body.error_rate)
    }

    async fn health_check(&self, version: &VersionHandle) -> TrafficResult<HealthStatus> {
        let path = format!("/v1/versions/{}/health", version.id);
        let body: HealthBody = self.call_json(Method::GET, &path, None).await?;
        Ok(body.status)
    }
}
