//! Individual smoke probes.
//!
//! Each probe opens its own HTTP/1.1 connection to the version's endpoint
//! and is bounded by `probe_timeout_ms`. Requests that never got an answer
//! are retried with backoff up to `max_attempts`; an answer that fails a
//! check is final.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode, header};
use http_body_util::{BodyExt, Full};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use launchpad_core::config::SmokeSuiteConfig;

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmokeTestError {
    #[error("endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponseShape(String),

    #[error("p95 latency {p95_ms}ms exceeds budget of {budget_ms}ms")]
    LatencyBudgetExceeded { p95_ms: u64, budget_ms: u64 },
}

/// The probes of the battery, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmokeProbe {
    Health,
    Inference,
    LatencyBudget,
}

impl SmokeProbe {
    pub const ALL: [SmokeProbe; 3] = [
        SmokeProbe::Health,
        SmokeProbe::Inference,
        SmokeProbe::LatencyBudget,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SmokeProbe::Health => "health",
            SmokeProbe::Inference => "inference",
            SmokeProbe::LatencyBudget => "latency_budget",
        }
    }

    /// Run the probe against `endpoint` (host:port). On success returns
    /// the latency to report: the round trip, or the p95 for the latency
    /// budget probe.
    pub async fn run(
        &self,
        endpoint: &str,
        suite: &SmokeSuiteConfig,
    ) -> Result<Duration, SmokeTestError> {
        match self {
            SmokeProbe::Health => probe_health(endpoint, suite).await,
            SmokeProbe::Inference => inference_call(endpoint, suite).await,
            SmokeProbe::LatencyBudget => probe_latency_budget(endpoint, suite).await,
        }
    }
}

struct ProbeResponse {
    status: StatusCode,
    body: Bytes,
    latency: Duration,
}

async fn send(
    endpoint: &str,
    method: Method,
    path: &str,
    body: Bytes,
    timeout: Duration,
) -> Result<ProbeResponse, SmokeTestError> {
    let uri = format!("http://{endpoint}{path}");
    let started = Instant::now();

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(endpoint)
            .await
            .map_err(|e| SmokeTestError::EndpointUnreachable(format!("{uri}: {e}")))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| SmokeTestError::EndpointUnreachable(format!("{uri}: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method(method)
            .uri(&uri)
            .header(header::HOST, endpoint)
            .header(header::USER_AGENT, "launchpad-smoke/0.1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(body))
            .map_err(|e| SmokeTestError::EndpointUnreachable(format!("{uri}: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| SmokeTestError::EndpointUnreachable(format!("{uri}: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| SmokeTestError::EndpointUnreachable(format!("{uri}: {e}")))?
            .to_bytes();
        Ok::<_, SmokeTestError>(ProbeResponse {
            status,
            body,
            latency: started.elapsed(),
        })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%uri, "smoke probe timed out");
            Err(SmokeTestError::EndpointUnreachable(format!(
                "{uri}: no response within {}ms",
                timeout.as_millis()
            )))
        }
    }
}

/// `send`, retrying transport failures.
async fn send_with_retry(
    endpoint: &str,
    method: Method,
    path: &str,
    body: Bytes,
    suite: &SmokeSuiteConfig,
) -> Result<ProbeResponse, SmokeTestError> {
    let max_attempts = suite.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match send(endpoint, method.clone(), path, body.clone(), suite.probe_timeout()).await {
            Err(SmokeTestError::EndpointUnreachable(reason)) if attempt < max_attempts => {
                let delay = suite.retry_delay(attempt);
                warn!(
                    %endpoint,
                    path,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "smoke request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn require_success(path: &str, resp: &ProbeResponse) -> Result<(), SmokeTestError> {
    if resp.status.is_success() {
        Ok(())
    } else {
        Err(SmokeTestError::UnexpectedResponseShape(format!(
            "{path} returned {}",
            resp.status
        )))
    }
}

async fn probe_health(
    endpoint: &str,
    suite: &SmokeSuiteConfig,
) -> Result<Duration, SmokeTestError> {
    let resp = send_with_retry(endpoint, Method::GET, &suite.health_path, Bytes::new(), suite).await?;
    require_success(&suite.health_path, &resp)?;
    Ok(resp.latency)
}

/// One representative inference request, shape-checked.
async fn inference_call(
    endpoint: &str,
    suite: &SmokeSuiteConfig,
) -> Result<Duration, SmokeTestError> {
    let resp = send_with_retry(
        endpoint,
        Method::POST,
        &suite.inference_path,
        Bytes::from(suite.sample_request.clone()),
        suite,
    )
    .await?;
    require_success(&suite.inference_path, &resp)?;
    check_shape(&resp.body, &suite.expected_fields)?;
    Ok(resp.latency)
}

async fn probe_latency_budget(
    endpoint: &str,
    suite: &SmokeSuiteConfig,
) -> Result<Duration, SmokeTestError> {
    let mut samples = Vec::with_capacity(suite.latency_samples as usize);
    for _ in 0..suite.latency_samples.max(1) {
        samples.push(inference_call(endpoint, suite).await?);
    }
    let p95 = percentile_95(&mut samples);
    let p95_ms = p95.as_millis() as u64;
    debug!(%endpoint, p95_ms, samples = samples.len(), "latency budget measured");
    if p95_ms > suite.latency_budget_ms {
        return Err(SmokeTestError::LatencyBudgetExceeded {
            p95_ms,
            budget_ms: suite.latency_budget_ms,
        });
    }
    Ok(p95)
}

/// The response must be a JSON object carrying every expected field.
fn check_shape(body: &[u8], expected_fields: &[String]) -> Result<(), SmokeTestError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| SmokeTestError::UnexpectedResponseShape(format!("body is not JSON: {e}")))?;
    let object = value.as_object().ok_or_else(|| {
        SmokeTestError::UnexpectedResponseShape("body is not a JSON object".to_string())
    })?;
    let missing: Vec<&str> = expected_fields
        .iter()
        .filter(|f| !object.contains_key(f.as_str()))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SmokeTestError::UnexpectedResponseShape(format!(
            "missing fields: {}",
            missing.join(", ")
        )))
    }
}

/// Nearest-rank 95th percentile.
fn percentile_95(samples: &mut [Duration]) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    samples.sort();
    let rank = (samples.len() * 95).div_ceil(100);
    samples[rank.saturating_sub(1)]
}

#[cfg(test)]
mod tests {
    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode as AxumStatus;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::routing::{get, post};

    use super::*;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    fn healthy_model() -> Router {
        Router::new()
            .route("/healthz", get(|| async { "ok" }))
            .route(
                "/v1/classify",
                post(|| async { Json(serde_json::json!({"label": "spam", "score": 0.97})) }),
            )
    }

    #[test]
    fn p95_uses_nearest_rank() {
        let mut samples: Vec<Duration> = (1..=20).map(Duration::from_millis).collect();
        assert_eq!(percentile_95(&mut samples), Duration::from_millis(19));

        let mut five: Vec<Duration> = [40, 10, 30, 20, 50].map(Duration::from_millis).to_vec();
        assert_eq!(percentile_95(&mut five), Duration::from_millis(50));
    }

    #[test]
    fn shape_check_lists_missing_fields() {
        let fields = vec!["label".to_string(), "score".to_string()];
        assert!(check_shape(br#"{"label":"ham","score":0.1}"#, &fields).is_ok());

        let err = check_shape(br#"{"label":"ham"}"#, &fields).unwrap_err();
        assert_eq!(
            err,
            SmokeTestError::UnexpectedResponseShape("missing fields: score".to_string())
        );
        assert!(check_shape(b"[1,2]", &fields).is_err());
        assert!(check_shape(b"<html>", &fields).is_err());
    }

    #[tokio::test]
    async fn all_probes_pass_against_healthy_model() {
        let endpoint = spawn(healthy_model()).await;
        let suite = SmokeSuiteConfig::default();
        for probe in SmokeProbe::ALL {
            probe.run(&endpoint, &suite).await.unwrap();
        }
    }

    #[tokio::test]
    async fn health_non_2xx_fails() {
        let app = Router::new().route(
            "/healthz",
            get(|| async { AxumStatus::INTERNAL_SERVER_ERROR }),
        );
        let endpoint = spawn(app).await;
        let err = SmokeProbe::Health
            .run(&endpoint, &SmokeSuiteConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SmokeTestError::UnexpectedResponseShape(_)));
    }

    #[tokio::test]
    async fn inference_with_wrong_shape_fails() {
        let app = Router::new().route(
            "/v1/classify",
            post(|| async { Json(serde_json::json!({"prediction": 1})) }),
        );
        let endpoint = spawn(app).await;
        let err = SmokeProbe::Inference
            .run(&endpoint, &SmokeSuiteConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SmokeTestError::UnexpectedResponseShape(_)));
    }

    #[tokio::test]
    async fn slow_model_exceeds_latency_budget() {
        let app = Router::new().route(
            "/v1/classify",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                Json(serde_json::json!({"label": "spam", "score": 0.5}))
            }),
        );
        let endpoint = spawn(app).await;
        let suite = SmokeSuiteConfig {
            latency_budget_ms: 20,
            latency_samples: 3,
            ..SmokeSuiteConfig::default()
        };
        let err = SmokeProbe::LatencyBudget.run(&endpoint, &suite).await.unwrap_err();
        assert!(matches!(
            err,
            SmokeTestError::LatencyBudgetExceeded { budget_ms: 20, .. }
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = SmokeProbe::Health
            .run(&endpoint, &SmokeSuiteConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SmokeTestError::EndpointUnreachable(_)));
    }

    /// Front `backend` with a listener that drops its first `refuse`
    /// connections and proxies the rest. Returns the endpoint and a count of
    /// accepted connections.
    async fn flaky_front(backend: String, refuse: usize) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            loop {
                let (mut inbound, _) = listener.accept().await.unwrap();
                if counter.fetch_add(1, Ordering::SeqCst) < refuse {
                    drop(inbound);
                    continue;
                }
                let backend = backend.clone();
                tokio::spawn(async move {
                    let mut outbound = tokio::net::TcpStream::connect(backend).await.unwrap();
                    let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                });
            }
        });
        (addr.to_string(), accepted)
    }

    #[tokio::test]
    async fn dropped_first_connection_is_retried() {
        let backend = spawn(healthy_model()).await;
        let (endpoint, accepted) = flaky_front(backend, 1).await;
        let suite = SmokeSuiteConfig {
            retry_base_delay_ms: 10,
            ..SmokeSuiteConfig::default()
        };

        SmokeProbe::Health.run(&endpoint, &suite).await.unwrap();
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_stop_at_max_attempts() {
        let backend = spawn(healthy_model()).await;
        let (endpoint, accepted) = flaky_front(backend, 10).await;
        let suite = SmokeSuiteConfig {
            max_attempts: 2,
            retry_base_delay_ms: 10,
            ..SmokeSuiteConfig::default()
        };

        let err = SmokeProbe::Health.run(&endpoint, &suite).await.unwrap_err();
        assert!(matches!(err, SmokeTestError::EndpointUnreachable(_)));
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn wrong_answer_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/healthz",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::SERVICE_UNAVAILABLE
                }
            }),
        );
        let endpoint = spawn(app).await;

        let err = SmokeProbe::Health
            .run(&endpoint, &SmokeSuiteConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SmokeTestError::UnexpectedResponseShape(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_endpoint_times_out() {
        let app = Router::new().route(
            "/healthz",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
        let endpoint = spawn(app).await;
        let suite = SmokeSuiteConfig {
            probe_timeout_ms: 50,
            max_attempts: 2,
            retry_base_delay_ms: 10,
            ..SmokeSuiteConfig::default()
        };
        let err = SmokeProbe::Health.run(&endpoint, &suite).await.unwrap_err();
        assert!(matches!(err, SmokeTestError::EndpointUnreachable(msg) if msg.contains("no response")));
    }
}
