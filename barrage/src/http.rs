//! HTTP client used by scenarios.
//!
//! [`get`] is the call scenario code makes. Inside a VU it records the built-in request
//! metrics and runs the scenario's registered checks against the response. Requests are never
//! retried; a 429 is an ordinary response.
use crate::hook;
use crate::RequestError;
use barrage_core::{
    status_bucket, HttpConfig, Sample, DATA_RECEIVED, HTTP_REQS, HTTP_REQ_DURATION,
    HTTP_REQ_FAILED,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::borrow::Cow;
use std::error::Error as _;
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub duration: Duration,
    /// Header names are lower-case.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(
        status: u16,
        duration: Duration,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            status,
            duration,
            headers,
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1e3
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Thin wrapper over [`reqwest::Client`] carrying the run's HTTP settings.
#[derive(Clone)]
pub struct Client {
    inner: reqwest::Client,
    config: Arc<HttpConfig>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl Client {
    pub fn new(config: &HttpConfig) -> Result<Self, crate::HarnessError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let inner = builder
            .build()
            .map_err(|e| crate::HarnessError::Client(e.to_string()))?;

        let limiter = config
            .rps
            .map(|rps| {
                Arc::new(RateLimiter::direct(
                    Quota::per_second(rps).allow_burst(NonZeroU32::MIN),
                ))
            });

        Ok(Self {
            inner,
            config: Arc::new(config.clone()),
            limiter,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Issue a GET without recording anything.
    pub async fn get(&self, url: &str) -> Result<Response, RequestError> {
        self.get_with_headers(url, &[]).await
    }

    pub async fn get_with_headers(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Response, RequestError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let mut request = self.inner.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let start = Instant::now();
        let res = request.send().await.map_err(classify)?;
        let status = res.status().as_u16();
        let headers = res
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = res.bytes().await.map_err(classify)?.to_vec();
        let duration = start.elapsed();

        Ok(Response::new(status, duration, headers, body))
    }
}

/// GET `url` from within a VU, recording request metrics and check results.
///
/// # Example
/// ```no_run
/// use barrage::prelude::*;
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), HarnessError> {
/// let report = Scenario::new("hello", || async {
///     let _ = barrage::http::get("http://localhost:8081/hello").await;
/// })
/// .stage(Duration::from_secs(10), 50)
/// .check(Check::status("status is 200", &[200]))
/// .threshold("http_req_duration", "p(99)<50")
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn get(url: &str) -> Result<Response, RequestError> {
    get_with_headers(url, &[]).await
}

pub async fn get_with_headers(
    url: &str,
    headers: &[(String, String)],
) -> Result<Response, RequestError> {
    let client = match hook::client() {
        Some(client) => client,
        None => {
            error!("No VU context available; request will not be recorded.");
            return fallback_client()?.get_with_headers(url, headers).await;
        }
    };

    let start = Instant::now();
    let outcome = client.get_with_headers(url, headers).await;
    let elapsed = start.elapsed();

    let mut samples = Vec::with_capacity(4);
    let status = outcome.as_ref().ok().map(|r| r.status);
    samples.push(Sample::new(HTTP_REQS, 1.).tag("status", status_bucket(status)));

    let failed = match &outcome {
        Ok(res) => {
            samples.push(Sample::new(HTTP_REQ_DURATION, res.duration_ms()));
            samples.push(Sample::new(DATA_RECEIVED, res.body.len() as f64));
            !client.config().is_expected(res.status)
        }
        Err(err) => {
            debug!("Request to {url} failed after {elapsed:?}: {err}");
            true
        }
    };
    samples.push(Sample::flag(HTTP_REQ_FAILED, failed));

    #[cfg(feature = "metrics")]
    {
        metrics::histogram!("barrage.http_req_duration").record(elapsed.as_secs_f64());
        if failed {
            metrics::counter!("barrage.http_req_failed").increment(1);
        } else {
            metrics::counter!("barrage.http_req_ok").increment(1);
        }
    }

    hook::record_response(samples, outcome.as_ref());
    outcome
}

fn fallback_client() -> Result<&'static Client, RequestError> {
    static FALLBACK: OnceLock<Option<Client>> = OnceLock::new();
    FALLBACK
        .get_or_init(|| Client::new(&HttpConfig::default()).ok())
        .as_ref()
        .ok_or_else(|| RequestError::Network("HTTP client unavailable".to_string()))
}

fn classify(err: reqwest::Error) -> RequestError {
    if err.is_timeout() || err.is_connect() {
        return RequestError::Network(err.to_string());
    }

    if err.is_body() || err.is_decode() || is_malformed(&err) {
        return RequestError::Protocol(err.to_string());
    }

    RequestError::Network(err.to_string())
}

fn is_malformed(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(h) = e.downcast_ref::<hyper::Error>() {
            return h.is_parse() || h.is_parse_status();
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock_service::spawn as service;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reads_status_headers_and_body() {
        let addr = service().await;
        let client = Client::new(&HttpConfig::default()).unwrap();

        let res = client.get(&format!("http://{addr}/hello")).await.unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(res.text(), "Hello, World!");

        let res = client
            .get(&format!("http://{addr}/status/429"))
            .await
            .unwrap();
        assert_eq!(res.status, 429);
        assert_eq!(res.header("Retry-After"), Some("1"));
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Client::new(&HttpConfig::default()).unwrap();
        let err = client.get(&format!("http://{addr}/")).await.unwrap_err();
        assert!(matches!(err, RequestError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn timeout_is_network_error() {
        let addr = service().await;
        let client = Client::new(&HttpConfig {
            timeout: Duration::from_millis(50),
            ..HttpConfig::default()
        })
        .unwrap();

        let err = client
            .get(&format!("http://{addr}/delay/ms/2000"))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn garbage_response_is_protocol_error() {
        let addr = mock_service::spawn_garbage().await;
        let client = Client::new(&HttpConfig::default()).unwrap();
        let err = client.get(&format!("http://{addr}/")).await.unwrap_err();
        assert!(matches!(err, RequestError::Protocol(_)), "{err:?}");
    }

    #[tokio::test]
    async fn rps_cap_spaces_requests() {
        let addr = service().await;
        let client = Client::new(&HttpConfig {
            rps: std::num::NonZeroU32::new(20),
            ..HttpConfig::default()
        })
        .unwrap();

        let start = std::time::Instant::now();
        for _ in 0..5 {
            client.get(&format!("http://{addr}/hello")).await.unwrap();
        }
        // First request is free, the remaining four wait ~50ms each.
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn rps_cap_has_no_burst() {
        let addr = service().await;
        let client = Client::new(&HttpConfig {
            rps: std::num::NonZeroU32::new(10),
            ..HttpConfig::default()
        })
        .unwrap();
        let url = format!("http://{addr}/hello");

        let start = std::time::Instant::now();
        let (a, b, c) = tokio::join!(client.get(&url), client.get(&url), client.get(&url));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(180));
    }
}
