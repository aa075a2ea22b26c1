//! Health probes
//!
//! A probe issues one test request through a proxy and reports the observed
//! latency. The health checker bounds every probe with its own timeout.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONNECTION, HOST, USER_AGENT};
use http::{Method, Request};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{PoolError, Result};
use crate::models::ProxyRecord;
use crate::proxy::transport::ProxyTransport;

/// One reachability/latency check through a proxy
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Returns the round-trip latency on success
    async fn probe(&self, proxy: &ProxyRecord) -> Result<Duration>;
}

/// Plain HTTP/1.1 GET to a fixed endpoint, tunnelled through the proxy
#[derive(Debug, Clone)]
pub struct HttpProbe {
    host: String,
    port: u16,
    path: String,
    expected_status: u16,
}

impl HttpProbe {
    pub fn new(check_url: &str, expected_status: u16) -> Result<Self> {
        let url = Url::parse(check_url)?;
        if url.scheme() != "http" {
            return Err(PoolError::InvalidConfig(format!(
                "probe URL must use http, got {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| PoolError::InvalidConfig("probe URL has no host".to_string()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };

        Ok(Self {
            host,
            port,
            path,
            expected_status,
        })
    }

    fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    #[instrument(skip(self, proxy), fields(proxy = %proxy.key()))]
    async fn probe(&self, proxy: &ProxyRecord) -> Result<Duration> {
        let start = Instant::now();

        let stream = ProxyTransport::connect(proxy, &self.host, self.port).await?;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Probe connection closed with error: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(self.path.as_str())
            .header(HOST, self.host_header())
            .header(USER_AGENT, concat!("warp-pool/", env!("CARGO_PKG_VERSION")))
            .header(CONNECTION, "close")
            .body(Empty::<Bytes>::new())
            .map_err(|e| PoolError::Http(e.to_string()))?;

        let response = sender.send_request(request).await?;
        let status = response.status().as_u16();
        let body = response.into_body().collect().await?.to_bytes();
        let latency = start.elapsed();

        if status != self.expected_status {
            return Err(PoolError::UnexpectedStatus(status));
        }

        // httpbin-style endpoints echo the egress address.
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(json) => debug!(
                origin = json.get("origin").and_then(|v| v.as_str()).unwrap_or("unknown"),
                "Probe succeeded in {:.2}s",
                latency.as_secs_f64()
            ),
            Err(_) => debug!("Probe succeeded in {:.2}s", latency.as_secs_f64()),
        }

        Ok(latency)
    }
}
