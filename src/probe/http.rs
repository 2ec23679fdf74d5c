//! HTTP probe implementation.

use super::{ProbeError, ProbeResponse, Prober};
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Probes targets with HTTP GET requests over a shared client.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sentinel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, ProbeError> {
        run_http_probe(&self.client, url, timeout).await
    }
}

/// Run an HTTP probe against the given address.
///
/// Any status code counts as a response; only transport failures are errors.
/// A timeout is reported ahead of any other transport failure.
pub async fn run_http_probe(
    client: &reqwest::Client,
    address: &str,
    timeout: Duration,
) -> Result<ProbeResponse, ProbeError> {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let start = Instant::now();

    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Unreachable(e.to_string())
            }
        })?;

    Ok(ProbeResponse {
        status_code: response.status().as_u16(),
        latency: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn prober() -> HttpProber {
        HttpProber {
            client: reqwest::Client::builder().no_proxy().build().unwrap(),
        }
    }

    fn fixture() -> Router {
        Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/broken", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    "late"
                }),
            )
    }

    #[tokio::test]
    async fn test_http_probe_reports_status_codes() {
        let addr = serve(fixture()).await;
        let prober = prober();
        let timeout = Duration::from_secs(2);

        let ok = prober.probe(&format!("http://{}/ok", addr), timeout).await.unwrap();
        assert_eq!(ok.status_code, 200);
        assert!(ok.is_success());

        let missing = prober.probe(&format!("http://{}/missing", addr), timeout).await.unwrap();
        assert_eq!(missing.status_code, 404);
        assert!(!missing.is_success());

        // scheme is optional
        let broken = prober.probe(&format!("{}/broken", addr), timeout).await.unwrap();
        assert_eq!(broken.status_code, 503);
    }

    #[tokio::test]
    async fn test_http_probe_timeout() {
        let addr = serve(fixture()).await;
        let timeout = Duration::from_millis(100);
        let result = prober().probe(&format!("http://{}/slow", addr), timeout).await;
        assert_eq!(result, Err(ProbeError::Timeout(timeout)));
    }

    #[tokio::test]
    async fn test_http_probe_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = prober().probe(&format!("http://{}/", addr), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProbeError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let result = prober().probe("http://256.256.256.256", Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
