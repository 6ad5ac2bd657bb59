use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct PingResponse {
    status: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PingReport {
    pub url: String,
    pub status: String,
    pub version: Option<String>,
    pub latency_ms: u128,
}

/// Connectivity check for a `vitals serve` instance.
pub struct RemoteClient {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("vitals-cli/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
        })
    }

    pub async fn ping(&self) -> Result<PingReport> {
        let url = format!("{}/api/ping", self.base_url);
        let started = Instant::now();
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        if !resp.status().is_success() {
            bail!("{url} answered with HTTP {}", resp.status());
        }

        let body: PingResponse = resp
            .json()
            .await
            .context("Failed to parse ping response")?;

        Ok(PingReport {
            url,
            status: body.status,
            version: body.version,
            latency_ms: started.elapsed().as_millis(),
        })
    }
}

fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("localhost:8080"), "http://localhost:8080");
        assert_eq!(
            normalize_base_url("https://vitals.lan/ "),
            "https://vitals.lan"
        );
        assert_eq!(normalize_base_url("http://10.0.0.2:8080/"), "http://10.0.0.2:8080");
    }

    #[tokio::test]
    async fn test_ping_unreachable_fails() {
        // Port 9 (discard) on loopback refuses connections
        let client = RemoteClient::new("127.0.0.1:9").unwrap();
        assert!(client.ping().await.is_err());
    }
}
