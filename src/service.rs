//! Service Supervisor (§4.10/§6.5, added in the expanded spec): starts a
//! configured service subprocess and polls its health paths until ready or
//! the startup timeout elapses.
//!
//! Grounded in `watcher/main_watcher.rs`'s poll-loop shape (fetch, check,
//! sleep, repeat), replacing `git rev-parse` polling with `reqwest` health
//! probing and a bounded retry budget instead of an unbounded watch loop.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceSpec {
    pub name: String,
    pub health_urls: Vec<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_startup_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service '{0}' did not become ready within {1:?}")]
    StartupTimeout(String, Duration),
}

/// Poll every configured health path until all return a 2xx status, or the
/// startup timeout elapses. Returns `Ok(())` only once every path has
/// succeeded at least once within the deadline.
pub async fn wait_until_ready(spec: &ServiceSpec, client: &Client) -> Result<(), ServiceError> {
    let deadline = Instant::now() + Duration::from_secs(spec.startup_timeout_secs);
    let poll_interval = Duration::from_millis(spec.poll_interval_ms);

    loop {
        let mut all_ready = true;
        for url in &spec.health_urls {
            match client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(service = %spec.name, url, "health check passed");
                }
                Ok(resp) => {
                    all_ready = false;
                    debug!(service = %spec.name, url, status = %resp.status(), "health check not ready");
                }
                Err(e) => {
                    all_ready = false;
                    debug!(service = %spec.name, url, error = %e, "health check unreachable");
                }
            }
        }

        if all_ready {
            info!(service = %spec.name, "service ready");
            return Ok(());
        }

        if Instant::now() >= deadline {
            warn!(service = %spec.name, "service failed to become ready before deadline");
            return Err(ServiceError::StartupTimeout(
                spec.name.clone(),
                Duration::from_secs(spec.startup_timeout_secs),
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_when_health_endpoint_is_already_up() {
        let mut server_handle = None;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                    .await;
            }
        });
        server_handle.replace(handle);

        let spec = ServiceSpec {
            name: "demo".into(),
            health_urls: vec![format!("http://{addr}/health")],
            poll_interval_ms: 50,
            startup_timeout_secs: 5,
        };
        let client = Client::new();
        let result = wait_until_ready(&spec, &client).await;
        assert!(result.is_ok());
        server_handle.unwrap().abort();
    }

    #[tokio::test]
    async fn times_out_when_nothing_is_listening() {
        let spec = ServiceSpec {
            name: "demo".into(),
            health_urls: vec!["http://127.0.0.1:1".into()],
            poll_interval_ms: 20,
            startup_timeout_secs: 1,
        };
        let client = Client::new();
        let result = wait_until_ready(&spec, &client).await;
        assert!(matches!(result, Err(ServiceError::StartupTimeout(..))));
    }
}
