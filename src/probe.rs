//! vLLM readiness probe.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not build HTTP client: {0}")]
    Client(String),

    #[error("{url} not healthy after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

/// Successful probe result.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub url: String,
    /// Attempt that succeeded, starting at 1.
    pub attempts: u32,
    pub status: u16,
    /// Decoded JSON body; plain text bodies are kept as a string and empty
    /// bodies (vLLM's `/health`) are `null`.
    pub body: Value,
}

pub fn health_url(base_url: &str) -> String {
    format!("{}/health", base_url.trim_end_matches('/'))
}

fn decode_body(text: &str) -> Value {
    let text = text.trim();
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

async fn probe_once(client: &reqwest::Client, url: &str) -> Result<(u16, Value), String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status.as_u16()));
    }
    let text = response.text().await.map_err(|e| e.to_string())?;
    Ok((status.as_u16(), decode_body(&text)))
}

/// Poll `<base_url>/health` until it answers 2xx, up to `attempts` times.
pub async fn wait_for_health(
    base_url: &str,
    attempts: u32,
    interval: Duration,
) -> Result<ProbeReport, ProbeError> {
    let url = health_url(base_url);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| ProbeError::Client(e.to_string()))?;

    let attempts = attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match probe_once(&client, &url).await {
            Ok((status, body)) => {
                info!(url = %url, attempt, "Health probe succeeded");
                return Ok(ProbeReport {
                    url,
                    attempts: attempt,
                    status,
                    body,
                });
            }
            Err(e) => {
                debug!(url = %url, attempt, error = %e, "Health probe failed");
                last_error = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Err(ProbeError::Exhausted {
        url,
        attempts,
        last_error,
    })
}
