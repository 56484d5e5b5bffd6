//! HTTP client for agorad.
//!
//! Connection failures are retried with exponential backoff; HTTP errors
//! are surfaced with the daemon's error code and message.

use agora_shared::rpc::{
    ErrorBody, EvalRequest, EvalResponse, HealthResponse, SessionView, TurnRequest, TurnResponse,
};
use anyhow::{anyhow, Context, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

/// Turns can take a while: several model calls plus search
const TURN_TIMEOUT: Duration = Duration::from_secs(180);
const EVAL_TIMEOUT: Duration = Duration::from_secs(900);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_RETRIES: u32 = 3;

/// Client for communicating with agorad
pub struct AgoraClient {
    base: String,
    http: reqwest::Client,
}

impl AgoraClient {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Send with retry on connection errors only. A request that reached
    /// the daemon is never repeated, so turns are not processed twice.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retry_delay = Duration::from_millis(100);
        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    sleep(retry_delay).await;
                    retry_delay = (retry_delay * 2).min(Duration::from_millis(800));
                }
                Err(e) if e.is_connect() => {
                    return Err(anyhow!(
                        "Cannot connect to agorad at {}: {}\n\n\
                         Start the daemon with `agorad`, or point --url / $AGORA_URL at it.",
                        self.base,
                        e
                    ));
                }
                Err(e) if e.is_timeout() => {
                    return Err(anyhow!("Request to agorad timed out"));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>, timeout: Duration) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let response = self
            .send(|| {
                let req = self.http.request(method.clone(), &url).timeout(timeout);
                match body {
                    Some(b) => req.json(b),
                    None => req,
                }
            })
            .await?;
        decode(response).await
    }

    pub async fn turn(&self, session_id: &str, text: &str) -> Result<TurnResponse> {
        let req = TurnRequest {
            session_id: session_id.to_string(),
            text: text.to_string(),
        };
        self.call(Method::POST, "/v1/turn", Some(&req), TURN_TIMEOUT).await
    }

    pub async fn session(&self, id: &str) -> Result<SessionView> {
        self.call::<(), _>(Method::GET, &format!("/v1/sessions/{}", id), None, DEFAULT_TIMEOUT)
            .await
    }

    pub async fn end(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("/v1/sessions/{}", id));
        let response = self
            .send(|| self.http.delete(&url).timeout(DEFAULT_TIMEOUT))
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(());
        }
        Err(error_from(response).await)
    }

    pub async fn eval(&self, req: &EvalRequest) -> Result<EvalResponse> {
        self.call(Method::POST, "/v1/eval", Some(req), EVAL_TIMEOUT).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.call::<(), _>(Method::GET, "/v1/health", None, DEFAULT_TIMEOUT)
            .await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from(response).await);
    }
    response
        .json::<T>()
        .await
        .context("decoding agorad response")
}

async fn error_from(response: Response) -> anyhow::Error {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => anyhow!("{} ({})", body.message, body.code),
        Err(_) => anyhow!("agorad returned HTTP {}", status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = AgoraClient::new("http://127.0.0.1:7870/").unwrap();
        assert_eq!(client.base(), "http://127.0.0.1:7870");
        assert_eq!(client.url("/v1/health"), "http://127.0.0.1:7870/v1/health");
    }

    #[tokio::test]
    async fn test_unreachable_daemon_reports_url() {
        // Port 9 (discard) is not served on loopback in test environments
        let client = AgoraClient::new("http://127.0.0.1:9").unwrap();
        let err = client.health().await.unwrap_err().to_string();
        assert!(err.contains("127.0.0.1:9"), "{}", err);
    }
}
