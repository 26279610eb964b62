//! Blocking HTTP client for OpenAI-style chat-completion endpoints.
//!
//! Every turn is one self-contained request: a system template and the
//! rendered context, no server-side conversation state. Rate limits and
//! transient server errors are retried with exponential backoff; auth and
//! client errors fail straight away.

use anyhow::{Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};
use spelunk_core::{LlmConfig, ModelRequest};
use std::thread;
use std::time::Duration;

/// Base delay for network/transport error retries (1s, 2s, 4s).
const NETWORK_RETRY_BASE_MS: u64 = 1000;

/// The seam between the turn loop and a language model. The loop never
/// constructs HTTP requests itself; tests drive it with a scripted fake.
pub trait ModelClient {
    fn complete(&self, req: &ModelRequest) -> Result<String>;
}

pub struct HttpModelClient {
    cfg: LlmConfig,
    client: Client,
}

impl HttpModelClient {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self { cfg, client })
    }

    /// Environment variable wins over the config value, so a key checked
    /// into a config file can be overridden per shell.
    fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.cfg.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| {
                self.cfg
                    .api_key
                    .as_ref()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
    }

    fn build_payload(&self, req: &ModelRequest) -> Value {
        json!({
            "model": self.cfg.model,
            "messages": [
                {"role": "system", "content": req.system},
                {"role": "user", "content": req.user},
            ],
            "temperature": self.cfg.temperature,
            "max_tokens": self.cfg.max_tokens,
            "stream": false,
        })
    }
}

impl ModelClient for HttpModelClient {
    fn complete(&self, req: &ModelRequest) -> Result<String> {
        let api_key = self
            .resolve_api_key()
            .ok_or_else(|| anyhow!("{} not set and llm.api_key is empty", self.cfg.api_key_env))?;
        let payload = self.build_payload(req);

        let mut last_err: Option<anyhow::Error> = None;
        let mut attempt: u8 = 0;
        while attempt <= self.cfg.max_retries {
            let response = self
                .client
                .post(&self.cfg.endpoint)
                .bearer_auth(&api_key)
                .json(&payload)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let retry_after = parse_retry_after_seconds(resp.headers().get(RETRY_AFTER));
                    let body = resp.text()?;
                    if status.is_success() {
                        return parse_completion(&body);
                    }
                    last_err = Some(format_api_error(
                        &self.cfg,
                        status,
                        &body,
                        attempt,
                        self.cfg.max_retries,
                    ));
                    if should_retry_status(status) && attempt < self.cfg.max_retries {
                        thread::sleep(retry_delay(self.cfg.retry_base_ms, attempt, retry_after));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    last_err = Some(format_transport_error(&e));
                    if should_retry_transport_error(&e) && attempt < self.cfg.max_retries {
                        thread::sleep(retry_delay(NETWORK_RETRY_BASE_MS, attempt, None));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    break;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("model request failed without detailed error")))
    }
}

fn parse_completion(body: &str) -> Result<String> {
    let value: Value = serde_json::from_str(body)?;
    let content = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|c| c.as_str());
    match content {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(anyhow!(
            "unexpected completion payload: missing choices[0].message.content"
        )),
    }
}

fn format_api_error(
    cfg: &LlmConfig,
    status: StatusCode,
    body: &str,
    attempt: u8,
    max_retries: u8,
) -> anyhow::Error {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(ToString::to_string))
        })
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED => anyhow!(
            "Invalid or missing API key (HTTP 401). Set {} or configure llm.api_key.",
            cfg.api_key_env
        ),
        StatusCode::TOO_MANY_REQUESTS => anyhow!(
            "Rate limited (HTTP 429). Exhausted {}/{} attempts. Detail: {}",
            attempt + 1,
            max_retries + 1,
            detail
        ),
        StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => anyhow!(
            "Model server error (HTTP {}). Exhausted {}/{} attempts. Detail: {}",
            status.as_u16(),
            attempt + 1,
            max_retries + 1,
            detail
        ),
        _ => anyhow!("Model API error (HTTP {}): {}", status.as_u16(), detail),
    }
}

fn format_transport_error(err: &reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow!(
            "Request timed out. Increase llm.timeout_seconds if the model routinely needs longer."
        )
    } else if err.is_connect() {
        anyhow!("Could not reach the model endpoint. Check the network and llm.endpoint.")
    } else {
        anyhow!("Network error: {err}")
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::SERVICE_UNAVAILABLE
    )
}

fn should_retry_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn parse_retry_after_seconds(header: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    header?.to_str().ok()?.trim().parse().ok()
}

fn retry_delay(base_ms: u64, attempt: u8, retry_after_seconds: Option<u64>) -> Duration {
    if let Some(seconds) = retry_after_seconds {
        return Duration::from_millis(seconds.saturating_mul(1000));
    }
    let exponential = base_ms.saturating_mul(2_u64.saturating_pow(u32::from(attempt)));
    Duration::from_millis(exponential.max(base_ms.max(100)))
}
