/// HTTP client for the Gemini `generateContent` API and its model-metadata
/// endpoint (used as the health probe).
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Upstream, UpstreamError};
use crate::health::{ProbeOutcome, ProbeTransport};

const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_instruction: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateResponse {
    pub text: String,
    pub model: String,
}

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    min_output_chars: usize,
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            min_output_chars: 1,
        })
    }

    /// Outputs shorter than this are treated as partial responses and retried.
    pub fn with_min_output_chars(mut self, min: usize) -> Self {
        self.min_output_chars = min;
        self
    }

    fn model_url(&self) -> String {
        format!("{}/v1beta/models/{}", self.base_url, self.model)
    }

    fn generate_url(&self) -> String {
        format!("{}:generateContent", self.model_url())
    }
}

#[async_trait]
impl Upstream for GeminiClient {
    type Request = GenerateRequest;
    type Response = GenerateResponse;

    async fn invoke(
        &self,
        secret: &str,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<GenerateResponse, UpstreamError> {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        });
        if let Some(system) = &request.system_instruction {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if let Some(t) = request.temperature {
            body["generationConfig"] = json!({ "temperature": t });
        }

        let resp = self
            .http
            .post(self.generate_url())
            .header(API_KEY_HEADER, secret)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: error_message(&raw),
            });
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(format!("malformed JSON: {}", e)))?;

        let text = extract_text(&payload);
        if text.trim().chars().count() < self.min_output_chars {
            let reason = payload["candidates"][0]["finishReason"]
                .as_str()
                .unwrap_or("none");
            return Err(UpstreamError::InvalidResponse(format!(
                "output too short ({} chars, finish reason {})",
                text.trim().chars().count(),
                reason
            )));
        }

        Ok(GenerateResponse {
            text,
            model: payload["modelVersion"]
                .as_str()
                .unwrap_or(&self.model)
                .to_string(),
        })
    }
}

#[async_trait]
impl ProbeTransport for GeminiClient {
    async fn ping(&self, secret: &str, timeout: Duration) -> ProbeOutcome {
        match self
            .http
            .get(self.model_url())
            .header(API_KEY_HEADER, secret)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(resp) => ProbeOutcome::Status(resp.status().as_u16()),
            Err(e) if e.is_timeout() => ProbeOutcome::Timeout,
            Err(e) => ProbeOutcome::Transport(e.to_string()),
        }
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout(timeout)
    } else {
        tracing::warn!("Upstream request failed: {}", e);
        UpstreamError::Transport(e.to_string())
    }
}

/// Prefer Google's `{"error":{"message":..}}`; fall back to the truncated raw body.
fn error_message(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| raw.chars().take(MAX_ERROR_BODY).collect())
}

fn extract_text(payload: &serde_json::Value) -> String {
    payload["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
