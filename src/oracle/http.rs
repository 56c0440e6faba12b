//! HTTP oracle adapter — invokes the oracle over a POST endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::config::OracleConfig;
use crate::error::{PipelineError, Result};
use crate::models::{GroundTruthRecord, OracleOutput};

use super::OracleAdapter;

const BODY_PREVIEW_BYTES: usize = 200;

#[derive(Serialize)]
struct PrPayload<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
    diff_content: &'a str,
    files_changed: &'a [String],
}

#[derive(Serialize)]
struct InvokePayload<'a> {
    pr: PrPayload<'a>,
    follow_up_question: &'a str,
}

pub struct HttpOracleAdapter {
    client: Client,
    url: String,
    headers: reqwest::header::HeaderMap,
}

impl HttpOracleAdapter {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| PipelineError::Config("url is required for HTTP oracle adapter".into()))?;

        let mut headers = reqwest::header::HeaderMap::new();
        for (k, v) in &config.headers {
            let name = reqwest::header::HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| PipelineError::Config(format!("invalid header name {k}: {e}")))?;
            let value = v
                .parse()
                .map_err(|e| PipelineError::Config(format!("invalid header value for {k}: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder().timeout(Duration::from_secs(config.timeout_seconds)).build()?;

        Ok(Self { client, url, headers })
    }

    fn error_output(ground_truth_id: &str, follow_up_question: &str, elapsed_ms: u64, reason: impl Into<String>) -> OracleOutput {
        OracleOutput::error(ground_truth_id, follow_up_question, elapsed_ms, reason)
    }
}

#[async_trait]
impl OracleAdapter for HttpOracleAdapter {
    async fn invoke(&self, ground_truth: &GroundTruthRecord, follow_up_question: &str) -> OracleOutput {
        let payload = InvokePayload {
            pr: PrPayload {
                id: &ground_truth.id,
                title: &ground_truth.title,
                description: &ground_truth.description,
                diff_content: &ground_truth.diff_content,
                files_changed: &ground_truth.files_changed,
            },
            follow_up_question,
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&payload)
            .send()
            .await;

        let elapsed_ms = start.elapsed().as_millis() as u64;

        let resp = match response {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                warn!(pr = %ground_truth.id, "oracle timeout");
                return Self::error_output(&ground_truth.id, follow_up_question, elapsed_ms, "timeout");
            }
            Err(e) => {
                warn!(pr = %ground_truth.id, error = %e, "oracle http error");
                return Self::error_output(&ground_truth.id, follow_up_question, elapsed_ms, e.to_string());
            }
        };

        if resp.status().as_u16() >= 400 {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let preview: String = body.chars().take(BODY_PREVIEW_BYTES).collect();
            warn!(pr = %ground_truth.id, status = %status, body = %preview, "oracle returned error status");
            return Self::error_output(&ground_truth.id, follow_up_question, elapsed_ms, format!("HTTP {status}"));
        }

        let data: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(pr = %ground_truth.id, error = %e, "oracle malformed response");
                return Self::error_output(&ground_truth.id, follow_up_question, elapsed_ms, format!("malformed response: {e}"));
            }
        };

        OracleOutput {
            ground_truth_id: ground_truth.id.clone(),
            summary: data["summary"].as_str().unwrap_or_default().to_string(),
            key_claims: data["key_claims"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect(),
            follow_up_question: follow_up_question.to_string(),
            follow_up_response: data["follow_up_response"].as_str().unwrap_or_default().to_string(),
            metadata: data["metadata"]
                .as_object()
                .map(|m| m.clone().into_iter().collect())
                .unwrap_or_default(),
            invoked_at: Utc::now(),
            latency_ms: elapsed_ms,
        }
    }
}
