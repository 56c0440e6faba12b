//! `LlmScorer` — an Anthropic-Messages-API scoring provider built directly
//! on `reqwest`, the same way the rest of this codebase talks to external
//! HTTP APIs rather than pulling in a dedicated SDK crate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::ScoringConfig;
use crate::error::{PipelineError, Result};
use crate::models::{GroundTruthRecord, OracleOutput};

use super::prompts::PromptManifest;
use super::{PrecisionResult, RecallResult, ReplyAccuracyResult, ScoringProvider};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const MAX_TOKENS: u32 = 2048;

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

pub struct LlmScorer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    prompts: PromptManifest,
}

impl LlmScorer {
    pub fn new(config: &ScoringConfig) -> Result<Self> {
        Self::with_base_url(config, ANTHROPIC_API_BASE.to_string())
    }

    fn with_base_url(config: &ScoringConfig, base_url: String) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| PipelineError::Config("api_key is required for LlmScorer".into()))?;
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        let prompts = PromptManifest::load(&config.prompt_version)?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            prompts,
        })
    }

    fn call_llm<'a>(
        &'a self,
        prompt: &'a str,
        retry: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            temperature: self.temperature,
            messages: vec![Message { role: "user", content: prompt }],
        };

        let attempt = async {
            let resp = self
                .client
                .post(format!("{}/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&request)
                .send()
                .await?
                .error_for_status()?;
            let parsed: MessagesResponse = resp.json().await?;
            parsed
                .content
                .into_iter()
                .next()
                .map(|b| b.text)
                .ok_or_else(|| PipelineError::Scoring("LLM response had no content blocks".into()))
        };

        match attempt.await {
            Ok(text) => Ok(text),
            Err(e) if retry => {
                warn!(error = %e, "LLM call failed, retrying once");
                self.call_llm(prompt, false).await
            }
            Err(e) => Err(e),
        }
        })
    }

    /// Call the LLM and parse its text as JSON, retrying once with a
    /// stricter prompt (and fence-stripping) on a parse failure.
    async fn call_llm_json(&self, prompt: &str) -> Result<Value> {
        let text = self.call_llm(prompt, true).await?;
        if let Ok(value) = serde_json::from_str(&text) {
            return Ok(value);
        }

        warn!("JSON parse failed, retrying with stricter prompt");
        let retry_prompt = format!(
            "{prompt}\n\nIMPORTANT: Your previous response was not valid JSON. Respond with ONLY valid JSON, no markdown fences or extra text."
        );
        let text = self.call_llm(&retry_prompt, false).await?;
        let stripped = strip_fences(&text);
        serde_json::from_str(&stripped).map_err(|e| PipelineError::Scoring(format!("LLM did not return valid JSON: {e}")))
    }
}

fn strip_fences(text: &str) -> String {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```") {
        t = rest.splitn(2, '\n').nth(1).unwrap_or(rest);
    }
    let t = t.strip_suffix("```").unwrap_or(t);
    t.trim().to_string()
}

#[async_trait]
impl ScoringProvider for LlmScorer {
    async fn generate_follow_up_question(&self, ground_truth: &GroundTruthRecord) -> Result<String> {
        let prompt = self.prompts.render("follow_up_question", &[
            ("title", &ground_truth.title),
            ("description", &ground_truth.description),
            ("diff_content", &ground_truth.diff_content),
        ])?;
        Ok(self.call_llm(&prompt, true).await?.trim().to_string())
    }

    async fn score_precision(&self, ground_truth: &GroundTruthRecord, oracle_output: &OracleOutput) -> Result<PrecisionResult> {
        let claims_json = serde_json::to_string_pretty(&oracle_output.key_claims)?;
        let prompt = self.prompts.render("precision", &[
            ("title", &ground_truth.title),
            ("description", &ground_truth.description),
            ("diff_content", &ground_truth.diff_content),
            ("claims_json", &claims_json),
        ])?;
        let raw = self.call_llm_json(&prompt).await?;
        Ok(PrecisionResult {
            score: raw["precision"].as_f64().unwrap_or(0.0),
            total: raw["total"].as_u64().unwrap_or(0),
            supported: raw["supported"].as_u64().unwrap_or(0),
            raw,
        })
    }

    async fn score_recall(&self, ground_truth: &GroundTruthRecord, oracle_output: &OracleOutput) -> Result<RecallResult> {
        let prompt = self.prompts.render("recall", &[
            ("title", &ground_truth.title),
            ("description", &ground_truth.description),
            ("diff_content", &ground_truth.diff_content),
            ("summary", &oracle_output.summary),
        ])?;
        let raw = self.call_llm_json(&prompt).await?;
        Ok(RecallResult {
            score: raw["recall"].as_f64().unwrap_or(0.0),
            total: raw["total"].as_u64().unwrap_or(0),
            surfaced: raw["surfaced"].as_u64().unwrap_or(0),
            raw,
        })
    }

    async fn score_reply_accuracy(&self, ground_truth: &GroundTruthRecord, oracle_output: &OracleOutput) -> Result<ReplyAccuracyResult> {
        let prompt = self.prompts.render("reply_accuracy", &[
            ("title", &ground_truth.title),
            ("description", &ground_truth.description),
            ("diff_content", &ground_truth.diff_content),
            ("follow_up_question", &oracle_output.follow_up_question),
            ("follow_up_response", &oracle_output.follow_up_response),
        ])?;
        let raw = self.call_llm_json(&prompt).await?;
        Ok(ReplyAccuracyResult {
            score: raw["accuracy"].as_f64().unwrap_or(0.0),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record() -> GroundTruthRecord {
        GroundTruthRecord {
            id: "1".to_string(),
            title: "Add rate limiting".to_string(),
            description: "adds a token bucket limiter".to_string(),
            diff_content: "+struct RateLimiter;".to_string(),
            files_changed: vec!["src/limiter.rs".to_string()],
            timestamp: Utc::now(),
            labels: vec![],
            author: "dev".to_string(),
            url: "https://example.com/pr/1".to_string(),
            repo: "a/b".to_string(),
        }
    }

    fn oracle_output() -> OracleOutput {
        OracleOutput {
            ground_truth_id: "1".to_string(),
            summary: "Added a rate limiter".to_string(),
            key_claims: vec!["uses token bucket".to_string()],
            follow_up_question: "what is the max rate?".to_string(),
            follow_up_response: "100 requests per minute".to_string(),
            metadata: Default::default(),
            invoked_at: Utc::now(),
            latency_ms: 10,
        }
    }

    fn scorer_for(base_url: String) -> LlmScorer {
        let config = ScoringConfig {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-6".to_string(),
            api_key: Some("test-key".to_string()),
            temperature: 0.0,
            prompt_version: "v1".to_string(),
        };
        LlmScorer::with_base_url(&config, base_url).unwrap()
    }

    fn messages_response(text: &str) -> serde_json::Value {
        json!({"content": [{"type": "text", "text": text}]})
    }

    #[tokio::test]
    async fn score_precision_parses_model_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(messages_response(
                &json!({"claims": [], "precision": 1.0, "total": 3, "supported": 3}).to_string(),
            )))
            .mount(&server)
            .await;

        let scorer = scorer_for(server.uri());
        let result = scorer.score_precision(&record(), &oracle_output()).await.unwrap();
        assert_eq!(result.score, 1.0);
        assert_eq!(result.total, 3);
        assert_eq!(result.supported, 3);
    }

    #[tokio::test]
    async fn score_recall_parses_model_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(messages_response(
                &json!({"changes": [], "recall": 1.0, "total": 2, "surfaced": 2}).to_string(),
            )))
            .mount(&server)
            .await;

        let scorer = scorer_for(server.uri());
        let result = scorer.score_recall(&record(), &oracle_output()).await.unwrap();
        assert_eq!(result.score, 1.0);
        assert_eq!(result.surfaced, 2);
    }

    #[tokio::test]
    async fn score_reply_accuracy_parses_model_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(messages_response(
                &json!({"accuracy": 0.75, "reasoning": "mostly grounded", "grounded_claims": [], "fabricated_claims": []}).to_string(),
            )))
            .mount(&server)
            .await;

        let scorer = scorer_for(server.uri());
        let result = scorer.score_reply_accuracy(&record(), &oracle_output()).await.unwrap();
        assert_eq!(result.score, 0.75);
        assert!(result.raw.get("reasoning").is_some());
    }

    #[tokio::test]
    async fn generate_follow_up_question_trims_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(messages_response("  What is the max request rate?  \n")))
            .mount(&server)
            .await;

        let scorer = scorer_for(server.uri());
        let question = scorer.generate_follow_up_question(&record()).await.unwrap();
        assert_eq!(question, "What is the max request rate?");
    }

    #[tokio::test]
    async fn score_reply_accuracy_retries_once_on_malformed_json() {
        let server = MockServer::start().await;
        let good = json!({"accuracy": 0.5, "reasoning": "ok", "grounded_claims": [], "fabricated_claims": []}).to_string();

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(messages_response("This is not JSON at all")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(messages_response(&good)))
            .mount(&server)
            .await;

        let scorer = scorer_for(server.uri());
        let result = scorer.score_reply_accuracy(&record(), &oracle_output()).await.unwrap();
        assert_eq!(result.score, 0.5);
    }

    #[tokio::test]
    async fn score_reply_accuracy_retry_strips_markdown_fences() {
        let server = MockServer::start().await;
        let good = json!({"accuracy": 0.9, "reasoning": "good", "grounded_claims": ["claim"], "fabricated_claims": []}).to_string();
        let fenced = format!("```json\n{good}\n```");

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(messages_response("not json")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(messages_response(&fenced)))
            .mount(&server)
            .await;

        let scorer = scorer_for(server.uri());
        let result = scorer.score_reply_accuracy(&record(), &oracle_output()).await.unwrap();
        assert_eq!(result.score, 0.9);
    }

    #[test]
    fn strip_fences_removes_markdown_code_fence() {
        let fenced = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_fences(fenced), "{\"a\":1}");
    }

    #[test]
    fn strip_fences_is_noop_on_plain_json() {
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn new_requires_api_key() {
        let config = ScoringConfig { api_key: None, ..Default::default() };
        assert!(LlmScorer::new(&config).is_err());
    }
}
