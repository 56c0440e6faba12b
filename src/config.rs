//! Configuration types for the calibration pipeline.
//!
//! All config structs derive `Deserialize` so a caller can load them from
//! TOML/JSON/env; `from_env()` convenience constructors pick up the fields
//! that commonly live outside version control (tokens, API keys).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    pub repo_url: String,
    #[serde(default)]
    pub source_token: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_true")]
    pub merged_only: bool,
}

fn default_limit() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl IngestionConfig {
    /// Fill `source_token` from `GITHUB_TOKEN` if unset.
    pub fn from_env(mut self) -> Self {
        if self.source_token.is_none() {
            self.source_token = std::env::var("GITHUB_TOKEN").ok();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    Http,
    InProcess,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OracleConfig {
    #[serde(rename = "type")]
    pub kind: OracleKind,
    // HTTP mode
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_seconds: u64,
    // in-process mode
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub callable: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl OracleConfig {
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            OracleKind::Http => {
                if self.url.is_none() {
                    return Err(PipelineError::Config("url is required when type=\"http\"".into()));
                }
            }
            OracleKind::InProcess => {
                if self.module.is_none() {
                    return Err(PipelineError::Config("module is required when type=\"in_process\"".into()));
                }
                if self.callable.is_none() {
                    return Err(PipelineError::Config("callable is required when type=\"in_process\"".into()));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}

fn default_prompt_version() -> String {
    "v1".to_string()
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            temperature: 0.0,
            prompt_version: default_prompt_version(),
        }
    }
}

impl ScoringConfig {
    /// Fill `api_key` from `ANTHROPIC_API_KEY` if unset.
    pub fn from_env(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub ingestion: IngestionConfig,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default = "default_min_replays")]
    pub min_replays: usize,
    #[serde(default = "default_weights")]
    pub composite_weights: HashMap<String, f64>,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_construct_id")]
    pub construct_id: String,
}

fn default_min_replays() -> usize {
    50
}

fn default_weights() -> HashMap<String, f64> {
    HashMap::from([
        ("precision".to_string(), 1.0),
        ("recall".to_string(), 1.0),
        ("reply_accuracy".to_string(), 1.0),
    ])
}

fn default_output_dir() -> String {
    "data".to_string()
}

fn default_construct_id() -> String {
    "unnamed-oracle".to_string()
}
