//! LLM-driven factual-alignment scoring.

pub mod client;
pub mod prompts;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{GroundTruthRecord, OracleOutput};

pub use client::LlmScorer;

#[derive(Debug, Clone)]
pub struct PrecisionResult {
    pub score: f64,
    pub total: u64,
    pub supported: u64,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct RecallResult {
    pub score: f64,
    pub total: u64,
    pub surfaced: u64,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct ReplyAccuracyResult {
    pub score: f64,
    pub raw: Value,
}

#[async_trait]
pub trait ScoringProvider: Send + Sync {
    async fn generate_follow_up_question(&self, ground_truth: &GroundTruthRecord) -> Result<String>;
    async fn score_precision(&self, ground_truth: &GroundTruthRecord, oracle_output: &OracleOutput) -> Result<PrecisionResult>;
    async fn score_recall(&self, ground_truth: &GroundTruthRecord, oracle_output: &OracleOutput) -> Result<RecallResult>;
    async fn score_reply_accuracy(&self, ground_truth: &GroundTruthRecord, oracle_output: &OracleOutput) -> Result<ReplyAccuracyResult>;
}
