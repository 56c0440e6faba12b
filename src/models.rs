//! Core data model for the calibration pipeline.
//!
//! Five entities: [`GroundTruthRecord`], [`OracleOutput`], [`ReplayScore`],
//! [`CalibrationCertificate`], linked by `ground_truth_id`. All fields are
//! required and immutable after construction unless noted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// One PR/commit snapshot pulled from a source-code host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub diff_content: String,
    pub files_changed: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub author: String,
    pub url: String,
    /// `owner/name` format.
    pub repo: String,
}

/// The oracle's response envelope for one record. An error envelope is
/// still a valid `OracleOutput`: empty fields plus a populated
/// `metadata["error"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleOutput {
    pub ground_truth_id: String,
    pub summary: String,
    pub key_claims: Vec<String>,
    pub follow_up_question: String,
    pub follow_up_response: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub invoked_at: DateTime<Utc>,
    pub latency_ms: u64,
}

impl OracleOutput {
    /// Build an error envelope: the summary/claims/response are empty, and
    /// `metadata["error"]` carries the reason.
    pub fn error(ground_truth_id: impl Into<String>, follow_up_question: impl Into<String>, latency_ms: u64, reason: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), Value::String(reason.into()));
        Self {
            ground_truth_id: ground_truth_id.into(),
            summary: String::new(),
            key_claims: Vec::new(),
            follow_up_question: follow_up_question.into(),
            follow_up_response: String::new(),
            metadata,
            invoked_at: Utc::now(),
            latency_ms,
        }
    }

    pub fn is_error(&self) -> bool {
        self.metadata.contains_key("error")
    }
}

/// One scored replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScore {
    pub ground_truth_id: String,
    pub precision: f64,
    pub recall: f64,
    pub reply_accuracy: f64,
    pub claims_total: u64,
    pub claims_supported: u64,
    pub changes_total: u64,
    pub changes_surfaced: u64,
    pub scoring_model: String,
    pub scoring_latency_ms: u64,
    pub scored_at: DateTime<Utc>,
    #[serde(default)]
    pub raw_scoring_output: HashMap<String, Value>,
}

#[allow(clippy::too_many_arguments)]
impl ReplayScore {
    /// Construct a `ReplayScore`, enforcing the bounds invariants rather
    /// than trusting the caller: scores in `[0,1]`, `supported <= total`,
    /// `surfaced <= total`.
    pub fn new(
        ground_truth_id: impl Into<String>,
        precision: f64,
        recall: f64,
        reply_accuracy: f64,
        claims_total: u64,
        claims_supported: u64,
        changes_total: u64,
        changes_surfaced: u64,
        scoring_model: impl Into<String>,
        scoring_latency_ms: u64,
        scored_at: DateTime<Utc>,
        raw_scoring_output: HashMap<String, Value>,
    ) -> Result<Self> {
        for (name, v) in [("precision", precision), ("recall", recall), ("reply_accuracy", reply_accuracy)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(PipelineError::Scoring(format!("{name} out of [0,1]: {v}")));
            }
        }
        if claims_supported > claims_total {
            return Err(PipelineError::Scoring(format!(
                "claims_supported ({claims_supported}) > claims_total ({claims_total})"
            )));
        }
        if changes_surfaced > changes_total {
            return Err(PipelineError::Scoring(format!(
                "changes_surfaced ({changes_surfaced}) > changes_total ({changes_total})"
            )));
        }
        Ok(Self {
            ground_truth_id: ground_truth_id.into(),
            precision,
            recall,
            reply_accuracy,
            claims_total,
            claims_supported,
            changes_total,
            changes_surfaced,
            scoring_model: scoring_model.into(),
            scoring_latency_ms,
            scored_at,
            raw_scoring_output,
        })
    }
}

/// The single aggregate artifact produced by one verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCertificate {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub certificate_id: String,
    pub construct_id: String,
    pub domain: Domain,
    pub replay_count: u64,
    pub precision: f64,
    pub recall: f64,
    pub reply_accuracy: f64,
    pub composite_score: f64,
    pub brier: f64,
    pub sample_size: u64,
    pub timestamp: DateTime<Utc>,
    pub ground_truth_source: String,
    pub commit_range: String,
    pub methodology_version: String,
    pub scoring_model: String,
    pub individual_scores: Vec<ReplayScore>,
}

fn default_schema_version() -> String {
    "1.0.0".to_string()
}

impl CalibrationCertificate {
    pub fn fresh_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// The certificate's only legal domain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Domain;

impl Serialize for Domain {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("community_oracle")
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "community_oracle" {
            Ok(Domain)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid domain: {s}, expected \"community_oracle\""
            )))
        }
    }
}

/// One line of `certificates/index.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateIndexEntry {
    pub certificate_id: String,
    pub construct_id: String,
    pub composite_score: f64,
    pub replay_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl From<&CalibrationCertificate> for CertificateIndexEntry {
    fn from(cert: &CalibrationCertificate) -> Self {
        Self {
            certificate_id: cert.certificate_id.clone(),
            construct_id: cert.construct_id.clone(),
            composite_score: cert.composite_score,
            replay_count: cert.replay_count,
            timestamp: cert.timestamp,
        }
    }
}

/// Closed status set published by a driving web façade (§6); the
/// orchestrator itself only ever produces `Completed` or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Ingesting,
    Invoking,
    Scoring,
    Certifying,
    Completed,
    Failed,
}
