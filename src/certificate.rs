//! Aggregation math turning a batch of [`ReplayScore`]s into a
//! [`CalibrationCertificate`].

use std::collections::HashMap;

use chrono::Utc;

use crate::error::{PipelineError, Result};
use crate::models::{CalibrationCertificate, Domain, ReplayScore};

pub struct CertificateGenerator {
    construct_id: String,
    ground_truth_source: String,
    commit_range: String,
    scoring_model: String,
    methodology_version: String,
    weights: HashMap<String, f64>,
}

fn default_weights() -> HashMap<String, f64> {
    HashMap::from([
        ("precision".to_string(), 1.0),
        ("recall".to_string(), 1.0),
        ("reply_accuracy".to_string(), 1.0),
    ])
}

impl CertificateGenerator {
    pub fn new(
        construct_id: impl Into<String>,
        ground_truth_source: impl Into<String>,
        commit_range: impl Into<String>,
        scoring_model: impl Into<String>,
    ) -> Self {
        Self {
            construct_id: construct_id.into(),
            ground_truth_source: ground_truth_source.into(),
            commit_range: commit_range.into(),
            scoring_model: scoring_model.into(),
            methodology_version: "v1".to_string(),
            weights: default_weights(),
        }
    }

    pub fn with_methodology_version(mut self, version: impl Into<String>) -> Self {
        self.methodology_version = version.into();
        self
    }

    pub fn with_weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    /// Aggregate `scores` into a certificate. Fails if `scores` is empty or
    /// if the composite weights sum to zero.
    pub fn generate(&self, scores: Vec<ReplayScore>) -> Result<CalibrationCertificate> {
        if scores.is_empty() {
            return Err(PipelineError::Config("Cannot generate certificate from empty scores".into()));
        }

        let n = scores.len() as f64;
        let mean_precision = scores.iter().map(|s| s.precision).sum::<f64>() / n;
        let mean_recall = scores.iter().map(|s| s.recall).sum::<f64>() / n;
        let mean_reply_accuracy = scores.iter().map(|s| s.reply_accuracy).sum::<f64>() / n;

        let total_weight: f64 = self.weights.values().sum();
        if total_weight == 0.0 {
            return Err(PipelineError::Config("Composite weights must not all be zero".into()));
        }

        let composite = (self.weights.get("precision").copied().unwrap_or(0.0) * mean_precision
            + self.weights.get("recall").copied().unwrap_or(0.0) * mean_recall
            + self.weights.get("reply_accuracy").copied().unwrap_or(0.0) * mean_reply_accuracy)
            / total_weight;

        let brier = (1.0 - composite) * 0.5;
        let replay_count = scores.len() as u64;

        Ok(CalibrationCertificate {
            schema_version: "1.0.0".to_string(),
            certificate_id: CalibrationCertificate::fresh_id(),
            construct_id: self.construct_id.clone(),
            domain: Domain,
            replay_count,
            precision: round6(mean_precision),
            recall: round6(mean_recall),
            reply_accuracy: round6(mean_reply_accuracy),
            composite_score: round6(composite),
            brier: round6(brier),
            sample_size: replay_count,
            timestamp: Utc::now(),
            ground_truth_source: self.ground_truth_source.clone(),
            commit_range: self.commit_range.clone(),
            methodology_version: self.methodology_version.clone(),
            scoring_model: self.scoring_model.clone(),
            individual_scores: scores,
        })
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
