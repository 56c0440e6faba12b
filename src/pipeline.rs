//! Wires ingest → invoke oracle → score → certify into the three public
//! entry points a driving façade or CLI calls: [`VerificationPipeline::ingest_only`],
//! [`VerificationPipeline::score_only`], [`VerificationPipeline::run`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::certificate::CertificateGenerator;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::ingest::GitHubIngester;
use crate::models::{CalibrationCertificate, GroundTruthRecord, ReplayScore};
use crate::oracle::OracleAdapter;
use crate::scoring::ScoringProvider;
use crate::storage::Storage;

/// Invoked synchronously after each record with `(completed, total)`.
/// `total` is fixed at loop entry regardless of how many records later fail.
pub type ProgressCallback<'a> = Box<dyn FnMut(usize, usize) + Send + 'a>;

pub struct VerificationPipeline {
    config: PipelineConfig,
    oracle: Arc<dyn OracleAdapter>,
    scorer: Arc<dyn ScoringProvider>,
    storage: Storage,
}

impl VerificationPipeline {
    pub fn new(
        config: PipelineConfig,
        oracle: Arc<dyn OracleAdapter>,
        scorer: Arc<dyn ScoringProvider>,
        storage: Option<Storage>,
    ) -> Result<Self> {
        let storage = match storage {
            Some(s) => s,
            None => Storage::new(config.output_dir.clone())?,
        };
        Ok(Self { config, oracle, scorer, storage })
    }

    /// Extracts `owner/repo` from `ingestion.repo_url` for [`Storage::repo_dir`].
    fn repo_key(&self) -> String {
        let trimmed = self.config.ingestion.repo_url.trim_end_matches('/');
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.len() >= 2 {
            format!("{}/{}", parts[parts.len() - 2], parts[parts.len() - 1])
        } else {
            "unknown".to_string()
        }
    }

    fn gt_path(&self, repo_key: &str) -> Result<PathBuf> {
        Ok(self.storage.repo_dir(repo_key)?.join("ground_truth.jsonl"))
    }

    /// Stage 1: fetch new ground truth from the source host and append it to
    /// the per-repo cache. Returns the full cached set (existing + new).
    pub async fn ingest_only(&self) -> Result<Vec<GroundTruthRecord>> {
        let repo_key = self.repo_key();
        let gt_path = self.gt_path(&repo_key)?;

        let mut existing: Vec<GroundTruthRecord> = self.storage.read_jsonl(&gt_path)?;
        let cached_ids: HashSet<String> = existing.iter().map(|r| r.id.clone()).collect();

        let mut ingester = GitHubIngester::new(self.config.ingestion.clone())?;
        let fresh = ingester.ingest(&cached_ids).await?;

        if !fresh.is_empty() {
            for record in &fresh {
                self.storage.append_jsonl(&gt_path, record)?;
            }
            info!(count = fresh.len(), "ingested new ground truth records");
        }

        existing.extend(fresh);
        Ok(existing)
    }

    /// Stages 2-4: score whatever is already cached and certify. Fails if
    /// nothing has been ingested yet.
    pub async fn score_only(&self, progress: Option<ProgressCallback<'_>>) -> Result<CalibrationCertificate> {
        let repo_key = self.repo_key();
        let gt_path = self.gt_path(&repo_key)?;

        let records: Vec<GroundTruthRecord> = self.storage.read_jsonl(&gt_path)?;
        if records.is_empty() {
            return Err(PipelineError::InsufficientSamples("no cached ground truth".into()));
        }

        self.score_and_certify(&records, &repo_key, progress).await
    }

    /// Full pipeline: ingest, then score and certify everything cached.
    pub async fn run(&self, progress: Option<ProgressCallback<'_>>) -> Result<CalibrationCertificate> {
        let records = self.ingest_only().await?;
        if records.is_empty() {
            return Err(PipelineError::InsufficientSamples("no ground truth records ingested".into()));
        }

        self.score_and_certify(&records, &self.repo_key(), progress).await
    }

    async fn score_and_certify(
        &self,
        records: &[GroundTruthRecord],
        repo_key: &str,
        mut progress: Option<ProgressCallback<'_>>,
    ) -> Result<CalibrationCertificate> {
        let total = records.len();
        let mut scores = Vec::with_capacity(total);

        for (completed, record) in records.iter().enumerate() {
            match self.score_single(record, repo_key).await {
                Ok(score) => scores.push(score),
                Err(err) => warn!(ground_truth_id = %record.id, error = %err, "replay failed, skipping"),
            }

            if let Some(cb) = progress.as_mut() {
                cb(completed + 1, total);
            }
        }

        if scores.is_empty() {
            return Err(PipelineError::InsufficientSamples("all replays failed".into()));
        }

        if scores.len() < self.config.min_replays {
            warn!(
                succeeded = scores.len(),
                minimum = self.config.min_replays,
                "fewer replays succeeded than the configured minimum — certificate is partial"
            );
        }

        let commit_range = format!("{}..{}", records[0].id, records[records.len() - 1].id);
        let generator = CertificateGenerator::new(
            self.config.construct_id.clone(),
            self.config.ingestion.repo_url.clone(),
            commit_range,
            self.config.scoring.model.clone(),
        )
        .with_methodology_version(self.config.scoring.prompt_version.clone())
        .with_weights(self.config.composite_weights.clone());

        let cert = generator.generate(scores)?;
        self.storage.write_certificate(&cert)?;

        info!(
            certificate_id = %cert.certificate_id,
            composite = cert.composite_score,
            brier = cert.brier,
            replay_count = cert.replay_count,
            "certificate generated"
        );

        Ok(cert)
    }

    /// One replay: generate a follow-up question, invoke the oracle, score
    /// all three dimensions. The oracle's output is persisted unconditionally
    /// the moment it's produced; the score is persisted only if all three
    /// scoring calls succeed.
    async fn score_single(&self, record: &GroundTruthRecord, repo_key: &str) -> Result<ReplayScore> {
        let question = self.scorer.generate_follow_up_question(record).await?;
        let oracle_output = self.oracle.invoke(record, &question).await;

        let repo_dir = self.storage.repo_dir(repo_key)?;
        self.storage.append_jsonl(&repo_dir.join("oracle_outputs.jsonl"), &oracle_output)?;

        let precision = self.scorer.score_precision(record, &oracle_output).await?;
        let recall = self.scorer.score_recall(record, &oracle_output).await?;
        let reply_accuracy = self.scorer.score_reply_accuracy(record, &oracle_output).await?;

        let mut raw = std::collections::HashMap::new();
        raw.insert("precision".to_string(), precision.raw.clone());
        raw.insert("recall".to_string(), recall.raw.clone());
        raw.insert("reply_accuracy".to_string(), reply_accuracy.raw.clone());

        let score = ReplayScore::new(
            record.id.clone(),
            precision.score,
            recall.score,
            reply_accuracy.score,
            precision.total,
            precision.supported,
            recall.total,
            recall.surfaced,
            self.config.scoring.model.clone(),
            0,
            chrono::Utc::now(),
            raw,
        )?;

        self.storage.append_jsonl(&repo_dir.join("replay_scores.jsonl"), &score)?;
        Ok(score)
    }
}
