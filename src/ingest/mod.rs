//! Ground truth ingestion from a source-code host.
//!
//! Currently one backend: [`github::GitHubIngester`]. The module boundary
//! exists so a non-GitHub host could be added alongside it without
//! disturbing the pipeline orchestrator, which only depends on
//! `ingester.ingest().await -> Result<Vec<GroundTruthRecord>>`.

pub mod github;

pub use github::GitHubIngester;
