//! Calibration pipeline for community oracle constructs.
//!
//! Ingests merged pull requests as ground truth, replays each one against an
//! oracle construct, scores the replies on precision/recall/reply-accuracy
//! via an LLM judge, and aggregates the result into a signed-off
//! [`models::CalibrationCertificate`]. A driving web façade or CLI is
//! expected to sit on top of [`pipeline::VerificationPipeline`]; this crate
//! does not expose one.

pub mod certificate;
pub mod config;
pub mod constraint_gate;
pub mod error;
pub mod ingest;
pub mod models;
pub mod oracle;
pub mod pipeline;
pub mod scoring;
pub mod storage;

pub use error::{PipelineError, Result};
pub use pipeline::VerificationPipeline;

/// Installs a `tracing-subscriber` reading `RUST_LOG` (default `info`), and
/// loads a `.env` file from the working directory or one of its parents if
/// one is present, so `GITHUB_TOKEN`/`ANTHROPIC_API_KEY` don't have to be
/// exported by hand in every shell. Missing `.env` is not an error.
/// Library code only ever emits `tracing` events; wiring a subscriber is a
/// caller concern, but tests and examples want a quick one-liner.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = dotenv::dotenv();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
