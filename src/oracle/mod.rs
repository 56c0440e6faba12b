//! Oracle construct invocation.
//!
//! `OracleAdapter::invoke` returns `OracleOutput` directly rather than
//! `Result<OracleOutput>` — a conformant adapter cannot raise. Every
//! failure mode (timeout, malformed response, a panicking in-process
//! callable) is instead folded into an error envelope via
//! [`crate::models::OracleOutput::error`].

pub mod http;
pub mod in_process;

use async_trait::async_trait;

use crate::config::{OracleConfig, OracleKind};
use crate::error::Result;
use crate::models::{GroundTruthRecord, OracleOutput};

pub use http::HttpOracleAdapter;
pub use in_process::InProcessOracleAdapter;

#[async_trait]
pub trait OracleAdapter: Send + Sync {
    async fn invoke(&self, ground_truth: &GroundTruthRecord, follow_up_question: &str) -> OracleOutput;
}

pub struct OracleAdapterFactory;

impl OracleAdapterFactory {
    pub fn from_config(config: &OracleConfig) -> Result<Box<dyn OracleAdapter>> {
        config.validate()?;
        match config.kind {
            OracleKind::Http => Ok(Box::new(HttpOracleAdapter::new(config)?)),
            OracleKind::InProcess => Ok(Box::new(InProcessOracleAdapter::from_config(config)?)),
        }
    }
}
