//! In-process oracle adapter — the Rust analogue of invoking a local
//! callable by module/attribute name. Rust has no runtime import-by-string,
//! so callers register a closure under a `(module, callable)` key before
//! the adapter is constructed; `from_config` looks the pair up and fails
//! fast if nothing was registered.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::config::OracleConfig;
use crate::error::{PipelineError, Result};
use crate::models::{GroundTruthRecord, OracleOutput};

use super::OracleAdapter;

pub type BoxFuture = Pin<Box<dyn Future<Output = Value> + Send>>;

pub enum InProcessCallable {
    Sync(Box<dyn Fn(Value) -> Value + Send + Sync>),
    Async(Box<dyn Fn(Value) -> BoxFuture + Send + Sync>),
}

static REGISTRY: Lazy<Mutex<HashMap<(String, String), InProcessCallable>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub struct InProcessOracleAdapter {
    module: String,
    callable: String,
}

impl InProcessOracleAdapter {
    /// Register a closure under `(module, callable)`. A later registration
    /// of the same key replaces the earlier one.
    pub fn register(module: impl Into<String>, callable: impl Into<String>, f: InProcessCallable) {
        REGISTRY.lock().unwrap().insert((module.into(), callable.into()), f);
    }

    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let module = config
            .module
            .clone()
            .ok_or_else(|| PipelineError::Config("module is required for in-process oracle adapter".into()))?;
        let callable = config
            .callable
            .clone()
            .ok_or_else(|| PipelineError::Config("callable is required for in-process oracle adapter".into()))?;

        if !REGISTRY.lock().unwrap().contains_key(&(module.clone(), callable.clone())) {
            return Err(PipelineError::Config(format!(
                "no in-process oracle registered for module '{module}', callable '{callable}'"
            )));
        }

        Ok(Self { module, callable })
    }

    fn error_output(ground_truth_id: &str, follow_up_question: &str, elapsed_ms: u64, reason: impl Into<String>) -> OracleOutput {
        OracleOutput::error(ground_truth_id, follow_up_question, elapsed_ms, reason)
    }

    fn from_result(ground_truth_id: &str, follow_up_question: &str, elapsed_ms: u64, result: Value) -> OracleOutput {
        match result {
            Value::Object(ref map) => OracleOutput {
                ground_truth_id: ground_truth_id.to_string(),
                summary: map.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                key_claims: map
                    .get("key_claims")
                    .and_then(|v| v.as_array())
                    .into_iter()
                    .flatten()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect(),
                follow_up_question: follow_up_question.to_string(),
                follow_up_response: map.get("follow_up_response").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                metadata: map
                    .get("metadata")
                    .and_then(|v| v.as_object())
                    .map(|m| m.clone().into_iter().collect())
                    .unwrap_or_default(),
                invoked_at: Utc::now(),
                latency_ms: elapsed_ms,
            },
            other => {
                let raw_type = match &other {
                    Value::Null => "null",
                    Value::Bool(_) => "bool",
                    Value::Number(_) => "number",
                    Value::String(_) => "string",
                    Value::Array(_) => "array",
                    Value::Object(_) => unreachable!(),
                };
                let summary = match other {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                OracleOutput {
                    ground_truth_id: ground_truth_id.to_string(),
                    summary,
                    key_claims: Vec::new(),
                    follow_up_question: follow_up_question.to_string(),
                    follow_up_response: String::new(),
                    metadata: HashMap::from([("raw_type".to_string(), json!(raw_type))]),
                    invoked_at: Utc::now(),
                    latency_ms: elapsed_ms,
                }
            }
        }
    }
}

#[async_trait]
impl OracleAdapter for InProcessOracleAdapter {
    async fn invoke(&self, ground_truth: &GroundTruthRecord, follow_up_question: &str) -> OracleOutput {
        let payload = json!({
            "id": ground_truth.id,
            "title": ground_truth.title,
            "description": ground_truth.description,
            "diff_content": ground_truth.diff_content,
            "files_changed": ground_truth.files_changed,
            "follow_up_question": follow_up_question,
        });

        let start = Instant::now();

        // The callable is looked up fresh on each invocation rather than cached on
        // `self`, since `InProcessCallable` is not `Clone` and the registry is the
        // single source of truth for what's currently registered.
        let is_async = {
            let registry = REGISTRY.lock().unwrap();
            matches!(registry.get(&(self.module.clone(), self.callable.clone())), Some(InProcessCallable::Async(_)))
        };

        // Both branches run inside a tokio task: tokio already catches panics and
        // surfaces them through `JoinError`, so no manual `catch_unwind` is needed.
        let result = if is_async {
            let fut = {
                let registry = REGISTRY.lock().unwrap();
                match registry.get(&(self.module.clone(), self.callable.clone())) {
                    Some(InProcessCallable::Async(f)) => f(payload),
                    _ => unreachable!("checked above"),
                }
            };
            tokio::spawn(fut).await
        } else {
            let module = self.module.clone();
            let callable = self.callable.clone();
            tokio::task::spawn_blocking(move || {
                let registry = REGISTRY.lock().unwrap();
                match registry.get(&(module, callable)) {
                    Some(InProcessCallable::Sync(f)) => f(payload),
                    _ => unreachable!("checked above"),
                }
            })
            .await
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(value) => Self::from_result(&ground_truth.id, follow_up_question, elapsed_ms, value),
            Err(join_err) => {
                let message = join_err
                    .try_into_panic()
                    .ok()
                    .and_then(|panic| {
                        panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                    })
                    .unwrap_or_else(|| "in-process oracle panicked".to_string());
                Self::error_output(&ground_truth.id, follow_up_question, elapsed_ms, message)
            }
        }
    }
}
