//! Versioned prompt templates, loaded once and cached.
//!
//! Templates are compiled into the binary with `include_str!` rather than
//! read from disk at runtime — a library has no reliable notion of "next to
//! the source file" once installed from a registry, so embedding is the
//! idiomatic substitute for the manifest-plus-loose-files layout this
//! mirrors.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{PipelineError, Result};

struct Template {
    name: &'static str,
    body: &'static str,
}

const V1_TEMPLATES: &[Template] = &[
    Template { name: "follow_up_question", body: include_str!("prompts/v1/follow_up_question.txt") },
    Template { name: "precision", body: include_str!("prompts/v1/precision.txt") },
    Template { name: "recall", body: include_str!("prompts/v1/recall.txt") },
    Template { name: "reply_accuracy", body: include_str!("prompts/v1/reply_accuracy.txt") },
];

static MANIFESTS: Lazy<HashMap<&'static str, HashMap<&'static str, &'static str>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("v1", V1_TEMPLATES.iter().map(|t| (t.name, t.body)).collect());
    m
});

pub struct PromptManifest {
    templates: &'static HashMap<&'static str, &'static str>,
}

impl PromptManifest {
    pub fn load(version: &str) -> Result<Self> {
        let templates = MANIFESTS
            .get(version)
            .ok_or_else(|| PipelineError::Config(format!("unknown prompt version: {version}")))?;
        Ok(Self { templates })
    }

    /// Fill a named template's `{key}` placeholders from `fields`. Unknown
    /// template name is a configuration error, matching the loader's
    /// `KeyError`-on-lookup behavior.
    ///
    /// A leftover `{identifier}` marker after substitution means a caller
    /// and a template drifted out of sync — a programmer error, not
    /// something the model should ever see.
    pub fn render(&self, name: &str, fields: &[(&str, &str)]) -> Result<String> {
        let body = self
            .templates
            .get(name)
            .ok_or_else(|| PipelineError::Config(format!("unknown prompt template: {name}")))?;
        let mut rendered = (*body).to_string();
        for (key, value) in fields {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }

        if let Some(leftover) = find_unfilled_placeholder(&rendered) {
            debug_assert!(false, "template {name:?} left an unsubstituted placeholder: {{{leftover}}}");
            return Err(PipelineError::Config(format!(
                "template {name:?} left an unsubstituted placeholder: {{{leftover}}}"
            )));
        }

        Ok(rendered)
    }
}

/// Scans for a `{identifier}`-shaped marker that survived substitution.
/// Braces that bracket anything else (the JSON response-shape examples the
/// templates embed, e.g. `{"precision": ...}`) are not identifiers and are
/// skipped.
fn find_unfilled_placeholder(rendered: &str) -> Option<String> {
    let mut offset = 0;
    while let Some(rel_open) = rendered[offset..].find('{') {
        let open = offset + rel_open;
        let Some(rel_close) = rendered[open + 1..].find('}') else {
            break;
        };
        let close = open + 1 + rel_close;
        let candidate = &rendered[open + 1..close];
        if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Some(candidate.to_string());
        }
        offset = open + 1;
    }
    None
}
