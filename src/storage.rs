//! Filesystem storage layer for verification artifacts.
//!
//! JSONL append is atomic at line granularity: one `write_all` call writes
//! the serialized record plus its trailing newline, so a line either lands
//! whole or not at all. Certificate writes are atomic at file granularity:
//! write to a sibling temp file, then rename over the target.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{CalibrationCertificate, CertificateIndexEntry};

pub struct Storage {
    base_dir: PathBuf,
}

impl Storage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get/create the directory for a repository in `owner/name` format.
    /// Rejects path traversal: `..` anywhere, or a leading `/`.
    pub fn repo_dir(&self, repo: &str) -> Result<PathBuf> {
        let safe_name = repo.replace('/', "_");
        if safe_name.contains("..") || safe_name.starts_with('/') {
            return Err(PipelineError::Config(format!("Invalid repo name: {repo}")));
        }
        let path = self.base_dir.join(safe_name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Append one JSON-serialized record as a single line. The entire line
    /// (bytes + `\n`) is written with one `write_all` call so a crash
    /// between calls never leaves a half-written line.
    pub fn append_jsonl<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Read all records from a JSONL file, tolerating trailing blank lines.
    /// A non-blank malformed line is a hard error naming the file and
    /// 1-indexed line number.
    pub fn read_jsonl<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = serde_json::from_str(trimmed).map_err(|source| PipelineError::MalformedLine {
                path: path.display().to_string(),
                line: idx + 1,
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Write `certificates/{id}.json` atomically (temp file + rename), then
    /// append a summary line to `certificates/index.jsonl`. A failed index
    /// append is not fatal: the certificate remains discoverable by id.
    pub fn write_certificate(&self, cert: &CalibrationCertificate) -> Result<PathBuf> {
        let certs_dir = self.base_dir.join("certificates");
        fs::create_dir_all(&certs_dir)?;
        let target = certs_dir.join(format!("{}.json", cert.certificate_id));

        let mut tmp = tempfile::NamedTempFile::new_in(&certs_dir)?;
        let body = serde_json::to_vec_pretty(cert)?;
        tmp.write_all(&body)?;
        tmp.persist(&target).map_err(|e| PipelineError::Storage(e.error))?;

        let index_path = certs_dir.join("index.jsonl");
        let entry = CertificateIndexEntry::from(cert);
        if let Err(e) = self.append_jsonl(&index_path, &entry) {
            debug!(error = %e, "certificate index append failed; certificate remains readable by id");
        }

        Ok(target)
    }

    /// The OS supplies the not-found case itself: `fs::read_to_string` on a
    /// missing path returns an `io::ErrorKind::NotFound` error, which
    /// converts straight into `PipelineError::Storage`.
    pub fn read_certificate(&self, certificate_id: &str) -> Result<CalibrationCertificate> {
        let path = self.base_dir.join("certificates").join(format!("{certificate_id}.json"));
        let body = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&body)?)
    }

    pub fn list_certificates(&self) -> Result<Vec<CertificateIndexEntry>> {
        let index_path = self.base_dir.join("certificates").join("index.jsonl");
        self.read_jsonl(&index_path)
    }
}
