//! GitHub REST v3 client for ground truth ingestion.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::IngestionConfig;
use crate::error::{PipelineError, Result};
use crate::models::GroundTruthRecord;

const MAX_DIFF_BYTES: usize = 100_000;
const RATE_LIMIT_FLOOR: i64 = 10;
const MAX_BACKOFF_SECONDS: u64 = 60;

/// Extract `(owner, repo)` from a GitHub URL or `owner/repo` shorthand.
/// Accepts `https://github.com/owner/repo`, the same with `.git` or a
/// trailing slash, and bare `owner/repo`.
fn parse_repo(repo_url: &str) -> Result<(String, String)> {
    let trimmed = repo_url.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .unwrap_or(trimmed);
    let rest = rest.strip_suffix(".git").unwrap_or(rest);

    let mut parts = rest.splitn(2, '/');
    let owner = parts.next().unwrap_or("");
    let repo = parts.next().unwrap_or("");
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return Err(PipelineError::Config(format!("Invalid GitHub repo URL: {repo_url}")));
    }
    Ok((owner.to_string(), repo.to_string()))
}

/// Truncate a diff to its changed hunks if it exceeds `max_bytes`. Header
/// and hunk-marker lines (`diff --git`, `---`, `+++`, `@@`) are kept
/// unconditionally; `+`/`-` lines are kept until the budget runs out, at
/// which point a literal truncation marker is appended and the rest of the
/// diff (including any remaining context lines) is dropped.
fn truncate_diff(diff: &str, max_bytes: usize) -> String {
    if diff.len() <= max_bytes {
        return diff.to_string();
    }

    info!(max_bytes, "diff exceeds byte budget, truncating to hunks");
    let mut kept = String::new();
    let mut current_size = 0usize;

    for line in diff.split_inclusive('\n') {
        if line.starts_with("diff --git") || line.starts_with("---") || line.starts_with("+++") || line.starts_with("@@") {
            kept.push_str(line);
            current_size += line.len();
            continue;
        }
        if line.starts_with('+') || line.starts_with('-') {
            if current_size + line.len() > max_bytes {
                kept.push_str("+... [truncated]\n");
                break;
            }
            kept.push_str(line);
            current_size += line.len();
        }
        // context lines are dropped to save space
    }

    kept
}

/// Pull changed file paths out of a unified diff's `+++ b/...` headers.
fn extract_files_changed(diff: &str) -> Vec<String> {
    diff.lines()
        .filter_map(|line| line.strip_prefix("+++ b/"))
        .filter(|path| *path != "/dev/null")
        .map(|path| path.to_string())
        .collect()
}

/// Async GitHub REST API v3 client for extracting ground truth records.
pub struct GitHubIngester {
    config: IngestionConfig,
    owner: String,
    repo: String,
    client: Client,
    rate_limit_remaining: i64,
    rate_limit_reset: DateTime<Utc>,
    /// ETag seen for a given `url?page=N` key, so a repeat poll of the same
    /// page can send `If-None-Match` and short-circuit on `304`.
    etags: HashMap<String, String>,
}

impl GitHubIngester {
    pub fn new(config: IngestionConfig) -> Result<Self> {
        let (owner, repo) = parse_repo(&config.repo_url)?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            "application/vnd.github.v3+json".parse().unwrap(),
        );
        headers.insert("X-GitHub-Api-Version", "2022-11-28".parse().unwrap());
        if let Some(token) = &config.source_token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|_| PipelineError::Config("invalid GitHub token".into()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            config,
            owner,
            repo,
            client,
            rate_limit_remaining: 60,
            rate_limit_reset: Utc::now(),
            etags: HashMap::new(),
        })
    }

    #[cfg(test)]
    fn with_base_url(config: IngestionConfig, base_url: String) -> Result<TestIngester> {
        let (owner, repo) = parse_repo(&config.repo_url)?;
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, "application/vnd.github.v3+json".parse().unwrap());
        let client = Client::builder().default_headers(headers).build()?;
        Ok(TestIngester(GitHubIngester {
            config,
            owner,
            repo,
            client,
            rate_limit_remaining: 60,
            rate_limit_reset: Utc::now(),
            etags: HashMap::new(),
        }, base_url))
    }

    /// Fetch merged PRs not already in `cached_ids`, fetch each diff, return
    /// structured records. A single PR's failure (malformed diff fetch,
    /// missing fields) is logged and skipped; it never aborts the whole
    /// ingest.
    pub async fn ingest(&mut self, cached_ids: &std::collections::HashSet<String>) -> Result<Vec<GroundTruthRecord>> {
        self.ingest_from(&base_url(), cached_ids).await
    }

    async fn ingest_from(&mut self, base: &str, cached_ids: &std::collections::HashSet<String>) -> Result<Vec<GroundTruthRecord>> {
        let prs = self.fetch_prs(base).await?;
        let mut records = Vec::new();

        for pr in prs {
            let number = pr_number(&pr);
            if cached_ids.contains(&number.to_string()) {
                continue;
            }
            match self.build_record(base, &pr).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(pr = %number, error = %e, "failed to process PR, skipping");
                }
            }
        }

        Ok(records)
    }

    async fn build_record(&mut self, base: &str, pr: &Value) -> Result<GroundTruthRecord> {
        let number = pr_number(pr);
        let diff = self.fetch_diff(base, number).await?;
        let mut files = extract_files_changed(&diff);
        if files.is_empty() {
            files = pr["files"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|f| f["filename"].as_str())
                .map(|s| s.to_string())
                .collect();
        }

        let merged_at = pr["merged_at"]
            .as_str()
            .ok_or_else(|| PipelineError::Ingestion(format!("PR #{number} missing merged_at")))?;
        let timestamp = DateTime::parse_from_rfc3339(merged_at)
            .map_err(|e| PipelineError::Ingestion(format!("PR #{number} bad merged_at: {e}")))?
            .with_timezone(&Utc);

        Ok(GroundTruthRecord {
            id: number.to_string(),
            title: pr["title"].as_str().unwrap_or_default().to_string(),
            description: pr["body"].as_str().unwrap_or_default().to_string(),
            diff_content: truncate_diff(&diff, MAX_DIFF_BYTES),
            files_changed: files,
            timestamp,
            labels: pr["labels"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|l| l["name"].as_str())
                .map(|s| s.to_string())
                .collect(),
            author: pr["user"]["login"].as_str().unwrap_or("unknown").to_string(),
            url: pr["html_url"].as_str().unwrap_or_default().to_string(),
            repo: format!("{}/{}", self.owner, self.repo),
        })
    }

    async fn fetch_prs(&mut self, base: &str) -> Result<Vec<Value>> {
        let mut all_prs = Vec::new();
        let mut page = 1u32;
        let per_page = self.config.limit.min(100);

        while all_prs.len() < self.config.limit {
            self.check_rate_limit().await;

            let url = format!("{base}/repos/{}/{}/pulls", self.owner, self.repo);
            let etag_key = format!("{url}?page={page}");

            let mut request = self.client.get(&url).query(&[
                ("state", "closed"),
                ("sort", "updated"),
                ("direction", "desc"),
                ("per_page", &per_page.to_string()),
                ("page", &page.to_string()),
            ]);
            if let Some(etag) = self.etags.get(&etag_key) {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag.clone());
            }
            let resp = request.send().await?;

            self.update_rate_limit(&resp);

            if resp.status() == reqwest::StatusCode::FORBIDDEN {
                self.handle_rate_limit().await;
                continue;
            }

            if resp.status() == reqwest::StatusCode::NOT_MODIFIED {
                info!(page, "304 not modified, no new data on this page");
                break;
            }

            if let Some(etag) = resp.headers().get(reqwest::header::ETAG).and_then(|v| v.to_str().ok()) {
                self.etags.insert(etag_key, etag.to_string());
            }

            let has_next = resp
                .headers()
                .get("link")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.contains("rel=\"next\""))
                .unwrap_or(false);

            let resp = resp.error_for_status()?;
            let page_data: Vec<Value> = resp.json().await?;
            if page_data.is_empty() {
                break;
            }

            for pr in page_data {
                if pr["merged_at"].is_null() {
                    continue;
                }
                if self.config.merged_only && pr["merged_at"].is_null() {
                    continue;
                }
                if !self.config.labels.is_empty() {
                    let pr_labels: Vec<&str> = pr["labels"]
                        .as_array()
                        .into_iter()
                        .flatten()
                        .filter_map(|l| l["name"].as_str())
                        .collect();
                    if !self.config.labels.iter().any(|l| pr_labels.contains(&l.as_str())) {
                        continue;
                    }
                }
                if let Some(since) = self.config.since {
                    if let Some(merged_at) = pr["merged_at"].as_str() {
                        if let Ok(merged) = DateTime::parse_from_rfc3339(merged_at) {
                            if merged.with_timezone(&Utc) < since {
                                continue;
                            }
                        }
                    }
                }

                all_prs.push(pr);
                if all_prs.len() >= self.config.limit {
                    break;
                }
            }

            if !has_next {
                break;
            }
            page += 1;
        }

        Ok(all_prs)
    }

    async fn fetch_diff(&mut self, base: &str, pr_number: u64) -> Result<String> {
        self.check_rate_limit().await;

        let url = format!("{base}/repos/{}/{}/pulls/{pr_number}", self.owner, self.repo);
        let mut resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3.diff")
            .send()
            .await?;

        self.update_rate_limit(&resp);

        if resp.status() == reqwest::StatusCode::FORBIDDEN {
            self.handle_rate_limit().await;
            resp = self
                .client
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/vnd.github.v3.diff")
                .send()
                .await?;
        }

        let resp = resp.error_for_status()?;
        Ok(resp.text().await?)
    }

    fn update_rate_limit(&mut self, resp: &reqwest::Response) {
        if let Some(remaining) = resp.headers().get("x-ratelimit-remaining").and_then(|v| v.to_str().ok()) {
            if let Ok(n) = remaining.parse() {
                self.rate_limit_remaining = n;
            }
        }
        if let Some(reset) = resp.headers().get("x-ratelimit-reset").and_then(|v| v.to_str().ok()) {
            if let Ok(ts) = reset.parse::<i64>() {
                if let Some(dt) = DateTime::from_timestamp(ts, 0) {
                    self.rate_limit_reset = dt;
                }
            }
        }
    }

    async fn check_rate_limit(&self) {
        if self.rate_limit_remaining < RATE_LIMIT_FLOOR {
            let wait = (self.rate_limit_reset - Utc::now()).num_milliseconds().max(0);
            if wait > 0 {
                warn!(remaining = self.rate_limit_remaining, wait_ms = wait, "rate limit low, sleeping");
                tokio::time::sleep(Duration::from_millis(wait as u64)).await;
            }
        }
    }

    async fn handle_rate_limit(&self) {
        let mut backoff = 1.0f64;
        for _ in 0..5 {
            warn!(backoff_secs = backoff, "rate limited, backing off");
            tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
            backoff = (backoff * 2.0).min(MAX_BACKOFF_SECONDS as f64);
            if Utc::now() >= self.rate_limit_reset {
                return;
            }
        }
    }
}

fn pr_number(pr: &Value) -> u64 {
    pr["number"].as_u64().unwrap_or(0)
}

fn base_url() -> String {
    "https://api.github.com".to_string()
}

#[cfg(test)]
struct TestIngester(GitHubIngester, String);

#[cfg(test)]
impl TestIngester {
    async fn ingest(&mut self) -> Result<Vec<GroundTruthRecord>> {
        let base = self.1.clone();
        self.0.ingest_from(&base, &std::collections::HashSet::new()).await
    }

    async fn ingest_skipping(&mut self, cached_ids: &std::collections::HashSet<String>) -> Result<Vec<GroundTruthRecord>> {
        let base = self.1.clone();
        self.0.ingest_from(&base, cached_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(repo_url: &str) -> IngestionConfig {
        IngestionConfig {
            repo_url: repo_url.to_string(),
            source_token: None,
            limit: 100,
            since: None,
            labels: vec![],
            merged_only: true,
        }
    }

    #[test]
    fn parse_repo_accepts_all_forms() {
        assert_eq!(parse_repo("https://github.com/acme/widgets").unwrap(), ("acme".into(), "widgets".into()));
        assert_eq!(parse_repo("https://github.com/acme/widgets.git").unwrap(), ("acme".into(), "widgets".into()));
        assert_eq!(parse_repo("https://github.com/acme/widgets/").unwrap(), ("acme".into(), "widgets".into()));
        assert_eq!(parse_repo("acme/widgets").unwrap(), ("acme".into(), "widgets".into()));
    }

    #[test]
    fn parse_repo_rejects_malformed_url() {
        assert!(parse_repo("not-a-repo").is_err());
        assert!(parse_repo("https://github.com/acme").is_err());
    }

    #[test]
    fn truncate_diff_keeps_headers_and_appends_marker_over_budget() {
        let mut diff = String::from("diff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n");
        for _ in 0..10 {
            diff.push_str(&format!("+{}\n", "x".repeat(20)));
        }
        let truncated = truncate_diff(&diff, 100);
        assert!(truncated.starts_with("diff --git"));
        assert!(truncated.ends_with("+... [truncated]\n"));
        assert!(truncated.len() <= diff.len());
    }

    #[test]
    fn truncate_diff_is_noop_under_budget() {
        let diff = "diff --git a/f b/f\n+hello\n";
        assert_eq!(truncate_diff(diff, 1_000_000), diff);
    }

    #[test]
    fn extract_files_changed_skips_dev_null() {
        let diff = "diff --git a/a.rs b/a.rs\n+++ b/a.rs\ndiff --git a/b.rs b/b.rs\n+++ /dev/null\n";
        assert_eq!(extract_files_changed(diff), vec!["a.rs".to_string()]);
    }

    #[tokio::test]
    async fn ingest_fetches_prs_and_diffs() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "number": 42,
                    "title": "fix thing",
                    "body": "fixes the thing",
                    "merged_at": "2024-01-15T10:00:00Z",
                    "labels": [{"name": "bug"}],
                    "user": {"login": "alice"},
                    "html_url": "https://github.com/acme/widgets/pull/42",
                }
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/42"))
            .respond_with(ResponseTemplate::new(200).set_body_string("diff --git a/f b/f\n+++ b/f\n+added\n"))
            .mount(&server)
            .await;

        let mut ingester = GitHubIngester::with_base_url(cfg("acme/widgets"), server.uri()).unwrap();
        let records = ingester.ingest().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "42");
        assert_eq!(records[0].author, "alice");
        assert_eq!(records[0].files_changed, vec!["f".to_string()]);
    }

    #[tokio::test]
    async fn ingest_skips_unmerged_prs() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"number": 1, "title": "open pr", "merged_at": null, "user": {"login": "bob"}},
            ])))
            .mount(&server)
            .await;

        let mut ingester = GitHubIngester::with_base_url(cfg("acme/widgets"), server.uri()).unwrap();
        let records = ingester.ingest().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn ingest_filters_by_label() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "number": 1, "title": "a", "merged_at": "2024-01-01T00:00:00Z",
                    "labels": [{"name": "chore"}], "user": {"login": "x"},
                },
                {
                    "number": 2, "title": "b", "merged_at": "2024-01-02T00:00:00Z",
                    "labels": [{"name": "feature"}], "user": {"login": "x"},
                },
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("diff --git a/f b/f\n+++ b/f\n"))
            .mount(&server)
            .await;

        let mut config = cfg("acme/widgets");
        config.labels = vec!["feature".to_string()];
        let mut ingester = GitHubIngester::with_base_url(config, server.uri()).unwrap();
        let records = ingester.ingest().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "2");
    }

    #[tokio::test]
    async fn ingest_skips_cached_ids() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "number": 1, "title": "a", "merged_at": "2024-01-01T00:00:00Z",
                    "labels": [], "user": {"login": "x"},
                },
                {
                    "number": 2, "title": "b", "merged_at": "2024-01-02T00:00:00Z",
                    "labels": [], "user": {"login": "x"},
                },
            ])))
            .mount(&server)
            .await;

        // Only PR #2's diff is ever requested; if #1 were re-fetched this
        // would 404 since no mock exists for it.
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("diff --git a/f b/f\n+++ b/f\n"))
            .mount(&server)
            .await;

        let mut ingester = GitHubIngester::with_base_url(cfg("acme/widgets"), server.uri()).unwrap();
        let cached = std::collections::HashSet::from(["1".to_string()]);
        let records = ingester.ingest_skipping(&cached).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "2");
    }

    #[tokio::test]
    async fn ingest_sends_if_none_match_and_short_circuits_on_304() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"abc123\"").set_body_json(json!([
                {
                    "number": 1, "title": "a", "merged_at": "2024-01-01T00:00:00Z",
                    "labels": [], "user": {"login": "x"},
                }
            ])))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .and(header_exists("if-none-match"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("diff --git a/f b/f\n+++ b/f\n"))
            .mount(&server)
            .await;

        let mut ingester = GitHubIngester::with_base_url(cfg("acme/widgets"), server.uri()).unwrap();

        let first = ingester.ingest().await.unwrap();
        assert_eq!(first.len(), 1);

        // Same page, same ingester: the cached ETag is sent as If-None-Match
        // and the 304 response is treated as "no new data", not an error.
        let second = ingester.ingest().await.unwrap();
        assert!(second.is_empty());
    }
}
