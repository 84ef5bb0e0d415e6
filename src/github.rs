use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::fetch::{BatchStats, RepoStatsSource};
use crate::repo::{RateLimitInfo, RepoRef, RepoStats};
use crate::workflow::ListHost;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("awesome-stars/", env!("CARGO_PKG_VERSION"));

/// A file inside a GitHub repository (README source or rendered output)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubFileRef {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
    pub path: String,
}

impl std::fmt::Display for GitHubFileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.owner, self.repo, self.path)?;
        if let Some(branch) = &self.branch {
            write!(f, "@{}", branch)?;
        }
        Ok(())
    }
}

/// GitHub API client
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
    api_base: String,
}

impl GitHubClient {
    pub fn new(token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            token,
            api_base: API_BASE.to_string(),
        })
    }

    /// Point the client at another API host (local test servers)
    #[cfg(test)]
    fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .no_proxy()
            .build()
            .unwrap();
        self.api_base = api_base.into();
        self
    }

    /// Build REST request with auth header
    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn contents_url(&self, file: &GitHubFileRef) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            file.owner,
            file.repo,
            file.path.trim_start_matches('/')
        )
    }

    /// Fetch the raw contents API object for a file
    async fn get_contents(&self, file: &GitHubFileRef) -> Result<ContentsResponse> {
        let mut req = self.request(reqwest::Method::GET, &self.contents_url(file));
        if let Some(branch) = &file.branch {
            req = req.query(&[("ref", branch)]);
        }

        let response = req
            .send()
            .await
            .with_context(|| format!("Failed to request {}", file))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error {} for {}: {}", status, file, body);
        }

        let value: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse contents response for {}", file))?;

        if value.is_array() {
            anyhow::bail!("Expected file at {}, found a directory", file);
        }
        let contents: ContentsResponse = serde_json::from_value(value)
            .with_context(|| format!("Unexpected contents response for {}", file))?;
        if contents.kind != "file" {
            anyhow::bail!("Expected file at {}, found {}", file, contents.kind);
        }
        Ok(contents)
    }

    /// Fetch a file's text (decoded from the API's base64 payload)
    pub async fn fetch_file(&self, file: &GitHubFileRef) -> Result<String> {
        let contents = self.get_contents(file).await?;
        decode_contents(&contents)
    }

    /// Replace a file's contents with a new commit
    pub async fn update_file(&self, file: &GitHubFileRef, content: &str, message: &str) -> Result<()> {
        let existing = self.get_contents(file).await?;

        let mut body = json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content.as_bytes()),
            "sha": existing.sha,
        });
        if let Some(branch) = &file.branch {
            body["branch"] = json!(branch);
        }

        let response = self
            .request(reqwest::Method::PUT, &self.contents_url(file))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to update {}", file))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error {} updating {}: {}", status, file, body);
        }

        tracing::info!(file = %file, "updated file");
        Ok(())
    }

    /// Check rate limit status (returns both REST and GraphQL limits)
    pub async fn rate_limit(&self) -> Result<RateLimitResources> {
        let url = format!("{}/rate_limit", self.api_base);

        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .context("Failed to check rate limit")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error {} checking rate limit: {}", status, body);
        }

        let data: RateLimitResponse = response
            .json()
            .await
            .context("Failed to parse rate limit response")?;
        Ok(data.resources)
    }

    /// One GraphQL round trip for a batch of repositories.
    ///
    /// Any transport, HTTP or rate-limit error fails the whole batch; the
    /// caller decides whether to retry.
    pub async fn fetch_repo_stats(&self, repos: &[RepoRef]) -> Result<BatchStats> {
        if repos.is_empty() {
            return Ok(BatchStats::default());
        }

        let request_body = json!({ "query": build_stats_query(repos) });
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(format!("{}/graphql", self.api_base))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&request_body)
            .send()
            .await
            .context("GraphQL request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GraphQL error {}: {}", status, body);
        }

        let gql: GraphQLResponse = response
            .json()
            .await
            .context("Failed to parse GraphQL response")?;

        tracing::debug!(
            repos = repos.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "POST /graphql"
        );

        if let Some(errors) = &gql.errors {
            if errors.iter().any(|e| e.message.to_lowercase().contains("rate limit")) {
                anyhow::bail!("GraphQL rate limited");
            }
            // "Could not resolve to a Repository" for deleted/renamed repos is
            // expected; the alias comes back null and is skipped below
        }

        let data = match gql.data {
            Some(data) if !data.is_null() => data,
            _ => {
                let messages: Vec<String> = gql
                    .errors
                    .unwrap_or_default()
                    .into_iter()
                    .map(|e| e.message)
                    .collect();
                anyhow::bail!("GraphQL response without data: {}", messages.join("; "));
            }
        };

        Ok(parse_stats_response(repos, &data))
    }
}

#[async_trait]
impl RepoStatsSource for GitHubClient {
    async fn fetch_repo_stats_batch(&self, repos: &[RepoRef]) -> Result<BatchStats> {
        self.fetch_repo_stats(repos).await
    }
}

#[async_trait]
impl ListHost for GitHubClient {
    async fn fetch_file(&self, file: &GitHubFileRef) -> Result<String> {
        GitHubClient::fetch_file(self, file).await
    }

    async fn update_file(&self, file: &GitHubFileRef, content: &str, message: &str) -> Result<()> {
        GitHubClient::update_file(self, file, content, message).await
    }
}

/// Build an aliased query: `r0: repository(owner: "x", name: "y") { ... }`
/// plus the rateLimit block to track query cost
fn build_stats_query(repos: &[RepoRef]) -> String {
    let repo_fragment = "stargazerCount defaultBranchRef { target { ... on Commit { committedDate } } }";

    let fields: Vec<String> = repos
        .iter()
        .enumerate()
        .map(|(i, repo)| {
            // JSON string literals are valid GraphQL string literals
            format!(
                "r{}: repository(owner: {}, name: {}) {{ {} }}",
                i,
                Value::from(repo.owner.as_str()),
                Value::from(repo.name.as_str()),
                repo_fragment
            )
        })
        .collect();

    format!(
        "query {{\n{}\nrateLimit {{ remaining resetAt cost }}\n}}",
        fields.join("\n")
    )
}

/// Map `rN` aliases back to the requested refs. Null aliases (repos that no
/// longer resolve) are left out.
fn parse_stats_response(repos: &[RepoRef], data: &Value) -> BatchStats {
    let mut stats = HashMap::new();

    if let Some(obj) = data.as_object() {
        for (alias, value) in obj {
            let Some(index) = alias.strip_prefix('r').and_then(|i| i.parse::<usize>().ok()) else {
                continue;
            };
            let Some(repo) = repos.get(index) else {
                continue;
            };
            let Some(stars) = value.get("stargazerCount").and_then(Value::as_u64) else {
                continue;
            };
            let last_commit_at = value
                .pointer("/defaultBranchRef/target/committedDate")
                .and_then(Value::as_str)
                .map(String::from);

            stats.insert(repo.key(), RepoStats { stars, last_commit_at });
        }
    }

    let rate_limit = data.get("rateLimit").and_then(|rl| {
        Some(RateLimitInfo {
            remaining: rl.get("remaining")?.as_u64()?,
            reset_at: rl.get("resetAt")?.as_str()?.to_string(),
            cost: rl.get("cost").and_then(Value::as_u64),
        })
    });

    BatchStats { stats, rate_limit }
}

fn decode_contents(contents: &ContentsResponse) -> Result<String> {
    let encoding = contents.encoding.as_deref().unwrap_or("base64");
    if encoding != "base64" {
        anyhow::bail!("Unsupported content encoding: {}", encoding);
    }

    // GitHub sends base64 wrapped at 60 columns
    let cleaned: String = contents
        .content
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| anyhow::anyhow!("Base64 decode error: {}", e))?;

    String::from_utf8(decoded).map_err(|e| anyhow::anyhow!("UTF-8 decode error: {}", e))
}

/// Contents API file object
#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    content: Option<String>,
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    data: Option<Value>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Deserialize)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset: u64,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimit,
    pub graphql: RateLimit,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port, returning its base URL
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_rate_limit_reports_api_error() {
        let base = serve_once("401 Unauthorized", r#"{"message":"Bad credentials"}"#).await;
        let client = GitHubClient::new("bad-token".to_string())
            .unwrap()
            .with_api_base(base);

        let err = client.rate_limit().await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("401"), "{}", message);
        assert!(message.contains("Bad credentials"), "{}", message);
    }

    #[tokio::test]
    async fn test_rate_limit_parses_resources() {
        let body = r#"{"resources":{"core":{"limit":5000,"remaining":4999,"reset":1700000000},"graphql":{"limit":5000,"remaining":4900,"reset":1700000100}}}"#;
        let base = serve_once("200 OK", body).await;
        let client = GitHubClient::new("token".to_string())
            .unwrap()
            .with_api_base(base);

        let resources = client.rate_limit().await.unwrap();
        assert_eq!(resources.core.remaining, 4999);
        assert_eq!(resources.graphql.remaining, 4900);
        assert_eq!(resources.graphql.reset, 1700000100);
    }

    #[test]
    fn test_build_stats_query_quotes_names() {
        let repos = vec![
            RepoRef::new("tokio-rs", "tokio"),
            RepoRef::new("weird\"owner", "name"),
        ];
        let query = build_stats_query(&repos);

        assert!(query.contains(r#"r0: repository(owner: "tokio-rs", name: "tokio")"#));
        assert!(query.contains(r#"r1: repository(owner: "weird\"owner", name: "name")"#));
        assert!(query.contains("rateLimit { remaining resetAt cost }"));
        assert!(query.contains("committedDate"));
    }

    #[test]
    fn test_parse_stats_response() {
        let repos = vec![
            RepoRef::new("a", "one"),
            RepoRef::new("b", "gone"),
            RepoRef::new("c", "empty"),
        ];
        let data = json!({
            "r0": {
                "stargazerCount": 120,
                "defaultBranchRef": { "target": { "committedDate": "2024-02-02T10:00:00Z" } }
            },
            "r1": null,
            "r2": { "stargazerCount": 3, "defaultBranchRef": null },
            "rateLimit": { "remaining": 4990, "resetAt": "2024-02-02T11:00:00Z", "cost": 1 }
        });

        let batch = parse_stats_response(&repos, &data);

        assert_eq!(batch.stats.len(), 2);
        assert_eq!(batch.stats["a/one"].stars, 120);
        assert_eq!(
            batch.stats["a/one"].last_commit_at.as_deref(),
            Some("2024-02-02T10:00:00Z")
        );
        assert_eq!(batch.stats["c/empty"].last_commit_at, None);
        assert!(!batch.stats.contains_key("b/gone"));

        let rate = batch.rate_limit.unwrap();
        assert_eq!(rate.remaining, 4990);
        assert_eq!(rate.cost, Some(1));
    }

    #[test]
    fn test_parse_keeps_requested_casing() {
        let repos = vec![RepoRef::new("Owner", "Repo")];
        let data = json!({ "r0": { "stargazerCount": 1 } });

        let batch = parse_stats_response(&repos, &data);
        assert!(batch.stats.contains_key("Owner/Repo"));
        assert!(batch.rate_limit.is_none());
    }

    #[test]
    fn test_decode_contents() {
        let contents = ContentsResponse {
            kind: "file".to_string(),
            sha: "abc".to_string(),
            content: Some("IyBBd2Vz\nb21lCg==\n".to_string()),
            encoding: Some("base64".to_string()),
        };
        assert_eq!(decode_contents(&contents).unwrap(), "# Awesome\n");

        let other = ContentsResponse {
            encoding: Some("none".to_string()),
            ..contents
        };
        assert!(decode_contents(&other).is_err());
    }

    #[test]
    fn test_file_ref_display() {
        let file = GitHubFileRef {
            owner: "me".to_string(),
            repo: "list".to_string(),
            branch: Some("main".to_string()),
            path: "README.md".to_string(),
        };
        assert_eq!(file.to_string(), "me/list:README.md@main");
    }
}
