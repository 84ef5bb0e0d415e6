use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::fetch::FetchOptions;
use crate::formatting::TableConfig;
use crate::github::GitHubFileRef;
use crate::parser::ParserOptions;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/list.yml";
const DEFAULT_BRANCH: &str = "main";
const DEFAULT_PATH: &str = "README.md";
const DEFAULT_REPO_SUFFIX: &str = "-with-stars";
const DEFAULT_PARSER: &str = "default";

pub struct Config;

impl Config {
    /// Get the data directory path
    fn data_dir() -> Result<PathBuf> {
        ProjectDirs::from("dev", "awesome-stars", "awesome-stars")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .context("Could not determine data directory")
    }

    /// Default location of the stat cache
    pub fn default_cache_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("stars.db"))
    }

    /// Get GitHub token from environment or gh CLI config
    pub fn github_token() -> Option<String> {
        for var in ["GITHUB_TOKEN", "GH_TOKEN"] {
            if let Ok(token) = std::env::var(var) {
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }

        // Try to get from gh CLI config
        if let Ok(output) = std::process::Command::new("gh")
            .args(["auth", "token"])
            .output()
        {
            if output.status.success() {
                let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }

        None
    }
}

// === YAML list configuration ===

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RepoLocation {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutputDefaults {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub path: Option<String>,
    pub repo_suffix: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

/// Pipeline knobs; every field falls back to the defaults block, then to
/// built-in values
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FetchConfig {
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub max_retry_delay_ms: Option<u64>,
    pub log_rate_limit: Option<bool>,
}

impl FetchConfig {
    fn overlay(&self, over: &FetchConfig) -> FetchConfig {
        FetchConfig {
            batch_size: over.batch_size.or(self.batch_size),
            concurrency: over.concurrency.or(self.concurrency),
            retries: over.retries.or(self.retries),
            retry_delay_ms: over.retry_delay_ms.or(self.retry_delay_ms),
            max_retry_delay_ms: over.max_retry_delay_ms.or(self.max_retry_delay_ms),
            log_rate_limit: over.log_rate_limit.or(self.log_rate_limit),
        }
    }

    fn into_options(self, ttl_seconds: u64) -> FetchOptions {
        let base = FetchOptions::default();
        let retry = RetryPolicy {
            retries: self.retries.unwrap_or(base.retry.retries),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(base.retry.retry_delay_ms),
            max_retry_delay_ms: self.max_retry_delay_ms.unwrap_or(base.retry.max_retry_delay_ms),
        };
        FetchOptions {
            ttl_seconds,
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            retry,
            log_rate_limit: self.log_rate_limit.unwrap_or(base.log_rate_limit),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DefaultsConfig {
    pub source: Option<RepoLocation>,
    pub output: Option<OutputDefaults>,
    pub parser: Option<String>,
    pub parser_options: Option<ParserOptions>,
    pub table: Option<TableConfig>,
    pub cache: Option<CacheConfig>,
    pub toc: Option<bool>,
    pub fetch: Option<FetchConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListConfig {
    pub id: String,
    pub name: Option<String>,
    pub header: Option<String>,
    pub toc: Option<bool>,
    pub source: RepoLocation,
    pub output: Option<RepoLocation>,
    pub parser: Option<String>,
    pub parser_options: Option<ParserOptions>,
    pub table: Option<TableConfig>,
    pub cache: Option<CacheConfig>,
    pub fetch: Option<FetchConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub version: u32,
    pub defaults: Option<DefaultsConfig>,
    pub list: ListConfig,
}

/// A list with every default applied and validated
#[derive(Debug, Clone)]
pub struct ResolvedListConfig {
    pub id: String,
    pub name: Option<String>,
    pub header: Option<String>,
    pub toc: bool,
    pub source: GitHubFileRef,
    pub output: GitHubFileRef,
    pub parser: String,
    pub parser_options: ParserOptions,
    pub table: TableConfig,
    pub fetch: FetchOptions,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub version: u32,
    pub list: ResolvedListConfig,
}

/// Resolve the config path, falling back to `config/list.yml`
pub fn resolve_config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn load_config(path: &Path) -> Result<ResolvedConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("Invalid config: {}", path.display()))
}

pub fn parse_config(yaml: &str) -> Result<ResolvedConfig> {
    let raw: RawConfig = serde_yaml::from_str(yaml).context("Failed to parse YAML")?;
    resolve(raw)
}

fn resolve(raw: RawConfig) -> Result<ResolvedConfig> {
    if raw.version == 0 {
        return Err(ConfigError::invalid("version", "must be at least 1").into());
    }

    let defaults = raw.defaults.unwrap_or_default();
    let list = raw.list;
    require_non_empty("list.id", Some(&list.id))?;

    let default_source = defaults.source.unwrap_or_default();
    let source_owner = list.source.owner.clone().or(default_source.owner);
    let source_repo = list.source.repo.clone().or(default_source.repo);
    require_non_empty("list.source.owner", source_owner.as_ref())?;
    require_non_empty("list.source.repo", source_repo.as_ref())?;
    let source_repo = source_repo.unwrap_or_default();

    let source = GitHubFileRef {
        owner: source_owner.unwrap_or_default(),
        repo: source_repo.clone(),
        branch: Some(
            list.source
                .branch
                .clone()
                .or(default_source.branch)
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        ),
        path: list
            .source
            .path
            .clone()
            .or(default_source.path)
            .unwrap_or_else(|| DEFAULT_PATH.to_string()),
    };

    let default_output = defaults.output.unwrap_or_default();
    let list_output = list.output.unwrap_or_default();
    let output_owner = list_output.owner.or(default_output.owner).ok_or_else(|| {
        ConfigError::invalid(
            "output.owner",
            format!(
                "missing for list {}; set defaults.output.owner or list.output.owner",
                list.id
            ),
        )
    })?;
    require_non_empty("output.owner", Some(&output_owner))?;
    let suffix = default_output
        .repo_suffix
        .unwrap_or_else(|| DEFAULT_REPO_SUFFIX.to_string());
    let output = GitHubFileRef {
        owner: output_owner,
        repo: list_output
            .repo
            .or(default_output.repo)
            .unwrap_or_else(|| format!("{}{}", source_repo, suffix)),
        branch: Some(
            list_output
                .branch
                .or(default_output.branch)
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        ),
        path: list_output
            .path
            .or(default_output.path)
            .unwrap_or_else(|| DEFAULT_PATH.to_string()),
    };

    let parser_options = overlay_parser_options(
        &overlay_parser_options(
            &ParserOptions {
                heading_depths: Some(vec![2, 3]),
                ignore_headings: None,
            },
            defaults.parser_options.as_ref(),
        ),
        list.parser_options.as_ref(),
    );
    if let Some(depths) = &parser_options.heading_depths {
        if let Some(bad) = depths.iter().find(|d| !(1..=6).contains(*d)) {
            return Err(ConfigError::invalid(
                "parserOptions.headingDepths",
                format!("{} is not a heading level (1-6)", bad),
            )
            .into());
        }
    }

    let table = list.table.or(defaults.table).unwrap_or_default();
    if table.columns.is_empty() {
        return Err(ConfigError::invalid("table.columns", "at least one column is required").into());
    }

    let ttl_seconds = list
        .cache
        .or(defaults.cache)
        .map(|c| c.ttl_seconds)
        .unwrap_or(FetchOptions::default().ttl_seconds);
    let fetch = defaults
        .fetch
        .unwrap_or_default()
        .overlay(&list.fetch.unwrap_or_default())
        .into_options(ttl_seconds);
    fetch.validate()?;

    let parser = list
        .parser
        .or(defaults.parser)
        .unwrap_or_else(|| DEFAULT_PARSER.to_string());
    require_non_empty("parser", Some(&parser))?;

    Ok(ResolvedConfig {
        version: raw.version,
        list: ResolvedListConfig {
            id: list.id,
            name: list.name,
            header: list.header,
            toc: list.toc.or(defaults.toc).unwrap_or(false),
            source,
            output,
            parser,
            parser_options,
            table,
            fetch,
        },
    })
}

/// Field-wise override, each present field wins
fn overlay_parser_options(base: &ParserOptions, over: Option<&ParserOptions>) -> ParserOptions {
    match over {
        None => base.clone(),
        Some(over) => ParserOptions {
            heading_depths: over.heading_depths.clone().or_else(|| base.heading_depths.clone()),
            ignore_headings: over
                .ignore_headings
                .clone()
                .or_else(|| base.ignore_headings.clone()),
        },
    }
}

fn require_non_empty(field: &str, value: Option<&String>) -> Result<(), ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::invalid(field, "must be a non-empty string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatting::TableColumn;

    const MINIMAL: &str = r#"
version: 1
defaults:
  output:
    owner: me
list:
  id: awesome-rust
  source:
    owner: rust-unofficial
    repo: awesome-rust
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        let list = config.list;

        assert_eq!(list.id, "awesome-rust");
        assert_eq!(list.source.owner, "rust-unofficial");
        assert_eq!(list.source.branch.as_deref(), Some("main"));
        assert_eq!(list.source.path, "README.md");
        assert_eq!(list.output.owner, "me");
        assert_eq!(list.output.repo, "awesome-rust-with-stars");
        assert_eq!(list.parser, "default");
        assert_eq!(list.parser_options.heading_depths, Some(vec![2, 3]));
        assert_eq!(list.table, TableConfig::default());
        assert!(!list.toc);
        assert_eq!(list.fetch, FetchOptions::default());
    }

    #[test]
    fn test_full_config_overrides() {
        let yaml = r#"
version: 1
defaults:
  source:
    branch: master
  output:
    owner: me
    repoSuffix: -starred
  parser: awesome-zig
  parserOptions:
    headingDepths: [2]
  cache:
    ttlSeconds: 600
  toc: true
  fetch:
    batchSize: 50
    retries: 4
list:
  id: zig
  name: Awesome Zig
  source:
    owner: C-BJ
    repo: awesome-zig
    path: docs/README.md
  output:
    branch: gh-pages
  parserOptions:
    ignoreHeadings: [Contents]
  table:
    columns: [stars, name, last_commit]
  cache:
    ttlSeconds: 0
  fetch:
    concurrency: 1
    logRateLimit: false
"#;
        let list = parse_config(yaml).unwrap().list;

        assert_eq!(list.name.as_deref(), Some("Awesome Zig"));
        assert_eq!(list.source.branch.as_deref(), Some("master"));
        assert_eq!(list.source.path, "docs/README.md");
        assert_eq!(list.output.repo, "awesome-zig-starred");
        assert_eq!(list.output.branch.as_deref(), Some("gh-pages"));
        assert_eq!(list.parser, "awesome-zig");
        assert_eq!(list.parser_options.heading_depths, Some(vec![2]));
        assert_eq!(
            list.parser_options.ignore_headings,
            Some(vec!["Contents".to_string()])
        );
        assert_eq!(
            list.table.columns,
            vec![TableColumn::Stars, TableColumn::Name, TableColumn::LastCommit]
        );
        assert!(list.toc);
        assert_eq!(list.fetch.ttl_seconds, 0);
        assert_eq!(list.fetch.batch_size, 50);
        assert_eq!(list.fetch.concurrency, 1);
        assert_eq!(list.fetch.retry.retries, 4);
        assert!(!list.fetch.log_rate_limit);
    }

    #[test]
    fn test_missing_output_owner() {
        let yaml = r#"
version: 1
list:
  id: x
  source: { owner: a, repo: b }
"#;
        let err = parse_config(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("output.owner"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            "version: 0\nlist: { id: x, source: { owner: a, repo: b }, output: { owner: c } }",
            "version: 1\nlist: { id: '', source: { owner: a, repo: b }, output: { owner: c } }",
            "version: 1\nlist: { id: x, source: { owner: a }, output: { owner: c } }",
            "version: 1\nlist: { id: x, source: { owner: a, repo: b }, output: { owner: c }, parserOptions: { headingDepths: [7] } }",
            "version: 1\nlist: { id: x, source: { owner: a, repo: b }, output: { owner: c }, fetch: { concurrency: 0 } }",
            "version: 1\nlist: { id: x, source: { owner: a, repo: b }, output: { owner: c }, fetch: { batchSize: 0 } }",
            "version: 1\nlist: { id: x, source: { owner: a, repo: b }, output: { owner: c }, fetch: { retryDelayMs: 100, maxRetryDelayMs: 10 } }",
            "version: 1\nlist: { id: x, source: { owner: a, repo: b }, output: { owner: c }, table: { columns: [forks] } }",
            "version: 1\nlist: { id: x, source: { owner: a, repo: b }, output: { owner: c }, unknown: true }",
        ];
        for yaml in cases {
            assert!(parse_config(yaml).is_err(), "accepted: {}", yaml);
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.yml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.version, 1);

        let missing = load_config(&dir.path().join("nope.yml")).unwrap_err();
        assert!(format!("{:#}", missing).contains("Failed to read config"));
    }

    #[test]
    fn test_resolve_config_path() {
        assert_eq!(resolve_config_path(None), PathBuf::from("config/list.yml"));
        assert_eq!(
            resolve_config_path(Some(Path::new("lists/zig.yml"))),
            PathBuf::from("lists/zig.yml")
        );
    }
}
