//! Stats enrichment: cache lookup, batched fetch with retry, stale fallback.
//!
//! [`fetch_stats`] turns a list of repository references (possibly with
//! duplicates) into a map of `owner/name` → [`RepoStats`]. Fresh cache rows
//! short-circuit the remote call, the rest are fetched in bounded-concurrency
//! batches, and a batch that keeps failing degrades to whatever the cache
//! still has for its repositories. Keys with neither a fetch result nor a
//! cache row are left out of the map.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;

use crate::db::StatStore;
use crate::error::ConfigError;
use crate::limiter::Limiter;
use crate::repo::{RateLimitInfo, RepoRef, RepoStats};
use crate::retry::{fetch_with_retry, RetryPolicy};

/// Result of one remote batch call
#[derive(Debug, Default, Clone)]
pub struct BatchStats {
    /// Stats keyed by `owner/name`; repositories the remote could not
    /// resolve are simply absent
    pub stats: HashMap<String, RepoStats>,
    pub rate_limit: Option<RateLimitInfo>,
}

/// Remote source of repository statistics.
///
/// An `Err` means the whole batch failed and may be retried.
#[async_trait]
pub trait RepoStatsSource: Send + Sync {
    async fn fetch_repo_stats_batch(&self, repos: &[RepoRef]) -> Result<BatchStats>;
}

/// Knobs for one enrichment call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Max cache age to skip fetching; 0 always fetches
    pub ttl_seconds: u64,
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub log_rate_limit: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            ttl_seconds: 60 * 60,
            batch_size: 25,
            concurrency: 3,
            retry: RetryPolicy::default(),
            log_rate_limit: true,
        }
    }
}

impl FetchOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        self.retry.validate()
    }
}

/// Fetch stats for `repos`, using and refreshing `store`.
///
/// Only configuration errors are returned. Batch failures are logged and
/// fall back to cached rows regardless of their age.
pub async fn fetch_stats<S>(
    source: &S,
    store: &StatStore,
    repos: &[RepoRef],
    options: &FetchOptions,
) -> Result<HashMap<String, RepoStats>, ConfigError>
where
    S: RepoStatsSource + ?Sized,
{
    options.validate()?;
    let limiter = Limiter::new(options.concurrency)?;

    let unique = dedup_repos(repos);
    let mut results = HashMap::with_capacity(unique.len());
    let mut to_fetch = Vec::new();
    let now = Utc::now().timestamp();
    let ttl = i64::try_from(options.ttl_seconds).unwrap_or(i64::MAX);

    for repo in unique {
        if options.ttl_seconds > 0 {
            if let Some(entry) = lookup(store, &repo.key()) {
                let age = now.saturating_sub(entry.updated_at);
                if age <= ttl {
                    results.insert(repo.key(), stats_from_entry(entry));
                    continue;
                }
            }
        }
        to_fetch.push(repo);
    }

    tracing::info!(
        cached = results.len(),
        to_fetch = to_fetch.len(),
        "resolved stats cache"
    );

    if to_fetch.is_empty() {
        return Ok(results);
    }

    let batches: Vec<&[RepoRef]> = to_fetch.chunks(options.batch_size).collect();
    let total_batches = batches.len();
    tracing::debug!(
        batches = total_batches,
        concurrency = limiter.limit(),
        "fetching stats"
    );

    let tasks = batches.into_iter().enumerate().map(|(idx, batch)| {
        limiter.run(process_batch(source, store, batch, idx, total_batches, options))
    });

    for batch_results in join_all(tasks).await {
        results.extend(batch_results);
    }

    Ok(results)
}

/// Unique refs by key, in first-seen order
fn dedup_repos(repos: &[RepoRef]) -> Vec<RepoRef> {
    let mut seen = HashSet::with_capacity(repos.len());
    repos
        .iter()
        .filter(|repo| seen.insert(repo.key()))
        .cloned()
        .collect()
}

fn lookup(store: &StatStore, key: &str) -> Option<crate::db::CacheEntry> {
    match store.get(key) {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(repo = key, "stat cache read failed: {:#}", e);
            None
        }
    }
}

fn stats_from_entry(entry: crate::db::CacheEntry) -> RepoStats {
    RepoStats {
        stars: entry.stars,
        last_commit_at: entry.last_commit_at,
    }
}

/// Fetch one batch and return the stats it resolved, from the remote or the
/// cache. Never fails: the batch's keys are disjoint from every other batch.
async fn process_batch<S>(
    source: &S,
    store: &StatStore,
    batch: &[RepoRef],
    idx: usize,
    total_batches: usize,
    options: &FetchOptions,
) -> Vec<(String, RepoStats)>
where
    S: RepoStatsSource + ?Sized,
{
    let mut resolved = Vec::with_capacity(batch.len());

    match fetch_with_retry(&options.retry, || source.fetch_repo_stats_batch(batch)).await {
        Ok(response) => {
            let requested: HashSet<String> = batch.iter().map(RepoRef::key).collect();
            for (key, stats) in response.stats {
                if !requested.contains(&key) {
                    tracing::debug!(repo = %key, "ignoring stats for a repository not in the batch");
                    continue;
                }
                if let Err(e) = store.set(&key, stats.stars, stats.last_commit_at.as_deref()) {
                    tracing::warn!(repo = %key, "failed to persist stats: {:#}", e);
                }
                resolved.push((key, stats));
            }

            if options.log_rate_limit {
                if let Some(rate) = &response.rate_limit {
                    tracing::info!(
                        remaining = rate.remaining,
                        reset_at = %rate.reset_at,
                        cost = rate.cost,
                        "graphql rate limit"
                    );
                }
            }

            tracing::debug!(
                batch = idx + 1,
                total = total_batches,
                requested = batch.len(),
                resolved = resolved.len(),
                "batch done"
            );
        }
        Err(e) => {
            tracing::warn!(
                batch = idx + 1,
                total = total_batches,
                repos = batch.len(),
                "failed to fetch batch, falling back to cache: {:#}",
                e
            );
        }
    }

    // Anything the fetch did not resolve (failed batch, or a repo missing from
    // the response) gets its last known value, however old
    let fetched: HashSet<String> = resolved.iter().map(|(key, _)| key.clone()).collect();
    for repo in batch {
        let key = repo.key();
        if fetched.contains(&key) {
            continue;
        }
        if let Some(entry) = lookup(store, &key) {
            resolved.push((key, stats_from_entry(entry)));
        }
    }

    resolved
}
