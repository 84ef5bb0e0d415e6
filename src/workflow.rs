//! End-to-end run for one list: fetch the source README, enrich, render,
//! then publish or write a dry-run file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::config::ResolvedListConfig;
use crate::db::StatStore;
use crate::fetch::{fetch_stats, RepoStatsSource};
use crate::formatting::{render_list, sort_items};
use crate::github::GitHubFileRef;
use crate::parser::{ParsedList, ParserRegistry};
use crate::repo::{parse_github_repo, RepoRef};

/// Where list markdown is read from and published to
#[async_trait]
pub trait ListHost: Send + Sync {
    async fn fetch_file(&self, file: &GitHubFileRef) -> Result<String>;
    async fn update_file(&self, file: &GitHubFileRef, content: &str, message: &str) -> Result<()>;
}

pub struct WorkflowOptions {
    /// Write to `output_dir` instead of updating the output repo
    pub dry_run: bool,
    pub output_dir: PathBuf,
}

#[derive(Debug)]
pub struct WorkflowResult {
    pub output: String,
    /// Set for dry runs
    pub output_path: Option<PathBuf>,
    pub item_count: usize,
    pub enriched_count: usize,
}

pub async fn run_workflow<H, S>(
    host: &H,
    source: &S,
    store: &StatStore,
    parsers: &ParserRegistry,
    list: &ResolvedListConfig,
    options: &WorkflowOptions,
) -> Result<WorkflowResult>
where
    H: ListHost + ?Sized,
    S: RepoStatsSource + ?Sized,
{
    info!(list = %list.id, source = %list.source, "Fetching source list");
    let markdown = host
        .fetch_file(&list.source)
        .await
        .with_context(|| format!("Failed to fetch source for {}", list.id))?;

    let parser = parsers.get(&list.parser)?;
    let mut parsed = parser.parse(&markdown, &list.parser_options);
    if parsed.title.is_none() {
        parsed.title = Some(list.name.clone().unwrap_or_else(|| list.id.clone()));
    }
    parsed.header = list.header.clone();
    parsed.toc = list.toc;

    let repos = collect_repos(&parsed);
    let stats = fetch_stats(source, store, &repos, &list.fetch).await?;

    let mut item_count = 0;
    let mut enriched_count = 0;
    for category in &mut parsed.categories {
        for item in &mut category.items {
            item_count += 1;
            let Some(repo) = parse_github_repo(&item.url) else {
                continue;
            };
            if let Some(found) = stats.get(&repo.key()) {
                item.stars = Some(found.stars);
                item.last_commit_at = found.last_commit_at.clone();
                enriched_count += 1;
            }
        }
        sort_items(&mut category.items, list.table.sort);
    }

    info!(
        list = %list.id,
        items = item_count,
        enriched = enriched_count,
        "Enriched list"
    );

    let output = render_list(&parsed, &list.table);

    let output_path = if options.dry_run {
        let path = write_dry_run(&options.output_dir, &list.id, &output)?;
        info!(path = %path.display(), "Dry run output written");
        Some(path)
    } else {
        let message = format!("chore: update {} stars", list.id);
        host.update_file(&list.output, &output, &message)
            .await
            .with_context(|| format!("Failed to publish {}", list.output))?;
        info!(output = %list.output, "Published list");
        None
    };

    Ok(WorkflowResult {
        output,
        output_path,
        item_count,
        enriched_count,
    })
}

/// GitHub repositories referenced by the list; non-GitHub links are skipped
fn collect_repos(list: &ParsedList) -> Vec<RepoRef> {
    list.categories
        .iter()
        .flat_map(|c| c.items.iter())
        .filter_map(|item| parse_github_repo(&item.url))
        .collect()
}

fn write_dry_run(dir: &Path, id: &str, output: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output dir: {}", dir.display()))?;
    let path = dir.join(format!("{}.md", id));
    std::fs::write(&path, output)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
