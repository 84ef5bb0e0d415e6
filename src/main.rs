mod config;
mod db;
mod error;
mod fetch;
mod formatting;
mod github;
mod limiter;
mod parser;
mod repo;
mod retry;
mod workflow;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{load_config, resolve_config_path, Config};
use db::StatStore;
use github::GitHubClient;
use parser::ParserRegistry;
use workflow::{run_workflow, WorkflowOptions};

#[derive(Parser)]
#[command(name = "awesome-stars")]
#[command(about = "Re-render awesome lists with GitHub star counts")]
#[command(after_help = "\x1b[36mExamples:\x1b[0m
  awesome-stars run                           # Publish using config/list.yml
  awesome-stars run --dry-run -c lists/zig.yml  # Write out/<id>.md instead
  awesome-stars cache-stats                   # Inspect the local star cache")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Star cache location (default: platform data dir)
    #[arg(long, global = true, env = "STAR_CACHE_PATH")]
    cache_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich a list with stars and publish it
    Run {
        /// List config file (default: config/list.yml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the rendered list locally instead of updating the output repo
        #[arg(long, env = "DRY_RUN", value_parser = parse_env_flag)]
        dry_run: bool,

        /// Directory for dry-run output
        #[arg(short, long, env = "DRY_RUN_DIR", default_value = "out")]
        output_dir: PathBuf,
    },
    /// Show star cache statistics
    CacheStats,
    /// Check GitHub API rate limit status
    RateLimit,
}

/// `1` or `true` in any case is set; any other value is unset
fn parse_env_flag(value: &str) -> Result<bool, String> {
    let value = value.trim();
    Ok(value == "1" || value.eq_ignore_ascii_case("true"))
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("awesome_stars=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Some(Commands::Run {
            config,
            dry_run,
            output_dir,
        }) => run(config, dry_run, output_dir, cli.cache_path).await,
        Some(Commands::CacheStats) => show_cache_stats(cli.cache_path),
        Some(Commands::RateLimit) => {
            let client = GitHubClient::new(require_token()?)?;
            check_rate_limit(&client).await
        }
        None => {
            // Show help if no command
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

fn require_token() -> Result<String> {
    Config::github_token()
        .context("No GitHub token found. Set GITHUB_TOKEN or run: gh auth login")
}

fn open_store(cache_path: Option<PathBuf>) -> Result<StatStore> {
    let path = match cache_path {
        Some(path) => path,
        None => Config::default_cache_path()?,
    };
    StatStore::open(&path)
}

async fn run(
    config: Option<PathBuf>,
    dry_run: bool,
    output_dir: PathBuf,
    cache_path: Option<PathBuf>,
) -> Result<()> {
    let config_path = resolve_config_path(config.as_deref());
    let config = load_config(&config_path)?;
    tracing::info!(
        path = %config_path.display(),
        version = config.version,
        "Loaded list config"
    );
    let list = config.list;

    let client = GitHubClient::new(require_token()?)?;
    let store = open_store(cache_path)?;
    let parsers = ParserRegistry::with_builtin();
    let options = WorkflowOptions {
        dry_run,
        output_dir,
    };

    let result = run_workflow(&client, &client, &store, &parsers, &list, &options).await;
    store.close()?;
    let result = result?;

    match result.output_path {
        Some(path) => eprintln!(
            "\x1b[32mok\x1b[0m {} ({}/{} enriched, {} bytes) written to {}",
            list.id,
            result.enriched_count,
            result.item_count,
            result.output.len(),
            path.display()
        ),
        None => eprintln!(
            "\x1b[32mok\x1b[0m {} ({}/{} enriched, {} bytes) published to {}",
            list.id,
            result.enriched_count,
            result.item_count,
            result.output.len(),
            list.output
        ),
    }

    Ok(())
}

/// Show star cache statistics
fn show_cache_stats(cache_path: Option<PathBuf>) -> Result<()> {
    let store = open_store(cache_path)?;
    let total = store.count()?;
    let oldest = store
        .oldest_update()?
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());

    eprintln!("\x1b[36mStar Cache\x1b[0m\n");
    eprintln!("  \x1b[90mPath:\x1b[0m          {}", store.path().display());
    eprintln!("  \x1b[90mRepositories:\x1b[0m  {}", total);
    eprintln!("  \x1b[90mOldest entry:\x1b[0m  {}", oldest);

    store.close()
}

/// Check rate limit
async fn check_rate_limit(client: &GitHubClient) -> Result<()> {
    let resources = client.rate_limit().await?;

    eprintln!("\x1b[36mGitHub API Rate Limit\x1b[0m\n");
    for (name, rate) in [("REST", &resources.core), ("GraphQL", &resources.graphql)] {
        let reset_time = chrono::DateTime::from_timestamp(rate.reset as i64, 0)
            .map(|dt| dt.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        eprintln!(
            "  \x1b[90m{:<8}\x1b[0m {}/{} remaining, resets at {}",
            name, rate.remaining, rate.limit, reset_time
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_flag() {
        for set in ["1", "true", "TRUE", "True", " true "] {
            assert_eq!(parse_env_flag(set), Ok(true), "{:?}", set);
        }
        for unset in ["0", "false", "FALSE", "", "yes", "2"] {
            assert_eq!(parse_env_flag(unset), Ok(false), "{:?}", unset);
        }
    }

    #[test]
    fn test_dry_run_flag_and_env() {
        let cli = Cli::try_parse_from(["awesome-stars", "run", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run { dry_run: true, .. })));

        // Only this test touches DRY_RUN
        std::env::set_var("DRY_RUN", "1");
        let from_one = Cli::try_parse_from(["awesome-stars", "run"]);
        std::env::set_var("DRY_RUN", "0");
        let from_zero = Cli::try_parse_from(["awesome-stars", "run"]);
        std::env::remove_var("DRY_RUN");
        let unset = Cli::try_parse_from(["awesome-stars", "run"]).unwrap();

        assert!(matches!(from_one.unwrap().command, Some(Commands::Run { dry_run: true, .. })));
        assert!(matches!(from_zero.unwrap().command, Some(Commands::Run { dry_run: false, .. })));
        assert!(matches!(unset.command, Some(Commands::Run { dry_run: false, .. })));
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
