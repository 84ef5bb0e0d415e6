use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Last-known stats for one repository, as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub repo_key: String,
    pub stars: u64,
    pub last_commit_at: Option<String>,
    /// Unix seconds of the write, stamped by the store
    pub updated_at: i64,
}

/// SQLite-backed stat cache.
///
/// The connection sits behind a mutex so the store can be shared by
/// concurrently running batches; every statement is short and keyed.
pub struct StatStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl StatStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create cache directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open stat cache: {}", path.display()))?;

        // Another run may hold the file (cron overlap); wait instead of failing
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory stat cache")?;

        let store = Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        };
        store.init()?;
        Ok(store)
    }

    /// Get the cache file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("stat cache connection lock poisoned"))
    }

    fn init(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS stars_cache (
                repo TEXT PRIMARY KEY,
                stars INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            ",
        )?;

        // Migration: caches written by older versions only tracked stars
        let has_last_commit: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('stars_cache') WHERE name = 'last_commit_at'",
            [],
            |row| row.get(0),
        )?;
        if !has_last_commit {
            tracing::info!("adding last_commit_at column to stars_cache (one-time migration)");
            conn.execute("ALTER TABLE stars_cache ADD COLUMN last_commit_at TEXT", [])?;
        }

        Ok(())
    }

    /// Exact lookup. Staleness is the caller's decision.
    pub fn get(&self, repo_key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                "SELECT repo, stars, last_commit_at, updated_at FROM stars_cache WHERE repo = ?1",
                params![repo_key],
                |row| {
                    Ok(CacheEntry {
                        repo_key: row.get(0)?,
                        stars: row.get::<_, i64>(1)?.max(0) as u64,
                        last_commit_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to read cache entry for {}", repo_key))?;
        Ok(entry)
    }

    /// Upsert a full row, stamping `updated_at` with the current time
    pub fn set(&self, repo_key: &str, stars: u64, last_commit_at: Option<&str>) -> Result<()> {
        self.set_at(repo_key, stars, last_commit_at, Utc::now().timestamp())
    }

    pub(crate) fn set_at(
        &self,
        repo_key: &str,
        stars: u64,
        last_commit_at: Option<&str>,
        updated_at: i64,
    ) -> Result<()> {
        let stars = i64::try_from(stars).context("star count out of range")?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO stars_cache (repo, stars, last_commit_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo) DO UPDATE SET
                stars = excluded.stars,
                last_commit_at = excluded.last_commit_at,
                updated_at = excluded.updated_at",
            params![repo_key, stars, last_commit_at, updated_at],
        )
        .with_context(|| format!("Failed to write cache entry for {}", repo_key))?;
        Ok(())
    }

    /// Number of cached repositories
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM stars_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Timestamp of the least recently refreshed entry
    pub fn oldest_update(&self) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let oldest: Option<i64> =
            conn.query_row("SELECT MIN(updated_at) FROM stars_cache", [], |row| row.get(0))?;
        Ok(oldest)
    }

    /// Flush and release the underlying connection
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| anyhow!("stat cache connection lock poisoned"))?;
        conn.close()
            .map_err(|(_, e)| e)
            .context("Failed to close stat cache")
    }
}
