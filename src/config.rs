use std::{
    path::{Path, PathBuf},
    time::Duration,
};

pub const BASE_INDEX_FILE: &str = "base_index.tsv";
pub const FILMS_INDEX_FILE: &str = "films_index.tsv";
pub const FAULTY_FILMS_FILE: &str = "faulty_films_base_index.tsv";
pub const LOOKUP_CACHE_FILE: &str = "lookup_cache.jsonl";
pub const ACTORS_LIST_FILE: &str = "actors_list.tsv";
pub const CHECKPOINT_FILE: &str = "filmography_checkpoint.jsonl";
pub const FILMOGRAPHY_FILE: &str = "actors_filmography.json";

/// Matches `(1997) Titanic [HD]` and `[2009] Up`.
pub const DEFAULT_PATTERN: &str =
    r"^[(\[](?P<year>\d{4})[)\]]\s+(?P<title>[^\[]+?)\s*(?:\[(?P<tag>[^\]]*)\].*)?$";

/// Retry budget for rate-limited or failing provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given zero-based attempt, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run-wide settings shared by every stage.
#[derive(Debug, Clone)]
pub struct Settings {
    pub libdir: PathBuf,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub top_billed: usize,
}

impl Settings {
    pub fn new(libdir: impl Into<PathBuf>) -> Self {
        Self {
            libdir: libdir.into(),
            workers: 4,
            retry: RetryPolicy::default(),
            top_billed: 4,
        }
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.libdir.join(file_name)
    }

    pub fn libdir(&self) -> &Path {
        &self.libdir
    }
}
