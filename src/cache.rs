use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use crate::error::Result;
use crate::journal::{Journal, OnCorruption};
use crate::provider::{Lookup, Metadata, MetadataLookup, MetadataResult};

/// Only definitive answers are cached; throttling and outages are not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CachedAnswer {
    Found(Metadata),
    NotFound,
}

impl From<CachedAnswer> for MetadataResult {
    fn from(answer: CachedAnswer) -> Self {
        match answer {
            CachedAnswer::Found(metadata) => Lookup::Found(metadata),
            CachedAnswer::NotFound => Lookup::NotFound,
        }
    }
}

pub fn cache_key(title: &str, year: u16) -> String {
    format!("{}\t{}", title, year)
}

/// Persistent (title, year) → metadata store. Entries never expire.
#[derive(Debug)]
pub struct LookupCache {
    journal: Mutex<Journal<CachedAnswer>>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LookupCache {
    pub fn open(path: &Path) -> Result<Self> {
        let journal = Journal::open(path, OnCorruption::Skip)?;
        tracing::debug!(path = ?path, entries = journal.len(), "opened lookup cache");
        Ok(Self::with_journal(journal))
    }

    pub fn in_memory() -> Self {
        Self::with_journal(Journal::in_memory())
    }

    fn with_journal(journal: Journal<CachedAnswer>) -> Self {
        Self {
            journal: Mutex::new(journal),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, title: &str, year: u16) -> Option<CachedAnswer> {
        let journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        journal.get(&cache_key(title, year)).cloned()
    }

    pub fn contains(&self, title: &str, year: u16) -> bool {
        self.get(title, year).is_some()
    }

    pub fn put(&self, title: &str, year: u16, answer: CachedAnswer) -> Result<()> {
        let mut journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        journal.put(cache_key(title, year), answer)
    }

    pub fn len(&self) -> usize {
        self.journal.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock guarding a single key, so concurrent workers never fetch the same film twice.
    fn lease(&self, key: String) -> KeyLease<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let lock = in_flight.entry(key.clone()).or_default().clone();
        KeyLease {
            cache: self,
            key,
            lock,
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Holds a key's lock; the last holder removes the key from the in-flight map.
struct KeyLease<'a> {
    cache: &'a LookupCache,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.cache.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        // One reference is ours and one is the map's.
        if Arc::strong_count(&self.lock) == 2 {
            in_flight.remove(&self.key);
        }
    }
}

/// A [`MetadataLookup`] that answers from the cache before calling `inner`.
pub struct CachedLookup<L> {
    inner: L,
    cache: Arc<LookupCache>,
}

impl<L: MetadataLookup> CachedLookup<L> {
    pub fn new(inner: L, cache: Arc<LookupCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &LookupCache {
        &self.cache
    }
}

#[async_trait]
impl<L: MetadataLookup> MetadataLookup for CachedLookup<L> {
    async fn lookup(&self, title: &str, year: u16) -> MetadataResult {
        let lease = self.cache.lease(cache_key(title, year));
        let _guard = lease.lock.lock().await;

        if let Some(answer) = self.cache.get(title, year) {
            tracing::debug!(title, year, "lookup cache hit");
            return answer.into();
        }

        let result = self.inner.lookup(title, year).await;
        let answer = match &result {
            Lookup::Found(metadata) => Some(CachedAnswer::Found(metadata.clone())),
            Lookup::NotFound => Some(CachedAnswer::NotFound),
            _ => None,
        };
        if let Some(answer) = answer
            && let Err(err) = self.cache.put(title, year, answer)
        {
            tracing::warn!(title, year, "failed to persist lookup cache entry: {}", err);
        }
        result
    }

    async fn check(&self) -> Result<()> {
        self.inner.check().await
    }

    fn is_cached(&self, title: &str, year: u16) -> bool {
        self.cache.contains(title, year)
    }
}
