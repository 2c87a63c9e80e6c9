use futures::{StreamExt, stream};
use std::{collections::HashMap, fs, path::PathBuf};

use crate::config::{BASE_INDEX_FILE, FAULTY_FILMS_FILE, FILMS_INDEX_FILE, RetryPolicy, Settings};
use crate::error::{Error, Result};
use crate::index::{
    BaseEntry, FilmRecord, read_base_index, read_films_index, write_base_index, write_films_index,
};
use crate::provider::{Lookup, MetadataLookup, with_retry};
use crate::report::{FailureKind, FailureReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichMode {
    /// Keep rows of the existing films index that still match the base index.
    Extend,
    /// Look every film up again (the lookup cache still applies).
    Overwrite,
}

#[derive(Debug, Default)]
pub struct EnrichOutcome {
    /// Enriched rows, in base index order.
    pub records: Vec<FilmRecord>,
    /// Base rows that could not be enriched.
    pub failed: Vec<BaseEntry>,
    pub reused: usize,
    pub looked_up: usize,
    pub report: FailureReport,
}

/// Resolve every base entry through `lookup`, at most `workers` at a time.
///
/// Rows in `previous` whose title, year and path all match a base entry are
/// reused as-is. Films the provider cannot resolve are reported and left out;
/// nothing is ever filled in that the lookup did not return.
pub async fn enrich<L>(
    base: &[BaseEntry],
    previous: &[FilmRecord],
    lookup: &L,
    workers: usize,
    retry: &RetryPolicy,
) -> Result<EnrichOutcome>
where
    L: MetadataLookup + ?Sized,
{
    let previous: HashMap<BaseEntry, &FilmRecord> =
        previous.iter().map(|record| (record.base(), record)).collect();

    let mut slots: Vec<Option<FilmRecord>> = Vec::with_capacity(base.len());
    let mut pending: Vec<(usize, &BaseEntry)> = Vec::new();
    for (position, entry) in base.iter().enumerate() {
        match previous.get(entry) {
            Some(record) => slots.push(Some((*record).clone())),
            None => {
                slots.push(None);
                pending.push((position, entry));
            }
        }
    }

    let mut outcome = EnrichOutcome {
        reused: base.len() - pending.len(),
        looked_up: pending.len(),
        ..EnrichOutcome::default()
    };

    let needs_network = pending
        .iter()
        .any(|(_, entry)| !lookup.is_cached(&entry.title, entry.year));
    if needs_network {
        lookup.check().await?;
    }

    let total = pending.len();
    let results: Vec<_> = stream::iter(pending.into_iter().enumerate())
        .map(|(n, (position, entry))| async move {
            let label = entry.label();
            tracing::info!(film = %label, "looking up metadata ({}/{})", n + 1, total);
            let result = with_retry(retry, &label, || lookup.lookup(&entry.title, entry.year)).await;
            (position, entry, result)
        })
        .buffered(workers.max(1))
        .collect()
        .await;

    for (position, entry, result) in results {
        match result {
            Lookup::Found(metadata) => {
                slots[position] = Some(FilmRecord {
                    title: entry.title.clone(),
                    year: entry.year,
                    directors: metadata.directors,
                    genres: metadata.genres,
                    actors: metadata.actors,
                    filepath: entry.filepath.clone(),
                });
            }
            Lookup::NotFound => {
                outcome.report.push(
                    FailureKind::LookupMiss,
                    entry.label(),
                    format!("no metadata found ({})", entry.filepath.display()),
                );
                outcome.failed.push(entry.clone());
            }
            Lookup::RateLimited(delay) => {
                outcome.report.push(
                    FailureKind::Transient,
                    entry.label(),
                    format!("rate limited (retry after {}s)", delay.as_secs()),
                );
                outcome.failed.push(entry.clone());
            }
            Lookup::TransientError(err) => {
                outcome
                    .report
                    .push(FailureKind::Transient, entry.label(), err);
                outcome.failed.push(entry.clone());
            }
        }
    }

    outcome.records = slots.into_iter().flatten().collect();
    Ok(outcome)
}

/// Read `base_index.tsv`, enrich it and write `films_index.tsv` plus the faulty-films list.
pub async fn generate_films_index<L>(
    settings: &Settings,
    lookup: &L,
    mode: EnrichMode,
) -> Result<EnrichOutcome>
where
    L: MetadataLookup + ?Sized,
{
    let base_path = settings.path(BASE_INDEX_FILE);
    if !base_path.exists() {
        return Err(Error::MissingInput {
            path: base_path,
            command: "generate-base-index",
        });
    }
    let base = read_base_index(&base_path)?;

    let films_path = settings.path(FILMS_INDEX_FILE);
    let previous = match mode {
        EnrichMode::Extend if films_path.exists() => {
            let previous = read_films_index(&films_path)?;
            tracing::info!(rows = previous.len(), "extending existing films index");
            previous
        }
        _ => Vec::new(),
    };

    let outcome = enrich(&base, &previous, lookup, settings.workers, &settings.retry).await?;
    write_films_index(&films_path, &outcome.records)?;

    let faulty_path: PathBuf = settings.path(FAULTY_FILMS_FILE);
    if outcome.failed.is_empty() {
        if faulty_path.exists() {
            fs::remove_file(&faulty_path)?;
        }
    } else {
        write_base_index(&faulty_path, &outcome.failed)?;
    }

    tracing::info!(
        films = outcome.records.len(),
        reused = outcome.reused,
        failed = outcome.failed.len(),
        "films index written"
    );
    Ok(outcome)
}
