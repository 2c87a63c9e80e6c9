use std::{collections::BTreeMap, path::Path};

use crate::config::{ACTORS_LIST_FILE, RetryPolicy, Settings};
use crate::error::{Error, Result};
use crate::index::write_atomic;
use crate::provider::{ActorIdentity, Lookup, OscarCategory, RosterSource, with_retry};

/// Collect nominees across all acting categories, deduplicated by provider id
/// and ordered by name.
///
/// A category that cannot be fetched aborts the roster: a partial list would
/// replace a complete one on disk.
pub async fn fetch_roster<S>(source: &S, retry: &RetryPolicy) -> Result<Vec<ActorIdentity>>
where
    S: RosterSource + ?Sized,
{
    let mut by_id = BTreeMap::new();
    for category in OscarCategory::ALL {
        let nominees = match with_retry(retry, category.as_str(), || source.nominees(category)).await {
            Lookup::Found(nominees) => nominees,
            Lookup::NotFound => {
                tracing::warn!(category = category.as_str(), "no nominees returned");
                Vec::new()
            }
            Lookup::RateLimited(_) | Lookup::TransientError(_) => {
                return Err(Error::ProviderUnreachable(format!(
                    "could not list {} nominees",
                    category.as_str()
                )));
            }
        };
        tracing::info!(category = category.as_str(), nominees = nominees.len(), "fetched nominees");
        for actor in nominees {
            by_id.entry(actor.provider_id.clone()).or_insert(actor);
        }
    }

    let mut roster: Vec<ActorIdentity> = by_id.into_values().collect();
    roster.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.provider_id.cmp(&b.provider_id)));
    Ok(roster)
}

/// Plain `provider_id<TAB>name` lines; the file may be edited by hand.
pub fn read_roster(path: &Path) -> Result<Vec<ActorIdentity>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .from_path(path)?;
    let mut roster = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != 2 || record[0].trim().is_empty() {
            return Err(Error::MalformedRow {
                path: path.to_path_buf(),
                line: record.position().map(|p| p.line()).unwrap_or_default(),
                reason: "expected provider id and name".to_string(),
            });
        }
        roster.push(ActorIdentity {
            provider_id: record[0].trim().to_string(),
            name: record[1].trim().to_string(),
        });
    }
    Ok(roster)
}

pub fn write_roster(path: &Path, roster: &[ActorIdentity]) -> Result<()> {
    write_atomic(path, |out| {
        let mut w = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(out);
        for actor in roster {
            w.write_record([actor.provider_id.as_str(), actor.name.as_str()])?;
        }
        w.flush()?;
        Ok(())
    })
}

/// Fetch the roster and replace the roster file in the library directory.
pub async fn generate_actors_list<S>(settings: &Settings, source: &S) -> Result<Vec<ActorIdentity>>
where
    S: RosterSource + ?Sized,
{
    let roster = fetch_roster(source, &settings.retry).await?;
    let path = settings.path(ACTORS_LIST_FILE);
    write_roster(&path, &roster)?;
    tracing::info!(path = ?path, actors = roster.len(), "wrote actors list");
    Ok(roster)
}
