use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use crate::checkpoint::{CheckpointStore, FetchState};
use crate::config::{ACTORS_LIST_FILE, CHECKPOINT_FILE, FILMOGRAPHY_FILE, RetryPolicy, Settings};
use crate::error::{Error, Result};
use crate::index::write_json;
use crate::provider::{ActorIdentity, FilmCredit, FilmographySource, Lookup, with_retry};
use crate::report::{FailureKind, FailureReport};
use crate::roster::read_roster;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorFilms {
    pub name: String,
    pub films: Vec<FilmCredit>,
}

/// Films per actor, keyed by provider id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filmography {
    actors: BTreeMap<String, ActorFilms>,
}

impl Filmography {
    pub fn insert(&mut self, actor: &ActorIdentity, films: Vec<FilmCredit>) {
        self.actors.insert(
            actor.provider_id.clone(),
            ActorFilms {
                name: actor.name.clone(),
                films,
            },
        );
    }

    pub fn get(&self, provider_id: &str) -> Option<&ActorFilms> {
        self.actors.get(provider_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ActorFilms)> {
        self.actors.iter()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Keep credits rated at least `min_rating`, best first.
    pub fn rated_at_least(&self, min_rating: f32) -> Filmography {
        let actors = self
            .actors
            .iter()
            .map(|(id, entry)| {
                let mut films: Vec<FilmCredit> = entry
                    .films
                    .iter()
                    .filter(|film| film.rating >= min_rating)
                    .cloned()
                    .collect();
                films.sort_by(|a, b| {
                    b.rating
                        .total_cmp(&a.rating)
                        .then_with(|| a.year.cmp(&b.year))
                        .then_with(|| a.title.cmp(&b.title))
                });
                (
                    id.clone(),
                    ActorFilms {
                        name: entry.name.clone(),
                        films,
                    },
                )
            })
            .collect();
        Filmography { actors }
    }
}

pub fn read_filmography(path: &Path) -> Result<Filmography> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Every roster actor that is done, including those finished by earlier runs.
    pub filmography: Filmography,
    pub fetched: usize,
    pub skipped: usize,
    pub report: FailureReport,
}

fn subject(actor: &ActorIdentity) -> String {
    format!("{} ({})", actor.name, actor.provider_id)
}

/// Fetch filmographies for the roster actors not yet done in `store`.
///
/// Each actor is marked in progress before the request and done or failed
/// right after it, so an interruption loses at most the requests in flight.
/// Failed actors are tried again on the next run.
pub async fn fetch_all<S>(
    roster: &[ActorIdentity],
    source: &S,
    store: &CheckpointStore,
    workers: usize,
    retry: &RetryPolicy,
) -> Result<FetchOutcome>
where
    S: FilmographySource + ?Sized,
{
    let mut seen = BTreeSet::new();
    let roster: Vec<&ActorIdentity> = roster
        .iter()
        .filter(|actor| seen.insert(actor.provider_id.as_str()))
        .collect();
    let pending: Vec<&ActorIdentity> = roster
        .iter()
        .copied()
        .filter(|actor| !store.is_done(&actor.provider_id))
        .collect();

    let mut outcome = FetchOutcome {
        skipped: roster.len() - pending.len(),
        ..FetchOutcome::default()
    };
    tracing::info!(
        total = roster.len(),
        done = outcome.skipped,
        pending = pending.len(),
        "fetching filmographies"
    );
    if !pending.is_empty() {
        source.check().await?;
    }

    let total = pending.len();
    let mut results = stream::iter(pending)
        .map(|actor| async move {
            store.start(actor)?;
            let result = with_retry(retry, &actor.name, || source.filmography(actor)).await;
            let failure = match result {
                Lookup::Found(films) => {
                    tracing::debug!(actor = %actor.name, films = films.len(), "filmography fetched");
                    store.finish(actor, films)?;
                    None
                }
                Lookup::NotFound => {
                    store.fail(actor, "not found")?;
                    Some((FailureKind::LookupMiss, "no filmography found".to_string()))
                }
                Lookup::RateLimited(_) => {
                    store.fail(actor, "rate limited")?;
                    Some((FailureKind::Transient, "rate limited".to_string()))
                }
                Lookup::TransientError(reason) => {
                    store.fail(actor, reason.clone())?;
                    Some((FailureKind::Transient, reason))
                }
            };
            Ok::<_, Error>((actor, failure))
        })
        .buffer_unordered(workers.max(1));

    let mut finished = 0;
    while let Some(result) = results.next().await {
        let (actor, failure) = result?;
        finished += 1;
        match failure {
            None => {
                outcome.fetched += 1;
                tracing::info!(actor = %actor.name, "filmography saved ({}/{})", finished, total);
            }
            Some((kind, detail)) => outcome.report.push(kind, subject(actor), detail),
        }
    }

    for actor in roster {
        if let Some(FetchState::Done { films, .. }) = store.state(&actor.provider_id) {
            outcome.filmography.insert(actor, films);
        }
    }
    Ok(outcome)
}

/// Fetch filmographies for the roster in the library directory and export
/// the well-rated credits to `actors_filmography.json`.
pub async fn generate_actors_filmography<S>(
    settings: &Settings,
    source: &S,
    min_rating: f32,
) -> Result<FetchOutcome>
where
    S: FilmographySource + ?Sized,
{
    let roster_path = settings.path(ACTORS_LIST_FILE);
    if !roster_path.exists() {
        return Err(Error::MissingInput {
            path: roster_path,
            command: "generate-actors-list",
        });
    }
    let roster = read_roster(&roster_path)?;
    let store = CheckpointStore::open(&settings.path(CHECKPOINT_FILE))?;

    let mut outcome = fetch_all(&roster, source, &store, settings.workers, &settings.retry).await?;
    outcome.filmography = outcome.filmography.rated_at_least(min_rating);

    let path = settings.path(FILMOGRAPHY_FILE);
    write_json(&path, &outcome.filmography)?;
    tracing::info!(path = ?path, actors = outcome.filmography.len(), "wrote actors filmography");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{
        collections::HashMap,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };
    use tempfile::TempDir;

    /// Answers every actor with one film; once `limit` answers were given,
    /// further calls never complete.
    #[derive(Default)]
    struct FakeSource {
        limit: Option<usize>,
        missing: Vec<&'static str>,
        answered: AtomicUsize,
        per_actor: Mutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl FilmographySource for FakeSource {
        async fn filmography(&self, actor: &ActorIdentity) -> Lookup<Vec<FilmCredit>> {
            if let Some(limit) = self.limit
                && self.answered.load(Ordering::SeqCst) >= limit
            {
                std::future::pending::<()>().await;
            }
            self.answered.fetch_add(1, Ordering::SeqCst);
            *self
                .per_actor
                .lock()
                .unwrap()
                .entry(actor.provider_id.clone())
                .or_default() += 1;
            if self.missing.contains(&actor.provider_id.as_str()) {
                return Lookup::NotFound;
            }
            Lookup::Found(vec![
                FilmCredit {
                    title: format!("Film of {}", actor.name),
                    year: 2000,
                    rating: 6.5,
                },
                FilmCredit {
                    title: format!("Best of {}", actor.name),
                    year: 2001,
                    rating: 8.0,
                },
            ])
        }
    }

    fn roster(n: usize) -> Vec<ActorIdentity> {
        (1..=n)
            .map(|i| ActorIdentity {
                provider_id: i.to_string(),
                name: format!("Actor {}", i),
            })
            .collect()
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            request_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_interrupted_fetch_resumes_without_refetching() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CHECKPOINT_FILE);
        let roster = roster(6);

        let first = FakeSource {
            limit: Some(3),
            ..FakeSource::default()
        };
        {
            let store = CheckpointStore::open(&path).unwrap();
            let interrupted = tokio::time::timeout(
                Duration::from_millis(200),
                fetch_all(&roster, &first, &store, 1, &quick_retry()),
            )
            .await;
            assert!(interrupted.is_err());
        }
        assert_eq!(first.answered.load(Ordering::SeqCst), 3);

        let second = FakeSource::default();
        let store = CheckpointStore::open(&path).unwrap();
        let outcome = fetch_all(&roster, &second, &store, 2, &quick_retry())
            .await
            .unwrap();

        assert_eq!(outcome.skipped, 3);
        assert_eq!(outcome.fetched, 3);
        assert_eq!(outcome.filmography.len(), 6);
        let total = first.answered.load(Ordering::SeqCst) + second.answered.load(Ordering::SeqCst);
        assert_eq!(total, 6);
        let first_calls = first.per_actor.lock().unwrap();
        let second_calls = second.per_actor.lock().unwrap();
        for (id, count) in first_calls.iter() {
            assert_eq!(*count, 1);
            assert!(!second_calls.contains_key(id));
        }
    }

    #[tokio::test]
    async fn test_failed_actor_is_reported_and_retried_next_run() {
        let store = CheckpointStore::in_memory();
        let roster = roster(3);
        let source = FakeSource {
            missing: vec!["2"],
            ..FakeSource::default()
        };
        let outcome = fetch_all(&roster, &source, &store, 2, &quick_retry())
            .await
            .unwrap();
        assert_eq!(outcome.fetched, 2);
        assert_eq!(outcome.report.count(FailureKind::LookupMiss), 1);
        assert!(outcome.filmography.get("2").is_none());

        let retry_source = FakeSource::default();
        let outcome = fetch_all(&roster, &retry_source, &store, 2, &quick_retry())
            .await
            .unwrap();
        assert_eq!(outcome.fetched, 1);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(retry_source.answered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_roster_entries_fetch_once() {
        let store = CheckpointStore::in_memory();
        let mut roster = roster(2);
        roster.push(roster[0].clone());
        let source = FakeSource::default();
        fetch_all(&roster, &source, &store, 4, &quick_retry())
            .await
            .unwrap();
        assert_eq!(source.answered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_export_keeps_well_rated_films_best_first() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = Settings::new(temp_dir.path());
        settings.retry = quick_retry();
        crate::roster::write_roster(&settings.path(ACTORS_LIST_FILE), &roster(1)).unwrap();

        let outcome = generate_actors_filmography(&settings, &FakeSource::default(), 7.0)
            .await
            .unwrap();
        let films = &outcome.filmography.get("1").unwrap().films;
        assert_eq!(films.len(), 1);
        assert_eq!(films[0].title, "Best of Actor 1");

        let saved = read_filmography(&settings.path(FILMOGRAPHY_FILE)).unwrap();
        assert_eq!(saved, outcome.filmography);
    }

    #[tokio::test]
    async fn test_missing_roster_names_the_command() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::new(temp_dir.path());
        let err = generate_actors_filmography(&settings, &FakeSource::default(), 7.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("generate-actors-list"));
    }
}
