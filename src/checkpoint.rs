use serde::{Deserialize, Serialize};
use std::{path::Path, sync::Mutex};

use crate::error::Result;
use crate::journal::{Journal, OnCorruption};
use crate::provider::{ActorIdentity, FilmCredit};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FetchState {
    InProgress { name: String },
    Done { name: String, films: Vec<FilmCredit> },
    Failed { name: String, reason: String },
}

impl FetchState {
    pub fn is_done(&self) -> bool {
        matches!(self, FetchState::Done { .. })
    }
}

/// Per-actor fetch progress. An actor with no entry is pending.
#[derive(Debug)]
pub struct CheckpointStore {
    journal: Mutex<Journal<FetchState>>,
}

impl CheckpointStore {
    /// Open the checkpoint at `path`. An unreadable line is fatal: progress is
    /// never silently thrown away.
    pub fn open(path: &Path) -> Result<Self> {
        let journal = Journal::open(path, OnCorruption::Fail)?;
        tracing::info!(path = ?path, actors = journal.len(), "opened filmography checkpoint");
        Ok(Self {
            journal: Mutex::new(journal),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            journal: Mutex::new(Journal::in_memory()),
        }
    }

    pub fn state(&self, provider_id: &str) -> Option<FetchState> {
        let journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        journal.get(provider_id).cloned()
    }

    pub fn is_done(&self, provider_id: &str) -> bool {
        self.state(provider_id).is_some_and(|state| state.is_done())
    }

    fn put(&self, actor: &ActorIdentity, state: FetchState) -> Result<()> {
        let mut journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        journal.put(actor.provider_id.clone(), state)
    }

    pub fn start(&self, actor: &ActorIdentity) -> Result<()> {
        self.put(
            actor,
            FetchState::InProgress {
                name: actor.name.clone(),
            },
        )
    }

    pub fn finish(&self, actor: &ActorIdentity, films: Vec<FilmCredit>) -> Result<()> {
        self.put(
            actor,
            FetchState::Done {
                name: actor.name.clone(),
                films,
            },
        )
    }

    pub fn fail(&self, actor: &ActorIdentity, reason: impl Into<String>) -> Result<()> {
        self.put(
            actor,
            FetchState::Failed {
                name: actor.name.clone(),
                reason: reason.into(),
            },
        )
    }

    /// Completed actors with their films, ordered by provider id.
    pub fn done(&self) -> Vec<(ActorIdentity, Vec<FilmCredit>)> {
        let journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        journal
            .iter()
            .filter_map(|(id, state)| match state {
                FetchState::Done { name, films } => Some((
                    ActorIdentity {
                        provider_id: id.clone(),
                        name: name.clone(),
                    },
                    films.clone(),
                )),
                _ => None,
            })
            .collect()
    }
}
