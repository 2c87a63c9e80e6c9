use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

use crate::config::RetryPolicy;
use crate::error::Result;

/// Outcome of a single provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    RateLimited(Duration),
    TransientError(String),
}

/// What a metadata lookup returns for one film.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub directors: Vec<String>,
    pub genres: Vec<String>,
    /// Top-billed cast, in billing order.
    pub actors: Vec<String>,
}

pub type MetadataResult = Lookup<Metadata>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub provider_id: String,
    pub name: String,
}

/// One film from an actor's filmography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmCredit {
    pub title: String,
    pub year: u16,
    pub rating: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscarCategory {
    LeadActor,
    LeadActress,
    SupportingActor,
    SupportingActress,
}

impl OscarCategory {
    pub const ALL: [OscarCategory; 4] = [
        OscarCategory::LeadActor,
        OscarCategory::LeadActress,
        OscarCategory::SupportingActor,
        OscarCategory::SupportingActress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OscarCategory::LeadActor => "best actor",
            OscarCategory::LeadActress => "best actress",
            OscarCategory::SupportingActor => "best supporting actor",
            OscarCategory::SupportingActress => "best supporting actress",
        }
    }
}

/// Film metadata provider. Stages only see this trait, so tests can use fakes.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn lookup(&self, title: &str, year: u16) -> MetadataResult;

    /// Cheap call proving the provider is reachable and accepts our credentials.
    async fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Whether `lookup` can answer without going to the network.
    fn is_cached(&self, _title: &str, _year: u16) -> bool {
        false
    }
}

#[async_trait]
impl<T: MetadataLookup + ?Sized> MetadataLookup for Arc<T> {
    async fn lookup(&self, title: &str, year: u16) -> MetadataResult {
        (**self).lookup(title, year).await
    }

    async fn check(&self) -> Result<()> {
        (**self).check().await
    }

    fn is_cached(&self, title: &str, year: u16) -> bool {
        (**self).is_cached(title, year)
    }
}

#[async_trait]
pub trait FilmographySource: Send + Sync {
    async fn filmography(&self, actor: &ActorIdentity) -> Lookup<Vec<FilmCredit>>;

    async fn check(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn nominees(&self, category: OscarCategory) -> Lookup<Vec<ActorIdentity>>;
}

/// Drive `call` until it yields something other than a retryable failure.
///
/// Rate limits wait for the full delay the provider asked for. Transient
/// errors back off exponentially up to `max_delay`. Every attempt is bounded
/// by the request timeout. Once the budget is spent the last failure is
/// returned as `TransientError`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, subject: &str, mut call: F) -> Lookup<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Lookup<T>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.request_timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Lookup::TransientError(format!(
                "timed out after {}s",
                policy.request_timeout.as_secs()
            )),
        };

        let delay = match &outcome {
            Lookup::RateLimited(retry_after) => *retry_after,
            Lookup::TransientError(_) => policy.backoff(attempt),
            _ => return outcome,
        };
        if attempt >= policy.max_retries {
            return match outcome {
                Lookup::RateLimited(_) => Lookup::TransientError(format!(
                    "still rate limited after {} retries",
                    policy.max_retries
                )),
                other => other,
            };
        }
        tracing::debug!(subject, attempt = attempt + 1, ?delay, "retrying provider call");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
