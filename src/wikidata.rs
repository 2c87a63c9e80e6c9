use async_trait::async_trait;
use reqwest::{StatusCode, header::RETRY_AFTER};
use serde::Deserialize;
use std::time::Duration;

use crate::error::Result;
use crate::provider::{ActorIdentity, Lookup, OscarCategory, RosterSource};

const SPARQL_URL: &str = "https://query.wikidata.org/sparql";

impl OscarCategory {
    /// Wikidata item of the award.
    pub fn wikidata_item(&self) -> &'static str {
        match self {
            OscarCategory::LeadActor => "Q103916",
            OscarCategory::LeadActress => "Q103618",
            OscarCategory::SupportingActor => "Q106291",
            OscarCategory::SupportingActress => "Q106301",
        }
    }
}

/// People nominated for (P1411) or awarded (P166) the category, with a TMDB person id (P4985).
fn nominee_query(category: OscarCategory) -> String {
    format!(
        r#"SELECT DISTINCT ?tmdb ?personLabel WHERE {{
  ?person wdt:P1411|wdt:P166 wd:{item} .
  ?person wdt:P4985 ?tmdb .
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#,
        item = category.wikidata_item()
    )
}

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<Binding>,
}

#[derive(Debug, Deserialize)]
struct Binding {
    tmdb: Value,
    #[serde(rename = "personLabel")]
    person_label: Value,
}

#[derive(Debug, Deserialize)]
struct Value {
    value: String,
}

impl SparqlResponse {
    fn actors(self) -> Vec<ActorIdentity> {
        self.results
            .bindings
            .into_iter()
            .map(|binding| ActorIdentity {
                provider_id: binding.tmdb.value.trim().to_string(),
                name: binding.person_label.value.trim().to_string(),
            })
            .filter(|actor| !actor.provider_id.is_empty() && !actor.name.is_empty())
            .collect()
    }
}

/// Oscar acting nominees from the Wikidata query service.
pub struct WikidataRoster {
    client: reqwest::Client,
}

impl WikidataRoster {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("filmtree/", env!("CARGO_PKG_VERSION")))
                .build()?,
        })
    }
}

#[async_trait]
impl RosterSource for WikidataRoster {
    async fn nominees(&self, category: OscarCategory) -> Lookup<Vec<ActorIdentity>> {
        let response = match self
            .client
            .get(SPARQL_URL)
            .header("Accept", "application/sparql-results+json")
            .query(&[("query", nominee_query(category)), ("format", "json".to_string())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return Lookup::TransientError(err.to_string()),
        };

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                let delay = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(60);
                Lookup::RateLimited(Duration::from_secs(delay))
            }
            status if !status.is_success() => {
                Lookup::TransientError(format!("query service returned {}", status))
            }
            _ => match response.json::<SparqlResponse>().await {
                Ok(body) => Lookup::Found(body.actors()),
                Err(err) => Lookup::TransientError(format!("bad query response: {}", err)),
            },
        }
    }
}
