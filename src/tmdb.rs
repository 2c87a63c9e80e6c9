use async_trait::async_trait;
use reqwest::{StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::provider::{
    ActorIdentity, FilmCredit, FilmographySource, Lookup, Metadata, MetadataLookup,
    MetadataResult,
};

const BASE_URL: &str = "https://api.themoviedb.org/3";
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug, PartialEq, Deserialize)]
pub struct SearchResults {
    pub results: Vec<MovieSummary>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MovieSummary {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
}

impl MovieSummary {
    pub fn year(&self) -> Option<u16> {
        release_year(self.release_date.as_deref())
    }

    fn has_title(&self, title: &str) -> bool {
        self.title.eq_ignore_ascii_case(title)
            || self
                .original_title
                .as_deref()
                .is_some_and(|original| original.eq_ignore_ascii_case(title))
    }
}

#[derive(Debug, PartialEq, Deserialize)]
pub struct Genre {
    pub name: String,
}

#[derive(Debug, PartialEq, Deserialize)]
pub struct CastMember {
    pub name: String,
    #[serde(default)]
    pub order: i32,
}

#[derive(Debug, PartialEq, Deserialize)]
pub struct CrewMember {
    pub name: String,
    pub job: String,
}

#[derive(Debug, Default, PartialEq, Deserialize)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub crew: Vec<CrewMember>,
}

#[derive(Debug, PartialEq, Deserialize)]
pub struct MovieDetails {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub credits: Credits,
}

impl MovieDetails {
    pub fn metadata(&self, top_billed: usize) -> Metadata {
        let mut directors: Vec<String> = Vec::new();
        for member in self.credits.crew.iter().filter(|m| m.job == "Director") {
            if !directors.contains(&member.name) {
                directors.push(member.name.clone());
            }
        }

        let mut cast: Vec<&CastMember> = self.credits.cast.iter().collect();
        cast.sort_by_key(|member| member.order);

        Metadata {
            directors,
            genres: self.genres.iter().map(|g| g.name.clone()).collect(),
            actors: cast
                .into_iter()
                .take(top_billed)
                .map(|member| member.name.clone())
                .collect(),
        }
    }
}

#[derive(Debug, PartialEq, Deserialize)]
pub struct PersonCredit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: f32,
    #[serde(default)]
    pub vote_count: u32,
}

#[derive(Debug, PartialEq, Deserialize)]
pub struct PersonCredits {
    #[serde(default)]
    pub cast: Vec<PersonCredit>,
}

impl PersonCredits {
    /// Feature credits with a title and a known release year, best rated first.
    pub fn films(&self) -> Vec<FilmCredit> {
        let mut films: Vec<FilmCredit> = self
            .cast
            .iter()
            .filter_map(|credit| {
                Some(FilmCredit {
                    title: credit.title.clone()?,
                    year: release_year(credit.release_date.as_deref())?,
                    rating: if credit.vote_count > 0 {
                        credit.vote_average
                    } else {
                        0.0
                    },
                })
            })
            .collect();
        films.sort_by(|a, b| {
            b.rating
                .total_cmp(&a.rating)
                .then(a.year.cmp(&b.year))
                .then(a.title.cmp(&b.title))
        });
        films.dedup_by(|a, b| a.title == b.title && a.year == b.year);
        films
    }
}

fn release_year(date: Option<&str>) -> Option<u16> {
    date?.split('-').next()?.parse().ok()
}

fn retry_after(response: &reqwest::Response) -> Duration {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

pub struct TmdbClient {
    client: reqwest::Client,
    token: String,
    top_billed: usize,
}

impl TmdbClient {
    pub fn new(token: impl Into<String>, timeout: Duration, top_billed: usize) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("filmtree/", env!("CARGO_PKG_VERSION")))
                .build()?,
            token: token.into(),
            top_billed,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Lookup<T> {
        let response = match self
            .client
            .get(format!("{}{}", BASE_URL, path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return Lookup::TransientError(err.to_string()),
        };

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Lookup::RateLimited(retry_after(&response)),
            StatusCode::NOT_FOUND => Lookup::NotFound,
            status if !status.is_success() => {
                Lookup::TransientError(format!("{} returned {}", path, status))
            }
            _ => match response.json().await {
                Ok(body) => Lookup::Found(body),
                Err(err) => Lookup::TransientError(format!("bad response from {}: {}", path, err)),
            },
        }
    }

    pub async fn search(&self, title: &str, year: Option<u16>) -> Lookup<SearchResults> {
        let mut query = vec![
            ("query", title.to_string()),
            ("include_adult", "false".to_string()),
        ];
        if let Some(year) = year {
            query.push(("primary_release_year", year.to_string()));
        }
        self.get("/search/movie", &query).await
    }

    pub async fn movie(&self, id: i64) -> Lookup<MovieDetails> {
        self.get(
            &format!("/movie/{}", id),
            &[("append_to_response", "credits".to_string())],
        )
        .await
    }

    pub async fn person_credits(&self, id: &str) -> Lookup<PersonCredits> {
        self.get(&format!("/person/{}/movie_credits", id), &[]).await
    }

    /// Exact-year search first, then a year-less search accepting ±1 year.
    async fn find_movie(&self, title: &str, year: u16) -> Lookup<MovieSummary> {
        let exact = match self.search(title, Some(year)).await {
            Lookup::Found(found) => found.results,
            Lookup::NotFound => Vec::new(),
            Lookup::RateLimited(delay) => return Lookup::RateLimited(delay),
            Lookup::TransientError(err) => return Lookup::TransientError(err),
        };
        if let Some(best) = pick(&exact, title, |_| true) {
            return Lookup::Found(best);
        }

        let loose = match self.search(title, None).await {
            Lookup::Found(found) => found.results,
            Lookup::NotFound => Vec::new(),
            Lookup::RateLimited(delay) => return Lookup::RateLimited(delay),
            Lookup::TransientError(err) => return Lookup::TransientError(err),
        };
        match pick(&loose, title, |m| {
            m.year().is_some_and(|y| y.abs_diff(year) <= 1)
        }) {
            Some(best) => Lookup::Found(best),
            None => Lookup::NotFound,
        }
    }
}

/// Prefer a result whose title matches exactly; otherwise take the first.
fn pick(
    results: &[MovieSummary],
    title: &str,
    accept: impl Fn(&MovieSummary) -> bool,
) -> Option<MovieSummary> {
    let candidates: Vec<&MovieSummary> = results.iter().filter(|m| accept(m)).collect();
    candidates
        .iter()
        .find(|m| m.has_title(title))
        .or_else(|| candidates.first())
        .map(|m| (*m).clone())
}

#[async_trait]
impl MetadataLookup for TmdbClient {
    async fn lookup(&self, title: &str, year: u16) -> MetadataResult {
        let summary = match self.find_movie(title, year).await {
            Lookup::Found(summary) => summary,
            Lookup::NotFound => return Lookup::NotFound,
            Lookup::RateLimited(delay) => return Lookup::RateLimited(delay),
            Lookup::TransientError(err) => return Lookup::TransientError(err),
        };
        match self.movie(summary.id).await {
            Lookup::Found(details) => Lookup::Found(details.metadata(self.top_billed)),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::RateLimited(delay) => Lookup::RateLimited(delay),
            Lookup::TransientError(err) => Lookup::TransientError(err),
        }
    }

    async fn check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/configuration", BASE_URL))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| Error::ProviderUnreachable(err.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(Error::ProviderUnreachable(
                "TMDB rejected the API token (set TMDB_API_TOKEN)".to_string(),
            )),
            status => Err(Error::ProviderUnreachable(format!(
                "TMDB answered {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl FilmographySource for TmdbClient {
    async fn filmography(&self, actor: &ActorIdentity) -> Lookup<Vec<FilmCredit>> {
        match self.person_credits(&actor.provider_id).await {
            Lookup::Found(credits) => Lookup::Found(credits.films()),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::RateLimited(delay) => Lookup::RateLimited(delay),
            Lookup::TransientError(err) => Lookup::TransientError(err),
        }
    }

    async fn check(&self) -> Result<()> {
        MetadataLookup::check(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movie_details_metadata() {
        let details: MovieDetails = serde_json::from_str(
            r#"{
                "id": 597,
                "title": "Titanic",
                "genres": [{"id": 18, "name": "Drama"}, {"id": 10749, "name": "Romance"}],
                "credits": {
                    "cast": [
                        {"name": "Kate Winslet", "order": 1},
                        {"name": "Leonardo DiCaprio", "order": 0},
                        {"name": "Billy Zane", "order": 2}
                    ],
                    "crew": [
                        {"name": "James Cameron", "job": "Director"},
                        {"name": "James Cameron", "job": "Writer"},
                        {"name": "Jon Landau", "job": "Producer"}
                    ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            details.metadata(2),
            Metadata {
                directors: vec!["James Cameron".to_string()],
                genres: vec!["Drama".to_string(), "Romance".to_string()],
                actors: vec!["Leonardo DiCaprio".to_string(), "Kate Winslet".to_string()],
            }
        );
    }

    #[test]
    fn test_person_credits_films() {
        let credits: PersonCredits = serde_json::from_str(
            r#"{"cast": [
                {"title": "Titanic", "release_date": "1997-11-18", "vote_average": 7.9, "vote_count": 25000},
                {"title": "Inception", "release_date": "2010-07-15", "vote_average": 8.4, "vote_count": 35000},
                {"title": "Untitled Project", "release_date": "", "vote_average": 0.0, "vote_count": 0},
                {"title": "Titanic", "release_date": "1997-11-18", "vote_average": 7.9, "vote_count": 25000},
                {"title": "Unrated", "release_date": "1991-01-01", "vote_average": 9.0, "vote_count": 0}
            ]}"#,
        )
        .unwrap();

        let films = credits.films();
        assert_eq!(
            films,
            vec![
                FilmCredit {
                    title: "Inception".to_string(),
                    year: 2010,
                    rating: 8.4
                },
                FilmCredit {
                    title: "Titanic".to_string(),
                    year: 1997,
                    rating: 7.9
                },
                FilmCredit {
                    title: "Unrated".to_string(),
                    year: 1991,
                    rating: 0.0
                },
            ]
        );
    }

    #[test]
    fn test_pick_prefers_exact_title() {
        let results = vec![
            MovieSummary {
                id: 1,
                title: "Titanic II".to_string(),
                original_title: None,
                release_date: Some("2010-08-07".to_string()),
            },
            MovieSummary {
                id: 2,
                title: "Titanic".to_string(),
                original_title: None,
                release_date: Some("1997-11-18".to_string()),
            },
        ];
        assert_eq!(pick(&results, "titanic", |_| true).map(|m| m.id), Some(2));
        assert_eq!(
            pick(&results, "Titanic", |m| m.year() == Some(2010)).map(|m| m.id),
            Some(1)
        );
        assert_eq!(pick(&[], "Titanic", |_| true), None);
    }

    #[test]
    fn test_release_year() {
        assert_eq!(release_year(Some("1997-11-18")), Some(1997));
        assert_eq!(release_year(Some("")), None);
        assert_eq!(release_year(None), None);
    }
}
