use std::{collections::HashMap, path::Path};

use crate::config::{BASE_INDEX_FILE, FILMOGRAPHY_FILE, Settings};
use crate::error::{Error, Result};
use crate::filmography::{Filmography, read_filmography};
use crate::index::{BaseEntry, read_base_index};
use crate::tree::{self, Dimension, LinkMode, LinkRequest, TreeSummary};

/// One link request per (actor, owned film) pair.
///
/// Films match on exact (title, year); re-releases and alternate titles do
/// not. Actors sharing a display name get their provider id appended.
pub fn requests_for(
    base: &[BaseEntry],
    filmography: &Filmography,
    include_ratings: bool,
) -> Vec<LinkRequest> {
    let mut by_key: HashMap<(&str, u16), Vec<&BaseEntry>> = HashMap::new();
    for entry in base {
        by_key.entry((entry.title.as_str(), entry.year)).or_default().push(entry);
    }

    let mut name_counts: HashMap<&str, usize> = HashMap::new();
    for (_, actor) in filmography.iter() {
        *name_counts.entry(actor.name.as_str()).or_default() += 1;
    }

    let mut requests = Vec::new();
    for (provider_id, actor) in filmography.iter() {
        let category = match name_counts.get(actor.name.as_str()) {
            Some(&count) if count > 1 => format!("{} ({})", actor.name, provider_id),
            _ => actor.name.clone(),
        };
        for film in &actor.films {
            let Some(entries) = by_key.get(&(film.title.as_str(), film.year)) else {
                continue;
            };
            for entry in entries {
                let Some(file_name) = entry.filepath.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let file_name = if include_ratings {
                    format!("[{:.1}] {}", film.rating, file_name)
                } else {
                    file_name.to_string()
                };
                requests.push(LinkRequest {
                    category: category.clone(),
                    source: entry.filepath.clone(),
                    file_name,
                });
            }
        }
    }
    requests
}

pub fn populate(
    base: &[BaseEntry],
    filmography: &Filmography,
    include_ratings: bool,
    mode: LinkMode,
    output_root: &Path,
) -> Result<TreeSummary> {
    let requests = requests_for(base, filmography, include_ratings);
    tracing::info!(links = requests.len(), actors = filmography.len(), "populating actors tree");
    tree::apply(&requests, mode, output_root)
}

/// Populate `<libdir>/<dirname>` from the base index and the exported filmography.
pub fn populate_actors_tree(
    settings: &Settings,
    dirname: Option<&str>,
    include_ratings: bool,
    mode: LinkMode,
) -> Result<TreeSummary> {
    let base_path = settings.path(BASE_INDEX_FILE);
    if !base_path.exists() {
        return Err(Error::MissingInput {
            path: base_path,
            command: "generate-base-index",
        });
    }
    let filmography_path = settings.path(FILMOGRAPHY_FILE);
    if !filmography_path.exists() {
        return Err(Error::MissingInput {
            path: filmography_path,
            command: "generate-actors-filmography",
        });
    }

    let base = read_base_index(&base_path)?;
    let filmography = read_filmography(&filmography_path)?;
    let output_root = match dirname {
        Some(dirname) => settings.libdir().join(dirname),
        None => settings.libdir().join(Dimension::Actor.default_dirname()),
    };
    populate(&base, &filmography, include_ratings, mode, &output_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ActorIdentity, FilmCredit};
    use std::{fs, path::PathBuf};
    use tempfile::TempDir;

    fn entry(title: &str, year: u16, path: PathBuf) -> BaseEntry {
        BaseEntry {
            title: title.to_string(),
            year,
            filepath: path,
        }
    }

    fn credit(title: &str, year: u16, rating: f32) -> FilmCredit {
        FilmCredit {
            title: title.to_string(),
            year,
            rating,
        }
    }

    fn filmography() -> Filmography {
        let mut filmography = Filmography::default();
        filmography.insert(
            &ActorIdentity {
                provider_id: "204".to_string(),
                name: "Kate Winslet".to_string(),
            },
            vec![credit("Titanic", 1997, 7.9), credit("Titanic", 2012, 6.0)],
        );
        filmography.insert(
            &ActorIdentity {
                provider_id: "6193".to_string(),
                name: "Leonardo DiCaprio".to_string(),
            },
            vec![credit("Titanic", 1997, 7.9), credit("Inception", 2010, 8.4)],
        );
        filmography
    }

    #[test]
    fn test_matches_exact_title_and_year_only() {
        let base = vec![
            entry("Titanic", 1997, PathBuf::from("/films/(1997) Titanic.mkv")),
            entry("Titanic", 1953, PathBuf::from("/films/(1953) Titanic.mkv")),
            entry("Inception ", 2010, PathBuf::from("/films/(2010) Inception .mkv")),
        ];
        let requests = requests_for(&base, &filmography(), false);
        let mut got: Vec<(String, String)> = requests
            .into_iter()
            .map(|r| (r.category, r.file_name))
            .collect();
        got.sort();
        assert_eq!(
            got,
            vec![
                ("Kate Winslet".to_string(), "(1997) Titanic.mkv".to_string()),
                ("Leonardo DiCaprio".to_string(), "(1997) Titanic.mkv".to_string()),
            ]
        );
    }

    #[test]
    fn test_rating_prefix() {
        let base = vec![entry("Inception", 2010, PathBuf::from("/films/(2010) Inception.mkv"))];
        let requests = requests_for(&base, &filmography(), true);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].file_name, "[8.4] (2010) Inception.mkv");
    }

    #[test]
    fn test_actors_sharing_a_name_stay_apart() {
        let mut filmography = Filmography::default();
        for id in ["1001", "2002"] {
            filmography.insert(
                &ActorIdentity {
                    provider_id: id.to_string(),
                    name: "John Smith".to_string(),
                },
                vec![credit("Titanic", 1997, 7.9)],
            );
        }
        filmography.insert(
            &ActorIdentity {
                provider_id: "204".to_string(),
                name: "Kate Winslet".to_string(),
            },
            vec![credit("Titanic", 1997, 7.9)],
        );
        let base = vec![entry("Titanic", 1997, PathBuf::from("/films/(1997) Titanic.mkv"))];

        let mut categories: Vec<String> = requests_for(&base, &filmography, false)
            .into_iter()
            .map(|r| r.category)
            .collect();
        categories.sort();
        assert_eq!(
            categories,
            vec!["John Smith (1001)", "John Smith (2002)", "Kate Winslet"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_populate_actors_tree_links_owned_films() {
        let temp_dir = TempDir::new().unwrap();
        let film = temp_dir.path().join("(1997) Titanic [HD].mkv");
        fs::write(&film, b"film").unwrap();
        let settings = Settings::new(temp_dir.path());
        crate::index::write_base_index(
            &settings.path(BASE_INDEX_FILE),
            &[entry("Titanic", 1997, film.clone())],
        )
        .unwrap();
        crate::index::write_json(&settings.path(FILMOGRAPHY_FILE), &filmography()).unwrap();

        let summary = populate_actors_tree(&settings, None, false, LinkMode::Symlink).unwrap();
        assert_eq!(summary.created, 2);
        let link = temp_dir
            .path()
            .join("Films by Actor/Kate Winslet/(1997) Titanic [HD].mkv");
        assert_eq!(fs::read_link(&link).unwrap(), film);
    }

    #[test]
    fn test_missing_filmography_names_the_command() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::new(temp_dir.path());
        crate::index::write_base_index(&settings.path(BASE_INDEX_FILE), &[]).unwrap();
        let err = populate_actors_tree(&settings, None, false, LinkMode::Symlink).unwrap_err();
        assert!(err.to_string().contains("generate-actors-filmography"));
    }
}
