use regex::Regex;
use std::{collections::BTreeSet, path::Path};
use thiserror::Error;

use crate::error::{Error, Result};

const FILM_EXTENSIONS: [&str; 10] = [
    "mp4", "mkv", "avi", "m4v", "mov", "wmv", "webm", "flv", "xvid", "divx",
];

/// Release tags that end the title part of a scene-style file name.
const METADATA_PATTERNS: [&str; 4] = [
    r"\b\d{3,4}p\b",
    r"(?i)\b(bluray|brrip|bdrip|webrip|web-dl|web|hdtv|dvdrip|xvid|x264|x265|h264|h265|hevc|aac|ac3)\b",
    r"(?i)\b(proper|repack|internal|limited|unrated|extended|remastered|directors cut)\b",
    r"\[.*?\]",
];

/// Return the lowercase extension if the path looks like a film file.
pub fn parse_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    if FILM_EXTENSIONS.contains(&ext.as_str()) {
        Some(ext)
    } else {
        None
    }
}

/// Title and year recovered from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub title: String,
    pub year: u16,
    pub tag: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("file name is not valid UTF-8")]
    NotUtf8,
    #[error("does not match pattern {0:?}")]
    NoMatch(String),
    #[error("year {0:?} is not a number")]
    BadYear(String),
    #[error("title is empty")]
    EmptyTitle,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeFailure {
    #[error("file name is not valid UTF-8")]
    NotUtf8,
    #[error("no year found in file name")]
    NoYear,
    #[error("several candidate years: {}", .0.join(", "))]
    AmbiguousYear(Vec<String>),
    #[error("no title left once the year is removed")]
    NoTitle,
    #[error("normalized name {0:?} still does not match the pattern")]
    PatternMismatch(String),
}

/// A compiled filename pattern with `title` and `year` groups and an optional `tag` group.
#[derive(Debug, Clone)]
pub struct FilmPattern {
    regex: Regex,
}

impl FilmPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        for group in ["title", "year"] {
            if !regex.capture_names().flatten().any(|name| name == group) {
                return Err(Error::MissingGroup {
                    pattern: pattern.to_string(),
                    group,
                });
            }
        }
        Ok(Self { regex })
    }

    pub fn is_match(&self, stem: &str) -> bool {
        self.parse_stem(stem).is_ok()
    }

    /// Parse the file stem of `path`. Directories and extensions are ignored.
    pub fn parse(&self, path: &Path) -> std::result::Result<ParsedName, ParseFailure> {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or(ParseFailure::NotUtf8)?;
        self.parse_stem(stem)
    }

    pub fn parse_stem(&self, stem: &str) -> std::result::Result<ParsedName, ParseFailure> {
        let caps = self
            .regex
            .captures(stem)
            .ok_or_else(|| ParseFailure::NoMatch(self.regex.as_str().to_string()))?;

        let title = caps
            .name("title")
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        if title.is_empty() {
            return Err(ParseFailure::EmptyTitle);
        }

        let year_str = caps.name("year").map(|m| m.as_str()).unwrap_or_default();
        let year = year_str
            .trim()
            .parse::<u16>()
            .map_err(|_| ParseFailure::BadYear(year_str.to_string()))?;

        let tag = caps
            .name("tag")
            .map(|m| m.as_str().trim().to_string())
            .filter(|tag| !tag.is_empty());

        Ok(ParsedName {
            title: title.to_string(),
            year,
            tag,
        })
    }

    /// Rewrite a file name into `(YEAR) TITLE [tag].ext`.
    ///
    /// Names that already match the pattern come back unchanged. A name with no
    /// plausible year, or with more than one, is refused rather than guessed.
    pub fn normalize(&self, file_name: &str) -> std::result::Result<String, NormalizeFailure> {
        let path = Path::new(file_name);
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or(NormalizeFailure::NotUtf8)?;
        let ext = path.extension().and_then(|ext| ext.to_str());

        if self.is_match(stem) {
            return Ok(file_name.to_string());
        }

        let (year, title, tag) = match bracketed_year(stem)? {
            Some(found) => found,
            None => bare_year(stem)?,
        };

        let mut normalized = format!("({}) {}", year, title);
        if let Some(tag) = tag {
            normalized.push_str(&format!(" [{}]", tag));
        }
        if !self.is_match(&normalized) {
            return Err(NormalizeFailure::PatternMismatch(normalized));
        }
        if let Some(ext) = ext {
            normalized.push('.');
            normalized.push_str(ext);
        }
        Ok(normalized)
    }
}

type Candidate = (String, String, Option<String>);

/// `Titanic (1997) [HD]` style names: a single year in parentheses or brackets.
fn bracketed_year(stem: &str) -> std::result::Result<Option<Candidate>, NormalizeFailure> {
    let year_re = Regex::new(r"[(\[]((?:18|19|20)\d{2})[)\]]").map_err(|_| NormalizeFailure::NoYear)?;
    let years: BTreeSet<&str> = year_re
        .captures_iter(stem)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect();

    match years.len() {
        0 => Ok(None),
        1 => {
            let year = years.into_iter().next().unwrap_or_default().to_string();
            let rest = year_re.replace_all(stem, " ");

            let tag_re = Regex::new(r"\[([^\]]*)\]").map_err(|_| NormalizeFailure::NoTitle)?;
            let tags: Vec<String> = tag_re
                .captures_iter(&rest)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect();
            let title = clean_title(&tag_re.replace_all(&rest, " "));
            if title.is_empty() {
                return Err(NormalizeFailure::NoTitle);
            }
            let tag = (!tags.is_empty()).then(|| tags.join(" "));
            Ok(Some((year, title, tag)))
        }
        _ => Err(NormalizeFailure::AmbiguousYear(
            years.into_iter().map(str::to_string).collect(),
        )),
    }
}

/// `Movie.Title.1999.1080p.BluRay` style names: a single bare year token.
fn bare_year(stem: &str) -> std::result::Result<Candidate, NormalizeFailure> {
    let spaced = stem.replace(['.', '_'], " ");
    let year_re = Regex::new(r"\b((?:18|19|20)\d{2})\b").map_err(|_| NormalizeFailure::NoYear)?;
    let matches: Vec<regex::Match> = year_re.find_iter(&spaced).collect();
    let years: BTreeSet<&str> = matches.iter().map(|m| m.as_str()).collect();

    match years.len() {
        0 => Err(NormalizeFailure::NoYear),
        1 => {
            let first = matches[0];
            let before = &spaced[..first.start()];
            let title = if before.trim().is_empty() {
                strip_metadata(&spaced[first.end()..])
            } else {
                clean_title(before)
            };
            if title.is_empty() {
                return Err(NormalizeFailure::NoTitle);
            }
            Ok((first.as_str().to_string(), title, None))
        }
        _ => Err(NormalizeFailure::AmbiguousYear(
            years.into_iter().map(str::to_string).collect(),
        )),
    }
}

/// Keep only what comes before the first release tag.
fn strip_metadata(text: &str) -> String {
    let combined = METADATA_PATTERNS.join("|");
    let end = Regex::new(&combined)
        .ok()
        .and_then(|re| re.find(text).map(|m| m.start()))
        .unwrap_or(text.len());
    clean_title(&text[..end])
}

fn clean_title(text: &str) -> String {
    text.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == ',' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PATTERN;

    fn pattern() -> FilmPattern {
        FilmPattern::new(DEFAULT_PATTERN).unwrap()
    }

    #[test]
    fn test_parse_extension_with_valid_extensions() {
        assert_eq!(parse_extension(Path::new("film.mkv")).as_deref(), Some("mkv"));
        assert_eq!(parse_extension(Path::new("film.DivX")).as_deref(), Some("divx"));
        assert_eq!(parse_extension(Path::new("/a/b/film.m4v")).as_deref(), Some("m4v"));
    }

    #[test]
    fn test_parse_extension_with_invalid_extensions() {
        assert_eq!(parse_extension(Path::new("film.srt")), None);
        assert_eq!(parse_extension(Path::new("cover.jpg")), None);
        assert_eq!(parse_extension(Path::new("noextension")), None);
    }

    #[test]
    fn test_parse_default_pattern_with_tag() {
        let parsed = pattern()
            .parse(Path::new("/films/(1997) Titanic [HD].mkv"))
            .unwrap();
        assert_eq!(
            parsed,
            ParsedName {
                title: "Titanic".to_string(),
                year: 1997,
                tag: Some("HD".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_default_pattern_square_brackets() {
        let parsed = pattern().parse(Path::new("[2009] Up.mp4")).unwrap();
        assert_eq!(parsed.title, "Up");
        assert_eq!(parsed.year, 2009);
        assert_eq!(parsed.tag, None);
    }

    #[test]
    fn test_parse_keeps_inner_punctuation() {
        let parsed = pattern()
            .parse(Path::new("(1964) Dr. Strangelove or How I Learned to Stop Worrying.avi"))
            .unwrap();
        assert_eq!(
            parsed.title,
            "Dr. Strangelove or How I Learned to Stop Worrying"
        );
    }

    #[test]
    fn test_parse_no_match() {
        let result = pattern().parse(Path::new("Titanic.1997.720p.mkv"));
        assert!(matches!(result, Err(ParseFailure::NoMatch(_))));
    }

    #[test]
    fn test_custom_pattern() {
        let custom = FilmPattern::new(r"^(?P<title>.+) - (?P<year>\d{4})$").unwrap();
        let parsed = custom.parse(Path::new("Heat - 1995.mkv")).unwrap();
        assert_eq!(parsed.title, "Heat");
        assert_eq!(parsed.year, 1995);
    }

    #[test]
    fn test_pattern_requires_groups() {
        let err = FilmPattern::new(r"^(?P<title>.+)$").unwrap_err();
        assert!(matches!(err, Error::MissingGroup { group: "year", .. }));
    }

    #[test]
    fn test_pattern_must_compile() {
        let err = FilmPattern::new(r"^(?P<title>.+").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_normalize_keeps_canonical_names() {
        let name = "(1997) Titanic [HD].mkv";
        assert_eq!(pattern().normalize(name).unwrap(), name);
    }

    #[test]
    fn test_normalize_then_parse_matches_direct_parse() {
        let p = pattern();
        for name in ["(1997) Titanic [HD].mkv", "[2009] Up.mp4", "(1968) 2001 A Space Odyssey.avi"] {
            let direct = p.parse(Path::new(name)).unwrap();
            let normalized = p.normalize(name).unwrap();
            let reparsed = p.parse(Path::new(&normalized)).unwrap();
            assert_eq!((direct.title, direct.year), (reparsed.title, reparsed.year));
        }
    }

    #[test]
    fn test_normalize_postfixed_year() {
        assert_eq!(
            pattern().normalize("Titanic (1997).mkv").unwrap(),
            "(1997) Titanic.mkv"
        );
    }

    #[test]
    fn test_normalize_postfixed_year_with_tag() {
        assert_eq!(
            pattern().normalize("The Thing (1982) [Remastered].mkv").unwrap(),
            "(1982) The Thing [Remastered].mkv"
        );
    }

    #[test]
    fn test_normalize_scene_name() {
        assert_eq!(
            pattern().normalize("Movie.Title.1999.1080p.BluRay.x264.mkv").unwrap(),
            "(1999) Movie Title.mkv"
        );
    }

    #[test]
    fn test_normalize_underscores() {
        assert_eq!(
            pattern().normalize("heat_1995_dvdrip.avi").unwrap(),
            "(1995) heat.avi"
        );
    }

    #[test]
    fn test_normalize_without_year_fails() {
        assert_eq!(
            pattern().normalize("Casablanca.mkv"),
            Err(NormalizeFailure::NoYear)
        );
    }

    #[test]
    fn test_normalize_ambiguous_year_fails() {
        assert_eq!(
            pattern().normalize("Blade Runner 2049 2017.mkv"),
            Err(NormalizeFailure::AmbiguousYear(vec![
                "2017".to_string(),
                "2049".to_string()
            ]))
        );
    }

    #[test]
    fn test_normalize_year_only_fails() {
        assert_eq!(
            pattern().normalize("(1997).mkv"),
            Err(NormalizeFailure::NoTitle)
        );
    }

    #[test]
    fn test_normalize_custom_pattern_mismatch() {
        let custom = FilmPattern::new(r"^(?P<title>.+) - (?P<year>\d{4})$").unwrap();
        assert!(matches!(
            custom.normalize("Titanic (1997).mkv"),
            Err(NormalizeFailure::PatternMismatch(_))
        ));
    }
}
