use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Joins multi-valued columns. Names may contain commas, so the index uses pipes.
pub const LIST_SEPARATOR: &str = "||";

/// One row of the base index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BaseEntry {
    pub title: String,
    pub year: u16,
    pub filepath: PathBuf,
}

impl BaseEntry {
    pub fn key(&self) -> (String, u16) {
        (self.title.clone(), self.year)
    }

    pub fn label(&self) -> String {
        format!("({}) {}", self.year, self.title)
    }
}

/// A film with its looked-up metadata; one row of the enriched index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilmRecord {
    pub title: String,
    pub year: u16,
    pub directors: Vec<String>,
    pub genres: Vec<String>,
    pub actors: Vec<String>,
    pub filepath: PathBuf,
}

impl FilmRecord {
    pub fn base(&self) -> BaseEntry {
        BaseEntry {
            title: self.title.clone(),
            year: self.year,
            filepath: self.filepath.clone(),
        }
    }
}

fn reader(path: &Path) -> Result<csv::Reader<fs::File>> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .from_path(path)?)
}

fn writer<W: Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(inner)
}

fn split_list(field: &str) -> Vec<String> {
    field
        .split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

/// `|` is replaced in each value so the joined column splits back exactly.
fn join_list(values: &[String]) -> String {
    values
        .iter()
        .map(|value| value.replace('|', "/"))
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

fn malformed(path: &Path, record: &csv::StringRecord, reason: impl Into<String>) -> Error {
    Error::MalformedRow {
        path: path.to_path_buf(),
        line: record.position().map(|p| p.line()).unwrap_or_default(),
        reason: reason.into(),
    }
}

fn parse_year(path: &Path, record: &csv::StringRecord, field: &str) -> Result<u16> {
    field
        .trim()
        .parse()
        .map_err(|_| malformed(path, record, format!("bad year {:?}", field)))
}

/// Write a file through a temporary sibling and rename it into place.
pub fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    fill(tmp.as_file_mut())?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Serialize `value` as pretty JSON, atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, |out| {
        serde_json::to_writer_pretty(&mut *out, value)?;
        out.write_all(b"\n")?;
        Ok(())
    })
}

/// Read a JSON file, or `T::default()` if it does not exist yet.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}

pub fn read_base_index(path: &Path) -> Result<Vec<BaseEntry>> {
    let mut entries = Vec::new();
    for record in reader(path)?.records() {
        let record = record?;
        if record.len() != 3 {
            return Err(malformed(path, &record, format!("expected 3 columns, got {}", record.len())));
        }
        entries.push(BaseEntry {
            title: record[0].to_string(),
            year: parse_year(path, &record, &record[1])?,
            filepath: PathBuf::from(&record[2]),
        });
    }
    Ok(entries)
}

pub fn write_base_index(path: &Path, entries: &[BaseEntry]) -> Result<()> {
    write_atomic(path, |out| {
        let mut w = writer(out);
        for entry in entries {
            let year = entry.year.to_string();
            let filepath = entry.filepath.to_string_lossy();
            w.write_record([entry.title.as_str(), year.as_str(), filepath.as_ref()])?;
        }
        w.flush()?;
        Ok(())
    })
}

pub fn read_films_index(path: &Path) -> Result<Vec<FilmRecord>> {
    let mut records = Vec::new();
    for record in reader(path)?.records() {
        let record = record?;
        if record.len() != 6 {
            return Err(malformed(path, &record, format!("expected 6 columns, got {}", record.len())));
        }
        records.push(FilmRecord {
            title: record[0].to_string(),
            year: parse_year(path, &record, &record[1])?,
            directors: split_list(&record[2]),
            genres: split_list(&record[3]),
            actors: split_list(&record[4]),
            filepath: PathBuf::from(&record[5]),
        });
    }
    Ok(records)
}

pub fn write_films_index(path: &Path, records: &[FilmRecord]) -> Result<()> {
    write_atomic(path, |out| {
        let mut w = writer(out);
        for record in records {
            let year = record.year.to_string();
            let directors = join_list(&record.directors);
            let genres = join_list(&record.genres);
            let actors = join_list(&record.actors);
            let filepath = record.filepath.to_string_lossy();
            w.write_record([
                record.title.as_str(),
                year.as_str(),
                directors.as_str(),
                genres.as_str(),
                actors.as_str(),
                filepath.as_ref(),
            ])?;
        }
        w.flush()?;
        Ok(())
    })
}
