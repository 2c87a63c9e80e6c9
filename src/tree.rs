use sanitize_filename::sanitize;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
};

use crate::config::{FILMS_INDEX_FILE, Settings};
use crate::error::{Error, Result};
use crate::index::{FilmRecord, read_films_index, read_json_or_default, write_json};
use crate::report::{FailureKind, FailureReport};

/// Lists the links this tool created under a tree root. Only those are ever removed.
pub const MANIFEST_FILE: &str = ".filmtree.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    Hardlink,
    Symlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Director,
    Genre,
    Actor,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Director => "director",
            Dimension::Genre => "genre",
            Dimension::Actor => "actor",
        }
    }

    /// "Films by Director", "Films by Genre", "Films by Actor".
    pub fn default_dirname(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        let capitalized: String = chars
            .next()
            .map(|first| first.to_uppercase().chain(chars).collect())
            .unwrap_or_default();
        format!("Films by {}", capitalized)
    }

    pub fn values<'a>(&self, record: &'a FilmRecord) -> &'a [String] {
        match self {
            Dimension::Director => &record.directors,
            Dimension::Genre => &record.genres,
            Dimension::Actor => &record.actors,
        }
    }
}

/// One link to place: `<root>/<category>/<file_name>` pointing at `source`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LinkRequest {
    pub category: String,
    pub source: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ManifestEntry {
    link: PathBuf,
    source: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    mode: Option<LinkMode>,
    links: Vec<ManifestEntry>,
}

#[derive(Debug, Default)]
pub struct TreeSummary {
    pub created: usize,
    pub kept: usize,
    pub removed: usize,
    pub report: FailureReport,
}

/// One request per (category value, record) pair.
pub fn requests_for(records: &[FilmRecord], dimension: Dimension) -> Vec<LinkRequest> {
    let mut requests = Vec::new();
    for record in records {
        let Some(file_name) = record.filepath.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        for value in dimension.values(record) {
            requests.push(LinkRequest {
                category: value.clone(),
                source: record.filepath.clone(),
                file_name: file_name.to_string(),
            });
        }
    }
    requests
}

/// Link paths relative to the tree root, each mapped to its source file.
///
/// A source appears at most once per category. Two sources that want the same
/// name in one category are told apart with a ` (2)`, ` (3)`... suffix, in
/// source path order.
pub fn plan(requests: &[LinkRequest]) -> BTreeMap<PathBuf, PathBuf> {
    plan_around(requests, &[])
}

/// Like [`plan`], but links from `previous` that are still wanted keep their
/// names, so a suffix handed out once never moves to another film.
fn plan_around<'a>(
    requests: &'a [LinkRequest],
    previous: &'a [ManifestEntry],
) -> BTreeMap<PathBuf, PathBuf> {
    let mut by_category: BTreeMap<String, BTreeSet<(&str, &Path)>> = BTreeMap::new();
    for request in requests {
        let dir = sanitize(request.category.trim());
        if dir.is_empty() {
            continue;
        }
        by_category
            .entry(dir)
            .or_default()
            .insert((request.file_name.as_str(), request.source.as_path()));
    }

    let mut planned = BTreeMap::new();
    for (dir, wanted) in by_category {
        let mut used: BTreeSet<String> = BTreeSet::new();
        let mut placed: BTreeSet<&Path> = BTreeSet::new();

        for entry in previous {
            if entry.link.parent() != Some(Path::new(&dir)) {
                continue;
            }
            let Some(name) = entry.link.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let still_wanted = wanted.iter().any(|(file_name, source)| {
                *source == entry.source && is_named_for(name, &sanitize(file_name))
            });
            if still_wanted && !used.contains(name) && placed.insert(entry.source.as_path()) {
                used.insert(name.to_string());
                planned.insert(entry.link.clone(), entry.source.clone());
            }
        }

        for (file_name, source) in wanted {
            if !placed.insert(source) {
                continue;
            }
            let base = sanitize(file_name);
            let mut name = base.clone();
            let mut n = 2;
            while used.contains(&name) {
                name = numbered(&base, n);
                n += 1;
            }
            used.insert(name.clone());
            planned.insert(Path::new(&dir).join(name), source.to_path_buf());
        }
    }
    planned
}

/// True when `name` is `base` itself or one of its numbered variants.
fn is_named_for(name: &str, base: &str) -> bool {
    if name == base {
        return true;
    }
    let Some((_, tail)) = name.rsplit_once(" (") else {
        return false;
    };
    let digits = tail.split(')').next().unwrap_or_default();
    match digits.parse::<usize>() {
        Ok(n) if n >= 2 => numbered(base, n) == name,
        _ => false,
    }
}

fn numbered(file_name: &str, n: usize) -> String {
    let path = Path::new(file_name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) {
        (Some(stem), Some(ext)) => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", file_name, n),
    }
}

/// Build (or rebuild) the `dimension` tree for `records` under `output_root`.
pub fn materialize(
    records: &[FilmRecord],
    dimension: Dimension,
    mode: LinkMode,
    output_root: &Path,
) -> Result<TreeSummary> {
    apply(&requests_for(records, dimension), mode, output_root)
}

/// Build `<libdir>/<dirname>` from `films_index.tsv`.
pub fn create_films_tree(
    settings: &Settings,
    dimension: Dimension,
    dirname: Option<&str>,
    mode: LinkMode,
) -> Result<TreeSummary> {
    let index_path = settings.path(FILMS_INDEX_FILE);
    if !index_path.exists() {
        return Err(Error::MissingInput {
            path: index_path,
            command: "generate-films-index",
        });
    }
    let records = read_films_index(&index_path)?;
    let output_root = match dirname {
        Some(dirname) => settings.libdir().join(dirname),
        None => settings.libdir().join(dimension.default_dirname()),
    };
    tracing::info!(dimension = dimension.as_str(), films = records.len(), root = ?output_root, "creating films tree");
    materialize(&records, dimension, mode, &output_root)
}

/// Reconcile `output_root` with `requests`.
pub fn apply(requests: &[LinkRequest], mode: LinkMode, output_root: &Path) -> Result<TreeSummary> {
    let manifest_path = output_root.join(MANIFEST_FILE);
    let old: Manifest = read_json_or_default(&manifest_path)?;
    let desired = plan_around(requests, &old.links);
    if mode == LinkMode::Hardlink {
        check_same_volume(desired.values(), output_root)?;
    }

    claim_root(output_root, &old, &desired, mode)?;
    let same_mode = old.mode == Some(mode);

    let mut summary = TreeSummary::default();
    let mut touched: BTreeSet<PathBuf> = BTreeSet::new();
    let mut owned_before: BTreeSet<PathBuf> = BTreeSet::new();

    for entry in &old.links {
        let still_wanted = same_mode && desired.get(&entry.link) == Some(&entry.source);
        if still_wanted {
            owned_before.insert(entry.link.clone());
            continue;
        }
        let link = output_root.join(&entry.link);
        if remove_link(&link)? {
            tracing::debug!(link = ?link, "removed stale link");
            summary.removed += 1;
        }
        if let Some(parent) = link.parent() {
            touched.insert(parent.to_path_buf());
        }
    }

    let mut links = Vec::new();
    for (relative, source) in &desired {
        let link = output_root.join(relative);
        let subject = link.display().to_string();

        if fs::symlink_metadata(&link).is_ok() {
            if points_to(&link, source, mode) {
                summary.kept += 1;
                links.push(ManifestEntry {
                    link: relative.clone(),
                    source: source.clone(),
                });
                continue;
            }
            if owned_before.contains(relative) {
                remove_link(&link)?;
            } else {
                summary.report.push(
                    FailureKind::FilesystemConflict,
                    subject,
                    format!("already exists and is not a link to {}", source.display()),
                );
                continue;
            }
        }

        if !source.exists() {
            summary.report.push(
                FailureKind::FilesystemConflict,
                subject,
                format!("source file {} is missing", source.display()),
            );
            continue;
        }

        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        match create_link(source, &link, mode) {
            Ok(()) => {
                summary.created += 1;
                links.push(ManifestEntry {
                    link: relative.clone(),
                    source: source.clone(),
                });
            }
            Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                summary.report.push(
                    FailureKind::FilesystemConflict,
                    subject,
                    "hard links cannot cross volumes; rerun with --symlinks",
                );
            }
            Err(err) => {
                summary
                    .report
                    .push(FailureKind::FilesystemConflict, subject, err.to_string());
            }
        }
    }

    for dir in touched.iter().rev() {
        if dir.starts_with(output_root) && dir != output_root && is_empty_dir(dir) {
            fs::remove_dir(dir)?;
        }
    }

    write_json(
        &manifest_path,
        &Manifest {
            mode: Some(mode),
            links,
        },
    )?;

    tracing::info!(
        root = ?output_root,
        created = summary.created,
        kept = summary.kept,
        removed = summary.removed,
        "tree reconciled"
    );
    Ok(summary)
}

/// Create the tree root and record every link this run may create before
/// creating any, so an interrupted build is still recognized as a tree.
fn claim_root(
    output_root: &Path,
    old: &Manifest,
    desired: &BTreeMap<PathBuf, PathBuf>,
    mode: LinkMode,
) -> Result<()> {
    fs::create_dir_all(output_root)?;
    let mut links = old.links.clone();
    let mut listed: BTreeSet<&Path> = old.links.iter().map(|e| e.link.as_path()).collect();
    for (relative, source) in desired {
        // Files we did not create stay out of the manifest.
        let exists = fs::symlink_metadata(output_root.join(relative)).is_ok();
        if exists || !listed.insert(relative.as_path()) {
            continue;
        }
        links.push(ManifestEntry {
            link: relative.clone(),
            source: source.clone(),
        });
    }
    write_json(
        &output_root.join(MANIFEST_FILE),
        &Manifest {
            mode: Some(mode),
            links,
        },
    )
}

/// Remove a file or link we created earlier. Directories are never removed here.
fn remove_link(link: &Path) -> Result<bool> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.is_dir() => {
            tracing::warn!(path = ?link, "expected a link but found a directory; leaving it");
            Ok(false)
        }
        Ok(_) => {
            fs::remove_file(link)?;
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

fn points_to(link: &Path, source: &Path, mode: LinkMode) -> bool {
    let Ok(meta) = fs::symlink_metadata(link) else {
        return false;
    };
    match mode {
        LinkMode::Symlink => {
            meta.file_type().is_symlink()
                && fs::read_link(link).is_ok_and(|target| target == source)
        }
        LinkMode::Hardlink => !meta.file_type().is_symlink() && same_file(link, source),
    }
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.len() == b.len() && a.modified().ok() == b.modified().ok(),
        _ => false,
    }
}

/// Hard links cannot cross volumes; refuse before touching the tree.
#[cfg(unix)]
fn check_same_volume<'a>(
    sources: impl Iterator<Item = &'a PathBuf>,
    output_root: &Path,
) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let mut existing = output_root;
    let root_dev = loop {
        match fs::metadata(existing) {
            Ok(meta) => break meta.dev(),
            Err(_) => match existing.parent() {
                Some(parent) => existing = parent,
                None => return Ok(()),
            },
        }
    };
    let devices = sources.filter_map(|source| fs::metadata(source).ok().map(|meta| (source, meta.dev())));
    check_devices(root_dev, devices, output_root)
}

#[cfg(not(unix))]
fn check_same_volume<'a>(
    _sources: impl Iterator<Item = &'a PathBuf>,
    _output_root: &Path,
) -> Result<()> {
    Ok(())
}

#[cfg(any(unix, test))]
fn check_devices<'a>(
    root_dev: u64,
    mut sources: impl Iterator<Item = (&'a PathBuf, u64)>,
    output_root: &Path,
) -> Result<()> {
    match sources.find(|(_, dev)| *dev != root_dev) {
        Some((source, _)) => Err(Error::CrossDevice {
            source_path: source.clone(),
            link: output_root.to_path_buf(),
        }),
        None => Ok(()),
    }
}

fn create_link(source: &Path, link: &Path, mode: LinkMode) -> io::Result<()> {
    match mode {
        LinkMode::Hardlink => fs::hard_link(source, link),
        LinkMode::Symlink => symlink(source, link),
    }
}

#[cfg(unix)]
fn symlink(source: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(windows)]
fn symlink(source: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(source, link)
}
