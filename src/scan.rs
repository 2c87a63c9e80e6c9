use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use walkdir::{DirEntry, WalkDir};

use crate::config::{BASE_INDEX_FILE, Settings};
use crate::error::{Error, Result};
use crate::index::{BaseEntry, write_base_index};
use crate::report::{FailureKind, FailureReport};
use crate::tree::MANIFEST_FILE;
use crate::video::{FilmPattern, NormalizeFailure, parse_extension};

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Only scan this sub-directory of the library root.
    pub restrict: Option<PathBuf>,
    /// Keep only the first file for each (title, year).
    pub nodups: bool,
}

#[derive(Debug, Default)]
pub struct BaseIndexOutcome {
    pub entries: Vec<BaseEntry>,
    pub duplicates: Vec<PathBuf>,
    pub report: FailureReport,
}

/// Trees built by this tool hold links to library files and must not be indexed again.
fn is_tree_root(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.path().join(MANIFEST_FILE).exists()
}

fn absolute_root(root: &Path) -> Result<PathBuf> {
    let root = std::path::absolute(root).map_err(|source| Error::UnreadableRoot {
        path: root.to_path_buf(),
        source,
    })?;
    fs::read_dir(&root).map_err(|source| Error::UnreadableRoot {
        path: root.clone(),
        source,
    })?;
    Ok(root)
}

/// Every film file under `root`, sorted by path.
///
/// Symlinks are followed; a link that loops back to one of its ancestors is
/// reported and skipped.
pub fn film_files(root: &Path, report: &mut FailureReport) -> Result<Vec<PathBuf>> {
    let root = absolute_root(root)?;
    let mut files = Vec::new();

    let walker = WalkDir::new(&root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_tree_root(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let subject = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                let detail = match err.loop_ancestor() {
                    Some(ancestor) => format!("symlink loop back to {}", ancestor.display()),
                    None => err.to_string(),
                };
                report.push(FailureKind::FilesystemConflict, subject, detail);
                continue;
            }
        };
        if entry.file_type().is_file() && parse_extension(entry.path()).is_some() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// Parse every film file under `root` into a base index sorted by file path.
pub fn build_base_index(
    root: &Path,
    pattern: &FilmPattern,
    options: &ScanOptions,
) -> Result<BaseIndexOutcome> {
    let scan_root = match &options.restrict {
        Some(sub) => root.join(sub),
        None => root.to_path_buf(),
    };

    let mut outcome = BaseIndexOutcome::default();
    let files = film_files(&scan_root, &mut outcome.report)?;
    let mut seen: HashSet<(String, u16)> = HashSet::new();

    for path in files {
        match pattern.parse(&path) {
            Ok(parsed) => {
                let entry = BaseEntry {
                    title: parsed.title,
                    year: parsed.year,
                    filepath: path,
                };
                if options.nodups && !seen.insert(entry.key()) {
                    tracing::info!(path = ?entry.filepath, "skipping duplicate film");
                    outcome.duplicates.push(entry.filepath);
                    continue;
                }
                outcome.entries.push(entry);
            }
            Err(failure) => {
                outcome
                    .report
                    .push(FailureKind::Parse, path.display().to_string(), failure.to_string());
            }
        }
    }

    tracing::info!(films = outcome.entries.len(), "base index built");
    Ok(outcome)
}

/// Scan the library directory and replace `base_index.tsv`.
pub fn generate_base_index(
    settings: &Settings,
    pattern: &FilmPattern,
    options: &ScanOptions,
) -> Result<BaseIndexOutcome> {
    let outcome = build_base_index(settings.libdir(), pattern, options)?;
    let path = settings.path(BASE_INDEX_FILE);
    write_base_index(&path, &outcome.entries)?;
    tracing::info!(path = ?path, rows = outcome.entries.len(), "wrote base index");
    Ok(outcome)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub renamed: Vec<Rename>,
    pub unchanged: usize,
    pub report: FailureReport,
}

/// Rename film files under `root` into the canonical `(YEAR) TITLE [tag].ext` form.
///
/// When the heuristic gives up, `resolve` may supply a new name (e.g. by asking
/// the user); `None` records the file as a failure. A failed rename never undoes
/// or stops the others.
pub fn normalize_files<R>(
    root: &Path,
    pattern: &FilmPattern,
    dry_run: bool,
    mut resolve: R,
) -> Result<NormalizeOutcome>
where
    R: FnMut(&Path, &NormalizeFailure) -> Option<String>,
{
    let mut outcome = NormalizeOutcome::default();
    let files = film_files(root, &mut outcome.report)?;
    let mut claimed: HashSet<PathBuf> = HashSet::new();

    for path in files {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            outcome.report.push(
                FailureKind::Rename,
                path.display().to_string(),
                NormalizeFailure::NotUtf8.to_string(),
            );
            continue;
        };

        let new_name = match pattern.normalize(file_name) {
            Ok(new_name) if new_name == file_name => {
                outcome.unchanged += 1;
                continue;
            }
            Ok(new_name) => new_name,
            Err(failure) => match resolve(&path, &failure).map(|name| with_extension(&name, &path)) {
                Some(name) if pattern.parse(Path::new(&name)).is_ok() => name,
                Some(name) => {
                    outcome.report.push(
                        FailureKind::Rename,
                        path.display().to_string(),
                        format!("{:?} does not match the filename pattern", name),
                    );
                    continue;
                }
                None => {
                    outcome
                        .report
                        .push(FailureKind::Rename, path.display().to_string(), failure.to_string());
                    continue;
                }
            },
        };

        let target = path.with_file_name(&new_name);
        if target.exists() || !claimed.insert(target.clone()) {
            outcome.report.push(
                FailureKind::Rename,
                path.display().to_string(),
                format!("{:?} already exists", new_name),
            );
            continue;
        }

        if !dry_run && let Err(err) = fs::rename(&path, &target) {
            outcome
                .report
                .push(FailureKind::Rename, path.display().to_string(), err.to_string());
            continue;
        }
        outcome.renamed.push(Rename {
            from: path,
            to: target,
        });
    }

    Ok(outcome)
}

/// Keep the original extension when a typed-in name has none.
fn with_extension(name: &str, original: &Path) -> String {
    let name = name.trim();
    if parse_extension(Path::new(name)).is_some() {
        return name.to_string();
    }
    match original.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{}.{}", name, ext),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PATTERN;
    use tempfile::TempDir;

    fn create_test_files(base_dir: &Path, files: &[&str]) {
        for file_name in files {
            let file_path = base_dir.join(file_name);
            fs::create_dir_all(file_path.parent().unwrap()).unwrap();
            fs::write(&file_path, file_name.as_bytes()).unwrap();
        }
    }

    fn pattern() -> FilmPattern {
        FilmPattern::new(DEFAULT_PATTERN).unwrap()
    }

    #[test]
    fn test_build_base_index_sorted_by_path() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_files(
            root,
            &[
                "b/(1997) Titanic [HD].mkv",
                "a/(2009) Up.mp4",
                "a/(2009) Up.srt",
                "notes.txt",
                "c/Unparsable Film.avi",
            ],
        );

        let outcome = build_base_index(root, &pattern(), &ScanOptions::default()).unwrap();
        let titles: Vec<(&str, u16)> = outcome
            .entries
            .iter()
            .map(|e| (e.title.as_str(), e.year))
            .collect();
        assert_eq!(titles, vec![("Up", 2009), ("Titanic", 1997)]);
        assert!(outcome.entries.iter().all(|e| e.filepath.is_absolute()));
        assert_eq!(outcome.report.count(FailureKind::Parse), 1);
    }

    #[test]
    fn test_build_base_index_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_files(root, &["x/(1997) Titanic.mkv", "(1953) Titanic.mkv", "(1995) Heat.avi"]);

        let first = build_base_index(root, &pattern(), &ScanOptions::default()).unwrap();
        let second = build_base_index(root, &pattern(), &ScanOptions::default()).unwrap();
        assert_eq!(first.entries, second.entries);
        assert_eq!(first.entries.len(), 3);
    }

    #[test]
    fn test_build_base_index_nodups() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_files(root, &["a/(1997) Titanic.mkv", "b/(1997) Titanic [HD].mkv"]);

        let options = ScanOptions {
            nodups: true,
            ..ScanOptions::default()
        };
        let outcome = build_base_index(root, &pattern(), &options).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert!(outcome.entries[0].filepath.ends_with("a/(1997) Titanic.mkv"));
        assert_eq!(outcome.duplicates.len(), 1);
    }

    #[test]
    fn test_build_base_index_restrict() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_files(root, &["drama/(1997) Titanic.mkv", "action/(1995) Heat.avi"]);

        let options = ScanOptions {
            restrict: Some(PathBuf::from("action")),
            ..ScanOptions::default()
        };
        let outcome = build_base_index(root, &pattern(), &options).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].title, "Heat");
    }

    #[test]
    fn test_build_base_index_skips_trees() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_files(
            root,
            &["(1997) Titanic.mkv", "Films by Genre/Drama/(1997) Titanic.mkv"],
        );
        fs::write(root.join("Films by Genre").join(MANIFEST_FILE), "{}").unwrap();

        let outcome = build_base_index(root, &pattern(), &ScanOptions::default()).unwrap();
        assert_eq!(outcome.entries.len(), 1);
    }

    #[test]
    fn test_unreadable_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let err = build_base_index(&missing, &pattern(), &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnreadableRoot { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_files(root, &["films/(1997) Titanic.mkv"]);
        std::os::unix::fs::symlink(root.join("films"), root.join("films").join("again")).unwrap();

        let outcome = build_base_index(root, &pattern(), &ScanOptions::default()).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.report.count(FailureKind::FilesystemConflict), 1);
    }

    #[test]
    fn test_normalize_files_renames_and_reports() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_files(
            root,
            &[
                "Titanic (1997).mkv",
                "Heat.1995.1080p.BluRay.avi",
                "(2009) Up.mp4",
                "Casablanca.mkv",
            ],
        );

        let outcome = normalize_files(root, &pattern(), false, |_, _| None).unwrap();
        assert_eq!(outcome.renamed.len(), 2);
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(outcome.report.count(FailureKind::Rename), 1);

        assert!(root.join("(1997) Titanic.mkv").exists());
        assert!(root.join("(1995) Heat.avi").exists());
        assert!(root.join("Casablanca.mkv").exists());
        assert!(!root.join("Titanic (1997).mkv").exists());
    }

    #[test]
    fn test_normalize_files_dry_run() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_files(root, &["Titanic (1997).mkv"]);

        let outcome = normalize_files(root, &pattern(), true, |_, _| None).unwrap();
        assert_eq!(outcome.renamed.len(), 1);
        assert!(root.join("Titanic (1997).mkv").exists());
        assert!(!root.join("(1997) Titanic.mkv").exists());
    }

    #[test]
    fn test_normalize_files_uses_resolver() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_files(root, &["Casablanca.mkv"]);

        let outcome = normalize_files(root, &pattern(), false, |_, failure| {
            assert_eq!(failure, &NormalizeFailure::NoYear);
            Some("(1942) Casablanca".to_string())
        })
        .unwrap();
        assert_eq!(outcome.renamed.len(), 1);
        assert!(root.join("(1942) Casablanca.mkv").exists());
    }

    #[test]
    fn test_normalize_files_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_files(root, &["Titanic (1997).mkv", "(1997) Titanic.mkv"]);

        let outcome = normalize_files(root, &pattern(), false, |_, _| None).unwrap();
        assert!(outcome.renamed.is_empty());
        assert_eq!(outcome.report.count(FailureKind::Rename), 1);
        assert_eq!(
            fs::read_to_string(root.join("(1997) Titanic.mkv")).unwrap(),
            "(1997) Titanic.mkv"
        );
    }

    #[test]
    fn test_generate_base_index_writes_table() {
        let temp_dir = TempDir::new().unwrap();
        let root = std::path::absolute(temp_dir.path()).unwrap();
        create_test_files(&root, &["(1997) Titanic [HD].mkv", "notes.txt"]);

        let settings = Settings::new(&root);
        let outcome = generate_base_index(&settings, &pattern(), &ScanOptions::default()).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        let text = fs::read_to_string(settings.path(BASE_INDEX_FILE)).unwrap();
        assert_eq!(
            text,
            format!("Titanic\t1997\t{}\n", root.join("(1997) Titanic [HD].mkv").display())
        );
    }
}
