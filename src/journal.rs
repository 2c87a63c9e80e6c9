use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

#[derive(Serialize, Deserialize)]
struct Line<V> {
    key: String,
    value: V,
}

/// How to treat a line that does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnCorruption {
    /// Refuse to open the journal.
    Fail,
    /// Log and skip the line.
    Skip,
}

/// Append-only key/value store kept as JSON lines, flushed after every put.
/// On open, later lines override earlier ones for the same key.
#[derive(Debug)]
pub struct Journal<V> {
    path: Option<PathBuf>,
    file: Option<File>,
    entries: BTreeMap<String, V>,
}

impl<V> Journal<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// A journal that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: None,
            entries: BTreeMap::new(),
        }
    }

    /// Open (or create) the journal at `path` and replay its lines.
    pub fn open(path: &Path, on_corruption: OnCorruption) -> Result<Self> {
        let mut entries = BTreeMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (number, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Line<V>>(&line) {
                    Ok(parsed) => {
                        entries.insert(parsed.key, parsed.value);
                    }
                    Err(err) => match on_corruption {
                        OnCorruption::Fail => {
                            return Err(Error::CheckpointCorruption {
                                path: path.to_path_buf(),
                                line: number + 1,
                                reason: err.to_string(),
                            });
                        }
                        OnCorruption::Skip => {
                            tracing::warn!(path = ?path, line = number + 1, "skipping unreadable journal line: {}", err);
                        }
                    },
                }
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            file: Some(file),
            entries,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    /// Record `value` under `key`, durably when the journal is file-backed.
    pub fn put(&mut self, key: impl Into<String>, value: V) -> Result<()> {
        let key = key.into();
        if let Some(file) = self.file.as_mut() {
            let mut line = serde_json::to_vec(&Line {
                key: key.clone(),
                value: &value,
            })?;
            line.push(b'\n');
            file.write_all(&line)?;
            file.flush()?;
            file.sync_data()?;
        }
        self.entries.insert(key, value);
        Ok(())
    }
}
