// SPDX-License-Identifier: Apache-2.0

//! The durable registry: per-file read progress, ground truth for resume.
//!
//! Loaded once at startup and mutated only by the registrar loop. Writes go
//! to a deterministic sibling temp file followed by an atomic rename, so a
//! crash mid-write leaves either the old registry or a promotable temp file,
//! never a torn one.

pub mod registrar;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identity::FileIdentity;

pub const REGISTRY_VERSION: u32 = 1;

/// Tracked progress for one file.
#[derive(Debug, Clone)]
pub struct FileState {
    pub source: PathBuf,
    /// Bytes durably consumed. Monotonically non-decreasing while a
    /// harvester owns the file, except a reset to 0 on truncation.
    pub offset: u64,
    pub identity: FileIdentity,
    /// No harvester currently owns the file. In-memory only.
    pub finished: bool,
    /// Prospector scan iteration the path was last seen in. In-memory only.
    pub last_seen_iteration: u64,
}

impl FileState {
    pub fn new(source: PathBuf, offset: u64, identity: FileIdentity) -> Self {
        Self {
            source,
            offset,
            identity,
            finished: false,
            last_seen_iteration: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryEntry {
    source: PathBuf,
    offset: u64,
    dev: u64,
    ino: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedRegistry {
    version: u32,
    files: HashMap<String, RegistryEntry>,
}

/// The persisted path → state map. Single writer: the registrar loop.
pub struct Registry {
    path: PathBuf,
    states: HashMap<PathBuf, FileState>,
}

impl Registry {
    /// Load the registry from disk. Missing or corrupt files produce an
    /// empty registry; this is never fatal. A temp file orphaned by a crash
    /// immediately after the write step is promoted first.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let tmp = temp_path(&path);

        if tmp.exists() {
            if path.exists() {
                // A live registry exists, the temp write never completed.
                debug!(temp = %tmp.display(), "Removing stale registry temp file");
                let _ = fs::remove_file(&tmp);
            } else {
                // Crash after writing the temp file but before the rename.
                info!(temp = %tmp.display(), "Promoting orphaned registry temp file");
                if let Err(e) = fs::rename(&tmp, &path) {
                    warn!(error = %e, "Failed to promote registry temp file");
                }
            }
        }

        let states = match Self::read_states(&path) {
            Ok(states) => {
                info!(count = states.len(), path = %path.display(), "Loaded registry");
                states
            }
            Err(e) => {
                if path.exists() {
                    warn!(error = %e, path = %path.display(),
                        "Failed to load registry, starting empty");
                }
                HashMap::new()
            }
        };

        Self { path, states }
    }

    /// In-memory registry for tests.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            states: HashMap::new(),
        }
    }

    fn read_states(path: &Path) -> Result<HashMap<PathBuf, FileState>> {
        let file = File::open(path)?;
        let persisted: PersistedRegistry = serde_json::from_reader(BufReader::new(file))?;
        if persisted.version > REGISTRY_VERSION {
            return Err(Error::Registry(format!(
                "unsupported registry version {}",
                persisted.version
            )));
        }
        Ok(persisted
            .files
            .into_values()
            .map(|e| {
                let state = FileState {
                    source: e.source,
                    offset: e.offset,
                    identity: FileIdentity::new(e.dev, e.ino),
                    finished: true,
                    last_seen_iteration: 0,
                };
                (state.source.clone(), state)
            })
            .collect())
    }

    pub fn get(&self, source: &Path) -> Option<&FileState> {
        self.states.get(source)
    }

    /// Look up prior state by identity, for files that reappeared under a
    /// new path.
    pub fn find_by_identity(&self, identity: &FileIdentity) -> Option<&FileState> {
        self.states.values().find(|s| s.identity == *identity)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> impl Iterator<Item = &FileState> {
        self.states.values()
    }

    /// Insert or update the entry for `state.source`. Any entry recorded
    /// under a previous path of the same identity is dropped so a rename
    /// does not leave two entries pointing at one file.
    pub fn upsert(&mut self, state: FileState) {
        self.states
            .retain(|path, s| s.identity != state.identity || *path == state.source);
        self.states.insert(state.source.clone(), state);
    }

    /// Serialize the full map to a sibling temp file, flush it, then rename
    /// it over the live registry.
    pub fn write(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let persisted = PersistedRegistry {
            version: REGISTRY_VERSION,
            files: self
                .states
                .values()
                .map(|s| {
                    (
                        s.source.to_string_lossy().into_owned(),
                        RegistryEntry {
                            source: s.source.clone(),
                            offset: s.offset,
                            dev: s.identity.dev(),
                            ino: s.identity.ino(),
                        },
                    )
                })
                .collect(),
        };

        let tmp = temp_path(&self.path);
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &persisted)?;
        writer.flush()?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Deterministic temp path so an orphaned temp file can be promoted on the
/// next load.
fn temp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state(source: &str, offset: u64, dev: u64, ino: u64) -> FileState {
        FileState::new(PathBuf::from(source), offset, FileIdentity::new(dev, ino))
    }

    #[test]
    fn round_trip_reproduces_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry::load(&path);
        registry.upsert(state("/var/log/a.log", 100, 1, 10));
        registry.upsert(state("/var/log/b.log", 250, 1, 11));
        registry.write().unwrap();

        let reloaded = Registry::load(&path);
        assert_eq!(2, reloaded.len());
        assert_eq!(100, reloaded.get(Path::new("/var/log/a.log")).unwrap().offset);
        assert_eq!(250, reloaded.get(Path::new("/var/log/b.log")).unwrap().offset);
        assert_eq!(
            FileIdentity::new(1, 11),
            reloaded.get(Path::new("/var/log/b.log")).unwrap().identity
        );
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let registry = Registry::load(dir.path().join("missing.json"));
        assert!(registry.is_empty());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{not json").unwrap();

        let registry = Registry::load(&path);
        assert!(registry.is_empty());
    }

    #[test]
    fn orphaned_temp_file_is_promoted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");

        // Simulate a crash that wrote only the temp file.
        let mut registry = Registry {
            path: path.clone(),
            states: HashMap::new(),
        };
        registry.upsert(state("/var/log/a.log", 42, 1, 10));
        registry.write().unwrap();
        fs::rename(&path, temp_path(&path)).unwrap();
        assert!(!path.exists());

        let reloaded = Registry::load(&path);
        assert_eq!(42, reloaded.get(Path::new("/var/log/a.log")).unwrap().offset);
        assert!(path.exists());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn stale_temp_file_is_ignored_when_live_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry {
            path: path.clone(),
            states: HashMap::new(),
        };
        registry.upsert(state("/var/log/a.log", 7, 1, 10));
        registry.write().unwrap();
        fs::write(temp_path(&path), "partial write").unwrap();

        let reloaded = Registry::load(&path);
        assert_eq!(7, reloaded.get(Path::new("/var/log/a.log")).unwrap().offset);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn upsert_replaces_renamed_entry() {
        let mut registry = Registry::in_memory();
        registry.upsert(state("/var/log/a.log", 100, 1, 10));
        registry.upsert(state("/var/log/a.log.1", 100, 1, 10));

        assert_eq!(1, registry.len());
        assert!(registry.get(Path::new("/var/log/a.log")).is_none());
        assert_eq!(
            100,
            registry.get(Path::new("/var/log/a.log.1")).unwrap().offset
        );
    }

    #[test]
    fn find_by_identity_matches_other_paths() {
        let mut registry = Registry::in_memory();
        registry.upsert(state("/var/log/a.log", 64, 3, 9));

        let found = registry.find_by_identity(&FileIdentity::new(3, 9)).unwrap();
        assert_eq!(PathBuf::from("/var/log/a.log"), found.source);
        assert!(registry.find_by_identity(&FileIdentity::new(3, 8)).is_none());
    }
}
