//! Identity cache - opaque id <-> handle mappings learned from the daemon.
//!
//! signal-cli cannot look a username up from a UUID, so every pairing we
//! observe (inbound envelopes, send acknowledgments) is remembered here and
//! flushed to disk immediately.
//!
//! CHANGELOG:
//! - 10/19/2026 - Atomic rewrite on every update, last-write-wins on names
//! - 10/19/2026 - Initial implementation

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Env var overriding the cache location.
pub const CACHE_PATH_ENV: &str = "SIGNAL_BRIDGE_CACHE_PATH";

/// Default cache file path.
///
/// Tries multiple locations in order:
/// 1. SIGNAL_BRIDGE_CACHE_PATH env var
/// 2. <local data dir>/signal-bridge/username_cache.json
/// 3. ./username_cache.json
pub fn default_cache_path() -> PathBuf {
    if let Ok(path) = std::env::var(CACHE_PATH_ENV) {
        return PathBuf::from(shellexpand::tilde(&path).to_string());
    }

    if let Some(data_dir) = dirs::data_local_dir() {
        return data_dir.join("signal-bridge").join("username_cache.json");
    }

    PathBuf::from("username_cache.json")
}

#[derive(Debug, Default)]
struct Mappings {
    /// opaque id -> handle, as persisted
    by_id: BTreeMap<String, String>,
    /// lowercased handle -> opaque id
    by_name: HashMap<String, String>,
}

impl Mappings {
    /// Insert a pairing, evicting whatever conflicts with it.
    fn insert(&mut self, id: &str, name: &str) {
        if let Some(old) = self.by_id.get(id) {
            let old_key = name_key(old);
            if self.by_name.get(&old_key).map(String::as_str) == Some(id) {
                self.by_name.remove(&old_key);
            }
        }

        if let Some(previous_id) = self.by_name.insert(name_key(name), id.to_string()) {
            if previous_id != id {
                self.by_id.remove(&previous_id);
            }
        }

        self.by_id.insert(id.to_string(), name.to_string());
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Bidirectional opaque-id/handle map backed by a JSON file.
///
/// Reads take a shared lock; `update` is the only writer and holds a
/// separate mutex across mutate + persist so file writes never reorder.
#[derive(Debug)]
pub struct IdentityCache {
    path: Option<PathBuf>,
    mappings: RwLock<Mappings>,
    writer: Mutex<()>,
}

impl IdentityCache {
    /// Load the cache from a JSON file.
    ///
    /// Missing or corrupt files start an empty cache rather than failing.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut mappings = Mappings::default();

        match read_cache_file(&path) {
            Ok(Some(entries)) => {
                for (id, name) in &entries {
                    if !id.is_empty() && !name.is_empty() {
                        mappings.insert(id, name);
                    }
                }
                debug!(entries = mappings.by_id.len(), path = ?path, "loaded identity cache");
            }
            Ok(None) => debug!(path = ?path, "no identity cache yet, starting empty"),
            Err(e) => warn!(path = ?path, error = %e, "failed to load identity cache, starting empty"),
        }

        info!(path = ?path, "initialized identity cache");
        Self {
            path: Some(path),
            mappings: RwLock::new(mappings),
            writer: Mutex::new(()),
        }
    }

    /// Load from the default path.
    pub fn load_default() -> Self {
        Self::load(default_cache_path())
    }

    /// Create a cache that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            mappings: RwLock::new(Mappings::default()),
            writer: Mutex::new(()),
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Resolve a reference to an opaque id, or hand back the input unchanged.
    pub fn resolve(&self, reference: &str) -> String {
        self.resolve_name(reference)
            .unwrap_or_else(|| reference.to_string())
    }

    /// Opaque id currently holding this handle (case-insensitive).
    pub fn resolve_name(&self, name: &str) -> Option<String> {
        self.read().by_name.get(&name_key(name)).cloned()
    }

    /// Handle recorded for an opaque id.
    pub fn name_for(&self, id: &str) -> Option<String> {
        self.read().by_id.get(id).cloned()
    }

    /// Record (or move) a pairing and persist it.
    ///
    /// Returns true when the mapping changed. Persistence failures are
    /// logged; the in-memory update still stands.
    pub fn update(&self, id: &str, name: &str) -> bool {
        let id = id.trim();
        let name = name.trim();
        if id.is_empty() || name.is_empty() {
            return false;
        }

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = {
            let mut mappings = self
                .mappings
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if mappings.by_id.get(id).map(String::as_str) == Some(name) {
                return false;
            }
            mappings.insert(id, name);
            mappings.by_id.clone()
        };

        debug!(id, name, "cached identity mapping");
        if let Err(e) = self.persist(&snapshot) {
            warn!(error = %e, "failed to save identity cache");
        }
        true
    }

    /// Number of known opaque ids.
    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All (opaque id, handle) pairs, ordered by id.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.read()
            .by_id
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Mappings> {
        self.mappings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rewrite the cache file atomically (temp file + rename).
    fn persist(&self, snapshot: &BTreeMap<String, String>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory: {:?}", dir))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
        serde_json::to_writer_pretty(&mut tmp, snapshot).context("Failed to serialize cache")?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace cache file: {:?}", path))?;

        debug!(entries = snapshot.len(), "saved identity cache");
        Ok(())
    }
}

fn read_cache_file(path: &Path) -> Result<Option<BTreeMap<String, String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cache file: {:?}", path))?;
    let entries = serde_json::from_str(&content).context("Failed to parse cache JSON")?;
    Ok(Some(entries))
}
