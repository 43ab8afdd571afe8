//! Incremental cache: content-addressed fragment persistence.
//!
//! One JSON entry per analyzed file, stored in a per-project directory and
//! keyed by the source path. An entry is valid if and only if its stored
//! content hash equals the current hash of the file's text — validity is
//! re-checked on every load, never inferred from timestamps.
//!
//! The three miss flavors are kept apart so operators can tell "never
//! cached" from "cache invalidated" from "cache damaged"; all three recover
//! the same way (cold build).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use loupe_core::error::LoupeResult;
use loupe_core::graph::{Fragment, FRAGMENT_SCHEMA_VERSION};
use loupe_core::hash::ContentHash;

/// Why a load produced no fragment. Every flavor recovers the same way
/// (cold build); they are distinguished for operators, not for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheMiss {
    /// No entry for this path.
    #[error("no cache entry")]
    Cold,
    /// Entry exists but its hash (or schema) no longer matches.
    #[error("cache entry no longer matches file content")]
    Stale,
    /// Entry exists but cannot be read or parsed.
    #[error("cache entry unreadable")]
    Corrupt,
}

/// On-disk entry format.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    schema_version: u32,
    path: String,
    content_hash: ContentHash,
    fragment: Fragment,
}

/// Per-project fragment cache.
#[derive(Debug)]
pub struct FragmentCache {
    dir: PathBuf,
}

impl FragmentCache {
    /// Open (creating if needed) a cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> LoupeResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FragmentCache { dir })
    }

    /// Entry file for a source path: hash of the path, so arbitrary paths
    /// map to flat file names.
    fn entry_path(&self, path: &str) -> PathBuf {
        let name = ContentHash::compute(path.as_bytes());
        self.dir.join(format!("{}.json", name))
    }

    /// Load the cached fragment for `path`, validating against the file's
    /// current text. Corrupt or unreadable entries are a miss, never fatal.
    pub fn load(&self, path: &str, current_text: &str) -> Result<Fragment, CacheMiss> {
        let entry_path = self.entry_path(path);
        let raw = match fs::read(&entry_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path, "cache miss (cold)");
                return Err(CacheMiss::Cold);
            }
            Err(e) => {
                warn!(path, error = %e, "cache miss (unreadable entry)");
                return Err(CacheMiss::Corrupt);
            }
        };
        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path, error = %e, "cache miss (corrupt entry)");
                return Err(CacheMiss::Corrupt);
            }
        };
        if entry.schema_version != FRAGMENT_SCHEMA_VERSION {
            debug!(
                path,
                got = entry.schema_version,
                expected = FRAGMENT_SCHEMA_VERSION,
                "cache miss (schema version)"
            );
            return Err(CacheMiss::Stale);
        }
        let current = ContentHash::compute(current_text.as_bytes());
        if entry.content_hash != current {
            debug!(path, "cache miss (hash mismatch)");
            return Err(CacheMiss::Stale);
        }
        debug!(path, "cache hit");
        Ok(entry.fragment)
    }

    /// Persist a fragment keyed by its content hash.
    pub fn store(&self, path: &str, hash: ContentHash, fragment: &Fragment) -> LoupeResult<()> {
        let entry = CacheEntry {
            schema_version: FRAGMENT_SCHEMA_VERSION,
            path: path.to_string(),
            content_hash: hash,
            fragment: fragment.clone(),
        };
        let payload = serde_json::to_vec(&entry)?;
        fs::write(self.entry_path(path), payload)?;
        Ok(())
    }

    /// Drop the entry for a path, if any.
    pub fn invalidate(&self, path: &str) {
        let entry_path = self.entry_path(path);
        match fs::remove_file(&entry_path) {
            Ok(()) => debug!(path, "cache entry invalidated"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path, error = %e, "failed to remove cache entry"),
        }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// ============================================================================
// Tests
// ============================================================================
