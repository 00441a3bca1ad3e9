use std::fs;
use std::path::{Path, PathBuf};

use kiln_core::SourceUnit;
use serde::Serialize;

use crate::cache_dir::CacheConfig;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::util::install_atomic;

/// Platform extension for loadable binary modules.
pub(crate) const ARTIFACT_EXTENSION: &str = std::env::consts::DLL_EXTENSION;

/// Maps fingerprints to compiled artifacts under a flat cache root.
///
/// Existence checks are plain file-presence probes with no locking: two
/// racing builders may both compile the same fingerprint, which wastes CPU
/// but is never unsafe, because [`CacheStore::publish`] installs artifacts
/// with an atomic rename. The store requires atomic-rename semantics of the
/// cache-root filesystem; under that requirement any file at a final entry
/// path is a complete publish, and entries are trusted on read without
/// revalidation.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

/// One published artifact, as recovered from its file name.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    /// Source stem the artifact was built from.
    pub stem: String,
    /// Fingerprint recovered from the file name.
    pub fingerprint: Fingerprint,
    /// Absolute path of the artifact.
    pub path: PathBuf,
    /// Artifact size in bytes.
    pub size_bytes: u64,
}

impl CacheStore {
    /// Opens the store at the root selected by `config`, creating the
    /// directory on demand.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let root = config.resolve_root()?;
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Opens the store at an explicit root, creating it on demand.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pure naming function: `<root>/<stem>_<fingerprint_hex>.<dll_ext>`.
    ///
    /// The stem keeps artifacts for different sources apart even on a
    /// digest collision across namespaces; the hex keeps the fingerprint
    /// recoverable from the file name for diagnostics.
    pub fn entry_path(&self, source: &SourceUnit, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(format!(
            "{}_{}.{}",
            source.stem(),
            fingerprint,
            ARTIFACT_EXTENSION
        ))
    }

    /// Whether a published artifact exists for this source + fingerprint.
    pub fn contains(&self, source: &SourceUnit, fingerprint: &Fingerprint) -> bool {
        self.entry_path(source, fingerprint).is_file()
    }

    /// Atomically publish a compiled artifact into the cache.
    ///
    /// The temporary artifact is copied into the cache root under a unique
    /// intermediate name and then renamed onto the final entry path, so a
    /// concurrent reader either sees no entry or a complete one. If two
    /// publishers race on the same fingerprint, either rename winning is
    /// correct: equal fingerprints imply equivalent content.
    pub fn publish(
        &self,
        source: &SourceUnit,
        fingerprint: &Fingerprint,
        temp_artifact: &Path,
    ) -> Result<PathBuf> {
        let final_path = self.entry_path(source, fingerprint);
        install_atomic(temp_artifact, &final_path)?;
        tracing::info!(
            target = "kiln.cache",
            source = %source.short_name(),
            fingerprint = %fingerprint,
            path = %final_path.display(),
            "published artifact"
        );
        Ok(final_path)
    }

    /// Enumerate published artifacts by inspecting entry file names.
    ///
    /// Files that do not parse as `<stem>_<hex>.<dll_ext>` (orphaned
    /// intermediates, foreign files) are skipped.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            let Some(entry) = parse_entry_file_name(&path) else {
                continue;
            };
            let meta = dir_entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            entries.push(CacheEntry {
                stem: entry.0,
                fingerprint: entry.1,
                path,
                size_bytes: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Remove every published artifact (and any orphaned intermediates)
    /// from the cache root. Returns the number of files removed.
    pub fn clean(&self) -> Result<usize> {
        let mut removed = 0usize;
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        tracing::debug!(
            target = "kiln.cache",
            root = %self.root.display(),
            removed,
            "cleaned cache root"
        );
        Ok(removed)
    }
}

fn parse_entry_file_name(path: &Path) -> Option<(String, Fingerprint)> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(ARTIFACT_EXTENSION) {
        return None;
    }
    let file_stem = path.file_stem()?.to_str()?;
    let (stem, hex) = file_stem.rsplit_once('_')?;
    if stem.is_empty() {
        return None;
    }
    let fingerprint = Fingerprint::from_hex(hex)?;
    Some((stem.to_string(), fingerprint))
}
