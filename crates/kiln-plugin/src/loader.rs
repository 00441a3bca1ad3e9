use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;

/// Errors produced while loading a published artifact into the process.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to load plugin library {path}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol `{symbol}` not found in {path}")]
    Symbol {
        path: PathBuf,
        symbol: String,
        #[source]
        source: libloading::Error,
    },
}

/// Loads a published artifact into the running process.
///
/// The associated `Handle` is whatever the loader hands back for a loaded
/// module; handles are cloned into the in-process registry, so they must be
/// cheap to clone.
pub trait PluginLoader: Send + Sync {
    type Handle: Clone + Send + Sync;

    fn load(&self, artifact: &Path) -> Result<Self::Handle, LoadError>;
}

/// A dynamically loaded plugin module.
///
/// Keeps the underlying library alive for as long as any handle exists;
/// symbols resolved through [`Plugin::symbol`] borrow the handle and cannot
/// outlive it.
#[derive(Clone)]
pub struct Plugin {
    shared: Arc<PluginShared>,
}

struct PluginShared {
    path: PathBuf,
    library: Library,
}

impl Plugin {
    /// Path of the artifact this module was loaded from.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Resolve a symbol from the loaded module.
    ///
    /// # Safety
    ///
    /// The caller must spell the type `T` correctly for what the module
    /// actually exports; see [`libloading::Library::get`].
    pub unsafe fn symbol<T>(&self, name: &str) -> Result<libloading::Symbol<'_, T>, LoadError> {
        let mut raw = Vec::with_capacity(name.len() + 1);
        raw.extend_from_slice(name.as_bytes());
        raw.push(0);
        self.shared
            .library
            .get(&raw)
            .map_err(|source| LoadError::Symbol {
                path: self.shared.path.clone(),
                symbol: name.to_string(),
                source,
            })
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("path", &self.shared.path)
            .finish_non_exhaustive()
    }
}

/// Loads artifacts with the platform dynamic linker.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicLoader;

impl PluginLoader for DynamicLoader {
    type Handle = Plugin;

    fn load(&self, artifact: &Path) -> Result<Plugin, LoadError> {
        // SAFETY: loading a library runs its initializers; artifacts come
        // from the caller's own toolchain via the cache, which is the same
        // trust boundary as linking against them directly.
        let library = unsafe { Library::new(artifact) }.map_err(|source| LoadError::Library {
            path: artifact.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            target = "kiln.plugin",
            path = %artifact.display(),
            "loaded plugin library"
        );
        Ok(Plugin {
            shared: Arc::new(PluginShared {
                path: artifact.to_path_buf(),
                library,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_a_non_library_file_fails_with_the_path_in_the_error() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("not_a_library.so");
        std::fs::write(&bogus, b"definitely not machine code").unwrap();

        let err = DynamicLoader.load(&bogus).unwrap_err();
        match &err {
            LoadError::Library { path, .. } => assert_eq!(path, &bogus),
            other => panic!("expected Library error, got {other:?}"),
        }
        assert!(err.to_string().contains("not_a_library.so"));
    }

    #[test]
    fn loading_a_missing_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(DynamicLoader.load(&tmp.path().join("absent.so")).is_err());
    }
}
