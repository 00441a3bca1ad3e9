use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Process-lifetime memoization of loaded plugin handles.
///
/// Keyed by the source path exactly as the caller supplied it, so identical
/// content reached through two different paths stays distinct here (the
/// on-disk cache key is path-independent; this layer deliberately does not
/// assume that). Entries are created at most once per identity and never
/// evicted; the registry is purely an optimization to skip repeated
/// fingerprinting and loading within one process, never a correctness
/// mechanism, and must not be persisted across runs.
#[derive(Debug, Default)]
pub struct PluginRegistry<H> {
    entries: Mutex<HashMap<PathBuf, H>>,
}

impl<H: Clone> PluginRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, identity: &Path) -> Option<H> {
        self.lock().get(identity).cloned()
    }

    pub fn insert(&self, identity: PathBuf, handle: H) {
        self.lock().insert(identity, handle);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, H>> {
        // A panic while holding the lock leaves plain data behind; keep
        // serving it rather than poisoning every later build request.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_what_was_inserted() {
        let registry = PluginRegistry::new();
        assert!(registry.get(Path::new("/srv/kernel.cu")).is_none());

        registry.insert(PathBuf::from("/srv/kernel.cu"), "handle".to_string());
        assert_eq!(
            registry.get(Path::new("/srv/kernel.cu")).as_deref(),
            Some("handle")
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn identities_are_paths_as_given() {
        let registry = PluginRegistry::new();
        registry.insert(PathBuf::from("/srv/kernel.cu"), 1u32);
        // A different spelling of the same file is a different identity.
        assert!(registry.get(Path::new("/srv/../srv/kernel.cu")).is_none());
    }
}
