use std::path::PathBuf;

use crate::error::{CacheError, Result};

/// Configuration for selecting the on-disk cache root.
#[derive(Clone, Debug, Default)]
pub struct CacheConfig {
    /// Override the cache root directory.
    pub cache_root_override: Option<PathBuf>,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            cache_root_override: std::env::var_os("KILN_CACHE_DIR").map(PathBuf::from),
        }
    }

    /// The cache root this configuration selects: the override when set,
    /// `~/.kiln/cache` otherwise.
    pub fn resolve_root(&self) -> Result<PathBuf> {
        match &self.cache_root_override {
            Some(root) => Ok(root.clone()),
            None => default_cache_root(),
        }
    }
}

fn default_cache_root() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or(CacheError::MissingHomeDir)?;

    Ok(home.join(".kiln").join("cache"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn override_wins() {
        let config = CacheConfig {
            cache_root_override: Some(PathBuf::from("/srv/kiln-cache")),
        };
        assert_eq!(config.resolve_root().unwrap(), Path::new("/srv/kiln-cache"));
    }
}
