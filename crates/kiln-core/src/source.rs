use std::fmt;
use std::path::{Path, PathBuf};

/// Errors produced while describing a source input.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The path has no usable base file name (e.g. `/` or a path ending
    /// in `..`), or the base name is not valid UTF-8.
    #[error("source path {path} has no usable file name")]
    InvalidFileName {
        /// The offending path.
        path: PathBuf,
    },
}

/// Identity of a compilable input for the duration of one build request.
///
/// A `SourceUnit` carries the path exactly as the caller supplied it (this
/// is the in-process registry key) together with a stable short name derived
/// from the base file name. The short name serves two purposes: it is the
/// stem of the published artifact's file name, and it is the replacement
/// text used when preprocessor output is rewritten so that the absolute
/// build-host path of the source never perturbs the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    path: PathBuf,
    short_name: String,
    stem: String,
    extension: Option<String>,
}

impl SourceUnit {
    /// Describes the source file at `path`.
    ///
    /// The path is kept as given; it is not canonicalized, so the same file
    /// reached through two different paths yields two distinct identities.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let short_name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(SourceError::InvalidFileName { path }),
        };
        let (stem, extension) = match short_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
            _ => (short_name.clone(), None),
        };
        Ok(Self {
            path,
            short_name,
            stem,
            extension,
        })
    }

    /// The path exactly as supplied by the caller.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base file name, e.g. `fused_bias_act.cu`.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Base file name without its extension, e.g. `fused_bias_act`.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// File extension without the leading dot, if any.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// `.ext` suffix suitable for appending to a derived file name, or an
    /// empty string when the source has no extension.
    pub fn extension_suffix(&self) -> String {
        match &self.extension {
            Some(ext) => format!(".{ext}"),
            None => String::new(),
        }
    }
}

impl fmt::Display for SourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.display().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_short_name_stem_and_extension() {
        let source = SourceUnit::new("/srv/kernels/fused_bias_act.cu").unwrap();
        assert_eq!(source.short_name(), "fused_bias_act.cu");
        assert_eq!(source.stem(), "fused_bias_act");
        assert_eq!(source.extension(), Some("cu"));
        assert_eq!(source.extension_suffix(), ".cu");
    }

    #[test]
    fn keeps_path_as_given() {
        let source = SourceUnit::new("../kernels/upfirdn.cu").unwrap();
        assert_eq!(source.path(), Path::new("../kernels/upfirdn.cu"));
    }

    #[test]
    fn source_without_extension() {
        let source = SourceUnit::new("/srv/kernels/kernel").unwrap();
        assert_eq!(source.short_name(), "kernel");
        assert_eq!(source.stem(), "kernel");
        assert_eq!(source.extension(), None);
        assert_eq!(source.extension_suffix(), "");
    }

    #[test]
    fn dotfile_is_all_stem() {
        let source = SourceUnit::new("/srv/kernels/.hidden").unwrap();
        assert_eq!(source.stem(), ".hidden");
        assert_eq!(source.extension(), None);
    }

    #[test]
    fn rejects_path_without_file_name() {
        assert!(matches!(
            SourceUnit::new("/"),
            Err(SourceError::InvalidFileName { .. })
        ));
        assert!(matches!(
            SourceUnit::new("/srv/kernels/.."),
            Err(SourceError::InvalidFileName { .. })
        ));
    }

    #[test]
    fn same_content_different_paths_are_distinct_identities() {
        let a = SourceUnit::new("/tmp/a/kernel.cu").unwrap();
        let b = SourceUnit::new("/tmp/b/kernel.cu").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.short_name(), b.short_name());
    }
}
