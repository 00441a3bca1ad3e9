use std::path::PathBuf;

use kiln_cache::CacheError;
use kiln_core::SourceError;
use kiln_toolchain::ToolchainError;

use crate::loader::LoadError;

/// Errors surfaced by the build-or-reuse protocol.
///
/// Every failure is propagated to the caller with its underlying cause;
/// nothing is swallowed or retried. The variants follow the taxonomy of the
/// collaborators: configuration problems (missing tools) are fatal for the
/// process, toolchain failures are fatal for the request and carry the
/// captured compiler output, cache I/O failures surface as-is, and a load
/// failure of a published artifact is fatal with no automatic quarantine.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A required external tool or compiler installation is not locatable.
    #[error("toolchain configuration error")]
    Configuration(#[source] ToolchainError),

    /// Preprocessing or compilation failed.
    #[error(transparent)]
    Toolchain(ToolchainError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("failed to read source {path}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Scratch-directory or preprocessed-output I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ToolchainError> for BuildError {
    fn from(err: ToolchainError) -> Self {
        if err.is_configuration() {
            Self::Configuration(err)
        } else {
            Self::Toolchain(err)
        }
    }
}
