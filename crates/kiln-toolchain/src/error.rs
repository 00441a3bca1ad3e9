use std::path::PathBuf;

/// Errors reported by toolchain adapters.
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    /// No host compiler installation was found in any searched location.
    /// Fatal configuration problem; never retried.
    #[error("no host compiler installation found (searched {searched:?})")]
    CompilerNotFound { searched: Vec<PathBuf> },

    /// A required external tool could not be spawned because it does not
    /// exist on this system.
    #[error("required tool {tool} was not found on this system")]
    MissingTool { tool: PathBuf },

    /// The GPU architecture could not be determined and no override was
    /// configured.
    #[error("could not determine GPU architecture: {reason}")]
    ArchUnavailable { reason: String },

    /// A toolchain subprocess exited with a failure status. Carries the
    /// invoked command line and the captured combined output so the caller
    /// can report the failure verbatim.
    #[error("toolchain command failed with exit code {code:?}:\n{command}\n\n{output}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolchainError {
    /// Whether this error reflects missing environment configuration (a
    /// tool or compiler that is not installed) rather than a failed build.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::CompilerNotFound { .. } | Self::MissingTool { .. }
        )
    }
}
