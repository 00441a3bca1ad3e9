//! External toolchain adapters for the Kiln build cache.
//!
//! The cache core treats the compiler as an opaque collaborator: something
//! that can expand a source file through its preprocessor and compile it
//! into a loadable binary, reporting failures as captured subprocess
//! output. This crate defines that collaborator surface ([`Toolchain`],
//! [`CommandRunner`]) and ships the nvcc adapter ([`NvccToolchain`]) with
//! its environment discovery: host-compiler location and GPU architecture.

mod command;
mod error;
mod nvcc;

pub use command::{format_command, CommandOutput, CommandRunner, DefaultCommandRunner};
pub use error::ToolchainError;
pub use nvcc::{NvccConfig, NvccToolchain};

use std::path::Path;

use kiln_core::{BuildConfig, SourceUnit};

/// An external compiler toolchain.
///
/// Both build steps receive the opaque [`BuildConfig`] so adapters that
/// derive flags from it can do so; the nvcc adapter assembles its command
/// line from its own configuration instead. Failures carry the invoked
/// command line and the captured combined output, and are reported as
/// values, never used for control flow beyond aborting the request.
pub trait Toolchain: Send + Sync {
    /// A stable description of the compile invocation. Folded into the
    /// build configuration, and therefore into fingerprints: when the
    /// invocation changes, previously cached artifacts no longer match.
    fn invocation(&self) -> Result<String, ToolchainError>;

    /// Run the preprocessor over `source`, writing the expanded output to
    /// `output`.
    fn preprocess(
        &self,
        source: &SourceUnit,
        config: &BuildConfig,
        output: &Path,
    ) -> Result<(), ToolchainError>;

    /// Compile `source` into a loadable binary module at `output`.
    fn compile(
        &self,
        source: &SourceUnit,
        config: &BuildConfig,
        output: &Path,
    ) -> Result<(), ToolchainError>;
}
