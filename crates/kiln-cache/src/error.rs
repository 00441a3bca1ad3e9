pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by cache storage and publication.
///
/// These are hard errors: the cache never degrades a failed publish into a
/// silent miss, because the caller needs to know its artifact was not made
/// durable.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to determine home directory for default cache path")]
    MissingHomeDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
