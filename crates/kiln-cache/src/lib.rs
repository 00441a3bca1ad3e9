//! Content-addressed cache for natively compiled plugin artifacts.
//!
//! The cache maps a [`Fingerprint`] (a digest of the raw source bytes, the
//! normalized preprocessor output, and the opaque build configuration) to a
//! compiled shared library under a flat cache root. Publication is a copy to
//! a unique intermediate name followed by a single atomic rename, so a
//! concurrent reader either sees nothing at the final path or a complete,
//! loadable artifact; it never sees a partial write.
//!
//! On-disk layout: `<cache_root>/<source_stem>_<fingerprint_hex>.<dll_ext>`.
//! Embedding the source stem keeps entries for different sources apart even
//! across digest-collision namespaces, and the fingerprint stays recoverable
//! from the file name for diagnostics.

mod cache_dir;
mod error;
mod fingerprint;
mod store;
mod util;

pub use cache_dir::CacheConfig;
pub use error::{CacheError, Result};
pub use fingerprint::Fingerprint;
pub use store::{CacheEntry, CacheStore};
