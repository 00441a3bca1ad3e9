//! Shared vocabulary types for the Kiln build cache.
//!
//! This crate is a leaf: it defines the identity of a compilable input
//! ([`SourceUnit`]) and the opaque build-configuration descriptor
//! ([`BuildConfig`]) that the rest of the workspace fingerprints, caches,
//! compiles, and loads. It deliberately knows nothing about hashing,
//! toolchains, or the on-disk cache layout.

mod config;
mod source;

pub use config::BuildConfig;
pub use source::{SourceError, SourceUnit};
