//! Build-or-reuse orchestration for natively compiled plugin modules.
//!
//! [`PluginBuilder`] ties the pieces together: an in-process registry of
//! already loaded modules, the fingerprint computation (source bytes +
//! normalized preprocessor output + build configuration), the
//! content-addressed artifact cache, the external toolchain, and the
//! dynamic loader. A build request walks registry → cache → compile →
//! publish → load → register, and any failure along the way aborts the
//! request with its underlying cause.

mod builder;
mod error;
mod loader;
mod registry;

pub use builder::{BuildOptions, PluginBuilder};
pub use error::BuildError;
pub use loader::{DynamicLoader, LoadError, Plugin, PluginLoader};
pub use registry::PluginRegistry;
