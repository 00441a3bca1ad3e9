use std::fs;
use std::path::Path;

use kiln_cache::{CacheStore, Fingerprint};
use kiln_core::{BuildConfig, SourceUnit};
use kiln_toolchain::Toolchain;

use crate::error::BuildError;
use crate::loader::PluginLoader;
use crate::registry::PluginRegistry;

/// Knobs for the build-or-reuse protocol.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Fold the preprocessed form of the source (and therefore every header
    /// it includes) into the fingerprint. Disabling this speeds builds up
    /// by assuming included headers never change. Unsafe: edits to a
    /// header will silently keep hitting stale cache entries.
    pub hash_headers: bool,
    /// Version tag of the host runtime the plugins compile against.
    pub runtime_tag: String,
    /// Opaque cache-format tag; bump it to invalidate every prior entry.
    pub cache_tag: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            hash_headers: true,
            runtime_tag: String::new(),
            cache_tag: "v1".to_string(),
        }
    }
}

/// Compiles plugin sources at most once and loads them at most once per
/// process.
///
/// All state is owned by the instance (the artifact store, the in-process
/// registry, the toolchain adapter, the loader), so independent builders
/// (e.g. in tests) never observe each other through hidden globals. The
/// same source requested through two builders still shares the on-disk
/// cache when they share a cache root.
pub struct PluginBuilder<T, L: PluginLoader> {
    toolchain: T,
    loader: L,
    store: CacheStore,
    registry: PluginRegistry<L::Handle>,
    options: BuildOptions,
}

impl<T: Toolchain, L: PluginLoader> PluginBuilder<T, L> {
    pub fn new(toolchain: T, loader: L, store: CacheStore) -> Self {
        Self::with_options(toolchain, loader, store, BuildOptions::default())
    }

    pub fn with_options(toolchain: T, loader: L, store: CacheStore, options: BuildOptions) -> Self {
        Self {
            toolchain,
            loader,
            store,
            registry: PluginRegistry::new(),
            options,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn registry(&self) -> &PluginRegistry<L::Handle> {
        &self.registry
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Return the loaded module for `source_path`, compiling and caching it
    /// only if no equivalent artifact exists yet.
    ///
    /// Request flow: in-process registry → fingerprint (which preprocesses
    /// the source unless header hashing is off) → cache probe → compile on
    /// miss → atomic publish → load → register. Any failure aborts the
    /// request; nothing is registered and no cache entry is considered
    /// valid on the failure path.
    pub fn get_or_build(&self, source_path: impl AsRef<Path>) -> Result<L::Handle, BuildError> {
        let source = SourceUnit::new(source_path.as_ref())?;

        if let Some(handle) = self.registry.get(source.path()) {
            tracing::debug!(
                target = "kiln.plugin",
                source = %source,
                "plugin already loaded in this process"
            );
            return Ok(handle);
        }

        tracing::info!(
            target = "kiln.plugin",
            source = %source.short_name(),
            "setting up plugin"
        );

        let config = self.build_config()?;
        let fingerprint = self.compute_fingerprint(&source, &config)?;
        let artifact = self.store.entry_path(&source, &fingerprint);

        if self.store.contains(&source, &fingerprint) {
            tracing::debug!(
                target = "kiln.plugin",
                source = %source.short_name(),
                fingerprint = %fingerprint,
                "reusing cached artifact"
            );
        } else {
            tracing::info!(
                target = "kiln.plugin",
                source = %source.short_name(),
                fingerprint = %fingerprint,
                "compiling"
            );
            let scratch = tempfile::tempdir()?;
            let temp_artifact = scratch.path().join(format!(
                "{}_tmp.{}",
                source.stem(),
                std::env::consts::DLL_EXTENSION
            ));
            self.toolchain.compile(&source, &config, &temp_artifact)?;
            self.store.publish(&source, &fingerprint, &temp_artifact)?;
            // `scratch` drops here, removing the compiler's working files on
            // success and failure alike.
        }

        let handle = self.loader.load(&artifact)?;
        self.registry.insert(source.path().to_path_buf(), handle.clone());
        Ok(handle)
    }

    /// The opaque configuration folded into every fingerprint: the full
    /// toolchain invocation, the host-runtime tag, and the cache-format
    /// tag. Changing any of these invalidates prior cache entries.
    fn build_config(&self) -> Result<BuildConfig, BuildError> {
        let invocation = self.toolchain.invocation()?;
        Ok(BuildConfig::new([
            format!("toolchain: {invocation}"),
            format!("runtime: {}", self.options.runtime_tag),
            format!("cache-format: {}", self.options.cache_tag),
        ]))
    }

    fn compute_fingerprint(
        &self,
        source: &SourceUnit,
        config: &BuildConfig,
    ) -> Result<Fingerprint, BuildError> {
        let source_bytes = fs::read(source.path()).map_err(|err| BuildError::SourceRead {
            path: source.path().to_path_buf(),
            source: err,
        })?;

        let preprocessed = if self.options.hash_headers {
            tracing::debug!(
                target = "kiln.plugin",
                source = %source.short_name(),
                "preprocessing for fingerprint"
            );
            let scratch = tempfile::tempdir()?;
            let output = scratch.path().join(format!(
                "{}_pre{}",
                source.stem(),
                source.extension_suffix()
            ));
            self.toolchain.preprocess(source, config, &output)?;
            Some(fs::read(&output)?)
            // `scratch` drops here on success and on either error path.
        } else {
            None
        };

        Ok(Fingerprint::of_build_inputs(
            source,
            &source_bytes,
            preprocessed.as_deref(),
            config,
        ))
    }
}
