//! End-to-end exercises of the build-or-reuse protocol with a stub
//! toolchain that counts its invocations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kiln_cache::CacheStore;
use kiln_core::{BuildConfig, SourceUnit};
use kiln_plugin::{BuildError, BuildOptions, DynamicLoader, PluginBuilder, PluginLoader};
use kiln_toolchain::{Toolchain, ToolchainError};
use tempfile::TempDir;

#[derive(Debug, Default)]
struct Counters {
    preprocess: AtomicUsize,
    compile: AtomicUsize,
}

impl Counters {
    fn preprocess_count(&self) -> usize {
        self.preprocess.load(Ordering::SeqCst)
    }

    fn compile_count(&self) -> usize {
        self.compile.load(Ordering::SeqCst)
    }
}

/// Stands in for nvcc: "preprocessing" emits location pragmas and a
/// `__FILE__`-style quoted absolute path plus the source bytes (and the
/// bytes of an optional fake header), "compiling" copies the source bytes
/// under a stub prefix.
struct StubToolchain {
    counters: Arc<Counters>,
    header: Option<PathBuf>,
    fail_compile: bool,
}

impl StubToolchain {
    fn new(counters: Arc<Counters>) -> Self {
        Self {
            counters,
            header: None,
            fail_compile: false,
        }
    }
}

impl Toolchain for StubToolchain {
    fn invocation(&self) -> Result<String, ToolchainError> {
        Ok("stubcc --shared".to_string())
    }

    fn preprocess(
        &self,
        source: &SourceUnit,
        config: &BuildConfig,
        output: &Path,
    ) -> Result<(), ToolchainError> {
        self.counters.preprocess.fetch_add(1, Ordering::SeqCst);
        let path = source.path().to_string_lossy().replace('\\', "/");
        let mut expanded = format!(
            "# 1 \"{path}\"\nstatic const char *origin = \"{path}\";\n// entries: {}\n",
            config.entries().len()
        )
        .into_bytes();
        if let Some(header) = &self.header {
            expanded.extend_from_slice(&fs::read(header)?);
            expanded.push(b'\n');
        }
        expanded.extend_from_slice(&fs::read(source.path())?);
        fs::write(output, expanded)?;
        Ok(())
    }

    fn compile(
        &self,
        source: &SourceUnit,
        _config: &BuildConfig,
        output: &Path,
    ) -> Result<(), ToolchainError> {
        self.counters.compile.fetch_add(1, Ordering::SeqCst);
        if self.fail_compile {
            return Err(ToolchainError::CommandFailed {
                command: "stubcc --shared kernel.cu".to_string(),
                code: Some(1),
                output: "kernel.cu(1): error: nope".to_string(),
            });
        }
        let mut artifact = b"STUB-MODULE:".to_vec();
        artifact.extend_from_slice(&fs::read(source.path())?);
        fs::write(output, artifact)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StubHandle {
    artifact: PathBuf,
}

#[derive(Debug, Default)]
struct StubLoader {
    loads: Arc<AtomicUsize>,
}

impl PluginLoader for StubLoader {
    type Handle = StubHandle;

    fn load(&self, artifact: &Path) -> Result<StubHandle, kiln_plugin::LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(StubHandle {
            artifact: artifact.to_path_buf(),
        })
    }
}

fn write_source(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn builder_at(
    root: &Path,
    counters: Arc<Counters>,
    options: BuildOptions,
) -> PluginBuilder<StubToolchain, StubLoader> {
    let store = CacheStore::with_root(root).unwrap();
    PluginBuilder::with_options(
        StubToolchain::new(counters),
        StubLoader::default(),
        store,
        options,
    )
}

#[test]
fn miss_then_hit_compiles_exactly_once() {
    let tmp = TempDir::new().unwrap();
    let source = write_source(&tmp, "kernel.cu", "__global__ void k() {}");
    let counters = Arc::new(Counters::default());
    let builder = builder_at(&tmp.path().join("cache"), counters.clone(), BuildOptions::default());

    let first = builder.get_or_build(&source).unwrap();
    assert_eq!(counters.compile_count(), 1);
    assert!(first.artifact.is_file());
    assert_eq!(builder.store().entries().unwrap().len(), 1);

    let second = builder.get_or_build(&source).unwrap();
    assert_eq!(counters.compile_count(), 1, "hit must not recompile");
    assert_eq!(first, second);
}

#[test]
fn registry_short_circuits_fingerprinting() {
    let tmp = TempDir::new().unwrap();
    let source = write_source(&tmp, "kernel.cu", "__global__ void k() {}");
    let counters = Arc::new(Counters::default());
    let builder = builder_at(&tmp.path().join("cache"), counters.clone(), BuildOptions::default());

    builder.get_or_build(&source).unwrap();
    assert_eq!(counters.preprocess_count(), 1);

    builder.get_or_build(&source).unwrap();
    assert_eq!(
        counters.preprocess_count(),
        1,
        "second request must be served from the registry without re-fingerprinting"
    );
    assert_eq!(builder.registry().len(), 1);
}

#[test]
fn identical_content_at_a_second_path_hits_the_same_cache_entry() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("a")).unwrap();
    fs::create_dir_all(tmp.path().join("b")).unwrap();
    let source_a = write_source(&tmp, "a/kernel.cu", "__global__ void k() {}");
    let source_b = write_source(&tmp, "b/kernel.cu", "__global__ void k() {}");

    let counters = Arc::new(Counters::default());
    let builder = builder_at(&tmp.path().join("cache"), counters.clone(), BuildOptions::default());

    let first = builder.get_or_build(&source_a).unwrap();
    let second = builder.get_or_build(&source_b).unwrap();

    // Distinct registry identities, but the path-normalized fingerprints
    // match, so the second request reuses the published artifact.
    assert_eq!(counters.compile_count(), 1);
    assert_eq!(first.artifact, second.artifact);
    assert_eq!(builder.registry().len(), 2);
    assert_eq!(builder.store().entries().unwrap().len(), 1);
}

#[test]
fn separate_process_simulated_by_second_builder_reuses_the_artifact() {
    let tmp = TempDir::new().unwrap();
    let source = write_source(&tmp, "kernel.cu", "__global__ void k() {}");
    let cache_root = tmp.path().join("cache");

    let counters_one = Arc::new(Counters::default());
    let builder_one = builder_at(&cache_root, counters_one.clone(), BuildOptions::default());
    builder_one.get_or_build(&source).unwrap();
    assert_eq!(counters_one.compile_count(), 1);

    // Fresh builder, fresh registry, same cache root.
    let counters_two = Arc::new(Counters::default());
    let builder_two = builder_at(&cache_root, counters_two.clone(), BuildOptions::default());
    builder_two.get_or_build(&source).unwrap();
    assert_eq!(counters_two.compile_count(), 0, "artifact must be reused");
    assert_eq!(counters_two.preprocess_count(), 1, "fingerprint still computed");
}

#[test]
fn changed_config_builds_a_coexisting_second_artifact() {
    let tmp = TempDir::new().unwrap();
    let source = write_source(&tmp, "kernel.cu", "__global__ void k() {}");
    let cache_root = tmp.path().join("cache");

    let counters_one = Arc::new(Counters::default());
    let builder_one = builder_at(&cache_root, counters_one.clone(), BuildOptions::default());
    builder_one.get_or_build(&source).unwrap();

    let counters_two = Arc::new(Counters::default());
    let options_two = BuildOptions {
        cache_tag: "v2".to_string(),
        ..BuildOptions::default()
    };
    let builder_two = builder_at(&cache_root, counters_two.clone(), options_two);
    builder_two.get_or_build(&source).unwrap();

    assert_eq!(counters_two.compile_count(), 1, "new config must recompile");
    assert_eq!(builder_two.store().entries().unwrap().len(), 2);
}

#[test]
fn header_edit_invalidates_the_entry() {
    let tmp = TempDir::new().unwrap();
    let source = write_source(&tmp, "kernel.cu", "#include \"helpers.cuh\"");
    let header = write_source(&tmp, "helpers.cuh", "inline int helper() { return 1; }");
    let cache_root = tmp.path().join("cache");

    let build_once = |counters: Arc<Counters>| {
        let store = CacheStore::with_root(&cache_root).unwrap();
        let mut toolchain = StubToolchain::new(counters);
        toolchain.header = Some(header.clone());
        let builder = PluginBuilder::new(toolchain, StubLoader::default(), store);
        builder.get_or_build(&source).unwrap();
        builder.store().entries().unwrap().len()
    };

    let counters_one = Arc::new(Counters::default());
    assert_eq!(build_once(counters_one.clone()), 1);
    assert_eq!(counters_one.compile_count(), 1);

    fs::write(&header, "inline int helper() { return 2; }").unwrap();

    let counters_two = Arc::new(Counters::default());
    assert_eq!(build_once(counters_two.clone()), 2);
    assert_eq!(counters_two.compile_count(), 1, "edited header must recompile");
}

#[test]
fn disabling_header_hashing_skips_preprocessing_and_misses_header_edits() {
    let tmp = TempDir::new().unwrap();
    let source = write_source(&tmp, "kernel.cu", "#include \"helpers.cuh\"");
    let header = write_source(&tmp, "helpers.cuh", "inline int helper() { return 1; }");
    let cache_root = tmp.path().join("cache");

    let options = BuildOptions {
        hash_headers: false,
        ..BuildOptions::default()
    };

    let build_once = |counters: Arc<Counters>| {
        let store = CacheStore::with_root(&cache_root).unwrap();
        let mut toolchain = StubToolchain::new(counters);
        toolchain.header = Some(header.clone());
        let builder =
            PluginBuilder::with_options(toolchain, StubLoader::default(), store, options.clone());
        builder.get_or_build(&source).unwrap();
    };

    let counters_one = Arc::new(Counters::default());
    build_once(counters_one.clone());
    assert_eq!(counters_one.preprocess_count(), 0);
    assert_eq!(counters_one.compile_count(), 1);

    // The documented hazard of `hash_headers: false`: a header edit keeps
    // hitting the stale entry.
    fs::write(&header, "inline int helper() { return 2; }").unwrap();
    let counters_two = Arc::new(Counters::default());
    build_once(counters_two.clone());
    assert_eq!(counters_two.preprocess_count(), 0);
    assert_eq!(counters_two.compile_count(), 0);
}

#[test]
fn compile_failure_aborts_without_registering_or_publishing() {
    let tmp = TempDir::new().unwrap();
    let source = write_source(&tmp, "kernel.cu", "__global__ void k() {}");
    let counters = Arc::new(Counters::default());
    let store = CacheStore::with_root(tmp.path().join("cache")).unwrap();
    let mut toolchain = StubToolchain::new(counters.clone());
    toolchain.fail_compile = true;
    let builder = PluginBuilder::new(toolchain, StubLoader::default(), store);

    match builder.get_or_build(&source) {
        Err(BuildError::Toolchain(ToolchainError::CommandFailed { output, .. })) => {
            assert!(output.contains("error"));
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert!(builder.registry().is_empty());
    assert!(builder.store().entries().unwrap().is_empty());
}

#[test]
fn missing_source_is_a_hard_error() {
    let tmp = TempDir::new().unwrap();
    let counters = Arc::new(Counters::default());
    let builder = builder_at(&tmp.path().join("cache"), counters, BuildOptions::default());

    match builder.get_or_build(tmp.path().join("absent.cu")) {
        Err(BuildError::SourceRead { path, .. }) => {
            assert!(path.ends_with("absent.cu"));
        }
        other => panic!("expected SourceRead, got {other:?}"),
    }
}

#[test]
fn load_failure_is_fatal_and_nothing_is_registered() {
    let tmp = TempDir::new().unwrap();
    let source = write_source(&tmp, "kernel.cu", "__global__ void k() {}");
    let counters = Arc::new(Counters::default());
    let store = CacheStore::with_root(tmp.path().join("cache")).unwrap();
    // The stub "compiles" text bytes, which the real dynamic linker
    // rejects, so the publish succeeds and the load fails.
    let builder = PluginBuilder::new(
        StubToolchain::new(counters),
        DynamicLoader,
        store,
    );

    match builder.get_or_build(&source) {
        Err(BuildError::Load(_)) => {}
        other => panic!("expected Load error, got {other:?}"),
    }
    assert!(builder.registry().is_empty());
    // The artifact was published before the load failed; it stays, and the
    // failure is surfaced rather than silently repaired.
    assert_eq!(builder.store().entries().unwrap().len(), 1);
}
