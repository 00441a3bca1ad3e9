use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kiln_cache::{CacheConfig, CacheStore, Fingerprint};
use kiln_plugin::{BuildOptions, DynamicLoader, PluginBuilder};
use kiln_toolchain::{NvccConfig, NvccToolchain};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "kiln", version, about = "Kiln CLI (plugin build cache)")]
struct Cli {
    /// Increase log verbosity (-v: info, -vv: debug). `RUST_LOG` wins.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a kernel source into a loadable module, reusing the cache
    Build(BuildArgs),
    /// Inspect or empty the artifact cache
    Cache(CacheArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Kernel source file to build
    source: PathBuf,
    /// Cache root (defaults to `KILN_CACHE_DIR` or `~/.kiln/cache`)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Path to the `nvcc` executable (defaults to `CUDA_PATH`/bin/nvcc)
    #[arg(long)]
    nvcc: Option<PathBuf>,
    /// Extra include directory for the host runtime (repeatable)
    #[arg(long = "include")]
    include_paths: Vec<PathBuf>,
    /// Host-runtime library linked into the module
    #[arg(long)]
    runtime_lib: Option<PathBuf>,
    /// Host-runtime version tag folded into the fingerprint
    #[arg(long, default_value = "")]
    runtime_tag: String,
    /// Cache-format tag folded into the fingerprint
    #[arg(long, default_value = "v1")]
    cache_tag: String,
    /// GPU architecture (e.g. `sm_86`); autodetected via nvidia-smi if unset
    #[arg(long)]
    arch: Option<String>,
    /// Skip hashing the preprocessed source. Faster, but edits to included
    /// headers will silently reuse stale artifacts
    #[arg(long)]
    no_header_hash: bool,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
    /// Cache root (defaults to `KILN_CACHE_DIR` or `~/.kiln/cache`)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// List published artifacts
    Status,
    /// Remove every published artifact
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Build(args) => run_build(args),
        Command::Cache(args) => run_cache(args),
    }
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Serialize)]
struct BuildReport<'a> {
    source: &'a Path,
    artifact: &'a Path,
    fingerprint: Option<Fingerprint>,
}

fn run_build(args: BuildArgs) -> Result<()> {
    let mut nvcc_config = NvccConfig::from_env();
    if let Some(nvcc) = args.nvcc {
        nvcc_config.nvcc_path = nvcc;
    }
    nvcc_config.include_paths.extend(args.include_paths);
    nvcc_config.runtime_library = args.runtime_lib;
    nvcc_config.gpu_arch = args.arch;
    let toolchain = NvccToolchain::new(nvcc_config);

    let store = CacheStore::new(&cache_config(args.cache_dir))
        .context("failed to open the artifact cache")?;
    let options = BuildOptions {
        hash_headers: !args.no_header_hash,
        runtime_tag: args.runtime_tag,
        cache_tag: args.cache_tag,
    };

    let builder = PluginBuilder::with_options(toolchain, DynamicLoader, store, options);
    let plugin = builder
        .get_or_build(&args.source)
        .with_context(|| format!("failed to build {}", args.source.display()))?;

    tracing::debug!(
        target = "kiln.cli",
        artifact = %plugin.path().display(),
        "build finished"
    );
    let report = BuildReport {
        source: &args.source,
        artifact: plugin.path(),
        fingerprint: fingerprint_from_artifact_name(plugin.path()),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.artifact.display());
    }
    Ok(())
}

fn run_cache(args: CacheArgs) -> Result<()> {
    let store = CacheStore::new(&cache_config(args.cache_dir))
        .context("failed to open the artifact cache")?;

    match args.command {
        CacheCommand::Status => {
            let entries = store.entries().context("failed to list the cache")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("cache at {} is empty", store.root().display());
            } else {
                for entry in entries {
                    println!(
                        "{}\t{}\t{} bytes",
                        entry.stem, entry.fingerprint, entry.size_bytes
                    );
                }
            }
        }
        CacheCommand::Clean => {
            let removed = store.clean().context("failed to clean the cache")?;
            if args.json {
                println!("{}", serde_json::json!({ "removed": removed }));
            } else {
                println!("removed {removed} file(s) from {}", store.root().display());
            }
        }
    }
    Ok(())
}

fn cache_config(cache_dir: Option<PathBuf>) -> CacheConfig {
    let mut config = CacheConfig::from_env();
    if let Some(dir) = cache_dir {
        config.cache_root_override = Some(dir);
    }
    config
}

/// Fingerprints are recoverable from artifact names
/// (`<stem>_<hex>.<ext>`); used for reporting only.
fn fingerprint_from_artifact_name(artifact: &Path) -> Option<Fingerprint> {
    let stem = artifact.file_stem()?.to_str()?;
    let (_, hex) = stem.rsplit_once('_')?;
    Fingerprint::from_hex(hex)
}
