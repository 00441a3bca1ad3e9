use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use kiln_core::{BuildConfig, SourceUnit};

use crate::command::{format_command, CommandOutput, CommandRunner, DefaultCommandRunner};
use crate::error::ToolchainError;
use crate::Toolchain;

/// Host-compiler installations nvcc can be pointed at on Windows. nvcc
/// finds its own host compiler on Linux, so absence is only fatal there.
const COMPILER_BINDIR_SEARCH_PATH: &[&str] = &[
    "C:/Program Files (x86)/Microsoft Visual Studio/2017/Community/VC/Tools/MSVC/14.14.26428/bin/Hostx64/x64",
    "C:/Program Files (x86)/Microsoft Visual Studio/2019/Community/VC/Tools/MSVC/14.23.28105/bin/Hostx64/x64",
    "C:/Program Files (x86)/Microsoft Visual Studio 14.0/vc/bin",
];

const NVIDIA_SMI: &str = "nvidia-smi";

/// Configuration for the nvcc adapter.
#[derive(Debug, Clone)]
pub struct NvccConfig {
    /// Path to the `nvcc` executable.
    pub nvcc_path: PathBuf,
    /// Include directories of the host runtime the kernels compile against.
    pub include_paths: Vec<PathBuf>,
    /// Host-runtime library linked into the compiled module.
    pub runtime_library: Option<PathBuf>,
    /// GPU architecture string (e.g. `sm_86`). When unset, the adapter
    /// queries the first local GPU via `nvidia-smi`.
    pub gpu_arch: Option<String>,
    /// Candidate host-compiler directories, first existing one wins.
    pub compiler_bindir_search_path: Vec<PathBuf>,
}

impl Default for NvccConfig {
    fn default() -> Self {
        Self {
            nvcc_path: PathBuf::from("nvcc"),
            include_paths: Vec::new(),
            runtime_library: None,
            gpu_arch: None,
            compiler_bindir_search_path: COMPILER_BINDIR_SEARCH_PATH
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

impl NvccConfig {
    /// Default configuration, honoring `CUDA_PATH` for the nvcc location.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(cuda_path) = std::env::var_os("CUDA_PATH") {
            config.nvcc_path = Path::new(&cuda_path).join("bin").join("nvcc");
        }
        config
    }
}

/// Toolchain adapter invoking NVIDIA's `nvcc`.
///
/// The compile invocation (include paths, host compiler, GPU architecture,
/// optimization flags) is assembled once per adapter instance; the
/// architecture query shells out to `nvidia-smi` only when no override is
/// configured.
#[derive(Debug)]
pub struct NvccToolchain {
    config: NvccConfig,
    runner: Arc<dyn CommandRunner>,
    compile_args: OnceLock<Vec<String>>,
}

impl NvccToolchain {
    pub fn new(config: NvccConfig) -> Self {
        Self::with_runner(config, Arc::new(DefaultCommandRunner::default()))
    }

    pub fn with_runner(config: NvccConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            compile_args: OnceLock::new(),
        }
    }

    /// First existing directory from the host-compiler search path.
    fn find_compiler_bindir(&self) -> Option<&Path> {
        self.config
            .compiler_bindir_search_path
            .iter()
            .map(PathBuf::as_path)
            .find(|candidate| candidate.is_dir())
    }

    /// Flags shared by the preprocess and compile invocations.
    fn base_args(&self) -> Result<Vec<String>, ToolchainError> {
        let mut args = vec!["--disable-warnings".to_string()];
        for include in &self.config.include_paths {
            args.push("--include-path".to_string());
            args.push(include.display().to_string());
        }

        match self.find_compiler_bindir() {
            Some(bindir) => {
                args.push("--compiler-bindir".to_string());
                args.push(bindir.display().to_string());
            }
            // nvcc picks its own default host compiler on non-Windows
            // systems; on Windows a located installation is required.
            None if cfg!(windows) => {
                return Err(ToolchainError::CompilerNotFound {
                    searched: self.config.compiler_bindir_search_path.clone(),
                });
            }
            None => {}
        }

        Ok(args)
    }

    fn gpu_arch(&self) -> Result<String, ToolchainError> {
        if let Some(arch) = &self.config.gpu_arch {
            return Ok(arch.clone());
        }

        let args = vec![
            "--query-gpu=compute_cap".to_string(),
            "--format=csv,noheader".to_string(),
        ];
        let output = self
            .runner
            .run(Path::new("."), Path::new(NVIDIA_SMI), &args)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => ToolchainError::MissingTool {
                    tool: PathBuf::from(NVIDIA_SMI),
                },
                _ => ToolchainError::Io(err),
            })?;
        if !output.status.success() {
            return Err(ToolchainError::ArchUnavailable {
                reason: format!(
                    "`{NVIDIA_SMI}` exited with {:?}: {}",
                    output.status.code(),
                    output.combined().trim()
                ),
            });
        }

        let arch = parse_compute_cap(&output.stdout)?;
        tracing::debug!(target = "kiln.toolchain", %arch, "detected GPU architecture");
        Ok(arch)
    }

    /// The full compile flag set, assembled once.
    fn compile_args(&self) -> Result<Vec<String>, ToolchainError> {
        if let Some(cached) = self.compile_args.get() {
            return Ok(cached.clone());
        }

        let mut args = self.base_args()?;
        if let Some(library) = &self.config.runtime_library {
            args.push(library.display().to_string());
        }
        if cfg!(unix) {
            args.push("--compiler-options".to_string());
            args.push("-fPIC".to_string());
        }
        args.push(format!("--gpu-architecture={}", self.gpu_arch()?));
        args.push("--use_fast_math".to_string());

        Ok(self.compile_args.get_or_init(|| args).clone())
    }

    fn run_nvcc(&self, cwd: &Path, args: &[String]) -> Result<(), ToolchainError> {
        let output = self
            .runner
            .run(cwd, &self.config.nvcc_path, args)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => ToolchainError::MissingTool {
                    tool: self.config.nvcc_path.clone(),
                },
                _ => ToolchainError::Io(err),
            })?;
        if !output.status.success() {
            return Err(command_failed(&self.config.nvcc_path, args, &output));
        }
        Ok(())
    }
}

impl Toolchain for NvccToolchain {
    fn invocation(&self) -> Result<String, ToolchainError> {
        Ok(format_command(&self.config.nvcc_path, &self.compile_args()?))
    }

    fn preprocess(
        &self,
        source: &SourceUnit,
        _config: &BuildConfig,
        output: &Path,
    ) -> Result<(), ToolchainError> {
        let scratch = scratch_dir(output);
        let mut args = self.base_args()?;
        args.push(source.path().display().to_string());
        args.push("--preprocess".to_string());
        args.push("-o".to_string());
        args.push(output.display().to_string());
        push_keep_dir(&mut args, scratch);

        tracing::debug!(
            target = "kiln.toolchain",
            source = %source.short_name(),
            "preprocessing"
        );
        self.run_nvcc(scratch, &args)
    }

    fn compile(
        &self,
        source: &SourceUnit,
        _config: &BuildConfig,
        output: &Path,
    ) -> Result<(), ToolchainError> {
        let scratch = scratch_dir(output);
        let mut args = self.compile_args()?;
        args.push(source.path().display().to_string());
        args.push("--shared".to_string());
        args.push("-o".to_string());
        args.push(output.display().to_string());
        push_keep_dir(&mut args, scratch);

        tracing::debug!(
            target = "kiln.toolchain",
            source = %source.short_name(),
            "compiling"
        );
        self.run_nvcc(scratch, &args)
    }
}

/// Keep nvcc's intermediate files inside the caller's scratch directory so
/// they vanish with it.
fn push_keep_dir(args: &mut Vec<String>, scratch: &Path) {
    args.push("--keep".to_string());
    args.push("--keep-dir".to_string());
    args.push(scratch.display().to_string());
}

fn scratch_dir(output: &Path) -> &Path {
    output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn command_failed(program: &Path, args: &[String], output: &CommandOutput) -> ToolchainError {
    ToolchainError::CommandFailed {
        command: format_command(program, args),
        code: output.status.code(),
        output: output.combined(),
    }
}

/// Convert `nvidia-smi` compute-capability output (`8.6`) into an nvcc
/// architecture string (`sm_86`).
fn parse_compute_cap(stdout: &str) -> Result<String, ToolchainError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| ToolchainError::ArchUnavailable {
            reason: "no GPU devices reported".to_string(),
        })?;

    let parsed = line.split_once('.').and_then(|(major, minor)| {
        let major: u32 = major.parse().ok()?;
        let minor: u32 = minor.parse().ok()?;
        Some(format!("sm_{major}{minor}"))
    });
    parsed.ok_or_else(|| ToolchainError::ArchUnavailable {
        reason: format!("unrecognized compute capability {line:?}"),
    })
}
