use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Captured output from a subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// `stdout` + `stderr` concatenated with a newline separator when needed.
    pub fn combined(&self) -> String {
        let mut combined = String::new();
        combined.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

/// Runs external commands and captures their output.
///
/// Injected wherever kiln shells out so tests can substitute a fake.
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    fn run(&self, cwd: &Path, program: &Path, args: &[String]) -> io::Result<CommandOutput>;
}

/// Spawns the command with both output streams piped, draining them on
/// reader threads.
#[derive(Debug, Clone, Default)]
pub struct DefaultCommandRunner {
    /// Optional best-effort timeout, enforced by polling the child and
    /// killing it when exceeded. Subprocesses the tool itself spawned may
    /// survive the kill; process trees are platform-dependent.
    pub timeout: Option<Duration>,
}

impl CommandRunner for DefaultCommandRunner {
    fn run(&self, cwd: &Path, program: &Path, args: &[String]) -> io::Result<CommandOutput> {
        let command = format_command(program, args);
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| io::Error::new(err.kind(), format!("failed to spawn `{command}`: {err}")))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("failed to capture stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("failed to capture stderr"))?;

        let stdout_handle = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            buf
        });
        let stderr_handle = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        });

        let status_result = match self.timeout {
            None => child.wait(),
            Some(timeout) => {
                let start = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break Ok(status);
                    }
                    if start.elapsed() >= timeout {
                        break Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("command `{command}` timed out after {timeout:?}"),
                        ));
                    }
                    thread::sleep(Duration::from_millis(20));
                }
            }
        };

        if status_result.is_err() {
            let _ = child.kill();
            let _ = child.wait();
        }

        let stdout_bytes = stdout_handle.join().unwrap_or_default();
        let stderr_bytes = stderr_handle.join().unwrap_or_default();
        let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

        let status = match status_result {
            Ok(status) => status,
            Err(err) => {
                // Preserve whatever output was captured before the failure.
                let mut message = err.to_string();
                if !stdout.is_empty() {
                    message.push_str("\nstdout:\n");
                    message.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    message.push_str("\nstderr:\n");
                    message.push_str(&stderr);
                }
                return Err(io::Error::new(err.kind(), message));
            }
        };

        tracing::debug!(
            target = "kiln.toolchain",
            %command,
            code = ?status.code(),
            "toolchain command finished"
        );

        Ok(CommandOutput {
            status,
            stdout,
            stderr,
        })
    }
}

/// Render a program + argument list the way it would be typed in a shell,
/// for diagnostics only.
pub fn format_command(program: &Path, args: &[String]) -> String {
    let mut out = program.to_string_lossy().into_owned();
    for arg in args {
        out.push(' ');
        if arg.contains(' ') {
            out.push('"');
            out.push_str(arg);
            out.push('"');
        } else {
            out.push_str(arg);
        }
    }
    out
}
